//! Tests for dependency audits, code search, docstring formatting and UI
//! sandbox writes

mod common;

use common::{entries, Fixture};
use omnigate_agent::handlers::backup::list_backups;
use omnigate_agent::handlers::{
    CodeSearchHandler, DocFormatHandler, FileEditHandler, PipAuditHandler,
};
use omnigate_agent::{ApprovalGate, HandlerRegistry};
use omnigate_config::{FilePolicy, ToolsPolicy};
use omnigate_session::{ActionKind, PendingPayload, SessionContext};
use serde_json::json;

/// Tools replaced by binaries every test host has
fn stand_in_tools() -> ToolsPolicy {
    ToolsPolicy {
        pip_audit: "echo".to_string(),
        ripgrep: "echo".to_string(),
        docformatter: "echo".to_string(),
        ..ToolsPolicy::default()
    }
}

fn gate(fx: &Fixture, tools: ToolsPolicy) -> ApprovalGate {
    let mut registry = HandlerRegistry::new();
    registry.register(PipAuditHandler::new(fx.root.clone(), tools.clone(), &fx.logger));
    registry.register(CodeSearchHandler::new(
        fx.root.clone(),
        tools.clone(),
        &fx.logger,
    ));
    registry.register(DocFormatHandler::new(fx.root.clone(), tools, &fx.logger));
    let sandbox = fx.base().join("ui_sandbox");
    registry.register(
        FileEditHandler::ui_sandbox(sandbox, FilePolicy::default(), &fx.logger)
            .with_scratch_dir(fx.scratch.clone()),
    );
    ApprovalGate::new(registry, &fx.logger)
}

fn rg_available() -> bool {
    std::process::Command::new("rg")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

// ============================================================================
// pip-audit
// ============================================================================

#[tokio::test]
async fn test_pip_audit_runs_after_approval() {
    let fx = Fixture::new();
    fx.write("app/requirements.txt", "flask\n");
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    let prompt = gate
        .propose(ActionKind::PipAudit, json!({"path": "app"}), &mut session)
        .await;
    assert!(prompt.starts_with("Agent wants to run pip-audit in"));
    assert!(prompt.contains("Run audit?"));

    let reply = gate.resolve_next("approve", &mut session).await.unwrap();
    assert!(reply.starts_with("pip-audit results:\n--no-deps"), "got: {}", reply);
    assert!(session.pending.is_empty());
    assert!(fx.events().contains(&"pip_audit".to_string()));
}

#[tokio::test]
async fn test_pip_audit_denied_and_missing_project() {
    let fx = Fixture::new();
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    let reply = gate
        .propose(ActionKind::PipAudit, json!({"path": "nowhere"}), &mut session)
        .await;
    assert!(reply.starts_with("◆ NO PROJECT AT:"));
    assert!(session.pending.is_empty());

    gate.propose(ActionKind::PipAudit, json!({}), &mut session).await;
    let reply = gate.resolve_next("no", &mut session).await.unwrap();
    assert_eq!(reply, "pip-audit cancelled.");
    assert!(fx.events().contains(&"pip_audit_cancelled".to_string()));
}

#[tokio::test]
async fn test_pip_audit_missing_tool_is_reported() {
    let fx = Fixture::new();
    let tools = ToolsPolicy {
        pip_audit: "/nonexistent/pip-audit".to_string(),
        ..ToolsPolicy::default()
    };
    let gate = gate(&fx, tools);
    let mut session = SessionContext::new("s1");

    gate.propose(ActionKind::PipAudit, json!({}), &mut session).await;
    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    assert!(reply.starts_with("pip-audit error:"), "got: {}", reply);
    assert!(fx.events().contains(&"pip_audit_fail".to_string()));
}

// ============================================================================
// Code search
// ============================================================================

#[tokio::test]
async fn test_code_search_passes_pattern_as_argument() {
    let fx = Fixture::new();
    std::fs::create_dir(fx.root.join("src")).unwrap();
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    let prompt = gate
        .propose(
            ActionKind::CodeSearch,
            json!({"pattern": "-rf", "project_dir": "src"}),
            &mut session,
        )
        .await;
    assert!(prompt.contains("for `-rf`"));

    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    let expected = format!(
        "[ripgrep search result]\n--color never -n -H -C1 -e -rf -- {}",
        fx.root.join("src").display()
    );
    assert_eq!(reply, expected);
    assert!(fx.events().contains(&"code_search".to_string()));
}

#[tokio::test]
async fn test_code_search_validation_and_outcomes() {
    let fx = Fixture::new();
    let mut session = SessionContext::new("s1");

    let gate_with = |ripgrep: &str| {
        gate(
            &fx,
            ToolsPolicy {
                ripgrep: ripgrep.to_string(),
                ..ToolsPolicy::default()
            },
        )
    };

    let search = gate_with("false");
    let reply = search
        .propose(ActionKind::CodeSearch, json!({"pattern": "  "}), &mut session)
        .await;
    assert_eq!(reply, "Please specify a non-empty search pattern.");

    let reply = search
        .propose(
            ActionKind::CodeSearch,
            json!({"pattern": "x", "project_dir": "/etc"}),
            &mut session,
        )
        .await;
    assert!(reply.contains("is outside allowed root"));

    // rg exits 1 with no output when nothing matches
    search
        .propose(ActionKind::CodeSearch, json!({"pattern": "needle"}), &mut session)
        .await;
    let reply = search.resolve_next("ok", &mut session).await.unwrap();
    assert!(reply.starts_with("No matches for `needle`"), "got: {}", reply);

    let missing = gate_with("/nonexistent/rg");
    missing
        .propose(ActionKind::CodeSearch, json!({"pattern": "needle"}), &mut session)
        .await;
    let reply = missing.resolve_next("ok", &mut session).await.unwrap();
    assert_eq!(reply, "ripgrep (rg) is not installed or not found in PATH.");

    missing
        .propose(ActionKind::CodeSearch, json!({"pattern": "needle"}), &mut session)
        .await;
    let reply = missing.resolve_next("nope", &mut session).await.unwrap();
    assert_eq!(reply, "Code search was not approved.");
}

#[tokio::test]
async fn test_code_search_with_ripgrep() {
    if !rg_available() {
        eprintln!("rg not installed; skipping");
        return;
    }
    let fx = Fixture::new();
    fx.write("lib/a.py", "import os\ndef needle_fn():\n    pass\n");
    fx.write("lib/b.py", "print('hay')\n");
    let tools = ToolsPolicy {
        max_search_lines: 2,
        ..ToolsPolicy::default()
    };
    let gate = gate(&fx, tools);
    let mut session = SessionContext::new("s1");

    gate.propose(
        ActionKind::CodeSearch,
        json!({"pattern": "needle_fn", "project_dir": "lib"}),
        &mut session,
    )
    .await;
    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    assert!(reply.starts_with("[ripgrep search result]\n"));
    assert!(reply.contains("a.py"));
    assert!(!reply.contains("b.py"));
    assert!(reply.ends_with("(Clipped to the first 2 lines.)"), "got: {}", reply);
}

// ============================================================================
// Docstring formatting
// ============================================================================

#[tokio::test]
async fn test_doc_format_backs_up_before_running() {
    let fx = Fixture::new();
    let target = fx.write("pkg/mod.py", "def f():\n    '''doc'''\n");
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    let prompt = gate
        .propose(
            ActionKind::DocFormat,
            json!({"target_path": "pkg/mod.py"}),
            &mut session,
        )
        .await;
    assert!(prompt.starts_with("Agent wants to auto-generate/fix docstrings for"));
    assert!(list_backups(&target).await.unwrap().is_empty());

    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    assert!(reply.starts_with("Docstring formatting done for"));
    assert!(reply.contains(&format!("-i {}", target.display())));

    let backups = list_backups(&target).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(
        std::fs::read_to_string(&backups[0]).unwrap(),
        "def f():\n    '''doc'''\n"
    );
    let events = fx.events();
    assert!(events.contains(&"backup_file".to_string()));
    assert!(events.contains(&"doc_gen".to_string()));
}

#[tokio::test]
async fn test_doc_format_rejects_missing_file() {
    let fx = Fixture::new();
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    let reply = gate
        .propose(ActionKind::DocFormat, json!({"path": "ghost.py"}), &mut session)
        .await;
    assert!(reply.starts_with("Target file does not exist:"));

    let reply = gate
        .propose(ActionKind::DocFormat, json!({"path": ""}), &mut session)
        .await;
    assert_eq!(reply, "No target path specified.");
    assert!(session.pending.is_empty());
}

// ============================================================================
// UI sandbox
// ============================================================================

#[tokio::test]
async fn test_ui_file_write_lands_in_sandbox() {
    let fx = Fixture::new();
    let sandbox = fx.base().join("ui_sandbox");
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    let prompt = gate
        .propose(
            ActionKind::UiFileWrite,
            json!({"path": "pages/index.html", "content": "<h1>hi</h1>\n"}),
            &mut session,
        )
        .await;
    assert!(prompt.starts_with("I'd like to create the file:"));
    assert!(sandbox.is_dir());
    match &session.pending.get(ActionKind::UiFileWrite).unwrap().payload {
        PendingPayload::UiFileWrite(change) => assert!(!change.existed),
        other => panic!("unexpected payload {:?}", other),
    }

    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    let target = sandbox.join("pages/index.html");
    assert_eq!(
        reply,
        format!("UI file '{}' saved. (Backup: N/A)", target.display())
    );
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "<h1>hi</h1>\n");
    assert!(entries(&fx.scratch).is_empty());

    let events = fx.events();
    assert!(events.contains(&"ui_file_prepare".to_string()));
    assert!(events.contains(&"ui_file_written".to_string()));
}

#[tokio::test]
async fn test_ui_file_update_backs_up_and_denial_discards() {
    let fx = Fixture::new();
    let sandbox = fx.base().join("ui_sandbox");
    std::fs::create_dir_all(&sandbox).unwrap();
    let target = sandbox.join("app.css");
    std::fs::write(&target, "body {}\n").unwrap();
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    gate.propose(
        ActionKind::UiFileWrite,
        json!({"path": "app.css", "content": "body { margin: 0 }\n"}),
        &mut session,
    )
    .await;
    let reply = gate.resolve_next("no", &mut session).await.unwrap();
    assert_eq!(reply, "UI file write not approved. Cancelling.");
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "body {}\n");
    assert!(entries(&fx.scratch).is_empty());
    assert!(fx.events().contains(&"ui_file_cancelled".to_string()));

    gate.propose(
        ActionKind::UiFileWrite,
        json!({"path": "app.css", "content": "body { margin: 0 }\n"}),
        &mut session,
    )
    .await;
    gate.resolve_next("yes", &mut session).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "body { margin: 0 }\n"
    );
    let backups = list_backups(&target).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), "body {}\n");
}

#[tokio::test]
async fn test_ui_file_write_confined_to_sandbox() {
    let fx = Fixture::new();
    let gate = gate(&fx, stand_in_tools());
    let mut session = SessionContext::new("s1");

    let reply = gate
        .propose(
            ActionKind::UiFileWrite,
            json!({"path": "../root/escape.html", "content": "x"}),
            &mut session,
        )
        .await;
    assert!(reply.contains("is outside allowed root"), "got: {}", reply);
    assert!(session.pending.is_empty());
    assert!(!fx.root.join("escape.html").exists());
}
