//! Tests for message routing in the session controller

mod common;

use async_trait::async_trait;
use common::Fixture;
use mockall::mock;
use omnigate_agent::SessionController;
use omnigate_provider::{ChatCompleter, ChatMessage, ProviderError};
use omnigate_session::{ActionKind, SessionContext};
use omnigate_tasks::ActionRequest;
use serde_json::json;
use std::sync::Arc;

mock! {
    pub Completer {}

    #[async_trait]
    impl ChatCompleter for Completer {
        async fn complete(&self, messages: Vec<ChatMessage>) -> omnigate_provider::Result<String>;
    }
}

const PIN: &str = "13579";

fn controller(fx: &Fixture) -> SessionController {
    SessionController::new(&fx.config(), &fx.logger, fx.vault())
}

async fn unlocked(controller: &mut SessionController) -> SessionContext {
    let mut session = SessionContext::new("s1");
    controller.handle_message(PIN, &mut session).await;
    assert!(session.is_unlocked());
    session
}

#[tokio::test]
async fn test_pin_required_first() {
    let fx = Fixture::new();
    let mut controller = controller(&fx);
    let mut session = SessionContext::new("s1");

    let reply = controller.handle_message("hello", &mut session).await;
    assert_eq!(reply.text(), "◆ Enter your 5-6 digit PIN:");

    let reply = controller.handle_message("pin: 1234", &mut session).await;
    assert_eq!(reply.text(), "◆ Enter your 5-6 digit PIN:");
    assert!(!session.is_unlocked());

    let reply = controller
        .handle_message(&format!("PIN: {}", PIN), &mut session)
        .await;
    assert_eq!(reply.text(), "◆ PIN accepted! Vault unlocked.");
    assert_eq!(session.pin(), Some(PIN));
}

#[tokio::test]
async fn test_wrong_pin_rejected() {
    let fx = Fixture::new();
    fx.vault().set_secret("TOKEN", "x", PIN).unwrap();
    let mut controller = controller(&fx);
    let mut session = SessionContext::new("s1");

    let reply = controller.handle_message("99999", &mut session).await;
    assert_eq!(reply.text(), "◆ Incorrect PIN. Try again.");
    assert!(!session.is_unlocked());
}

#[tokio::test]
async fn test_trust_toggles() {
    let fx = Fixture::new();
    let mut controller = controller(&fx);
    let mut session = unlocked(&mut controller).await;

    let reply = controller.handle_message("Trust Session", &mut session).await;
    assert!(reply.text().starts_with("◆ GLOBAL APPROVAL ENABLED"));
    assert!(session.global_approval);

    let reply = controller.handle_message("lock agent", &mut session).await;
    assert!(reply.text().starts_with("◆ GLOBAL APPROVAL DISABLED"));
    assert!(!session.global_approval);
}

#[tokio::test]
async fn test_view_file_bypasses_gate() {
    let fx = Fixture::new();
    fx.write("notes.md", "remember the milk");
    let mut controller = controller(&fx);
    let mut session = unlocked(&mut controller).await;

    let reply = controller
        .handle_message("view file notes.md", &mut session)
        .await;
    assert_eq!(reply.text(), "remember the milk");
    assert!(session.pending.is_empty());
}

#[tokio::test]
async fn test_find_symbol_reads_tags_without_gate() {
    let fx = Fixture::new();
    fx.write(
        "proj/tags",
        "load_config\tsrc/config.py\t/^def load_config():$/;\"\tf\nsave\tsrc/io.py\t/^def save():$/;\"\tf\n",
    );
    let mut controller = controller(&fx);
    let mut session = unlocked(&mut controller).await;

    let reply = controller
        .handle_message("find symbol load_config in proj", &mut session)
        .await;
    assert_eq!(
        reply.text(),
        "[ctags symbol search for 'load_config']\nload_config\tsrc/config.py\t/^def load_config():$/;\"\tf"
    );

    let reply = controller
        .handle_message("find symbol render in proj", &mut session)
        .await;
    assert_eq!(reply.text(), "No symbols matching 'render' found.");

    let reply = controller
        .handle_message("find symbol anything", &mut session)
        .await;
    assert!(reply.text().starts_with("No tags file found."));
    assert!(session.pending.is_empty());
    assert!(fx.events().contains(&"symbol_search_ctags".to_string()));
}

#[tokio::test]
async fn test_action_command_then_approval() {
    let fx = Fixture::new();
    let mut controller = controller(&fx);
    let mut session = unlocked(&mut controller).await;

    let reply = controller
        .handle_message(
            r#"/action file_change {"path": "out.txt", "content": "42"}"#,
            &mut session,
        )
        .await;
    assert!(reply.text().starts_with("I'd like to create the file:"));
    assert!(session.pending.contains(ActionKind::FileChange));

    let reply = controller.handle_message("yes", &mut session).await;
    assert!(reply.text().contains("created successfully"));
    assert_eq!(
        std::fs::read_to_string(fx.root.join("out.txt")).unwrap(),
        "42"
    );
}

#[tokio::test]
async fn test_bad_action_commands() {
    let fx = Fixture::new();
    let mut controller = controller(&fx);
    let mut session = unlocked(&mut controller).await;

    let reply = controller
        .handle_message("/action launch_rockets {}", &mut session)
        .await;
    assert_eq!(reply.text(), "◆ unknown action kind: launch_rockets");

    let reply = controller
        .handle_message("/action shell_command {not json", &mut session)
        .await;
    assert!(reply.text().starts_with("◆ INVALID PARAMETERS"));
}

#[tokio::test]
async fn test_secret_phrase_starts_workflow() {
    let fx = Fixture::new();
    let vault = fx.vault();
    let mut controller = controller(&fx);
    let mut session = unlocked(&mut controller).await;

    let reply = controller
        .handle_message("please store my GitHub PAT", &mut session)
        .await;
    assert_eq!(
        reply.text(),
        "I'll store 'GITHUB_PAT' securely in the vault. Is that ok?"
    );
    controller.handle_message("yes", &mut session).await;
    let reply = controller.handle_message("ghp_example", &mut session).await;
    assert_eq!(reply.text(), "◆ SECRET 'GITHUB_PAT' STORED SECURELY.");
    assert_eq!(
        vault.get_secret("GITHUB_PAT", PIN, false, 0).unwrap().as_deref(),
        Some("ghp_example")
    );

    let reply = controller
        .handle_message("store secret AWS_KEY", &mut session)
        .await;
    assert!(reply.text().contains("'AWS_KEY'"));
}

#[tokio::test]
async fn test_queued_tasks_drain_in_priority_order() {
    let fx = Fixture::new();
    let mut controller = controller(&fx);
    let mut session = unlocked(&mut controller).await;

    controller.schedule(
        ActionRequest::new(ActionKind::ShellCommand, json!({"command": "echo third"})),
        5,
    );
    controller.schedule(
        ActionRequest::new(ActionKind::ShellCommand, json!({"command": "echo first"})),
        1,
    );
    controller.schedule(
        ActionRequest::new(ActionKind::ApiCall, json!({"url": 7})),
        3,
    );

    let reply = controller.handle_message("status?", &mut session).await;
    let text = reply.text();
    let first = text.find("first").unwrap();
    let third = text.find("third").unwrap();
    assert!(first < third);
    // A bad task is reported and the drain continues
    assert!(text.contains("◆ INVALID PARAMETERS"));
    assert!(!controller.tasks().has_tasks());
    assert!(text.contains("◆ NO CHAT MODEL CONFIGURED"));
}

#[tokio::test]
async fn test_chat_fallback_uses_completer() {
    let fx = Fixture::new();
    let mut completer = MockCompleter::new();
    completer
        .expect_complete()
        .withf(|messages| {
            messages[0].role == "system"
                && messages[0].content.contains("- shell_command:")
                && messages.last().map(|m| m.content.as_str()) == Some("what can you do?")
        })
        .times(1)
        .returning(|_| Ok("x".repeat(1200)));

    let mut controller = controller(&fx).with_completer(Arc::new(completer));
    let mut session = unlocked(&mut controller).await;

    let reply = controller
        .handle_message("what can you do?", &mut session)
        .await;
    assert_eq!(reply.chunks.len(), 3);
    assert!(reply.chunks.iter().all(|c| c.chars().count() <= 500));
    assert_eq!(session.messages().len(), 2);
    assert!(fx.events().contains(&"agent_response".to_string()));
}

#[tokio::test]
async fn test_chat_error_is_reported() {
    let fx = Fixture::new();
    let mut completer = MockCompleter::new();
    completer
        .expect_complete()
        .returning(|_| Err(ProviderError::Api("rate limited".to_string())));

    let mut controller = controller(&fx).with_completer(Arc::new(completer));
    let mut session = unlocked(&mut controller).await;

    let reply = controller.handle_message("hi", &mut session).await;
    assert!(reply.text().starts_with("◆ AGENT ERROR:"));
    assert!(reply.text().contains("rate limited"));
    assert!(session.messages().is_empty());
    assert!(fx.events().contains(&"agent_error".to_string()));
}

#[tokio::test]
async fn test_handle_action_proposes() {
    let fx = Fixture::new();
    let controller = controller(&fx);
    let mut session = SessionContext::new("s1");

    let reply = controller
        .handle_action(
            ActionRequest::new(ActionKind::ShellCommand, json!({"command": "touch x"})),
            &mut session,
        )
        .await;
    assert!(reply.contains("Ok to run?"));
    assert!(session.pending.contains(ActionKind::ShellCommand));
}

#[test]
fn test_default_registry_covers_every_kind() {
    let fx = Fixture::new();
    let controller = controller(&fx);
    assert_eq!(controller.gate().registry().kinds(), ActionKind::ALL.to_vec());
    assert_eq!(controller.gate().registry().definitions().len(), 16);
}
