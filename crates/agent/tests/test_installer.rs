//! Tests for package installs and the universal installer

mod common;

use common::Fixture;
use omnigate_agent::handlers::backup::list_backups;
use omnigate_agent::handlers::installer::{detect_manifests, SCRIPT_NAME};
use omnigate_agent::handlers::{InstallerBuildHandler, InstallerRunHandler, PackageInstallHandler};
use omnigate_agent::{ApprovalGate, HandlerRegistry};
use omnigate_config::InstallPolicy;
use omnigate_session::{ActionKind, SessionContext};
use serde_json::json;

fn gate(fx: &Fixture) -> ApprovalGate {
    let mut registry = HandlerRegistry::new();
    registry.register(InstallerBuildHandler::new(fx.root.clone(), &fx.logger));
    registry.register(InstallerRunHandler::new(InstallPolicy::default(), &fx.logger));
    registry.register(PackageInstallHandler::new(
        fx.root.clone(),
        InstallPolicy::default(),
        &fx.logger,
    ));
    ApprovalGate::new(registry, &fx.logger)
}

#[tokio::test]
async fn test_detect_manifests() {
    let fx = Fixture::new();
    fx.write("proj/requirements.txt", "requests\n");
    fx.write("proj/Makefile", "all:\n");

    let detected = detect_manifests(&fx.root.join("proj"));
    assert_eq!(detected, vec!["requirements.txt", "Makefile"]);
}

#[tokio::test]
async fn test_build_then_stage_run() {
    let fx = Fixture::new();
    fx.write("proj/requirements.txt", "requests\n");
    fx.write("proj/package.json", "{}");
    let gate = gate(&fx);
    let mut session = SessionContext::new("s1");

    let prompt = gate
        .propose(
            ActionKind::InstallerBuild,
            json!({"project": "proj"}),
            &mut session,
        )
        .await;
    assert!(prompt.contains("- requirements.txt"));
    assert!(prompt.contains("- package.json"));

    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    assert!(reply.starts_with("Universal installer created at"));

    let script = fx.root.join("proj").join(SCRIPT_NAME);
    let body = std::fs::read_to_string(&script).unwrap();
    assert_eq!(
        body,
        "#!/bin/bash\nset -e\npip install -r requirements.txt\nnpm install\n"
    );
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o770);
    }

    // Building stages the run step
    assert!(session.pending.contains(ActionKind::InstallerRun));
    let reply = gate.resolve_next("not now", &mut session).await.unwrap();
    assert_eq!(reply, "Universal installer run cancelled.");
    assert!(session.pending.is_empty());
    assert!(fx
        .events()
        .contains(&"universal_installer_created".to_string()));
}

#[tokio::test]
async fn test_approved_run_executes_script() {
    let fx = Fixture::new();
    fx.write("proj/Makefile", "all:\n");
    let gate = gate(&fx);
    let mut session = SessionContext::new("s1");

    gate.propose(
        ActionKind::InstallerBuild,
        json!({"project": "proj"}),
        &mut session,
    )
    .await;
    gate.resolve_next("yes", &mut session).await.unwrap();

    // Swap in a script that needs no toolchain
    let script = fx.root.join("proj").join(SCRIPT_NAME);
    std::fs::write(&script, "#!/bin/bash\necho installer-ran\n").unwrap();

    let reply = gate.resolve_next("ok", &mut session).await.unwrap();
    assert!(reply.starts_with("Installer script ran. Output:"));
    assert!(reply.contains("installer-ran"));
    assert!(fx.events().contains(&"run_installer".to_string()));
}

#[tokio::test]
async fn test_rebuild_backs_up_existing_script() {
    let fx = Fixture::new();
    fx.write("proj/requirements.txt", "requests\n");
    let old = fx.write(&format!("proj/{}", SCRIPT_NAME), "#!/bin/bash\necho old\n");
    let gate = gate(&fx);
    let mut session = SessionContext::new("s1");

    gate.propose(
        ActionKind::InstallerBuild,
        json!({"project": "proj"}),
        &mut session,
    )
    .await;
    gate.resolve_next("yes", &mut session).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(&old).unwrap(),
        "#!/bin/bash\nset -e\npip install -r requirements.txt\n"
    );
    let backups = list_backups(&old).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(
        std::fs::read_to_string(&backups[0]).unwrap(),
        "#!/bin/bash\necho old\n"
    );
    assert!(fx.events().contains(&"backup_file".to_string()));
}

#[tokio::test]
async fn test_nothing_to_build() {
    let fx = Fixture::new();
    fx.write("empty/README.md", "hi");
    let gate = gate(&fx);
    let mut session = SessionContext::new("s1");

    let reply = gate
        .propose(
            ActionKind::InstallerBuild,
            json!({"project": "empty"}),
            &mut session,
        )
        .await;
    assert!(reply.starts_with("No installer files found in"));
    assert!(session.pending.is_empty());
}

#[tokio::test]
async fn test_installer_run_cannot_be_proposed_directly() {
    let fx = Fixture::new();
    let gate = gate(&fx);
    let mut session = SessionContext::new("s1");

    let reply = gate
        .propose(ActionKind::InstallerRun, json!({}), &mut session)
        .await;
    assert_eq!(reply, "◆ installer_run IS STAGED BY installer_build");
    assert!(session.pending.is_empty());
}

#[tokio::test]
async fn test_package_install_validation() {
    let fx = Fixture::new();
    let gate = gate(&fx);
    let mut session = SessionContext::new("s1");

    let reply = gate
        .propose(
            ActionKind::PackageInstall,
            json!({"manager": "pip"}),
            &mut session,
        )
        .await;
    assert_eq!(reply, "No package specified for pip install.");

    let reply = gate
        .propose(
            ActionKind::PackageInstall,
            json!({"manager": "pip", "package": "x; rm -rf /"}),
            &mut session,
        )
        .await;
    assert!(reply.starts_with("◆ INVALID PACKAGE"));
    assert!(session.pending.is_empty());

    let prompt = gate
        .propose(
            ActionKind::PackageInstall,
            json!({"manager": "pip", "package": "requests==2.31.0"}),
            &mut session,
        )
        .await;
    assert_eq!(
        prompt,
        "Agent wants to run `pip install requests==2.31.0`. Ok to run? (yes/ok/approve)"
    );
    let reply = gate.resolve_next("no", &mut session).await.unwrap();
    assert_eq!(reply, "pip install cancelled.");
}
