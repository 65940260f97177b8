//! Universal installer script: build, then run

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use omnigate_config::InstallPolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::{InstallerBuild, InstallerRun};
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::backup::{backup_file, write_atomic};
use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{clip, run_with_timeout, streams, RunOutcome};
use crate::util::truncate;
use crate::Result;

pub const SCRIPT_NAME: &str = "universal_installer.sh";

/// Manifest files, and the install step each one implies
const MANIFESTS: &[(&str, Option<&str>)] = &[
    ("setup.py", Some("pip install .")),
    ("requirements.txt", Some("pip install -r requirements.txt")),
    ("pyproject.toml", None),
    ("package.json", Some("npm install")),
    ("Dockerfile", Some("docker build -t myimage .")),
    ("Makefile", Some("make")),
];

/// Order the steps run in: dependencies before local builds
const STEP_ORDER: &[&str] = &[
    "requirements.txt",
    "package.json",
    "setup.py",
    "Makefile",
    "Dockerfile",
];

/// Manifest files present in `project`
pub fn detect_manifests(project: &Path) -> Vec<String> {
    MANIFESTS
        .iter()
        .filter(|(name, _)| project.join(name).exists())
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Script body for the detected manifests
pub fn installer_script(detected: &[String]) -> String {
    let steps: Vec<&str> = STEP_ORDER
        .iter()
        .filter(|name| detected.iter().any(|d| d == *name))
        .filter_map(|name| {
            MANIFESTS
                .iter()
                .find(|(manifest, _)| manifest == name)
                .and_then(|(_, step)| *step)
        })
        .collect();
    steps.join("\n")
}

/// Scans a project and writes an install script on approval
pub struct InstallerBuildHandler {
    root: PathBuf,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct BuildArgs {
    #[serde(alias = "project_dir")]
    project: Option<String>,
}

impl InstallerBuildHandler {
    pub fn new(root: PathBuf, logger: &EventLogger) -> Self {
        Self {
            root,
            logger: logger.scoped(["script_content"]),
        }
    }
}

#[async_trait]
impl ActionHandler for InstallerBuildHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::InstallerBuild
    }

    fn description(&self) -> &str {
        "Detect install manifests in a project and build an install script."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "project": { "type": "string", "description": "Project directory" }
            }
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: BuildArgs = serde_json::from_value(params)?;
        let project = match args.project.as_deref() {
            Some(dir) => confine_path(dir.trim(), &self.root).await?,
            None => self.root.clone(),
        };
        if !project.is_dir() {
            return Ok(Proposal::Rejected(format!(
                "◆ NOT A DIRECTORY: {}",
                project.display()
            )));
        }

        let detected = detect_manifests(&project);
        self.logger.log(
            "suggest_installer",
            json!({"project_path": project, "detected_files": detected}),
        );
        let script = installer_script(&detected);
        if script.is_empty() {
            return Ok(Proposal::Rejected(format!(
                "No installer files found in {}.",
                project.display()
            )));
        }

        let listing: Vec<String> = detected.iter().map(|f| format!("- {}", f)).collect();
        let prompt = format!(
            "Detected installer files:\n{}\n\nI can combine these into a bash install script.\n\
             Would you like to build the universal installer? (yes/no)",
            listing.join("\n")
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::InstallerBuild(InstallerBuild {
                project,
                detected,
                script,
            }),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let build = match payload {
            PendingPayload::InstallerBuild(build) => build,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let script_path = build.project.join(SCRIPT_NAME);
        let contents = format!("#!/bin/bash\nset -e\n{}\n", build.script);

        let backup = match write_script(&script_path, &contents).await {
            Ok(backup) => backup,
            Err(e) => {
                self.logger.log(
                    "universal_installer_error",
                    json!({
                        "script_path": script_path,
                        "project_path": build.project,
                        "error": e.to_string(),
                    }),
                );
                return Err(e.into());
            }
        };
        if let Some(path) = &backup {
            self.logger.log(
                "backup_file",
                json!({"file": script_path, "backup_path": path}),
            );
        }

        self.logger.log(
            "universal_installer_created",
            json!({
                "script_path": script_path,
                "project_path": build.project,
                "script_content": build.script,
            }),
        );
        info!("installer written to {:?}", script_path);

        let message = format!(
            "Universal installer created at {}:\n\n{}\n\nReady to run the installer? (yes/ok/approve)",
            script_path.display(),
            build.script
        );
        Ok(Execution::then(
            message,
            PendingPayload::InstallerRun(InstallerRun {
                project: build.project,
                script_path,
            }),
        ))
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let PendingPayload::InstallerBuild(build) = payload {
            self.logger.log(
                "universal_installer_cancelled",
                json!({"project_path": build.project}),
            );
        }
        "Universal installer script creation cancelled.".to_string()
    }
}

/// Back up any previous script, replace it atomically, then mark it executable.
///
/// The rename replaces a symlink at `path` rather than writing through it.
async fn write_script(path: &Path, contents: &str) -> std::io::Result<Option<PathBuf>> {
    let backup = if tokio::fs::try_exists(path).await? {
        Some(backup_file(path).await?)
    } else {
        None
    };
    write_atomic(path, contents.as_bytes()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o770)).await?;
    }
    Ok(backup)
}

/// Runs a previously built installer with `/bin/bash`
pub struct InstallerRunHandler {
    policy: InstallPolicy,
    logger: EventLogger,
}

impl InstallerRunHandler {
    pub fn new(policy: InstallPolicy, logger: &EventLogger) -> Self {
        Self {
            policy,
            logger: logger.clone(),
        }
    }
}

#[async_trait]
impl ActionHandler for InstallerRunHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::InstallerRun
    }

    fn description(&self) -> &str {
        "Run a built universal installer. Staged by the installer build step."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn propose(
        &self,
        _params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        Ok(Proposal::Rejected(format!(
            "◆ {} IS STAGED BY {}",
            self.kind(),
            ActionKind::InstallerBuild
        )))
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let run = match payload {
            PendingPayload::InstallerRun(run) => run,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let timeout = self.policy.installer_timeout_secs;
        let mut cmd = Command::new("/bin/bash");
        cmd.arg(&run.script_path).current_dir(&run.project);

        let message = match run_with_timeout(&mut cmd, Duration::from_secs(timeout)).await {
            RunOutcome::Completed(output) => {
                let (stdout, stderr) = streams(&output);
                let status = if output.status.success() { "ok" } else { "failed" };
                self.logger.log(
                    "run_installer",
                    json!({
                        "script_path": run.script_path,
                        "status": status,
                        "stdout_excerpt": truncate(&stdout, 500),
                        "stderr_excerpt": truncate(&stderr, 300),
                    }),
                );
                format!(
                    "Installer script ran. Output:\n{}",
                    clip(&output, self.policy.installer_budget)
                )
            }
            RunOutcome::TimedOut => {
                self.logger.log(
                    "run_installer_error",
                    json!({"script_path": run.script_path, "error": "timed out"}),
                );
                format!("◆ TIMEOUT AFTER {} SECONDS", timeout)
            }
            RunOutcome::SpawnFailed(e) => {
                self.logger.log(
                    "run_installer_error",
                    json!({"script_path": run.script_path, "error": e.to_string()}),
                );
                format!("Installer run error: {}", e)
            }
        };
        Ok(Execution::done(message))
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let PendingPayload::InstallerRun(run) = payload {
            self.logger.log(
                "run_installer_cancelled",
                json!({"script_path": run.script_path}),
            );
        }
        "Universal installer run cancelled.".to_string()
    }
}
