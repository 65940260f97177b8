//! pip and npm installs

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

use omnigate_config::InstallPolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::{PackageInstall, PackageManager};
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{clip, run_with_timeout, RunOutcome};
use crate::util::truncate;
use crate::Result;

/// Package specs the installers accept, e.g. `requests==2.31`, `@types/node`
fn package_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9@][A-Za-z0-9._/@=<>~^+\-\[\],!]*$").expect("valid package regex")
    })
}

pub fn is_valid_package(spec: &str) -> bool {
    package_pattern().is_match(spec)
}

/// Installs one package (or a manifest's dependencies, npm only)
pub struct PackageInstallHandler {
    root: PathBuf,
    policy: InstallPolicy,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct InstallArgs {
    manager: PackageManager,
    #[serde(default)]
    package: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
}

impl PackageInstallHandler {
    pub fn new(root: PathBuf, policy: InstallPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            policy,
            logger: logger.scoped(["cwd", "package"]),
        }
    }

    fn command_line(install: &PackageInstall) -> Vec<String> {
        let mut argv = vec![install.manager.to_string(), "install".to_string()];
        if let Some(package) = &install.package {
            argv.push(package.clone());
        }
        argv
    }

    fn timeout_secs(&self, manager: PackageManager) -> u64 {
        match manager {
            PackageManager::Pip => self.policy.pip_timeout_secs,
            PackageManager::Npm => self.policy.npm_timeout_secs,
        }
    }
}

#[async_trait]
impl ActionHandler for PackageInstallHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::PackageInstall
    }

    fn description(&self) -> &str {
        "Install a package with pip or npm. Requires approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "manager": { "type": "string", "enum": ["pip", "npm"] },
                "package": { "type": "string", "description": "Package spec; npm may omit it" },
                "cwd": { "type": "string", "description": "Project directory for npm" }
            },
            "required": ["manager"]
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: InstallArgs = serde_json::from_value(params)?;
        let package = args
            .package
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        match (&package, args.manager) {
            (None, PackageManager::Pip) => {
                return Ok(Proposal::Rejected(
                    "No package specified for pip install.".to_string(),
                ))
            }
            (Some(spec), _) if !is_valid_package(spec) => {
                return Ok(Proposal::Rejected(format!("◆ INVALID PACKAGE: {}", spec)))
            }
            _ => {}
        }

        let cwd = match args.cwd.as_deref() {
            Some(dir) => Some(confine_path(dir, &self.root).await?),
            None if args.manager == PackageManager::Npm => Some(self.root.clone()),
            None => None,
        };

        let install = PackageInstall {
            manager: args.manager,
            package,
            cwd,
        };
        let command = Self::command_line(&install).join(" ");
        let prompt = match &install.cwd {
            Some(dir) => format!(
                "Agent wants to run `{}` in `{}`. Ok to run? (yes/ok/approve)",
                command,
                dir.display()
            ),
            None => format!("Agent wants to run `{}`. Ok to run? (yes/ok/approve)", command),
        };
        Ok(Proposal::Staged {
            payload: PendingPayload::PackageInstall(install),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let install = match payload {
            PendingPayload::PackageInstall(install) => install,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let argv = Self::command_line(&install);
        let manager = install.manager.to_string();
        let timeout = self.timeout_secs(install.manager);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        if let Some(dir) = &install.cwd {
            cmd.current_dir(dir);
        }

        let event = format!("{}_install", manager);
        let message = match run_with_timeout(&mut cmd, Duration::from_secs(timeout)).await {
            RunOutcome::Completed(output) => {
                self.logger.log(
                    &event,
                    json!({
                        "action": event.to_uppercase(),
                        "cmd": argv.join(" "),
                        "package": install.package,
                        "cwd": install.cwd,
                        "returncode": output.status.code(),
                    }),
                );
                format!(
                    "{} install output:\n{}",
                    manager,
                    clip(&output, self.policy.budget)
                )
            }
            RunOutcome::TimedOut => {
                self.logger.log(
                    &format!("{}_fail", event),
                    json!({"cmd": argv.join(" "), "error": "timed out", "timeout_secs": timeout}),
                );
                format!("◆ TIMEOUT AFTER {} SECONDS", timeout)
            }
            RunOutcome::SpawnFailed(e) => {
                self.logger.log(
                    &format!("{}_fail", event),
                    json!({"cmd": argv.join(" "), "error": truncate(&e.to_string(), 300)}),
                );
                format!("{} install error: {}", manager, e)
            }
        };
        Ok(Execution::done(message))
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        let manager = match &payload {
            PendingPayload::PackageInstall(install) => install.manager.to_string(),
            _ => "package".to_string(),
        };
        if let PendingPayload::PackageInstall(install) = payload {
            self.logger.log(
                &format!("{}_install_cancelled", manager),
                json!({"package": install.package, "cwd": install.cwd}),
            );
        }
        format!("{} install cancelled.", manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_specs() {
        assert!(is_valid_package("requests"));
        assert!(is_valid_package("requests==2.31.0"));
        assert!(is_valid_package("@types/node"));
        assert!(is_valid_package("left-pad@^1.3.0"));
        assert!(is_valid_package("uvicorn[standard]"));
        assert!(!is_valid_package("--index-url=http://evil"));
        assert!(!is_valid_package("pkg; rm -rf /"));
        assert!(!is_valid_package("two words"));
    }
}
