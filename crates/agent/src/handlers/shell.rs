//! Shell commands

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use omnigate_config::ShellPolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::ShellCommand;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{clip, run_with_timeout, shell, RunOutcome};
use crate::util::truncate;
use crate::Result;

/// Shell command handler.
///
/// Denylisted commands are refused even in trust mode; commands starting
/// with a safe prefix run at once; anything else waits for approval.
pub struct ShellHandler {
    root: PathBuf,
    policy: ShellPolicy,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct ShellArgs {
    #[serde(alias = "cmd")]
    command: String,
    #[serde(alias = "working_dir")]
    cwd: Option<String>,
}

impl ShellHandler {
    pub fn new(root: PathBuf, policy: ShellPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            policy,
            logger: logger.scoped(["cwd", "package"]),
        }
    }

    /// First denylisted fragment contained in `command`
    pub fn denied_fragment(&self, command: &str) -> Option<&str> {
        let lowered = command.to_lowercase();
        self.policy
            .denylist
            .iter()
            .find(|bad| lowered.contains(&bad.to_lowercase()))
            .map(String::as_str)
    }

    pub fn is_safe(&self, command: &str) -> bool {
        let lowered = command.trim_start().to_lowercase();
        self.policy
            .safe_prefixes
            .iter()
            .any(|prefix| lowered.starts_with(&prefix.to_lowercase()))
    }

    async fn run(&self, command: &str, cwd: &Path, approved: bool) -> String {
        debug!("◆ EXECUTING: {}", command);
        let mut cmd = shell(command);
        cmd.current_dir(cwd);
        let timeout = self.policy.timeout_secs;

        match run_with_timeout(&mut cmd, Duration::from_secs(timeout)).await {
            RunOutcome::Completed(output) => {
                self.logger.log(
                    "run_shell",
                    json!({
                        "action": "RUN_SHELL",
                        "cmd": command,
                        "cwd": cwd,
                        "returncode": output.status.code(),
                        "approved": approved,
                    }),
                );
                let heading = if approved {
                    "Shell output (approved)"
                } else {
                    "Shell output (clipped)"
                };
                format!("{}:\n{}", heading, clip(&output, self.policy.budget))
            }
            RunOutcome::TimedOut => {
                self.logger.log(
                    "run_shell_timeout",
                    json!({"cmd": command, "cwd": cwd, "timeout_secs": timeout}),
                );
                format!("◆ TIMEOUT AFTER {} SECONDS", timeout)
            }
            RunOutcome::SpawnFailed(e) => {
                warn!("shell spawn failed: {}", e);
                self.logger.log(
                    "run_shell_fail",
                    json!({
                        "action": "RUN_SHELL_FAIL",
                        "cmd": command,
                        "cwd": cwd,
                        "error": truncate(&e.to_string(), 300),
                    }),
                );
                format!("◆ EXECUTION FAILED: {}", e)
            }
        }
    }
}

#[async_trait]
impl ActionHandler for ShellHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ShellCommand
    }

    fn description(&self) -> &str {
        "Run a shell command. Safe commands run at once, others need approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command" },
                "cwd": { "type": "string", "description": "Optional working directory" }
            },
            "required": ["command"]
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: ShellArgs = serde_json::from_value(params)?;
        let command = args.command.trim().to_string();
        if command.is_empty() {
            return Ok(Proposal::Rejected("◆ NO COMMAND GIVEN".to_string()));
        }

        let cwd = match args.cwd.as_deref() {
            Some(dir) => confine_path(dir, &self.root).await?,
            None => self.root.clone(),
        };

        if let Some(fragment) = self.denied_fragment(&command) {
            self.logger.log(
                "blocked_shell_command",
                json!({"cmd": command, "cwd": cwd, "matched": fragment}),
            );
            return Ok(Proposal::Rejected(
                "[BLOCKED] That command is not permitted for safety.".to_string(),
            ));
        }

        if self.is_safe(&command) {
            return Ok(Proposal::Immediate(self.run(&command, &cwd, false).await));
        }

        let prompt = format!(
            "Agent wants to run shell command:\n`{}` in `{}`. Ok to run? (yes/ok/approve)",
            command,
            cwd.display()
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::ShellCommand(ShellCommand { command, cwd }),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let staged = match payload {
            PendingPayload::ShellCommand(staged) => staged,
            other => return Err(mismatch(self.kind(), &other)),
        };
        Ok(Execution::done(
            self.run(&staged.command, &staged.cwd, true).await,
        ))
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let PendingPayload::ShellCommand(staged) = payload {
            self.logger.log(
                "shell_cmd_cancelled",
                json!({"cmd": staged.command, "cwd": staged.cwd}),
            );
        }
        "Shell command cancelled.".to_string()
    }
}
