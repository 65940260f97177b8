//! Dependency audits with pip-audit

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use omnigate_config::ToolsPolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::PipAudit;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{clip, run_with_timeout, streams, RunOutcome};
use crate::util::truncate;
use crate::Result;

/// Runs `pip-audit --no-deps` in a project once approved
pub struct PipAuditHandler {
    root: PathBuf,
    policy: ToolsPolicy,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct AuditArgs {
    #[serde(default, alias = "project")]
    path: Option<String>,
}

impl PipAuditHandler {
    pub fn new(root: PathBuf, policy: ToolsPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            policy,
            logger: logger.scoped(["path"]),
        }
    }
}

#[async_trait]
impl ActionHandler for PipAuditHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::PipAudit
    }

    fn description(&self) -> &str {
        "Check a Python project's dependencies for known CVEs. Requires approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Project directory, default the allowed root" }
            }
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: AuditArgs = serde_json::from_value(params)?;
        let project = match args.path.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => confine_path(dir, &self.root).await?,
            _ => self.root.clone(),
        };
        if !project.is_dir() {
            return Ok(Proposal::Rejected(format!(
                "◆ NO PROJECT AT: {}",
                project.display()
            )));
        }

        let prompt = format!(
            "Agent wants to run pip-audit in `{}` to check dependencies for CVEs. \
             Run audit? (yes/ok/approve)",
            project.display()
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::PipAudit(PipAudit { project }),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let audit = match payload {
            PendingPayload::PipAudit(audit) => audit,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let timeout = self.policy.audit_timeout_secs;

        let mut cmd = Command::new(&self.policy.pip_audit);
        cmd.arg("--no-deps").current_dir(&audit.project);

        let message = match run_with_timeout(&mut cmd, Duration::from_secs(timeout)).await {
            RunOutcome::Completed(output) => {
                let (stdout, stderr) = streams(&output);
                self.logger.log(
                    "pip_audit",
                    json!({
                        "action": "PIP_AUDIT",
                        "path": audit.project,
                        "returncode": output.status.code(),
                        "stdout_sample": truncate(&stdout, 350),
                        "stderr_sample": truncate(&stderr, 150),
                    }),
                );
                format!(
                    "pip-audit results:\n{}",
                    clip(&output, self.policy.audit_budget)
                )
            }
            RunOutcome::TimedOut => {
                self.logger.log(
                    "pip_audit_fail",
                    json!({"path": audit.project, "error": "timed out", "timeout_secs": timeout}),
                );
                format!("◆ TIMEOUT AFTER {} SECONDS", timeout)
            }
            RunOutcome::SpawnFailed(e) => {
                warn!("pip-audit spawn failed: {}", e);
                self.logger.log(
                    "pip_audit_fail",
                    json!({
                        "action": "PIP_AUDIT_FAIL",
                        "path": audit.project,
                        "error": truncate(&e.to_string(), 300),
                    }),
                );
                format!("pip-audit error: {}", e)
            }
        };
        Ok(Execution::done(message))
    }

    async fn cancel(&self, payload: PendingPayload, message: &str) -> String {
        if let PendingPayload::PipAudit(audit) = payload {
            self.logger.log(
                "pip_audit_cancelled",
                json!({"path": audit.project, "user_message": truncate(message, 200)}),
            );
        }
        "pip-audit cancelled.".to_string()
    }
}
