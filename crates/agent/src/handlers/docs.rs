//! Docstring formatting with docformatter

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use omnigate_config::ToolsPolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::DocFormat;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::backup::backup_file;
use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{clip, run_with_timeout, streams, RunOutcome};
use crate::util::truncate;
use crate::Result;

/// Rewrites a Python file's docstrings in place with `docformatter -i`.
///
/// The file is backed up before the formatter touches it.
pub struct DocFormatHandler {
    root: PathBuf,
    policy: ToolsPolicy,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct DocArgs {
    #[serde(alias = "target_path")]
    path: String,
}

impl DocFormatHandler {
    pub fn new(root: PathBuf, policy: ToolsPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            policy,
            logger: logger.scoped(["target_path"]),
        }
    }

    fn log_error(&self, target: &DocFormat, error: &str) {
        self.logger.log(
            "doc_gen_error",
            json!({
                "action": "docformatter_run",
                "target_path": target.target,
                "error": error,
            }),
        );
    }
}

#[async_trait]
impl ActionHandler for DocFormatHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::DocFormat
    }

    fn description(&self) -> &str {
        "Fix docstring formatting in a Python file with docformatter. Requires approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Python file to format" }
            },
            "required": ["path"]
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: DocArgs = serde_json::from_value(params)?;
        if args.path.trim().is_empty() {
            return Ok(Proposal::Rejected("No target path specified.".to_string()));
        }
        let target = confine_path(args.path.trim(), &self.root).await?;
        if !target.is_file() {
            return Ok(Proposal::Rejected(format!(
                "Target file does not exist: {}",
                target.display()
            )));
        }

        let prompt = format!(
            "Agent wants to auto-generate/fix docstrings for {}. Proceed? (yes/ok/approve)",
            target.display()
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::DocFormat(DocFormat { target }),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let doc = match payload {
            PendingPayload::DocFormat(doc) => doc,
            other => return Err(mismatch(self.kind(), &other)),
        };

        let backup = match backup_file(&doc.target).await {
            Ok(path) => path,
            Err(e) => {
                self.log_error(&doc, &e.to_string());
                return Err(e.into());
            }
        };
        self.logger.log(
            "backup_file",
            json!({"file": doc.target, "backup_path": backup}),
        );

        let timeout = self.policy.docs_timeout_secs;
        let mut cmd = Command::new(&self.policy.docformatter);
        cmd.arg("-i").arg(&doc.target);

        let message = match run_with_timeout(&mut cmd, Duration::from_secs(timeout)).await {
            RunOutcome::Completed(output) => {
                let (stdout, stderr) = streams(&output);
                self.logger.log(
                    "doc_gen",
                    json!({
                        "action": "docformatter_run",
                        "target_path": doc.target,
                        "returncode": output.status.code(),
                        "stdout_sample": truncate(&stdout, 250),
                        "stderr_sample": truncate(&stderr, 150),
                    }),
                );
                info!("docformatter ran on {:?}", doc.target);
                format!(
                    "Docstring formatting done for {}. (Backup: {})\n{}",
                    doc.target.display(),
                    backup.display(),
                    clip(&output, self.policy.docs_budget)
                )
            }
            RunOutcome::TimedOut => {
                self.log_error(&doc, "timed out");
                format!("◆ TIMEOUT AFTER {} SECONDS", timeout)
            }
            RunOutcome::SpawnFailed(e) => {
                warn!("docformatter spawn failed: {}", e);
                self.log_error(&doc, truncate(&e.to_string(), 300));
                format!("Docstring generation error: {}", e)
            }
        };
        Ok(Execution::done(message))
    }

    async fn cancel(&self, payload: PendingPayload, message: &str) -> String {
        if let PendingPayload::DocFormat(doc) = payload {
            self.logger.log(
                "doc_gen_cancelled",
                json!({"target_path": doc.target, "user_message": truncate(message, 200)}),
            );
        }
        "Docstring generation cancelled.".to_string()
    }
}
