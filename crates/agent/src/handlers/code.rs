//! Python and Node snippets

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use omnigate_config::CodePolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::Script;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{clip, run_with_timeout, streams, RunOutcome};
use crate::util::{snippet, truncate};
use crate::Result;

const AST_CHECK: &str = "import ast, sys\nast.parse(sys.stdin.read())";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Node,
}

impl Language {
    fn label(self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::Node => "Node.js",
        }
    }

    fn event(self) -> &'static str {
        match self {
            Language::Python => "exec_python",
            Language::Node => "exec_node",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Language::Python => ".py",
            Language::Node => ".js",
        }
    }
}

/// Parse `code` with Python's `ast` module without running it.
///
/// The source goes to the interpreter on stdin. Returns the interpreter's
/// last stderr line on a syntax error.
pub async fn check_python_syntax(
    interpreter: &str,
    code: &str,
    timeout: Duration,
) -> std::result::Result<(), String> {
    let mut child = Command::new(interpreter)
        .arg("-c")
        .arg(AST_CHECK)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Validation error: {}", e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(code.as_bytes())
            .await
            .map_err(|e| format!("Validation error: {}", e))?;
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("Validation error: {}", e)),
        Err(_) => return Err("Validation error: syntax check timed out".to_string()),
    };
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let reason = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("SyntaxError")
        .trim()
        .to_string();
    Err(reason)
}

/// Runs an approved snippet from a throwaway script file.
///
/// The script lives in the scratch directory only while the interpreter
/// runs; it is removed whether the run succeeds, fails or times out.
pub struct CodeHandler {
    language: Language,
    policy: CodePolicy,
    scratch_dir: PathBuf,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct CodeArgs {
    code: String,
}

impl CodeHandler {
    pub fn python(policy: CodePolicy, logger: &EventLogger) -> Self {
        Self::new(Language::Python, policy, logger)
    }

    pub fn node(policy: CodePolicy, logger: &EventLogger) -> Self {
        Self::new(Language::Node, policy, logger)
    }

    fn new(language: Language, policy: CodePolicy, logger: &EventLogger) -> Self {
        Self {
            language,
            policy,
            scratch_dir: std::env::temp_dir(),
            logger: logger.scoped(["code"]),
        }
    }

    /// Write scripts under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    fn interpreter(&self) -> &str {
        match self.language {
            Language::Python => &self.policy.python,
            Language::Node => &self.policy.node,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.policy.timeout_secs)
    }

    /// Run `code` from a temp script and describe the outcome
    pub async fn run(&self, code: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let script = tempfile::Builder::new()
            .prefix("omnigate_run_")
            .suffix(self.language.extension())
            .tempfile_in(&self.scratch_dir)?
            .into_temp_path();
        tokio::fs::write(&script, code).await?;
        let file = script.to_path_buf();
        debug!("◆ RUNNING {} SCRIPT: {:?}", self.language.label(), file);

        let mut cmd = Command::new(self.interpreter());
        cmd.arg(&file);
        let outcome = run_with_timeout(&mut cmd, self.timeout()).await;

        if let Err(e) = script.close() {
            warn!("could not remove script {:?}: {}", file, e);
            self.logger.log(
                "tempfile_remove_fail",
                json!({"file": file, "error": e.to_string()}),
            );
        }

        let event = self.language.event();
        let label = self.language.label();
        Ok(match outcome {
            RunOutcome::Completed(output) => {
                let (stdout, stderr) = streams(&output);
                self.logger.log(
                    event,
                    json!({
                        "file": file,
                        "action": "Ran code",
                        "stdout_excerpt": truncate(&stdout, 500),
                        "stderr_excerpt": truncate(&stderr, 300),
                        "returncode": output.status.code(),
                    }),
                );
                format!("{} run output:\n{}", label, clip(&output, self.policy.budget))
            }
            RunOutcome::TimedOut => {
                self.logger.log(
                    &format!("{}_timeout", event),
                    json!({"file": file, "code": code, "timeout_secs": self.policy.timeout_secs}),
                );
                format!("{} code execution timed out.", label)
            }
            RunOutcome::SpawnFailed(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let error = format!("{} is not installed or not found in PATH.", label);
                self.logger.log(
                    &format!("{}_error", event),
                    json!({"file": file, "error": error, "code": code}),
                );
                error
            }
            RunOutcome::SpawnFailed(e) => {
                self.logger.log(
                    &format!("{}_error", event),
                    json!({"file": file, "error": truncate(&e.to_string(), 300), "code": code}),
                );
                format!("Error running code: {}", e)
            }
        })
    }
}

#[async_trait]
impl ActionHandler for CodeHandler {
    fn kind(&self) -> ActionKind {
        match self.language {
            Language::Python => ActionKind::PythonExec,
            Language::Node => ActionKind::NodeExec,
        }
    }

    fn description(&self) -> &str {
        match self.language {
            Language::Python => "Run a Python snippet after a syntax check. Requires approval.",
            Language::Node => "Run a Node.js snippet. Requires approval.",
        }
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Source to run" }
            },
            "required": ["code"]
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: CodeArgs = serde_json::from_value(params)?;
        if args.code.trim().is_empty() {
            return Ok(Proposal::Rejected("◆ NO CODE GIVEN".to_string()));
        }

        if self.language == Language::Python {
            if let Err(reason) =
                check_python_syntax(&self.policy.python, &args.code, self.timeout()).await
            {
                self.logger.log(
                    "exec_python_syntax_error",
                    json!({"error": reason, "code": args.code}),
                );
                return Ok(Proposal::Rejected(format!(
                    "Refused to execute Python: {}",
                    reason
                )));
            }
        }

        let prompt = format!(
            "Agent wants to run {} code:\n```\n{}\n```\nOk to run? (yes/ok/approve)",
            self.language.label(),
            snippet(&args.code, 400)
        );
        let script = Script { code: args.code };
        let payload = match self.language {
            Language::Python => PendingPayload::PythonExec(script),
            Language::Node => PendingPayload::NodeExec(script),
        };
        Ok(Proposal::Staged { payload, prompt })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let script = match (self.language, payload) {
            (Language::Python, PendingPayload::PythonExec(script)) => script,
            (Language::Node, PendingPayload::NodeExec(script)) => script,
            (_, other) => return Err(mismatch(self.kind(), &other)),
        };
        Ok(Execution::done(self.run(&script.code).await?))
    }

    async fn cancel(&self, _payload: PendingPayload, _message: &str) -> String {
        self.logger
            .log(&format!("{}_cancelled", self.language.event()), json!({}));
        format!("{} execution cancelled.", self.language.label())
    }
}
