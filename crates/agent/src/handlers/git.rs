//! Repository clone and push

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use omnigate_config::{GitPolicy, OutputBudget};
use omnigate_eventlog::EventLogger;
use omnigate_session::action::{GitClone, GitPush};
use omnigate_session::{ActionKind, PendingPayload, SessionContext};
use omnigate_tasks::{with_retry, RetryPolicy};

use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{clip, run_with_timeout, RunOutcome};
use crate::util::truncate;
use crate::{ActionError, Result};

const NOTHING_TO_COMMIT: &str = "nothing to commit";

/// Result of one git subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded(String),
    /// Ran but had nothing to do, e.g. a commit on a clean tree
    NoOp(String),
    Failed(String),
}

impl StepOutcome {
    fn into_result(self) -> std::result::Result<String, String> {
        match self {
            StepOutcome::Succeeded(text) | StepOutcome::NoOp(text) => Ok(text),
            StepOutcome::Failed(error) => Err(error),
        }
    }
}

/// Shared git invocation for both handlers
#[derive(Clone)]
struct GitRunner {
    policy: GitPolicy,
}

impl GitRunner {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.policy.retries,
            Duration::from_millis(self.policy.retry_delay_ms),
        )
    }

    async fn step(&self, args: &[&str], cwd: Option<&Path>, noop_marker: Option<&str>) -> StepOutcome {
        debug!("◆ GIT {}", args.join(" "));
        let mut cmd = Command::new("git");
        cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let timeout = self.policy.timeout_secs;
        match run_with_timeout(&mut cmd, Duration::from_secs(timeout)).await {
            RunOutcome::Completed(output) => {
                let text = clip(&output, self.budget());
                if output.status.success() {
                    StepOutcome::Succeeded(text)
                } else if noop_marker.is_some_and(|marker| text.contains(marker)) {
                    StepOutcome::NoOp(text)
                } else {
                    StepOutcome::Failed(format!(
                        "git {} exited with {}: {}",
                        args.first().copied().unwrap_or_default(),
                        output.status.code().unwrap_or(-1),
                        text.trim()
                    ))
                }
            }
            RunOutcome::TimedOut => StepOutcome::Failed(format!(
                "git {} timed out after {} seconds",
                args.first().copied().unwrap_or_default(),
                timeout
            )),
            RunOutcome::SpawnFailed(e) => StepOutcome::Failed(format!("could not run git: {}", e)),
        }
    }

    fn budget(&self) -> OutputBudget {
        self.policy.clone_budget
    }
}

fn looks_like_option(value: &str) -> bool {
    value.trim_start().starts_with('-')
}

/// Clones a repository under the allowed root
pub struct GitCloneHandler {
    root: PathBuf,
    git: GitRunner,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct CloneArgs {
    #[serde(alias = "repo_url")]
    url: String,
    #[serde(default)]
    dest: Option<String>,
}

impl GitCloneHandler {
    pub fn new(root: PathBuf, policy: GitPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            git: GitRunner { policy },
            logger: logger.scoped(["repo_url"]),
        }
    }
}

#[async_trait]
impl ActionHandler for GitCloneHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::GitClone
    }

    fn description(&self) -> &str {
        "Clone a git repository under the allowed root. Requires approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Repository URL" },
                "dest": { "type": "string", "description": "Destination directory" }
            },
            "required": ["url"]
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: CloneArgs = serde_json::from_value(params)?;
        let url = args.url.trim().to_string();
        if url.is_empty() || looks_like_option(&url) {
            return Ok(Proposal::Rejected("◆ INVALID REPOSITORY URL".to_string()));
        }
        let dest = args.dest.unwrap_or_else(|| "repo_clone".to_string());
        let dest = confine_path(dest.trim(), &self.root).await?;
        if dest.exists() {
            return Ok(Proposal::Rejected(format!(
                "◆ DESTINATION EXISTS: {}",
                dest.display()
            )));
        }

        let prompt = format!(
            "Clone repo {} to {}? (yes/ok/approve)",
            url,
            dest.display()
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::GitClone(GitClone { url, dest }),
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
            PendingPayload::GitClone(staged) => staged,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let dest = staged.dest.to_string_lossy().into_owned();
        let (git, url, dest_arg) = (&self.git, staged.url.as_str(), dest.as_str());

        let result = with_retry(self.git.retry_policy(), &self.logger, move || async move {
            git.step(&["clone", "--", url, dest_arg], None, None)
                .await
                .into_result()
        })
        .await;

        match result {
            Ok(output) => {
                self.logger.log(
                    "git_clone",
                    json!({
                        "action": "GITHUB_CLONE",
                        "target": staged.dest,
                        "repo_url": staged.url,
                        "status": "cloned",
                        "stdout_excerpt": truncate(&output, 500),
                    }),
                );
                info!("cloned into {:?}", staged.dest);
                Ok(Execution::done(format!(
                    "Cloned {} to {}.\n{}",
                    staged.url, dest, output
                )))
            }
            Err(error) => {
                self.logger.log(
                    "git_clone_error",
                    json!({
                        "action": "GITHUB_CLONE",
                        "target": staged.dest,
                        "repo_url": staged.url,
                        "error": truncate(&error, 300),
                    }),
                );
                Err(ActionError::CommandFailed(error))
            }
        }
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let PendingPayload::GitClone(staged) = payload {
            self.logger.log(
                "git_clone_cancelled",
                json!({"repo_url": staged.url, "target": staged.dest}),
            );
        }
        "GitHub clone not approved. Cancelling.".to_string()
    }
}

/// Stages, commits and pushes a local repository
pub struct GitPushHandler {
    root: PathBuf,
    git: GitRunner,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct PushArgs {
    #[serde(alias = "dir")]
    repo: String,
    #[serde(default = "default_commit_message")]
    message: String,
    #[serde(default = "default_remote")]
    remote: String,
    #[serde(default = "default_branch")]
    branch: String,
}

fn default_commit_message() -> String {
    "Agent commit".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl GitPushHandler {
    pub fn new(root: PathBuf, policy: GitPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            git: GitRunner { policy },
            logger: logger.scoped(["commit_msg"]),
        }
    }

    /// `git add -A`
    pub async fn stage_all(&self, repo: &Path) -> StepOutcome {
        self.git.step(&["add", "-A"], Some(repo), None).await
    }

    /// `git commit`; a clean tree is [`StepOutcome::NoOp`]
    pub async fn commit(&self, repo: &Path, message: &str) -> StepOutcome {
        self.git
            .step(&["commit", "-m", message], Some(repo), Some(NOTHING_TO_COMMIT))
            .await
    }

    /// `git push`, retried under the configured policy
    pub async fn push(&self, repo: &Path, remote: &str, branch: &str) -> StepOutcome {
        let git = &self.git;
        let result = with_retry(self.git.retry_policy(), &self.logger, move || async move {
            git.step(&["push", remote, branch], Some(repo), None)
                .await
                .into_result()
        })
        .await;
        match result {
            Ok(text) => StepOutcome::Succeeded(text),
            Err(error) => StepOutcome::Failed(error),
        }
    }

    fn fail(&self, push: &GitPush, step: &str, error: String) -> ActionError {
        self.logger.log(
            "git_push_error",
            json!({
                "action": "GITHUB_PUSH",
                "target": push.repo,
                "commit_msg": push.message,
                "remote": push.remote,
                "branch": push.branch,
                "step": step,
                "error": truncate(&error, 300),
            }),
        );
        ActionError::CommandFailed(error)
    }
}

#[async_trait]
impl ActionHandler for GitPushHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::GitPush
    }

    fn description(&self) -> &str {
        "Stage, commit and push a local repository. Requires approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "repo": { "type": "string", "description": "Local repository directory" },
                "message": { "type": "string", "description": "Commit message" },
                "remote": { "type": "string", "description": "Remote name, default origin" },
                "branch": { "type": "string", "description": "Branch, default main" }
            },
            "required": ["repo"]
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: PushArgs = serde_json::from_value(params)?;
        let repo = confine_path(args.repo.trim(), &self.root).await?;
        if !repo.join(".git").exists() {
            return Ok(Proposal::Rejected(format!(
                "◆ NOT A GIT REPOSITORY: {}",
                repo.display()
            )));
        }
        if looks_like_option(&args.remote) || looks_like_option(&args.branch) {
            return Ok(Proposal::Rejected(
                "◆ INVALID REMOTE OR BRANCH".to_string(),
            ));
        }

        let prompt = format!(
            "Push {} with commit '{}' to {}/{}? (yes/ok/approve)",
            repo.display(),
            args.message,
            args.remote,
            args.branch
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::GitPush(GitPush {
                repo,
                message: args.message,
                remote: args.remote,
                branch: args.branch,
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
        let push = match payload {
            PendingPayload::GitPush(push) => push,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let mut log = Vec::new();

        match self.stage_all(&push.repo).await {
            StepOutcome::Failed(error) => return Err(self.fail(&push, "add", error)),
            StepOutcome::Succeeded(out) | StepOutcome::NoOp(out) => log.push(out),
        }

        let status = match self.commit(&push.repo, &push.message).await {
            StepOutcome::Failed(error) => return Err(self.fail(&push, "commit", error)),
            StepOutcome::NoOp(_) => {
                log.push("Nothing to commit.\n".to_string());
                "nothing_to_commit"
            }
            StepOutcome::Succeeded(out) => {
                log.push(out);
                "committed"
            }
        };

        match self.push(&push.repo, &push.remote, &push.branch).await {
            StepOutcome::Failed(error) => return Err(self.fail(&push, "push", error)),
            StepOutcome::Succeeded(out) | StepOutcome::NoOp(out) => log.push(out),
        }

        let log = log.join("");
        self.logger.log(
            "git_push",
            json!({
                "action": "GITHUB_PUSH",
                "target": push.repo,
                "commit_msg": push.message,
                "remote": push.remote,
                "branch": push.branch,
                "status": status,
                "summary": truncate(&log, 700),
            }),
        );
        Ok(Execution::done(format!(
            "Git push done. Log:\n{}",
            truncate(&log, self.git.policy.push_log_bytes)
        )))
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let PendingPayload::GitPush(push) = payload {
            self.logger.log(
                "git_push_cancelled",
                json!({
                    "target": push.repo,
                    "commit_msg": push.message,
                    "remote": push.remote,
                    "branch": push.branch,
                }),
            );
        }
        "GitHub push not approved. Cancelling.".to_string()
    }
}
