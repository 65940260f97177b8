//! File edits and reads

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use similar::TextDiff;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use omnigate_config::FilePolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::FileChange;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::backup::{backup_file, write_atomic};
use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::util::{snippet, truncate};
use crate::Result;

/// Unified diff of `old` against `new`, labelled with `path`
pub fn unified_diff(old: &str, new: &str, path: &Path) -> String {
    let label = path.display().to_string();
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&label, &label)
        .to_string()
}

/// Where a [`FileEditHandler`] writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    /// Any file under the allowed root
    Workspace,
    /// Front-end files under the UI sandbox directory
    UiSandbox,
}

struct EditEvents {
    prepare: &'static str,
    written: &'static str,
    failed: &'static str,
    cancelled: &'static str,
}

impl EditTarget {
    fn kind(self) -> ActionKind {
        match self {
            EditTarget::Workspace => ActionKind::FileChange,
            EditTarget::UiSandbox => ActionKind::UiFileWrite,
        }
    }

    fn wrap(self, change: FileChange) -> PendingPayload {
        match self {
            EditTarget::Workspace => PendingPayload::FileChange(change),
            EditTarget::UiSandbox => PendingPayload::UiFileWrite(change),
        }
    }

    fn events(self) -> EditEvents {
        match self {
            EditTarget::Workspace => EditEvents {
                prepare: "prepare_edit_or_create",
                written: "write_file",
                failed: "write_file_fail",
                cancelled: "edit_create_cancel",
            },
            EditTarget::UiSandbox => EditEvents {
                prepare: "ui_file_prepare",
                written: "ui_file_written",
                failed: "ui_file_write_fail",
                cancelled: "ui_file_cancelled",
            },
        }
    }
}

/// Creates or overwrites a file once approved.
///
/// The proposed content is staged in a temp file under the scratch
/// directory. On approval an existing target is backed up and the content
/// is renamed into place; on denial the staged file is removed.
pub struct FileEditHandler {
    target: EditTarget,
    root: PathBuf,
    policy: FilePolicy,
    scratch_dir: PathBuf,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct EditArgs {
    path: String,
    #[serde(default)]
    content: String,
}

impl FileEditHandler {
    pub fn new(root: PathBuf, policy: FilePolicy, logger: &EventLogger) -> Self {
        Self::with_target(EditTarget::Workspace, root, policy, logger)
    }

    /// Writes confined to `sandbox`, created on first proposal
    pub fn ui_sandbox(sandbox: PathBuf, policy: FilePolicy, logger: &EventLogger) -> Self {
        Self::with_target(EditTarget::UiSandbox, sandbox, policy, logger)
    }

    fn with_target(
        target: EditTarget,
        root: PathBuf,
        policy: FilePolicy,
        logger: &EventLogger,
    ) -> Self {
        Self {
            target,
            root,
            policy,
            scratch_dir: std::env::temp_dir(),
            logger: logger.scoped(["content", "temp_path"]),
        }
    }

    /// Stage proposed content under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    async fn stage(&self, content: &str) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let staged = tempfile::Builder::new()
            .prefix("omnigate-stage-")
            .suffix(".tmp")
            .tempfile_in(&self.scratch_dir)?
            .into_temp_path()
            .keep()?;
        if let Err(e) = tokio::fs::write(&staged, content).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e);
        }
        Ok(staged)
    }

    async fn discard(&self, staged: &Path) {
        if let Err(e) = tokio::fs::remove_file(staged).await {
            warn!("could not remove staged file {:?}: {}", staged, e);
            self.logger.log(
                "tempfile_remove_fail",
                json!({"temp_path": staged, "error": e.to_string()}),
            );
        }
    }

    fn take_change(&self, payload: PendingPayload) -> Result<FileChange> {
        match (self.target, payload) {
            (EditTarget::Workspace, PendingPayload::FileChange(change))
            | (EditTarget::UiSandbox, PendingPayload::UiFileWrite(change)) => Ok(change),
            (_, other) => Err(mismatch(self.target.kind(), &other)),
        }
    }

    async fn apply(&self, change: &FileChange) -> Result<String> {
        let content = tokio::fs::read(&change.staged).await?;
        let exists = tokio::fs::try_exists(&change.target).await?;
        let backup = if exists {
            let path = backup_file(&change.target).await?;
            self.logger.log(
                "backup_file",
                json!({"file": change.target, "backup_path": path}),
            );
            Some(path)
        } else {
            None
        };

        write_atomic(&change.target, &content).await?;

        let (op, done) = if exists {
            ("edit", "edited")
        } else {
            ("create", "created")
        };
        let backup_note = backup
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "N/A".to_string());
        self.logger.log(
            self.target.events().written,
            json!({
                "action": "WRITE_FILE",
                "abs_path": change.target,
                "summary": format!("User approved; {} (backup in {})", op, backup_note),
            }),
        );
        Ok(match self.target {
            EditTarget::Workspace => format!(
                "File '{}' {} successfully. (Backup: {})",
                change.target.display(),
                done,
                backup_note
            ),
            EditTarget::UiSandbox => format!(
                "UI file '{}' saved. (Backup: {})",
                change.target.display(),
                backup_note
            ),
        })
    }
}

#[async_trait]
impl ActionHandler for FileEditHandler {
    fn kind(&self) -> ActionKind {
        self.target.kind()
    }

    fn description(&self) -> &str {
        match self.target {
            EditTarget::Workspace => {
                "Create or overwrite a file after showing a diff. Requires approval."
            }
            EditTarget::UiSandbox => {
                "Create or update an HTML/CSS/JS file in the UI sandbox. Requires approval."
            }
        }
    }

    fn parameters(&self) -> serde_json::Value {
        let path_help = match self.target {
            EditTarget::Workspace => "File to create or overwrite",
            EditTarget::UiSandbox => "Path relative to the UI sandbox",
        };
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": path_help },
                "content": { "type": "string", "description": "Full new content" }
            },
            "required": ["path", "content"]
        })
    }

    fn affirmatives(&self) -> &'static [&'static str] {
        &[
            "sure",
            "yep",
            "accepted",
            "affirm",
            "green light",
            "do it",
            "confirmed",
        ]
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: EditArgs = serde_json::from_value(params)?;
        if args.path.trim().is_empty() {
            return Ok(Proposal::Rejected("◆ NO TARGET PATH GIVEN".to_string()));
        }
        if self.target == EditTarget::UiSandbox {
            tokio::fs::create_dir_all(&self.root).await?;
        }
        let target = confine_path(args.path.trim(), &self.root).await?;
        if target.is_dir() {
            return Ok(Proposal::Rejected(format!(
                "◆ NOT A DATA FILE: {}",
                target.display()
            )));
        }

        let existed = tokio::fs::try_exists(&target).await?;
        let old = if existed {
            String::from_utf8_lossy(&tokio::fs::read(&target).await?).into_owned()
        } else {
            String::new()
        };
        let diff = unified_diff(&old, &args.content, &target);
        let staged = self.stage(&args.content).await?;
        debug!("staged {} bytes for {:?}", args.content.len(), target);

        let op = if existed { "edit" } else { "create" };
        self.logger.log(
            self.target.events().prepare,
            json!({
                "action": op.to_uppercase(),
                "abs_path": target,
                "temp_path": staged,
                "diff_excerpt": truncate(&diff, 500),
            }),
        );

        let preview = if diff.is_empty() {
            "(No changes.)".to_string()
        } else {
            format!(
                "Diff preview:\n{}",
                truncate(&diff, self.policy.diff_preview_bytes)
            )
        };
        let prompt = format!(
            "I'd like to {} the file:\n{}\nHere is a snippet: '{}'\n{}\n\
             Is that OK? (Reply yes/ok/approve or similar to allow, or no to cancel.)",
            op,
            target.display(),
            snippet(&args.content, 80),
            preview
        );

        Ok(Proposal::Staged {
            payload: self.target.wrap(FileChange {
                target,
                staged,
                diff,
                existed,
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
        let change = self.take_change(payload)?;

        let result = self.apply(&change).await;
        self.discard(&change.staged).await;
        match result {
            Ok(message) => Ok(Execution::done(message)),
            Err(e) => {
                self.logger.log(
                    self.target.events().failed,
                    json!({
                        "action": "WRITE_FILE_FAIL",
                        "abs_path": change.target,
                        "error": truncate(&e.to_string(), 300),
                    }),
                );
                Err(e)
            }
        }
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let Ok(change) = self.take_change(payload) {
            self.discard(&change.staged).await;
            self.logger.log(
                self.target.events().cancelled,
                json!({"abs_path": change.target, "existed": change.existed}),
            );
        }
        match self.target {
            EditTarget::Workspace => "File edit/create was not approved. Cancelling.",
            EditTarget::UiSandbox => "UI file write not approved. Cancelling.",
        }
        .to_string()
    }
}

/// Ungated reads of files under the allowed root
pub struct FileReader {
    root: PathBuf,
    logger: EventLogger,
}

impl FileReader {
    pub fn new(root: PathBuf, logger: &EventLogger) -> Self {
        Self {
            root,
            logger: logger.clone(),
        }
    }

    /// File contents, or a "◆" notice explaining why it could not be read
    pub async fn read(&self, path: &str) -> String {
        let path = path.trim();
        if path.is_empty() {
            return "Please specify a file path to view.".to_string();
        }
        let abs_path = match confine_path(path, &self.root).await {
            Ok(p) => p,
            Err(e) => {
                self.logger.log(
                    "read_file_fail",
                    json!({"action": "READ_FILE_FAIL", "file": path, "error": e.to_string()}),
                );
                return format!("◆ ACCESS DENIED: {}", path);
            }
        };

        debug!("◆ READING: {:?}", abs_path);
        if !abs_path.exists() {
            return format!("◆ NO FILE AT: {}", path);
        }
        if !abs_path.is_file() {
            return format!("◆ NOT A DATA FILE: {}", path);
        }
        match tokio::fs::read_to_string(&abs_path).await {
            Ok(content) => {
                self.logger.log(
                    "read_file",
                    json!({
                        "action": "READ_FILE",
                        "abs_path": abs_path,
                        "summary": "Read by agent.",
                    }),
                );
                content
            }
            Err(e) => {
                self.logger.log(
                    "read_file_fail",
                    json!({
                        "action": "READ_FILE_FAIL",
                        "abs_path": abs_path,
                        "error": e.to_string(),
                    }),
                );
                format!("◆ RETRIEVAL ERROR: {}", e)
            }
        }
    }
}
