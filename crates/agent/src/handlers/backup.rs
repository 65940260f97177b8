//! Timestamped backups and restore

use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use serde_json::json;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use omnigate_eventlog::EventLogger;
use omnigate_session::action::BackupRestore;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::Result;

const BACKUP_MARKER: &str = ".bak.";

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy `target` to `<target>.bak.<YYYYMMDD_HHMMSS>`.
///
/// A second backup within the same second gets a `_N` suffix so no backup
/// is ever overwritten.
pub async fn backup_file(target: &Path) -> io::Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = append_suffix(target, &format!("{}{}", BACKUP_MARKER, stamp));
    let mut n = 1;
    while tokio::fs::try_exists(&candidate).await? {
        candidate = append_suffix(target, &format!("{}{}_{}", BACKUP_MARKER, stamp, n));
        n += 1;
    }
    tokio::fs::copy(target, &candidate).await?;
    debug!("backed up {:?} to {:?}", target, candidate);
    Ok(candidate)
}

/// Backups of `target`, newest first
pub async fn list_backups(target: &Path) -> io::Result<Vec<PathBuf>> {
    let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{}{}", name.to_string_lossy(), BACKUP_MARKER);

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            found.push(entry.path());
        }
    }
    found.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(found)
}

/// The file a backup was taken of
pub fn original_of(backup: &Path) -> Option<PathBuf> {
    let text = backup.to_str()?;
    text.rsplit_once(BACKUP_MARKER)
        .map(|(original, _)| PathBuf::from(original))
}

/// Write `contents` to a sibling temp file, then rename it over `target`
pub async fn write_atomic(target: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));

    if let Err(e) = tokio::fs::write(&temp, contents).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp, target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

/// Lists backups of a file and restores the one the operator picks by index
pub struct BackupRestoreHandler {
    root: PathBuf,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(alias = "target_path", alias = "path")]
    target: String,
}

fn selected_index(message: &str, available: usize) -> Option<usize> {
    message
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|idx| *idx < available)
}

impl BackupRestoreHandler {
    pub fn new(root: PathBuf, logger: &EventLogger) -> Self {
        Self {
            root,
            logger: logger.scoped(["target_path", "backup_path"]),
        }
    }
}

#[async_trait]
impl ActionHandler for BackupRestoreHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::BackupRestore
    }

    fn description(&self) -> &str {
        "List backups of a file and restore one by index."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "target": { "type": "string", "description": "File whose backups to list" }
            },
            "required": ["target"]
        })
    }

    /// A restore is approved by a valid index, never by trust mode alone
    fn approves(&self, message: &str, payload: &PendingPayload, _trusted: bool) -> bool {
        match payload {
            PendingPayload::BackupRestore(staged) => {
                selected_index(message, staged.backups.len()).is_some()
            }
            _ => false,
        }
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: ListArgs = serde_json::from_value(params)?;
        if args.target.trim().is_empty() {
            return Ok(Proposal::Rejected(
                "Please specify a file path to list backups for.".to_string(),
            ));
        }
        let target = confine_path(args.target.trim(), &self.root).await?;
        let backups = list_backups(&target).await?;
        if backups.is_empty() {
            return Ok(Proposal::Rejected(format!(
                "No backups found for {}.",
                target.display()
            )));
        }

        let listed: Vec<&PathBuf> = backups.iter().take(10).collect();
        self.logger.log(
            "list_file_backups",
            json!({"target_path": target, "backups_found": listed}),
        );

        let lines: Vec<String> = backups
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("[{}] {} ({})", i, name, path.display())
            })
            .collect();
        let prompt = format!(
            "Backups for {}:\n{}\nReply with the index number to restore, or 'cancel' to skip.",
            target.display(),
            lines.join("\n")
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::BackupRestore(BackupRestore { target, backups }),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let staged = match payload {
            PendingPayload::BackupRestore(staged) => staged,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let Some(idx) = selected_index(message, staged.backups.len()) else {
            return Ok(Execution::done(invalid_index(staged.backups.len())));
        };

        let backup = &staged.backups[idx];
        let original = original_of(backup).unwrap_or_else(|| staged.target.clone());

        // The file being replaced gets its own backup first
        let previous = if tokio::fs::try_exists(&original).await? {
            Some(backup_file(&original).await?)
        } else {
            None
        };

        let contents = tokio::fs::read(backup).await?;
        write_atomic(&original, &contents).await?;

        self.logger.log(
            "restore_file_backup",
            json!({
                "action": "RESTORE_FILE_BACKUP",
                "target": original,
                "backup_path": backup,
                "summary": format!("restored backup {}", idx),
            }),
        );
        info!("restored {:?} from {:?}", original, backup);

        let mut message = format!(
            "Restored {} from backup {}.",
            original.display(),
            backup.display()
        );
        if let Some(previous) = previous {
            message.push_str(&format!(
                " Previous contents saved as {}.",
                previous.display()
            ));
        }
        Ok(Execution::done(message))
    }

    async fn cancel(&self, payload: PendingPayload, message: &str) -> String {
        let available = match &payload {
            PendingPayload::BackupRestore(staged) => staged.backups.len(),
            _ => 0,
        };
        let reply = message.trim();
        if let Ok(idx) = reply.parse::<i64>() {
            self.logger.log(
                "restore_invalid_index",
                json!({"index": idx, "available": available}),
            );
            return invalid_index(available);
        }
        self.logger.log("restore_cancelled", json!({"available": available}));
        "Restore cancelled.".to_string()
    }
}

fn invalid_index(available: usize) -> String {
    format!(
        "Invalid index. Please provide an integer 0-{} or type 'cancel'.",
        available.saturating_sub(1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_of() {
        assert_eq!(
            original_of(Path::new("/h/a.txt.bak.20240101_120000")),
            Some(PathBuf::from("/h/a.txt"))
        );
        assert_eq!(
            original_of(Path::new("/h/a.bak.txt.bak.20240101_120000_1")),
            Some(PathBuf::from("/h/a.bak.txt"))
        );
        assert_eq!(original_of(Path::new("/h/a.txt")), None);
    }

    #[test]
    fn test_selected_index() {
        assert_eq!(selected_index(" 1 ", 2), Some(1));
        assert_eq!(selected_index("2", 2), None);
        assert_eq!(selected_index("-1", 2), None);
        assert_eq!(selected_index("cancel", 2), None);
    }
}
