//! Action kinds and their staged payloads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Every gated action.
///
/// Declaration order is the order in which pending slots are resolved when
/// more than one is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FileChange,
    ShellCommand,
    PackageInstall,
    PythonExec,
    NodeExec,
    GitClone,
    GitPush,
    ApiCall,
    BackupRestore,
    InstallerBuild,
    InstallerRun,
    SecretStore,
    PipAudit,
    CodeSearch,
    DocFormat,
    UiFileWrite,
}

impl ActionKind {
    pub const ALL: [ActionKind; 16] = [
        ActionKind::FileChange,
        ActionKind::ShellCommand,
        ActionKind::PackageInstall,
        ActionKind::PythonExec,
        ActionKind::NodeExec,
        ActionKind::GitClone,
        ActionKind::GitPush,
        ActionKind::ApiCall,
        ActionKind::BackupRestore,
        ActionKind::InstallerBuild,
        ActionKind::InstallerRun,
        ActionKind::SecretStore,
        ActionKind::PipAudit,
        ActionKind::CodeSearch,
        ActionKind::DocFormat,
        ActionKind::UiFileWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::FileChange => "file_change",
            ActionKind::ShellCommand => "shell_command",
            ActionKind::PackageInstall => "package_install",
            ActionKind::PythonExec => "python_exec",
            ActionKind::NodeExec => "node_exec",
            ActionKind::GitClone => "git_clone",
            ActionKind::GitPush => "git_push",
            ActionKind::ApiCall => "api_call",
            ActionKind::BackupRestore => "backup_restore",
            ActionKind::InstallerBuild => "installer_build",
            ActionKind::InstallerRun => "installer_run",
            ActionKind::SecretStore => "secret_store",
            ActionKind::PipAudit => "pip_audit",
            ActionKind::CodeSearch => "code_search",
            ActionKind::DocFormat => "doc_format",
            ActionKind::UiFileWrite => "ui_file_write",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown action kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ActionKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// A file write waiting for approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub target: PathBuf,
    /// Temp file holding the proposed content
    pub staged: PathBuf,
    pub diff: String,
    pub existed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommand {
    pub command: String,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Pip,
    Npm,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageManager::Pip => f.write_str("pip"),
            PackageManager::Npm => f.write_str("npm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInstall {
    pub manager: PackageManager,
    /// `None` installs from the project manifest
    pub package: Option<String>,
    pub cwd: Option<PathBuf>,
}

/// Source for the Python or Node runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitClone {
    pub url: String,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitPush {
    pub repo: PathBuf,
    pub message: String,
    pub remote: String,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCall {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Backups offered for restore, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRestore {
    pub target: PathBuf,
    pub backups: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerBuild {
    pub project: PathBuf,
    /// Manifest files found in the project
    pub detected: Vec<String>,
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerRun {
    pub project: PathBuf,
    pub script_path: PathBuf,
}

/// Step of the conversational secret-store workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretStage {
    /// Waiting for "yes" to start
    Confirm,
    /// Secret exists; waiting for "yes" to overwrite
    Overwrite,
    /// Next message is the value
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretStore {
    pub name: String,
    pub stage: SecretStage,
}

/// Dependency audit of a project directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipAudit {
    pub project: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSearch {
    pub pattern: String,
    pub project: PathBuf,
}

/// In-place docstring formatting of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocFormat {
    pub target: PathBuf,
}

/// Kind-specific payload of a pending action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingPayload {
    FileChange(FileChange),
    ShellCommand(ShellCommand),
    PackageInstall(PackageInstall),
    PythonExec(Script),
    NodeExec(Script),
    GitClone(GitClone),
    GitPush(GitPush),
    ApiCall(ApiCall),
    BackupRestore(BackupRestore),
    InstallerBuild(InstallerBuild),
    InstallerRun(InstallerRun),
    SecretStore(SecretStore),
    PipAudit(PipAudit),
    CodeSearch(CodeSearch),
    DocFormat(DocFormat),
    UiFileWrite(FileChange),
}

impl PendingPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            PendingPayload::FileChange(_) => ActionKind::FileChange,
            PendingPayload::ShellCommand(_) => ActionKind::ShellCommand,
            PendingPayload::PackageInstall(_) => ActionKind::PackageInstall,
            PendingPayload::PythonExec(_) => ActionKind::PythonExec,
            PendingPayload::NodeExec(_) => ActionKind::NodeExec,
            PendingPayload::GitClone(_) => ActionKind::GitClone,
            PendingPayload::GitPush(_) => ActionKind::GitPush,
            PendingPayload::ApiCall(_) => ActionKind::ApiCall,
            PendingPayload::BackupRestore(_) => ActionKind::BackupRestore,
            PendingPayload::InstallerBuild(_) => ActionKind::InstallerBuild,
            PendingPayload::InstallerRun(_) => ActionKind::InstallerRun,
            PendingPayload::SecretStore(_) => ActionKind::SecretStore,
            PendingPayload::PipAudit(_) => ActionKind::PipAudit,
            PendingPayload::CodeSearch(_) => ActionKind::CodeSearch,
            PendingPayload::DocFormat(_) => ActionKind::DocFormat,
            PendingPayload::UiFileWrite(_) => ActionKind::UiFileWrite,
        }
    }
}
