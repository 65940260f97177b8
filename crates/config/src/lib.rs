//! Configuration management for Omnigate
//!
//! Loads and saves the JSON configuration tree: event log settings, vault
//! files and key derivation, and the action policy (allowed root, shell
//! deny/allow lists, timeouts and output budgets per handler).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, expand_home, log_path, queue_path, salt_path, vault_path};

/// Lowest PBKDF2 iteration count the vault accepts.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Event log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_path")]
    pub path: String,
    #[serde(default = "default_version")]
    pub system_version: String,
    #[serde(default = "default_version")]
    pub tagging_version: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            system_version: default_version(),
            tagging_version: default_version(),
        }
    }
}

fn default_log_path() -> String {
    "~/.omnigate/events.log".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Vault storage and key derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_vault_file")]
    pub vault_file: String,
    #[serde(default = "default_salt_file")]
    pub salt_file: String,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault_file: default_vault_file(),
            salt_file: default_salt_file(),
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

fn default_vault_file() -> String {
    "~/.omnigate/secrets.vault".to_string()
}

fn default_salt_file() -> String {
    "~/.omnigate/secrets.salt".to_string()
}

fn default_kdf_iterations() -> u32 {
    200_000
}

/// Byte budgets for captured process output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputBudget {
    pub stdout: usize,
    pub stderr: usize,
}

impl OutputBudget {
    pub const fn new(stdout: usize, stderr: usize) -> Self {
        Self { stdout, stderr }
    }
}

/// Shell command policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellPolicy {
    /// Substrings that reject a command outright
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
    /// Command prefixes that run without confirmation
    #[serde(default = "default_safe_prefixes")]
    pub safe_prefixes: Vec<String>,
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_shell_budget")]
    pub budget: OutputBudget,
}

impl Default for ShellPolicy {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
            safe_prefixes: default_safe_prefixes(),
            timeout_secs: default_shell_timeout(),
            budget: default_shell_budget(),
        }
    }
}

fn default_denylist() -> Vec<String> {
    ["rm -rf", "del /f", "shutdown", "format", "dd ", "mkfs", "poweroff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_safe_prefixes() -> Vec<String> {
    [
        "ls",
        "dir",
        "npm install",
        "npm run",
        "npm build",
        "npm start",
        "pip install",
        "pip list",
        "pip freeze",
        "python",
        "pytest",
        "make",
        "echo",
        "node",
        "which",
        "where",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_shell_timeout() -> u64 {
    60
}

fn default_shell_budget() -> OutputBudget {
    OutputBudget::new(2000, 800)
}

/// Script runner policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodePolicy {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_node")]
    pub node: String,
    #[serde(default = "default_code_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_code_budget")]
    pub budget: OutputBudget,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self {
            python: default_python(),
            node: default_node(),
            timeout_secs: default_code_timeout(),
            budget: default_code_budget(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_node() -> String {
    "node".to_string()
}

fn default_code_timeout() -> u64 {
    12
}

fn default_code_budget() -> OutputBudget {
    OutputBudget::new(1500, 800)
}

/// Git clone/push policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitPolicy {
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_git_retries")]
    pub retries: u32,
    #[serde(default = "default_git_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_clone_budget")]
    pub clone_budget: OutputBudget,
    #[serde(default = "default_push_log")]
    pub push_log_bytes: usize,
}

impl Default for GitPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: default_git_timeout(),
            retries: default_git_retries(),
            retry_delay_ms: default_git_retry_delay(),
            clone_budget: default_clone_budget(),
            push_log_bytes: default_push_log(),
        }
    }
}

fn default_git_timeout() -> u64 {
    90
}

fn default_git_retries() -> u32 {
    2
}

fn default_git_retry_delay() -> u64 {
    1000
}

fn default_clone_budget() -> OutputBudget {
    OutputBudget::new(2000, 800)
}

fn default_push_log() -> usize {
    2500
}

/// HTTP call policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpPolicy {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_response")]
    pub max_response_bytes: usize,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_response_bytes: default_max_response(),
        }
    }
}

fn default_http_timeout() -> u64 {
    20
}

fn default_max_response() -> usize {
    2500
}

/// Package manager install policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallPolicy {
    #[serde(default = "default_pip_timeout")]
    pub pip_timeout_secs: u64,
    #[serde(default = "default_npm_timeout")]
    pub npm_timeout_secs: u64,
    #[serde(default = "default_install_budget")]
    pub budget: OutputBudget,
    /// Installer script run timeout
    #[serde(default = "default_installer_timeout")]
    pub installer_timeout_secs: u64,
    #[serde(default = "default_installer_budget")]
    pub installer_budget: OutputBudget,
}

impl Default for InstallPolicy {
    fn default() -> Self {
        Self {
            pip_timeout_secs: default_pip_timeout(),
            npm_timeout_secs: default_npm_timeout(),
            budget: default_install_budget(),
            installer_timeout_secs: default_installer_timeout(),
            installer_budget: default_installer_budget(),
        }
    }
}

fn default_pip_timeout() -> u64 {
    60
}

fn default_npm_timeout() -> u64 {
    120
}

fn default_install_budget() -> OutputBudget {
    OutputBudget::new(1800, 800)
}

fn default_installer_timeout() -> u64 {
    300
}

fn default_installer_budget() -> OutputBudget {
    OutputBudget::new(3000, 1000)
}

/// File edit policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePolicy {
    #[serde(default = "default_diff_preview")]
    pub diff_preview_bytes: usize,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            diff_preview_bytes: default_diff_preview(),
        }
    }
}

fn default_diff_preview() -> usize {
    2000
}

/// Dependency audit, code search, docstring formatting and the UI sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsPolicy {
    #[serde(default = "default_pip_audit")]
    pub pip_audit: String,
    #[serde(default = "default_tool_timeout")]
    pub audit_timeout_secs: u64,
    #[serde(default = "default_audit_budget")]
    pub audit_budget: OutputBudget,
    #[serde(default = "default_ripgrep")]
    pub ripgrep: String,
    #[serde(default = "default_tool_timeout")]
    pub search_timeout_secs: u64,
    /// Result lines kept from a code search
    #[serde(default = "default_search_lines")]
    pub max_search_lines: usize,
    /// Matches kept from a `tags` lookup
    #[serde(default = "default_symbol_results")]
    pub max_symbol_results: usize,
    #[serde(default = "default_docformatter")]
    pub docformatter: String,
    #[serde(default = "default_tool_timeout")]
    pub docs_timeout_secs: u64,
    #[serde(default = "default_docs_budget")]
    pub docs_budget: OutputBudget,
    /// Directory UI file writes are confined to
    #[serde(default = "default_ui_sandbox")]
    pub ui_sandbox: String,
}

impl Default for ToolsPolicy {
    fn default() -> Self {
        Self {
            pip_audit: default_pip_audit(),
            audit_timeout_secs: default_tool_timeout(),
            audit_budget: default_audit_budget(),
            ripgrep: default_ripgrep(),
            search_timeout_secs: default_tool_timeout(),
            max_search_lines: default_search_lines(),
            max_symbol_results: default_symbol_results(),
            docformatter: default_docformatter(),
            docs_timeout_secs: default_tool_timeout(),
            docs_budget: default_docs_budget(),
            ui_sandbox: default_ui_sandbox(),
        }
    }
}

fn default_pip_audit() -> String {
    "pip-audit".to_string()
}

fn default_ripgrep() -> String {
    "rg".to_string()
}

fn default_docformatter() -> String {
    "docformatter".to_string()
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_audit_budget() -> OutputBudget {
    OutputBudget::new(1800, 800)
}

fn default_search_lines() -> usize {
    40
}

fn default_symbol_results() -> usize {
    30
}

fn default_docs_budget() -> OutputBudget {
    OutputBudget::new(2000, 800)
}

fn default_ui_sandbox() -> String {
    "~/ui_sandbox".to_string()
}

/// Action policy: where handlers may act and how long they may run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Root every path-taking handler is confined to
    #[serde(default = "default_allowed_root")]
    pub allowed_root: String,
    #[serde(default)]
    pub shell: ShellPolicy,
    #[serde(default)]
    pub code: CodePolicy,
    #[serde(default)]
    pub git: GitPolicy,
    #[serde(default)]
    pub http: HttpPolicy,
    #[serde(default)]
    pub install: InstallPolicy,
    #[serde(default)]
    pub files: FilePolicy,
    #[serde(default)]
    pub tools: ToolsPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_root: default_allowed_root(),
            shell: ShellPolicy::default(),
            code: CodePolicy::default(),
            git: GitPolicy::default(),
            http: HttpPolicy::default(),
            install: InstallPolicy::default(),
            files: FilePolicy::default(),
            tools: ToolsPolicy::default(),
        }
    }
}

fn default_allowed_root() -> String {
    "~".to_string()
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Config {
    /// Load configuration from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("saving config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Reject settings that would weaken the vault or disable timeouts
    pub fn validate(&self) -> Result<()> {
        if self.vault.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(ConfigError::Invalid(format!(
                "vault.kdf_iterations must be at least {}, got {}",
                MIN_KDF_ITERATIONS, self.vault.kdf_iterations
            )));
        }
        let timeouts = [
            ("policy.shell.timeout_secs", self.policy.shell.timeout_secs),
            ("policy.code.timeout_secs", self.policy.code.timeout_secs),
            ("policy.git.timeout_secs", self.policy.git.timeout_secs),
            ("policy.http.timeout_secs", self.policy.http.timeout_secs),
            (
                "policy.tools.audit_timeout_secs",
                self.policy.tools.audit_timeout_secs,
            ),
            (
                "policy.tools.search_timeout_secs",
                self.policy.tools.search_timeout_secs,
            ),
            (
                "policy.tools.docs_timeout_secs",
                self.policy.tools.docs_timeout_secs,
            ),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if self.policy.allowed_root.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "policy.allowed_root must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Event log file
    pub fn log_path(&self) -> PathBuf {
        expand_home(&self.logging.path)
    }

    /// Encrypted vault blob
    pub fn vault_path(&self) -> PathBuf {
        expand_home(&self.vault.vault_file)
    }

    /// Vault salt file
    pub fn salt_path(&self) -> PathBuf {
        expand_home(&self.vault.salt_file)
    }

    /// Root that handlers are confined to
    pub fn allowed_root(&self) -> PathBuf {
        expand_home(&self.policy.allowed_root)
    }

    /// Directory UI file writes land in
    pub fn ui_sandbox(&self) -> PathBuf {
        expand_home(&self.policy.tools.ui_sandbox)
    }
}

/// Initialize the data directory and a default config file
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("config written to {:?}", config_path);
    }

    paths::ensure_dir(&data_dir()).await?;
    info!("data directory ready at {:?}", data_dir());

    Config::load().await
}
