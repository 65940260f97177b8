//! Shared fixtures for the agent integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use omnigate_config::Config;
use omnigate_eventlog::EventLogger;
use omnigate_vault::SecretVault;

/// A temp directory holding an allowed root, a scratch dir and the event log
pub struct Fixture {
    pub dir: TempDir,
    pub root: PathBuf,
    pub scratch: PathBuf,
    pub logger: EventLogger,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let root = base.join("root");
        let scratch = base.join("scratch");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&scratch).unwrap();
        let logger = EventLogger::new(base.join("events.log"));
        Self {
            dir,
            root,
            scratch,
            logger,
        }
    }

    pub fn base(&self) -> PathBuf {
        self.root.parent().unwrap().to_path_buf()
    }

    /// Vault with cheap key derivation
    pub fn vault(&self) -> SecretVault {
        let base = self.base();
        SecretVault::new(
            base.join("secrets.vault"),
            base.join("secrets.salt"),
            1_000,
            &self.logger,
        )
    }

    /// Config pointing every path at this fixture
    pub fn config(&self) -> Config {
        let base = self.base();
        let mut config = Config::default();
        config.policy.allowed_root = self.root.display().to_string();
        config.logging.path = base.join("events.log").display().to_string();
        config.vault.vault_file = base.join("secrets.vault").display().to_string();
        config.vault.salt_file = base.join("secrets.salt").display().to_string();
        config.vault.kdf_iterations = 1_000;
        config.policy.tools.ui_sandbox = base.join("ui_sandbox").display().to_string();
        config
    }

    /// Event types logged so far, in order
    pub fn events(&self) -> Vec<String> {
        self.logger
            .read_records()
            .unwrap()
            .into_iter()
            .map(|r| r.event_type)
            .collect()
    }

    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }
}

pub fn entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}
