//! Common test utilities for Omnigate integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

pub const PIN: &str = "24680";

/// Isolated HOME with its own ~/.omnigate
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let data_dir = temp_dir.path().join(".omnigate");

        Ok(Self { temp_dir, data_dir })
    }

    pub fn home(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Path to a file in the data directory
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Command with HOME pointed at the test environment
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_omnigate"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config with the cheapest KDF the vault accepts
    pub fn create_config(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let config = r#"{
  "vault": { "kdf_iterations": 100000 }
}"#;
        std::fs::write(self.data_file("config.json"), config)?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
