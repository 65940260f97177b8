//! Versioned secret entries

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Decrypted vault contents
pub type Secrets = BTreeMap<String, SecretEntry>;

/// A previous value of a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct ArchivedValue {
    pub value: String,
    pub timestamp: String,
}

/// A named secret with its history, newest archive entry first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretEntry {
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub archive: Vec<ArchivedValue>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_date: Option<String>,
}

impl SecretEntry {
    /// Store a new current value, archiving the previous one.
    ///
    /// Setting a value clears a tombstone.
    pub fn replace_current(&mut self, value: String, now: &str) {
        self.push_current_to_archive(now);
        self.current = Some(value);
        self.last_update = Some(now.to_string());
        self.deleted = false;
        self.deleted_date = None;
    }

    /// Swap `archive[version]` into `current`, prior current to `archive[0]`.
    ///
    /// Returns false when `version` is out of range.
    pub fn restore(&mut self, version: usize, now: &str) -> bool {
        if version >= self.archive.len() {
            return false;
        }
        let mut restored = self.archive.remove(version);
        self.push_current_to_archive(now);
        self.current = Some(std::mem::take(&mut restored.value));
        self.last_update = Some(now.to_string());
        self.deleted = false;
        self.deleted_date = None;
        true
    }

    /// Mark deleted, keeping value and archive for a later restore
    pub fn tombstone(&mut self, now: &str) {
        self.deleted = true;
        self.deleted_date = Some(now.to_string());
    }

    /// Current value unless the entry is tombstoned
    pub fn live_value(&self) -> Option<&str> {
        if self.deleted {
            None
        } else {
            self.current.as_deref()
        }
    }

    fn push_current_to_archive(&mut self, now: &str) {
        if let Some(previous) = self.current.take() {
            let timestamp = self
                .last_update
                .clone()
                .unwrap_or_else(|| now.to_string());
            self.archive.insert(
                0,
                ArchivedValue {
                    value: previous,
                    timestamp,
                },
            );
        }
    }
}
