//! PIN-encrypted secret vault
//!
//! Secrets live in one AES-256-GCM sealed blob whose key is derived from
//! the operator's PIN and a persisted random salt. Every call is a full
//! load, decrypt, mutate, encrypt, write cycle. Writes go through a temp
//! file in the vault's directory and a rename, so the blob on disk is
//! always either the old or the new vault.
//!
//! Two callers writing at once can lose one update; the vault has a single
//! operator and does not guard against that.

use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use omnigate_config::Config;
use omnigate_eventlog::{utc_now_iso, EventLogger};

pub mod crypto;
pub mod entry;

pub use entry::{ArchivedValue, SecretEntry, Secrets};

/// Fields masked in every vault event
pub const MASKED_FIELDS: &[&str] = &["name", "value", "pin", "old_pin", "new_pin"];

/// Vault errors
#[derive(Error, Debug)]
pub enum VaultError {
    /// Wrong PIN or tampered ciphertext
    #[error("vault decryption failed: incorrect PIN or corrupted vault")]
    Decryption,

    #[error("vault file is corrupt: {0}")]
    Corrupt(String),

    #[error("{0} must be a non-empty string")]
    Empty(&'static str),

    #[error("secret not found")]
    NotFound,

    #[error("archive version {version} out of range ({available} archived)")]
    VersionOutOfRange { version: usize, available: usize },

    #[error("PIN must be numeric and 5-6 digits long")]
    InvalidPin,

    #[error("vault I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vault serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// True for a 5 to 6 digit numeric PIN
pub fn is_valid_pin(pin: &str) -> bool {
    (5..=6).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit())
}

/// The encrypted secret store
///
/// Every mutation reads, decrypts, modifies, encrypts and renames the whole
/// blob. The file is never torn, but two concurrent writers can lose an
/// update; callers serialize access.
#[derive(Debug, Clone)]
pub struct SecretVault {
    vault_path: PathBuf,
    salt_path: PathBuf,
    iterations: u32,
    logger: EventLogger,
}

impl SecretVault {
    /// `logger` is rescoped to mask names, values and PINs
    pub fn new(
        vault_path: impl Into<PathBuf>,
        salt_path: impl Into<PathBuf>,
        iterations: u32,
        logger: &EventLogger,
    ) -> Self {
        Self {
            vault_path: vault_path.into(),
            salt_path: salt_path.into(),
            iterations,
            logger: logger.scoped(MASKED_FIELDS.iter().copied()),
        }
    }

    pub fn from_config(config: &Config, logger: &EventLogger) -> Self {
        Self::new(
            config.vault_path(),
            config.salt_path(),
            config.vault.kdf_iterations,
            logger,
        )
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    /// Read the salt, generating and persisting it on first use.
    ///
    /// A vault blob without its salt can never be decrypted again, so that
    /// case is corruption rather than a first use.
    fn salt(&self) -> Result<[u8; crypto::SALT_LEN]> {
        if self.salt_path.exists() {
            let bytes = std::fs::read(&self.salt_path)?;
            return bytes.as_slice().try_into().map_err(|_| {
                VaultError::Corrupt(format!(
                    "salt file must hold {} bytes, found {}",
                    crypto::SALT_LEN,
                    bytes.len()
                ))
            });
        }
        if self.vault_path.exists() {
            return Err(VaultError::Corrupt("salt file missing".to_string()));
        }
        let salt = crypto::generate_salt();
        write_atomic(&self.salt_path, &salt)?;
        debug!("generated vault salt at {:?}", self.salt_path);
        Ok(salt)
    }

    /// Decrypt the vault. A missing vault file is an empty vault.
    pub fn load_vault(&self, pin: &str) -> Result<Secrets> {
        let salt = self.salt()?;
        if !self.vault_path.exists() {
            self.logger.log("vault_load_empty", json!({"pin": pin}));
            return Ok(Secrets::new());
        }

        let result = std::fs::read(&self.vault_path)
            .map_err(VaultError::from)
            .and_then(|blob| {
                let key = crypto::derive_key(pin, &salt, self.iterations);
                crypto::open(&key, &blob)
            })
            .and_then(|plain| {
                serde_json::from_slice::<Secrets>(&plain)
                    .map_err(|e| VaultError::Corrupt(e.to_string()))
            });

        match result {
            Ok(secrets) => {
                self.logger
                    .log("vault_load", json!({"pin": pin, "status": "success"}));
                Ok(secrets)
            }
            Err(e) => {
                self.logger.log(
                    "vault_load_failed",
                    json!({"pin": pin, "error": error_label(&e)}),
                );
                warn!("vault load failed: {}", e);
                Err(e)
            }
        }
    }

    /// Encrypt and persist `secrets` under a key derived from `pin`
    pub fn save_vault(&self, secrets: &Secrets, pin: &str) -> Result<()> {
        let result = self.seal_and_write(secrets, pin);
        match &result {
            Ok(()) => self.logger.log(
                "vault_save",
                json!({"pin": pin, "status": "success", "count": secrets.len()}),
            ),
            Err(e) => self.logger.log(
                "vault_save_failed",
                json!({"pin": pin, "error": error_label(e)}),
            ),
        }
        result
    }

    fn seal_and_write(&self, secrets: &Secrets, pin: &str) -> Result<()> {
        let salt = self.salt()?;
        let key = crypto::derive_key(pin, &salt, self.iterations);
        let plain = zeroize::Zeroizing::new(serde_json::to_vec(secrets)?);
        let blob = crypto::seal(&key, &plain)?;
        write_atomic(&self.vault_path, &blob)
    }

    /// Set a secret, moving any previous value to the front of its archive
    pub fn set_secret(&self, name: &str, value: &str, pin: &str) -> Result<()> {
        if name.trim().is_empty() {
            self.logger.log(
                "set_secret_failed",
                json!({"name": name, "pin": pin, "error": "invalid name"}),
            );
            return Err(VaultError::Empty("secret name"));
        }
        if value.is_empty() {
            self.logger.log(
                "set_secret_failed",
                json!({"name": name, "pin": pin, "error": "invalid value"}),
            );
            return Err(VaultError::Empty("secret value"));
        }

        let mut secrets = self.load_vault(pin)?;
        let now = utc_now_iso();
        secrets
            .entry(name.to_string())
            .or_default()
            .replace_current(value.to_string(), &now);
        self.save_vault(&secrets, pin)?;

        self.logger.log(
            "set_secret",
            json!({"name": name, "pin": pin, "status": "set", "timestamp": now}),
        );
        Ok(())
    }

    /// Current value, or the `version`-th archived value when `archived`.
    ///
    /// `Ok(None)` when the secret, or that version, does not exist. A
    /// tombstoned secret has no current value but keeps its archive.
    pub fn get_secret(
        &self,
        name: &str,
        pin: &str,
        archived: bool,
        version: usize,
    ) -> Result<Option<String>> {
        let secrets = self.load_vault(pin)?;
        let Some(entry) = secrets.get(name) else {
            self.logger.log(
                "get_secret_failed",
                json!({"name": name, "pin": pin, "error": "not found"}),
            );
            return Ok(None);
        };

        if !archived {
            return Ok(match entry.live_value() {
                Some(value) => {
                    self.logger.log(
                        "get_secret",
                        json!({"name": name, "pin": pin, "archived": false, "status": "found"}),
                    );
                    Some(value.to_string())
                }
                None => {
                    self.logger.log(
                        "get_secret_failed",
                        json!({"name": name, "pin": pin, "error": "deleted"}),
                    );
                    None
                }
            });
        }

        match entry.archive.get(version) {
            Some(old) => {
                self.logger.log(
                    "get_secret_archive",
                    json!({"name": name, "pin": pin, "version": version, "status": "found"}),
                );
                Ok(Some(old.value.clone()))
            }
            None => {
                self.logger.log(
                    "get_secret_archive_failed",
                    json!({"name": name, "pin": pin, "version": version, "error": "not found"}),
                );
                Ok(None)
            }
        }
    }

    /// True when `name` has a live current value
    pub fn contains(&self, name: &str, pin: &str) -> Result<bool> {
        let secrets = self.load_vault(pin)?;
        Ok(secrets
            .get(name)
            .and_then(SecretEntry::live_value)
            .is_some())
    }

    /// Archived values of `name`, newest first; empty when unknown
    pub fn archive_list(&self, name: &str, pin: &str) -> Result<Vec<ArchivedValue>> {
        let secrets = self.load_vault(pin)?;
        match secrets.get(name) {
            Some(entry) => {
                self.logger.log(
                    "get_secret_archive_list",
                    json!({"name": name, "pin": pin, "status": "found", "count": entry.archive.len()}),
                );
                Ok(entry.archive.clone())
            }
            None => {
                self.logger.log(
                    "get_secret_archive_list_failed",
                    json!({"name": name, "pin": pin, "error": "not found"}),
                );
                Ok(Vec::new())
            }
        }
    }

    /// Swap archive entry `version` into current
    pub fn restore_secret(&self, name: &str, pin: &str, version: usize) -> Result<()> {
        let mut secrets = self.load_vault(pin)?;
        let now = utc_now_iso();
        let outcome = match secrets.get_mut(name) {
            None => Err(VaultError::NotFound),
            Some(entry) => {
                let available = entry.archive.len();
                if entry.restore(version, &now) {
                    Ok(())
                } else {
                    Err(VaultError::VersionOutOfRange { version, available })
                }
            }
        };

        if let Err(e) = outcome {
            self.logger.log(
                "restore_secret_failed",
                json!({"name": name, "pin": pin, "version": version, "error": "invalid archive"}),
            );
            return Err(e);
        }

        self.save_vault(&secrets, pin)?;
        self.logger.log(
            "restore_secret",
            json!({"name": name, "pin": pin, "version": version, "status": "restored", "timestamp": now}),
        );
        Ok(())
    }

    /// Tombstone a secret, or remove it with its archive when `erase_archive`
    pub fn delete_secret(&self, name: &str, pin: &str, erase_archive: bool) -> Result<()> {
        let mut secrets = self.load_vault(pin)?;
        if !secrets.contains_key(name) {
            self.logger.log(
                "delete_secret_failed",
                json!({"name": name, "pin": pin, "error": "not found"}),
            );
            return Err(VaultError::NotFound);
        }

        if erase_archive {
            secrets.remove(name);
        } else if let Some(entry) = secrets.get_mut(name) {
            entry.tombstone(&utc_now_iso());
        }
        self.save_vault(&secrets, pin)?;
        self.logger.log(
            "delete_secret",
            json!({"name": name, "pin": pin, "erase_archive": erase_archive}),
        );
        Ok(())
    }

    /// Re-encrypt the whole vault under `new_pin`
    pub fn change_pin(&self, old_pin: &str, new_pin: &str) -> Result<()> {
        if !is_valid_pin(new_pin) {
            self.logger.log(
                "pin_change_failed",
                json!({"old_pin": old_pin, "new_pin": new_pin, "error": "invalid pin"}),
            );
            return Err(VaultError::InvalidPin);
        }

        let secrets = match self.load_vault(old_pin) {
            Ok(secrets) => secrets,
            Err(e) => {
                self.logger.log(
                    "pin_change_failed",
                    json!({"old_pin": old_pin, "new_pin": new_pin, "error": "invalid old pin"}),
                );
                return Err(e);
            }
        };

        self.save_vault(&secrets, new_pin)?;
        self.logger.log(
            "pin_change",
            json!({"old_pin": old_pin, "new_pin": new_pin, "status": "success"}),
        );
        Ok(())
    }
}

fn error_label(e: &VaultError) -> &'static str {
    match e {
        VaultError::Decryption => "decryption",
        VaultError::Corrupt(_) => "corrupt",
        VaultError::Io(_) => "io",
        VaultError::Json(_) => "serialization",
        _ => "invalid",
    }
}

/// Write `bytes` to `path` via a temp file in the same directory and a rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VaultError::Io(e.error))?;
    Ok(())
}
