//! Conversational secret storage
//!
//! confirm -> (overwrite?) -> value. Each step is its own pending action;
//! the value step takes the operator's next message verbatim and stores it
//! under the session PIN.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use omnigate_eventlog::EventLogger;
use omnigate_session::action::{SecretStage, SecretStore};
use omnigate_session::{ActionKind, PendingPayload, SessionContext};
use omnigate_vault::SecretVault;

use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::util::is_affirmative;
use crate::Result;

/// Name the "store my github pat" phrase stores under
pub const GITHUB_PAT: &str = "GITHUB_PAT";

pub fn is_valid_secret_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

pub struct SecretStoreHandler {
    vault: SecretVault,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct StoreArgs {
    name: String,
}

fn step(name: &str, stage: SecretStage) -> PendingPayload {
    PendingPayload::SecretStore(SecretStore {
        name: name.to_string(),
        stage,
    })
}

impl SecretStoreHandler {
    pub fn new(vault: SecretVault, logger: &EventLogger) -> Self {
        Self {
            vault,
            logger: logger.scoped(["name"]),
        }
    }
}

#[async_trait]
impl ActionHandler for SecretStoreHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::SecretStore
    }

    fn description(&self) -> &str {
        "Store a secret in the vault. Asks for confirmation, then the value."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Secret name, e.g. GITHUB_PAT" }
            },
            "required": ["name"]
        })
    }

    fn affirmatives(&self) -> &'static [&'static str] {
        &["sure", "yep", "confirmed"]
    }

    /// The value step accepts any non-empty reply
    fn approves(&self, message: &str, payload: &PendingPayload, trusted: bool) -> bool {
        match payload {
            PendingPayload::SecretStore(SecretStore {
                stage: SecretStage::Value,
                ..
            }) => !message.trim().is_empty(),
            _ => trusted || is_affirmative(message, self.affirmatives()),
        }
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        session: &SessionContext,
    ) -> Result<Proposal> {
        let args: StoreArgs = serde_json::from_value(params)?;
        let name = args.name.trim();
        if !is_valid_secret_name(name) {
            return Ok(Proposal::Rejected(
                "◆ SECRET NAMES USE LETTERS, DIGITS, '_', '-' AND '.'".to_string(),
            ));
        }
        if !session.is_unlocked() {
            return Ok(Proposal::Rejected(
                "◆ VAULT LOCKED: enter your PIN first".to_string(),
            ));
        }

        Ok(Proposal::Staged {
            payload: step(name, SecretStage::Confirm),
            prompt: format!(
                "I'll store '{}' securely in the vault. Is that ok?",
                name
            ),
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        message: &str,
        session: &SessionContext,
    ) -> Result<Execution> {
        let store = match payload {
            PendingPayload::SecretStore(store) => store,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let Some(pin) = session.pin() else {
            return Ok(Execution::done("◆ VAULT LOCKED: enter your PIN first"));
        };
        let name = store.name.as_str();

        match store.stage {
            SecretStage::Confirm if self.vault.contains(name, pin)? => Ok(Execution::then(
                format!(
                    "A secret named '{}' already exists. Overwrite/replace it? (yes/no)",
                    name
                ),
                step(name, SecretStage::Overwrite),
            )),
            SecretStage::Confirm | SecretStage::Overwrite => Ok(Execution::then(
                format!("Now paste the value for '{}'.", name),
                step(name, SecretStage::Value),
            )),
            SecretStage::Value => {
                self.vault.set_secret(name, message.trim(), pin)?;
                self.logger
                    .log("secret_stored", json!({"name": name, "status": "stored"}));
                Ok(Execution::done(format!(
                    "◆ SECRET '{}' STORED SECURELY.",
                    name
                )))
            }
        }
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let PendingPayload::SecretStore(store) = payload {
            self.logger.log(
                "secret_store_cancelled",
                json!({"name": store.name, "stage": store.stage}),
            );
        }
        "Secret storage cancelled.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_names() {
        assert!(is_valid_secret_name("GITHUB_PAT"));
        assert!(is_valid_secret_name("aws.key-2"));
        assert!(!is_valid_secret_name(""));
        assert!(!is_valid_secret_name("has space"));
        assert!(!is_valid_secret_name(&"x".repeat(65)));
    }
}
