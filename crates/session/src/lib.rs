//! Per-session state for the action gate
//!
//! A [`SessionContext`] is created when an operator connects and dropped
//! when they leave. It holds the unlocked PIN, the trust flag, the pending
//! action table and recent conversation history. None of it is persisted.

use chrono::{DateTime, Local};
use std::fmt;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub mod action;
pub mod pending;

pub use action::{ActionKind, PendingPayload, UnknownKind};
pub use pending::{PendingAction, PendingTable};

/// Default maximum number of messages kept in history
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// A message in the session history
#[derive(Debug, Clone)]
pub struct Message {
    /// Role: user, assistant, system
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

/// State carried across one operator's turns
pub struct SessionContext {
    pub id: String,
    /// Trust mode: approve every pending action without asking
    pub global_approval: bool,
    pin: Option<Zeroizing<String>>,
    pub pending: PendingTable,
    messages: Vec<Message>,
    max_messages: usize,
    pub created_at: DateTime<Local>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("global_approval", &self.global_approval)
            .field("unlocked", &self.pin.is_some())
            .field("pending", &self.pending.kinds())
            .field("messages", &self.messages.len())
            .finish()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

impl SessionContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_max_messages(id, DEFAULT_MAX_MESSAGES)
    }

    pub fn with_max_messages(id: impl Into<String>, max_messages: usize) -> Self {
        Self {
            id: id.into(),
            global_approval: false,
            pin: None,
            pending: PendingTable::new(),
            messages: Vec::new(),
            max_messages,
            created_at: Local::now(),
        }
    }

    /// Remember the PIN for vault operations in this session
    pub fn unlock(&mut self, pin: impl Into<String>) {
        self.pin = Some(Zeroizing::new(pin.into()));
        info!("session {} unlocked", self.id);
    }

    /// Forget the PIN
    pub fn lock_vault(&mut self) {
        self.pin = None;
    }

    pub fn is_unlocked(&self) -> bool {
        self.pin.is_some()
    }

    pub fn pin(&self) -> Option<&str> {
        self.pin.as_deref().map(String::as_str)
    }

    pub fn enable_trust(&mut self) {
        self.global_approval = true;
        info!("session {} trusted: pending actions auto-approve", self.id);
    }

    /// The next message answers a secret-store value prompt
    pub fn awaits_secret_value(&self) -> bool {
        if self.pending.first_kind() != Some(ActionKind::SecretStore) {
            return false;
        }
        matches!(
            self.pending.get(ActionKind::SecretStore).map(|a| &a.payload),
            Some(PendingPayload::SecretStore(action::SecretStore {
                stage: action::SecretStage::Value,
                ..
            }))
        )
    }

    pub fn revoke_trust(&mut self) {
        self.global_approval = false;
        info!("session {} trust revoked", self.id);
    }

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.messages.push(Message {
            role: role.into(),
            content: content.into(),
            timestamp: Local::now(),
        });
        self.enforce_max_messages();
    }

    fn enforce_max_messages(&mut self) {
        if self.messages.len() > self.max_messages {
            let to_remove = self.messages.len() - self.max_messages;
            self.messages.drain(0..to_remove);
            debug!(
                "session {} history truncated to {} messages",
                self.id,
                self.messages.len()
            );
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The last `max_messages` turns as chat transcript
    pub fn history(&self, max_messages: usize) -> Vec<omnigate_provider::ChatMessage> {
        self.messages
            .iter()
            .skip(self.messages.len().saturating_sub(max_messages))
            .map(|m| omnigate_provider::ChatMessage::new(m.role.clone(), m.content.clone()))
            .collect()
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}
