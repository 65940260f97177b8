//! Approval-gated action core
//!
//! Handlers propose side-effecting actions, the [`ApprovalGate`] holds them
//! in the session's pending table until the operator answers, and the
//! [`SessionController`] routes each incoming message.

use thiserror::Error;

use omnigate_session::ActionKind;

pub mod controller;
pub mod gate;
pub mod handlers;
pub mod memory;
pub mod process;
pub mod util;

pub use controller::{Response, SessionController};
pub use gate::ApprovalGate;
pub use handlers::{ActionHandler, Execution, HandlerRegistry, Proposal};
pub use memory::MemoryRecorder;

/// Action errors
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("◆ INVALID PARAMETERS: {0}")]
    InvalidParams(String),

    #[error("◆ PATH DENIED: {0}")]
    PathDenied(#[from] handlers::path_utils::PathValidationError),

    #[error("◆ COMMAND FAILED: {0}")]
    CommandFailed(String),

    #[error("◆ HTTP ERROR: {0}")]
    Http(#[from] reqwest::Error),

    #[error("◆ VAULT ERROR: {0}")]
    Vault(#[from] omnigate_vault::VaultError),

    #[error("◆ PROVIDER ERROR: {0}")]
    Provider(#[from] omnigate_provider::ProviderError),

    #[error("◆ I/O ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ PAYLOAD MISMATCH: {expected} handler got {found}")]
    PayloadMismatch {
        expected: ActionKind,
        found: ActionKind,
    },
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        ActionError::InvalidParams(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;
