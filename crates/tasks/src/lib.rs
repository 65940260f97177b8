//! Deferred actions and retry
//!
//! [`TaskQueue`] holds action requests to be proposed later, lowest
//! priority number first. [`with_retry`] wraps flaky network-bound steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use omnigate_session::ActionKind;

pub mod queue;
pub mod retry;

pub use queue::{QueueStore, Task, TaskQueue};
pub use retry::{with_retry, RetryPolicy};

/// Task persistence errors
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task store parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// A request to propose an action with the given parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Value,
}

impl ActionRequest {
    pub fn new(kind: ActionKind, params: Value) -> Self {
        Self { kind, params }
    }
}
