//! Action handlers
//!
//! Each handler owns one [`ActionKind`]: `propose` validates parameters and
//! builds the payload to stage, `execute` performs the side effect once the
//! gate has an approval, `cancel` cleans up after a denial.

pub mod audit;
pub mod backup;
pub mod code;
pub mod docs;
pub mod files;
pub mod git;
pub mod http;
pub mod install;
pub mod installer;
pub mod path_utils;
pub mod search;
pub mod secret;
pub mod shell;

pub use audit::PipAuditHandler;
pub use backup::BackupRestoreHandler;
pub use code::CodeHandler;
pub use docs::DocFormatHandler;
pub use files::{EditTarget, FileEditHandler, FileReader};
pub use git::{GitCloneHandler, GitPushHandler, StepOutcome};
pub use http::ApiCallHandler;
pub use install::PackageInstallHandler;
pub use installer::{InstallerBuildHandler, InstallerRunHandler};
pub use search::{CodeSearchHandler, SymbolFinder};
pub use secret::SecretStoreHandler;
pub use shell::ShellHandler;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use omnigate_config::Config;
use omnigate_eventlog::EventLogger;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};
use omnigate_vault::SecretVault;

use crate::util::is_affirmative;
use crate::{ActionError, Result};

/// What a propose step produced
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Stage `payload` and show `prompt`
    Staged {
        payload: PendingPayload,
        prompt: String,
    },
    /// Ran without approval (allowlisted commands); the output
    Immediate(String),
    /// Refused before staging; the reason
    Rejected(String),
}

/// What an execute step produced
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub message: String,
    /// Next step of a multi-step action, staged by the gate
    pub follow_up: Option<PendingPayload>,
}

impl Execution {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            follow_up: None,
        }
    }

    pub fn then(message: impl Into<String>, follow_up: PendingPayload) -> Self {
        Self {
            message: message.into(),
            follow_up: Some(follow_up),
        }
    }
}

type BoxedHandler = Box<dyn ActionHandler>;

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    /// Approval words accepted on top of the base vocabulary
    fn affirmatives(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether `message` approves `payload`
    fn approves(&self, message: &str, _payload: &PendingPayload, trusted: bool) -> bool {
        trusted || is_affirmative(message, self.affirmatives())
    }

    async fn propose(&self, params: Value, session: &SessionContext) -> Result<Proposal>;

    async fn execute(
        &self,
        payload: PendingPayload,
        message: &str,
        session: &SessionContext,
    ) -> Result<Execution>;

    /// Release anything the proposal staged; returns the cancellation notice
    async fn cancel(&self, _payload: PendingPayload, _message: &str) -> String {
        format!("◆ {} CANCELLED", self.kind().as_str().to_uppercase())
    }
}

/// Error for a payload routed to the wrong handler
pub(crate) fn mismatch(expected: ActionKind, payload: &PendingPayload) -> ActionError {
    ActionError::PayloadMismatch {
        expected,
        found: payload.kind(),
    }
}

/// Dispatch table from action kind to handler
pub struct HandlerRegistry {
    handlers: HashMap<ActionKind, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: ActionHandler + 'static>(&mut self, handler: T) {
        self.handlers.insert(handler.kind(), Box::new(handler));
    }

    pub fn get(&self, kind: ActionKind) -> Option<&dyn ActionHandler> {
        self.handlers.get(&kind).map(|h| h.as_ref())
    }

    pub fn has(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in resolve order
    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Name, description and parameter schema of every handler
    pub fn definitions(&self) -> Vec<Value> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| self.get(kind))
            .map(|h| {
                json!({
                    "name": h.kind().as_str(),
                    "description": h.description(),
                    "parameters": h.parameters(),
                })
            })
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register every built-in handler using the `policy` section of `config`
pub fn register_default_handlers(
    registry: &mut HandlerRegistry,
    config: &Config,
    logger: &EventLogger,
    vault: &SecretVault,
) {
    let policy = &config.policy;
    let root = config.allowed_root();

    registry.register(FileEditHandler::new(root.clone(), policy.files.clone(), logger));
    registry.register(ShellHandler::new(root.clone(), policy.shell.clone(), logger));
    registry.register(PackageInstallHandler::new(
        root.clone(),
        policy.install.clone(),
        logger,
    ));
    registry.register(CodeHandler::python(policy.code.clone(), logger));
    registry.register(CodeHandler::node(policy.code.clone(), logger));
    registry.register(GitCloneHandler::new(root.clone(), policy.git.clone(), logger));
    registry.register(GitPushHandler::new(root.clone(), policy.git.clone(), logger));
    registry.register(ApiCallHandler::new(policy.http.clone(), logger));
    registry.register(BackupRestoreHandler::new(root.clone(), logger));
    registry.register(InstallerBuildHandler::new(root.clone(), logger));
    registry.register(InstallerRunHandler::new(policy.install.clone(), logger));
    registry.register(SecretStoreHandler::new(vault.clone(), logger));
    registry.register(PipAuditHandler::new(root.clone(), policy.tools.clone(), logger));
    registry.register(CodeSearchHandler::new(
        root.clone(),
        policy.tools.clone(),
        logger,
    ));
    registry.register(DocFormatHandler::new(root, policy.tools.clone(), logger));
    registry.register(FileEditHandler::ui_sandbox(
        config.ui_sandbox(),
        policy.files.clone(),
        logger,
    ));
}
