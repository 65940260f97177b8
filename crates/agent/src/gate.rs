//! Two-phase approval: propose stages, resolve decides
//!
//! Nothing reaches a handler's `execute` unless its kind has a staged
//! action and the reply approves it (or the session is in trust mode). The
//! slot is cleared on every resolve, whatever the outcome.

use serde_json::{json, Value};
use tracing::{debug, warn};

use omnigate_eventlog::EventLogger;
use omnigate_session::{ActionKind, SessionContext};

use crate::handlers::{HandlerRegistry, Proposal};
use crate::util::truncate;

pub struct ApprovalGate {
    registry: HandlerRegistry,
    logger: EventLogger,
}

impl ApprovalGate {
    pub fn new(registry: HandlerRegistry, logger: &EventLogger) -> Self {
        Self {
            registry,
            logger: logger.clone(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run `kind`'s propose step and stage its payload.
    ///
    /// Returns the text to show: a confirmation prompt, a rejection, or the
    /// output of an action that needs no approval. Never executes a gated
    /// action.
    pub async fn propose(
        &self,
        kind: ActionKind,
        params: Value,
        session: &mut SessionContext,
    ) -> String {
        let Some(handler) = self.registry.get(kind) else {
            self.logger
                .log("propose_error", json!({"action": kind, "error": "no handler"}));
            return format!("◆ NO HANDLER FOR: {}", kind);
        };

        match handler.propose(params, session).await {
            Ok(Proposal::Staged { payload, prompt }) => {
                debug_assert_eq!(payload.kind(), kind);
                if let Some(replaced) = session.pending.stage(payload) {
                    debug!("replaced pending {}", kind);
                    handler.cancel(replaced.payload, "").await;
                }
                self.logger
                    .log("action_proposed", json!({"action": kind, "status": "pending"}));
                prompt
            }
            Ok(Proposal::Immediate(output)) => output,
            Ok(Proposal::Rejected(reason)) => {
                self.logger.log(
                    "action_rejected",
                    json!({"action": kind, "summary": truncate(&reason, 200)}),
                );
                reason
            }
            Err(e) => {
                warn!("propose {} failed: {}", kind, e);
                self.logger.log(
                    "action_rejected",
                    json!({"action": kind, "error": truncate(&e.to_string(), 300)}),
                );
                e.to_string()
            }
        }
    }

    /// Decide the staged action of `kind` using `message`.
    ///
    /// `None` when nothing of that kind is staged. Otherwise the slot is
    /// cleared and the execution output, error text or cancellation notice
    /// is returned. A follow-up step from the handler is staged afterwards.
    pub async fn resolve(
        &self,
        kind: ActionKind,
        message: &str,
        session: &mut SessionContext,
    ) -> Option<String> {
        let action = session.pending.take(kind)?;
        let Some(handler) = self.registry.get(kind) else {
            self.logger.log(
                "handler_error",
                json!({"action": kind, "error": "no handler"}),
            );
            return Some(format!("◆ NO HANDLER FOR: {}", kind));
        };

        let trusted = session.global_approval;
        if !handler.approves(message, &action.payload, trusted) {
            let notice = handler.cancel(action.payload, message).await;
            self.logger
                .log("action_cancelled", json!({"action": kind, "status": "cancelled"}));
            return Some(notice);
        }

        let status = if trusted { "trusted" } else { "approved" };
        self.logger
            .log("action_approved", json!({"action": kind, "status": status}));
        match handler.execute(action.payload, message, session).await {
            Ok(execution) => {
                if let Some(next) = execution.follow_up {
                    let next_kind = next.kind();
                    session.pending.stage(next);
                    self.logger
                        .log("action_proposed", json!({"action": next_kind, "status": "pending"}));
                }
                Some(execution.message)
            }
            Err(e) => {
                warn!("{} failed: {}", kind, e);
                self.logger.log(
                    "handler_error",
                    json!({"action": kind, "error": truncate(&e.to_string(), 300)}),
                );
                Some(format!("◆ {} FAILED: {}", kind.as_str().to_uppercase(), e))
            }
        }
    }

    /// Resolve the first staged kind in resolve order, if any
    pub async fn resolve_next(
        &self,
        message: &str,
        session: &mut SessionContext,
    ) -> Option<String> {
        let kind = session.pending.first_kind()?;
        self.resolve(kind, message, session).await
    }
}
