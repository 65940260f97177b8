//! One-slot-per-kind table of actions awaiting approval

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use crate::action::{ActionKind, PendingPayload};

/// A staged action
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub payload: PendingPayload,
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(payload: PendingPayload) -> Self {
        Self {
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

/// Pending actions keyed by kind
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    slots: BTreeMap<ActionKind, PendingAction>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `payload` in its kind's slot, returning the action it replaced
    pub fn stage(&mut self, payload: PendingPayload) -> Option<PendingAction> {
        let action = PendingAction::new(payload);
        let kind = action.kind();
        let replaced = self.slots.insert(kind, action);
        if replaced.is_some() {
            debug!("pending {} replaced by a new proposal", kind);
        }
        replaced
    }

    pub fn get(&self, kind: ActionKind) -> Option<&PendingAction> {
        self.slots.get(&kind)
    }

    /// Remove and return the slot for `kind`
    pub fn take(&mut self, kind: ActionKind) -> Option<PendingAction> {
        self.slots.remove(&kind)
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// First occupied kind in resolve order
    pub fn first_kind(&self) -> Option<ActionKind> {
        self.slots.keys().next().copied()
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.slots.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Empty the table, returning what was staged
    pub fn drain(&mut self) -> Vec<PendingAction> {
        std::mem::take(&mut self.slots).into_values().collect()
    }
}
