use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    error::VotingError,
    gateway::LedgerGateway,
    reconcile::Reconciler,
    session::SessionMachine,
    types::{ActionKind, ActionReceipt, ActionRequest, ActionStatus, PendingAction},
    ControllerEvent,
};

type PendingTable = Mutex<HashMap<ActionKind, PendingAction>>;

/// Holds a reserved pending-action slot; the entry is removed when dropped,
/// whichever way the ledger call settles.
struct PendingSlot<'a> {
    table: &'a PendingTable,
    kind: ActionKind,
}

impl PendingSlot<'_> {
    fn settle(&self, status: ActionStatus) {
        if let Some(action) = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&self.kind)
        {
            action.status = status;
        }
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.kind);
    }
}

pub struct ActionDispatcher {
    gateway: Arc<dyn LedgerGateway>,
    session: Arc<SessionMachine>,
    reconciler: Arc<Reconciler>,
    pending: PendingTable,
    blocked: RwLock<Option<String>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ActionDispatcher {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        session: Arc<SessionMachine>,
        reconciler: Arc<Reconciler>,
        events: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            gateway,
            session,
            reconciler,
            pending: Mutex::new(HashMap::new()),
            blocked: RwLock::new(None),
            events,
        }
    }

    pub fn block_mutations(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "dispatcher: mutating actions disabled");
        *self.blocked.write().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    pub fn unblock_mutations(&self) {
        *self.blocked.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn blocked_reason(&self) -> Option<String> {
        self.blocked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        let mut actions: Vec<PendingAction> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        actions.sort_by_key(|action| action.submitted_at);
        actions
    }

    fn reserve(&self, kind: ActionKind) -> Result<(PendingSlot<'_>, PendingAction), VotingError> {
        let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if table.contains_key(&kind) {
            return Err(VotingError::AlreadyPending(kind));
        }
        let action = PendingAction {
            kind,
            status: ActionStatus::Pending,
            submitted_at: Utc::now(),
        };
        table.insert(kind, action.clone());
        Ok((
            PendingSlot {
                table: &self.pending,
                kind,
            },
            action,
        ))
    }

    /// Submits one operator mutation and classifies how it settled.
    ///
    /// Local guards (blocked provider, session status, single-flight) run before
    /// any ledger call. Never retries on its own.
    pub async fn dispatch(&self, request: ActionRequest) -> Result<ActionReceipt, VotingError> {
        let kind = request.kind();
        if let Some(reason) = self.blocked_reason() {
            return Err(VotingError::ProviderUnavailable(reason));
        }
        if let ActionRequest::Register { uid } = &request {
            if uid.is_empty() {
                return Err(VotingError::InvalidUid);
            }
        }
        let from = self.session.guard(kind)?;
        let (slot, action) = self.reserve(kind)?;
        info!(kind = ?kind, from = %from, "dispatcher: submitting action");

        let result = match &request {
            ActionRequest::Register { uid } => self.gateway.submit_registration(uid, &from).await,
            ActionRequest::Vote { candidate_id } => {
                self.gateway.submit_vote(*candidate_id, &from).await
            }
            ActionRequest::Delegate { target } => {
                self.gateway.submit_delegation(target, &from).await
            }
        };

        match result {
            Ok(receipt) => {
                slot.settle(ActionStatus::Confirmed);
                match request {
                    ActionRequest::Register { uid } => {
                        self.session.transition_on_register(&from, uid);
                    }
                    ActionRequest::Vote { .. } => {
                        self.session.transition_on_vote(&from);
                    }
                    ActionRequest::Delegate { target } => {
                        self.session.transition_on_delegate(&from, target);
                    }
                }
                drop(slot);
                info!(kind = ?kind, tx_hash = %receipt.tx_hash, "dispatcher: action confirmed");
                let _ = self.events.send(ControllerEvent::ActionSettled {
                    kind,
                    status: ActionStatus::Confirmed,
                });

                if let Err(err) = self.reconciler.refresh_all().await {
                    warn!(kind = ?kind, "dispatcher: refresh after confirmation failed: {err}");
                }

                Ok(ActionReceipt {
                    kind,
                    receipt,
                    submitted_at: action.submitted_at,
                    settled_at: Utc::now(),
                })
            }
            Err(err) => {
                slot.settle(ActionStatus::Rejected);
                drop(slot);
                let classified = VotingError::from(err);
                warn!(kind = ?kind, "dispatcher: action rejected: {classified}");
                let _ = self.events.send(ControllerEvent::ActionSettled {
                    kind,
                    status: ActionStatus::Rejected,
                });
                Err(classified)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
