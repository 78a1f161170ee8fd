use std::sync::{PoisonError, RwLock};

use shared::domain::{Address, VoterStatus};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::VotingError,
    gateway::LedgerGateway,
    types::{ActionKind, SessionStatus, VoterSession},
    ControllerEvent,
};

pub fn status_from_ledger(status: &VoterStatus) -> SessionStatus {
    if status.delegate.is_some() {
        SessionStatus::Delegated
    } else if status.voted {
        SessionStatus::Voted
    } else if status.registered {
        SessionStatus::Registered
    } else {
        SessionStatus::Unregistered
    }
}

/// Sole owner of the operator's [`VoterSession`].
pub struct SessionMachine {
    session: RwLock<Option<VoterSession>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl SessionMachine {
    pub fn new(events: broadcast::Sender<ControllerEvent>) -> Self {
        Self {
            session: RwLock::new(None),
            events,
        }
    }

    pub fn current(&self) -> Option<VoterSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.current()
            .map(|session| session.status)
            .unwrap_or(SessionStatus::Unregistered)
    }

    pub fn begin(&self, address: Address) {
        info!(address = %address, "session: started");
        self.replace(Some(VoterSession::unregistered(address)));
    }

    pub fn end(&self) {
        let previous = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            info!(address = %previous.address, "session: ended");
            let _ = self.events.send(ControllerEvent::SessionEnded);
        }
    }

    /// Reads the voter record from the ledger and replaces the local session.
    ///
    /// Any failure, including not-found, is treated as an unregistered voter.
    pub async fn observe_status(
        &self,
        gateway: &dyn LedgerGateway,
        address: &Address,
    ) -> SessionStatus {
        let (status, delegate_target) = match gateway.get_voter_status(address).await {
            Ok(record) => (status_from_ledger(&record), record.delegate),
            Err(err) => {
                debug!(address = %address, "session: voter status unavailable, assuming unregistered: {err}");
                (SessionStatus::Unregistered, None)
            }
        };

        let uid = self
            .current()
            .filter(|session| &session.address == address)
            .and_then(|session| session.uid);

        self.replace(Some(VoterSession {
            address: address.clone(),
            uid,
            status,
            delegate_target,
        }));
        info!(address = %address, status = ?status, "session: observed ledger status");
        status
    }

    /// Local guard run before any ledger call; yields the address to submit from.
    pub fn guard(&self, kind: ActionKind) -> Result<Address, VotingError> {
        let session = self.current().ok_or_else(|| {
            VotingError::ProviderUnavailable("no active voter session".to_string())
        })?;
        if !session.status.allows(kind) {
            return Err(VotingError::InvalidTransition {
                action: kind,
                status: session.status,
            });
        }
        Ok(session.address)
    }

    pub fn transition_on_register(&self, from: &Address, uid: Vec<u8>) -> bool {
        self.transition(from, SessionStatus::Registered, |session| {
            session.uid = Some(uid);
        })
    }

    pub fn transition_on_vote(&self, from: &Address) -> bool {
        self.transition(from, SessionStatus::Voted, |_| {})
    }

    pub fn transition_on_delegate(&self, from: &Address, target: Address) -> bool {
        self.transition(from, SessionStatus::Delegated, |session| {
            session.delegate_target = Some(target);
        })
    }

    fn transition(
        &self,
        from: &Address,
        target: SessionStatus,
        apply: impl FnOnce(&mut VoterSession),
    ) -> bool {
        let updated = {
            let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
            let Some(session) = guard.as_mut() else {
                return false;
            };
            if &session.address != from {
                warn!(
                    address = %from,
                    current = %session.address,
                    "session: ignoring confirmation for a previous identity"
                );
                return false;
            }
            if session.status == target {
                return false;
            }
            let expected = match target {
                SessionStatus::Registered => SessionStatus::Unregistered,
                _ => SessionStatus::Registered,
            };
            if session.status != expected {
                warn!(
                    status = ?session.status,
                    target = ?target,
                    "session: confirmation does not follow the current status"
                );
                return false;
            }
            session.status = target;
            apply(session);
            session.clone()
        };

        info!(address = %updated.address, status = ?updated.status, "session: transitioned");
        let _ = self.events.send(ControllerEvent::SessionChanged(updated));
        true
    }

    fn replace(&self, next: Option<VoterSession>) {
        let changed = {
            let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
            let changed = *guard != next;
            *guard = next.clone();
            changed
        };
        if let (true, Some(session)) = (changed, next) {
            let _ = self.events.send(ControllerEvent::SessionChanged(session));
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
