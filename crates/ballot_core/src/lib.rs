//! Voter session and ballot synchronization controller.
//!
//! [`VotingController`] is the only surface a UI layer needs: it tracks the
//! operator's registration/vote/delegation progress, keeps a versioned tally view
//! fed by push notifications and polling, and turns operator requests into
//! single-flight ledger mutations with classified failures.

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod http_gateway;
pub mod reconcile;
pub mod session;
pub mod tally;
pub mod types;

pub use controller::{ControllerConfig, VotingController};
pub use error::VotingError;
pub use gateway::{GatewayError, LedgerGateway, MissingLedgerGateway, VoteCastSubscription};
pub use http_gateway::HttpLedgerGateway;
pub use tally::TallySnapshot;
pub use types::{ActionKind, ActionStatus, PendingAction, SessionStatus, VoterSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    SessionChanged(VoterSession),
    SessionEnded,
    RosterUpdated { candidates: usize },
    TallyUpdated { version: u64 },
    ActionSettled { kind: ActionKind, status: ActionStatus },
    MutationsDisabled(String),
    /// The vote-cast subscription closed; tallies now refresh by polling only.
    PushSourceLost,
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
