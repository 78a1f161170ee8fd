use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::{Address, CandidateId, Receipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unregistered,
    Registered,
    Voted,
    Delegated,
}

impl SessionStatus {
    /// Whether `kind` may be dispatched from this status.
    pub fn allows(self, kind: ActionKind) -> bool {
        matches!(
            (self, kind),
            (SessionStatus::Unregistered, ActionKind::Register)
                | (SessionStatus::Registered, ActionKind::Vote)
                | (SessionStatus::Registered, ActionKind::Delegate)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Voted | SessionStatus::Delegated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterSession {
    pub address: Address,
    pub uid: Option<Vec<u8>>,
    pub status: SessionStatus,
    pub delegate_target: Option<Address>,
}

impl VoterSession {
    pub fn unregistered(address: Address) -> Self {
        Self {
            address,
            uid: None,
            status: SessionStatus::Unregistered,
            delegate_target: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Register,
    Vote,
    Delegate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub submitted_at: DateTime<Utc>,
}

/// A mutation requested by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    Register { uid: Vec<u8> },
    Vote { candidate_id: CandidateId },
    Delegate { target: Address },
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::Register { .. } => ActionKind::Register,
            ActionRequest::Vote { .. } => ActionKind::Vote,
            ActionRequest::Delegate { .. } => ActionKind::Delegate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReceipt {
    pub kind: ActionKind,
    pub receipt: Receipt,
    pub submitted_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
}
