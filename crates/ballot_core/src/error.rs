use thiserror::Error;

use crate::{
    gateway::GatewayError,
    types::{ActionKind, SessionStatus},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VotingError {
    #[error("{action:?} is not allowed while the voter is {status:?}")]
    InvalidTransition {
        action: ActionKind,
        status: SessionStatus,
    },
    #[error("a {0:?} action is already pending")]
    AlreadyPending(ActionKind),
    #[error("ledger provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("request was rejected by the operator")]
    UserRejected,
    #[error("voter is already registered")]
    AlreadyRegistered,
    #[error("voter has already voted")]
    AlreadyVoted,
    #[error("voter has already delegated")]
    AlreadyDelegated,
    #[error("voter is not registered")]
    NotRegistered,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("ledger reverted: {0}")]
    UnknownRevert(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("registration uid must not be empty")]
    InvalidUid,
}

impl VotingError {
    /// Errors the operator can clear by simply issuing the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VotingError::UserRejected | VotingError::NetworkError(_) | VotingError::AlreadyPending(_)
        )
    }

    /// Errors that never reached the ledger.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            VotingError::InvalidTransition { .. }
                | VotingError::AlreadyPending(_)
                | VotingError::InvalidUid
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum KnownRevert {
    AlreadyRegistered,
    AlreadyVoted,
    AlreadyDelegated,
    NotRegistered,
    InvalidTarget,
    UserRejected,
}

// Matched in order against the lowercased reason; more specific phrases first.
const KNOWN_REVERT_REASONS: &[(&str, KnownRevert)] = &[
    ("user denied", KnownRevert::UserRejected),
    ("user rejected", KnownRevert::UserRejected),
    ("already registered", KnownRevert::AlreadyRegistered),
    ("already voted", KnownRevert::AlreadyVoted),
    ("already delegated", KnownRevert::AlreadyDelegated),
    ("self-delegation", KnownRevert::InvalidTarget),
    ("self delegation", KnownRevert::InvalidTarget),
    ("delegation loop", KnownRevert::InvalidTarget),
    ("delegate not registered", KnownRevert::InvalidTarget),
    ("invalid delegate", KnownRevert::InvalidTarget),
    ("invalid candidate", KnownRevert::InvalidTarget),
    ("not registered", KnownRevert::NotRegistered),
];

pub fn classify_revert_reason(reason: &str) -> VotingError {
    let lower = reason.to_ascii_lowercase();
    let known = KNOWN_REVERT_REASONS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, kind)| *kind);

    match known {
        Some(KnownRevert::AlreadyRegistered) => VotingError::AlreadyRegistered,
        Some(KnownRevert::AlreadyVoted) => VotingError::AlreadyVoted,
        Some(KnownRevert::AlreadyDelegated) => VotingError::AlreadyDelegated,
        Some(KnownRevert::NotRegistered) => VotingError::NotRegistered,
        Some(KnownRevert::InvalidTarget) => VotingError::InvalidTarget(reason.to_string()),
        Some(KnownRevert::UserRejected) => VotingError::UserRejected,
        None => VotingError::UnknownRevert(reason.to_string()),
    }
}

impl From<GatewayError> for VotingError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Revert { reason } => classify_revert_reason(&reason),
            GatewayError::UserRejected => VotingError::UserRejected,
            GatewayError::Unavailable(message) => VotingError::ProviderUnavailable(message),
            GatewayError::Transport(message) => VotingError::NetworkError(message),
            GatewayError::NotFound(message) => VotingError::UnknownRevert(message),
        }
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
