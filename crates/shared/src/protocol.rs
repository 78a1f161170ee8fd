use serde::{Deserialize, Serialize};

use crate::domain::{Address, CandidateId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub from: Address,
    pub uid_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub from: Address,
    pub candidate_id: CandidateId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateRequest {
    pub from: Address,
    pub to: Address,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TallyResponse {
    pub candidate_id: CandidateId,
    pub votes: u64,
}

/// Frames pushed over the ledger event socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LedgerEvent {
    VoteCast { candidate_id: CandidateId },
}
