use async_trait::async_trait;
use shared::domain::{Address, Candidate, CandidateId, Receipt, VoterStatus};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transaction reverted: {reason}")]
    Revert { reason: String },
    #[error("request rejected by operator")]
    UserRejected,
    #[error("ledger provider unavailable: {0}")]
    Unavailable(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Stream of candidate ids announced by the ledger's vote-cast notifications.
///
/// Dropping the subscription (or calling [`VoteCastSubscription::unsubscribe`])
/// stops the background reader feeding it.
pub struct VoteCastSubscription {
    events: mpsc::Receiver<CandidateId>,
    reader: Option<JoinHandle<()>>,
}

impl VoteCastSubscription {
    pub fn new(events: mpsc::Receiver<CandidateId>, reader: Option<JoinHandle<()>>) -> Self {
        Self { events, reader }
    }

    pub async fn next(&mut self) -> Option<CandidateId> {
        self.events.recv().await
    }

    /// Notifications that are already queued, without waiting.
    pub fn drain_ready(&mut self) -> Vec<CandidateId> {
        let mut ready = Vec::new();
        while let Ok(candidate_id) = self.events.try_recv() {
            ready.push(candidate_id);
        }
        ready
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.events.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for VoteCastSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn accounts(&self) -> GatewayResult<Vec<Address>>;
    async fn get_candidates(&self) -> GatewayResult<Vec<Candidate>>;
    async fn get_voter_status(&self, address: &Address) -> GatewayResult<VoterStatus>;
    async fn get_tally(&self, candidate_id: CandidateId) -> GatewayResult<u64>;
    async fn submit_registration(&self, uid: &[u8], from: &Address) -> GatewayResult<Receipt>;
    async fn submit_vote(&self, candidate_id: CandidateId, from: &Address)
        -> GatewayResult<Receipt>;
    async fn submit_delegation(&self, target: &Address, from: &Address) -> GatewayResult<Receipt>;
    async fn subscribe_vote_cast(&self) -> GatewayResult<VoteCastSubscription>;
}

/// Gateway used when no ledger endpoint is configured.
pub struct MissingLedgerGateway;

fn missing<T>() -> GatewayResult<T> {
    Err(GatewayError::Unavailable(
        "no ledger provider configured".to_string(),
    ))
}

#[async_trait]
impl LedgerGateway for MissingLedgerGateway {
    async fn accounts(&self) -> GatewayResult<Vec<Address>> {
        missing()
    }

    async fn get_candidates(&self) -> GatewayResult<Vec<Candidate>> {
        missing()
    }

    async fn get_voter_status(&self, _address: &Address) -> GatewayResult<VoterStatus> {
        missing()
    }

    async fn get_tally(&self, _candidate_id: CandidateId) -> GatewayResult<u64> {
        missing()
    }

    async fn submit_registration(&self, _uid: &[u8], _from: &Address) -> GatewayResult<Receipt> {
        missing()
    }

    async fn submit_vote(
        &self,
        _candidate_id: CandidateId,
        _from: &Address,
    ) -> GatewayResult<Receipt> {
        missing()
    }

    async fn submit_delegation(
        &self,
        _target: &Address,
        _from: &Address,
    ) -> GatewayResult<Receipt> {
        missing()
    }

    async fn subscribe_vote_cast(&self) -> GatewayResult<VoteCastSubscription> {
        missing()
    }
}
