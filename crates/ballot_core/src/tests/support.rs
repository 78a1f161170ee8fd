use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use shared::domain::{Address, Candidate, CandidateId, Receipt, VoterStatus};
use tokio::sync::{mpsc, Notify};

use crate::gateway::{GatewayError, GatewayResult, LedgerGateway, VoteCastSubscription};

pub fn address(last_byte: u8) -> Address {
    Address::parse(&format!("0x{:040x}", last_byte)).expect("valid test address")
}

pub fn candidate(id: u64, name: &str, party: &str) -> Candidate {
    Candidate {
        id: CandidateId(id),
        name: name.to_string(),
        party: party.to_string(),
    }
}

pub fn sample_roster() -> Vec<Candidate> {
    vec![candidate(0, "Alice", "Ind"), candidate(1, "Bob", "Green")]
}

#[derive(Default)]
struct LedgerState {
    accounts: Vec<Address>,
    candidates: Vec<Candidate>,
    tallies: BTreeMap<CandidateId, u64>,
    voters: HashMap<Address, VoterStatus>,
    accounts_error: Option<GatewayError>,
    status_error: Option<GatewayError>,
    candidates_error: Option<GatewayError>,
    tally_error: Option<GatewayError>,
    subscribe_error: Option<GatewayError>,
    submit_error: Option<GatewayError>,
}

#[derive(Default)]
pub struct CallCounts {
    pub accounts: AtomicUsize,
    pub voter_status: AtomicUsize,
    pub candidates: AtomicUsize,
    pub tally: AtomicUsize,
    pub submissions: AtomicUsize,
    pub subscriptions: AtomicUsize,
}

/// In-memory ledger double. Records submissions without enforcing election rules;
/// rejections are scripted with `fail_submissions_with`.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
    push: Mutex<Option<mpsc::Sender<CandidateId>>>,
    hold_submissions: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    hold_candidates: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    pub calls: CallCounts,
}

impl FakeLedger {
    pub fn with_roster(candidates: Vec<Candidate>) -> Arc<Self> {
        let ledger = Self::default();
        {
            let mut state = ledger.state.lock().expect("state");
            for candidate in &candidates {
                state.tallies.insert(candidate.id, 0);
            }
            state.candidates = candidates;
            state.accounts = vec![address(1)];
        }
        Arc::new(ledger)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().expect("fake ledger state")
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state().accounts = accounts;
    }

    pub fn set_voter(&self, address: Address, status: VoterStatus) {
        self.state().voters.insert(address, status);
    }

    pub fn voter(&self, address: &Address) -> Option<VoterStatus> {
        self.state().voters.get(address).cloned()
    }

    pub fn set_tally(&self, candidate_id: CandidateId, votes: u64) {
        self.state().tallies.insert(candidate_id, votes);
    }

    pub fn tally(&self, candidate_id: CandidateId) -> u64 {
        self.state().tallies.get(&candidate_id).copied().unwrap_or(0)
    }

    pub fn add_candidate(&self, candidate: Candidate) {
        let mut state = self.state();
        state.tallies.entry(candidate.id).or_insert(0);
        state.candidates.push(candidate);
    }

    pub fn fail_accounts_with(&self, err: GatewayError) {
        self.state().accounts_error = Some(err);
    }

    pub fn fail_status_with(&self, err: GatewayError) {
        self.state().status_error = Some(err);
    }

    pub fn fail_candidates_with(&self, err: Option<GatewayError>) {
        self.state().candidates_error = err;
    }

    pub fn fail_tally_with(&self, err: Option<GatewayError>) {
        self.state().tally_error = err;
    }

    pub fn fail_subscribe_with(&self, err: GatewayError) {
        self.state().subscribe_error = Some(err);
    }

    pub fn fail_submissions_with(&self, err: Option<GatewayError>) {
        self.state().submit_error = err;
    }

    /// Makes every submission wait for `release` after signalling `entered`.
    pub fn hold_submissions(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold_submissions.lock().expect("hold") =
            Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }

    /// Makes the next roster read wait for `release` after signalling `entered`.
    pub fn hold_next_candidates_read(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold_candidates.lock().expect("hold") =
            Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }

    /// Emits a vote-cast notification to the active subscriber, if any.
    pub async fn notify_vote_cast(&self, candidate_id: CandidateId) -> bool {
        let sender = self.push.lock().expect("push").clone();
        match sender {
            Some(sender) => sender.send(candidate_id).await.is_ok(),
            None => false,
        }
    }

    /// Drops the push sender, as if the ledger closed the event socket.
    pub fn close_vote_cast_stream(&self) {
        self.push.lock().expect("push").take();
    }

    pub fn has_subscriber(&self) -> bool {
        self.push
            .lock()
            .expect("push")
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    pub fn submission_count(&self) -> usize {
        self.calls.submissions.load(Ordering::SeqCst)
    }

    async fn before_submit(&self) -> GatewayResult<()> {
        self.calls.submissions.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold_submissions.lock().expect("hold").clone();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }
        match self.state().submit_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn receipt(&self) -> Receipt {
        Receipt {
            tx_hash: format!("0xtx{}", self.calls.submissions.load(Ordering::SeqCst)),
        }
    }
}

#[async_trait]
impl LedgerGateway for FakeLedger {
    async fn accounts(&self) -> GatewayResult<Vec<Address>> {
        self.calls.accounts.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        match &state.accounts_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.accounts.clone()),
        }
    }

    async fn get_candidates(&self) -> GatewayResult<Vec<Candidate>> {
        self.calls.candidates.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold_candidates.lock().expect("hold").take();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }
        let state = self.state();
        match &state.candidates_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.candidates.clone()),
        }
    }

    async fn get_voter_status(&self, address: &Address) -> GatewayResult<VoterStatus> {
        self.calls.voter_status.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(err) = &state.status_error {
            return Err(err.clone());
        }
        state
            .voters
            .get(address)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("voter {address} not found")))
    }

    async fn get_tally(&self, candidate_id: CandidateId) -> GatewayResult<u64> {
        self.calls.tally.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(err) = &state.tally_error {
            return Err(err.clone());
        }
        state
            .tallies
            .get(&candidate_id)
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("candidate {candidate_id} not found")))
    }

    async fn submit_registration(&self, _uid: &[u8], from: &Address) -> GatewayResult<Receipt> {
        self.before_submit().await?;
        self.state()
            .voters
            .entry(from.clone())
            .or_default()
            .registered = true;
        Ok(self.receipt())
    }

    async fn submit_vote(
        &self,
        candidate_id: CandidateId,
        from: &Address,
    ) -> GatewayResult<Receipt> {
        self.before_submit().await?;
        {
            let mut state = self.state();
            *state.tallies.entry(candidate_id).or_insert(0) += 1;
            state.voters.entry(from.clone()).or_default().voted = true;
        }
        Ok(self.receipt())
    }

    async fn submit_delegation(&self, target: &Address, from: &Address) -> GatewayResult<Receipt> {
        self.before_submit().await?;
        {
            let mut state = self.state();
            let voter = state.voters.entry(from.clone()).or_default();
            voter.voted = true;
            voter.delegate = Some(target.clone());
        }
        Ok(self.receipt())
    }

    async fn subscribe_vote_cast(&self) -> GatewayResult<VoteCastSubscription> {
        self.calls.subscriptions.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state().subscribe_error.clone() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(16);
        *self.push.lock().expect("push") = Some(tx);
        Ok(VoteCastSubscription::new(rx, None))
    }
}
