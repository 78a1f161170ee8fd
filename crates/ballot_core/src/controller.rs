use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use shared::domain::{Address, Candidate, CandidateId};
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::{info, warn};

use crate::{
    dispatcher::ActionDispatcher,
    error::VotingError,
    gateway::LedgerGateway,
    reconcile::{Reconciler, RefreshSummary},
    session::SessionMachine,
    tally::{TallyCache, TallySnapshot},
    types::{ActionReceipt, ActionRequest, PendingAction, SessionStatus, VoterSession},
    ControllerEvent,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_BUFFER: usize = 256;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub poll_interval: Duration,
    pub event_buffer: usize,
    /// Operator identity; when unset the gateway's first account is used.
    pub operator: Option<Address>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
            operator: None,
        }
    }
}

/// Poll timer and push consumer acquired by `start()`; aborted when dropped.
struct BackgroundTasks {
    poll: JoinHandle<()>,
    push: JoinHandle<()>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.poll.abort();
        self.push.abort();
    }
}

/// Facade the UI layer drives: one instance per operator session.
pub struct VotingController {
    gateway: Arc<dyn LedgerGateway>,
    config: ControllerConfig,
    session: Arc<SessionMachine>,
    cache: Arc<TallyCache>,
    reconciler: Arc<Reconciler>,
    dispatcher: ActionDispatcher,
    tasks: Mutex<Option<BackgroundTasks>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl VotingController {
    pub fn new(gateway: Arc<dyn LedgerGateway>, mut config: ControllerConfig) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let cache = Arc::new(TallyCache::new());
        let session = Arc::new(SessionMachine::new(events.clone()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&gateway),
            Arc::clone(&cache),
            events.clone(),
        ));
        let dispatcher = ActionDispatcher::new(
            Arc::clone(&gateway),
            Arc::clone(&session),
            Arc::clone(&reconciler),
            events.clone(),
        );
        dispatcher.block_mutations("controller has not been started");

        Self {
            gateway,
            config,
            session,
            cache,
            reconciler,
            dispatcher,
            tasks: Mutex::new(None),
            events,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn mutations_enabled(&self) -> bool {
        self.dispatcher.blocked_reason().is_none()
    }

    /// Resolves the operator, observes their status, subscribes to vote-cast
    /// notifications, pulls the initial roster and starts polling.
    ///
    /// On failure nothing stays acquired and mutating operations remain disabled;
    /// already cached candidates and tallies stay readable.
    pub async fn start(&self) -> Result<(), VotingError> {
        if self.is_running() {
            return Ok(());
        }

        let address = match self.resolve_operator().await {
            Ok(address) => address,
            Err(err) => {
                self.disable(&err);
                return Err(err);
            }
        };
        self.session.begin(address.clone());
        self.session.observe_status(&*self.gateway, &address).await;

        let subscription = match self.gateway.subscribe_vote_cast().await {
            Ok(subscription) => subscription,
            Err(err) => {
                let err = VotingError::from(err);
                self.disable(&err);
                return Err(err);
            }
        };

        if let Err(err) = self.reconciler.refresh_all().await {
            warn!("controller: initial refresh failed, polling will retry: {err}");
        }

        let push = {
            let reconciler = Arc::clone(&self.reconciler);
            tokio::spawn(async move { reconciler.consume_notifications(subscription).await })
        };
        let poll = {
            let reconciler = Arc::clone(&self.reconciler);
            let period = self.config.poll_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick completes immediately; start() has just refreshed.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    reconciler.poll_once().await;
                }
            })
        };

        let previous = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(BackgroundTasks { poll, push });
        drop(previous);

        self.dispatcher.unblock_mutations();
        info!(
            address = %address,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "controller: started"
        );
        Ok(())
    }

    /// Releases the poll timer and subscription and ends the voter session.
    /// In-flight actions are left to settle on their own.
    pub fn stop(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if tasks.is_some() {
            info!("controller: stopped");
        }
        drop(tasks);
        self.dispatcher.block_mutations("controller has been stopped");
        self.session.end();
    }

    /// Ends the current voter session and starts a new one for `address`.
    pub async fn switch_identity(&self, address: Address) -> SessionStatus {
        self.session.end();
        self.session.begin(address.clone());
        self.session.observe_status(&*self.gateway, &address).await
    }

    pub async fn register(&self, uid: impl Into<Vec<u8>>) -> Result<ActionReceipt, VotingError> {
        self.dispatcher
            .dispatch(ActionRequest::Register { uid: uid.into() })
            .await
    }

    pub async fn cast_vote(&self, candidate_id: CandidateId) -> Result<ActionReceipt, VotingError> {
        self.dispatcher
            .dispatch(ActionRequest::Vote { candidate_id })
            .await
    }

    pub async fn delegate(&self, target: Address) -> Result<ActionReceipt, VotingError> {
        self.dispatcher
            .dispatch(ActionRequest::Delegate { target })
            .await
    }

    /// Operator-requested full refresh of roster and tallies.
    pub async fn refresh(&self) -> Result<RefreshSummary, VotingError> {
        self.reconciler
            .refresh_all()
            .await
            .map_err(VotingError::from)
    }

    pub fn get_candidates(&self) -> Arc<Vec<Candidate>> {
        self.cache.candidates()
    }

    pub fn get_tally_snapshot(&self) -> Arc<TallySnapshot> {
        self.cache.snapshot()
    }

    pub fn get_session_status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn session(&self) -> Option<VoterSession> {
        self.session.current()
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.dispatcher.pending_actions()
    }

    /// Fires whenever the session, roster or tallies change.
    pub fn on_state_changed(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    async fn resolve_operator(&self) -> Result<Address, VotingError> {
        if let Some(address) = &self.config.operator {
            return Ok(address.clone());
        }
        let accounts = self.gateway.accounts().await?;
        accounts.into_iter().next().ok_or_else(|| {
            VotingError::ProviderUnavailable("ledger provider exposes no accounts".to_string())
        })
    }

    fn disable(&self, err: &VotingError) {
        warn!("controller: startup failed: {err}");
        self.dispatcher.block_mutations(err.to_string());
        let _ = self
            .events
            .send(ControllerEvent::MutationsDisabled(err.to_string()));
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
