//! Merges push-triggered and polled tally reads into the [`TallyCache`].

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::try_join_all;
use shared::domain::CandidateId;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    gateway::{GatewayResult, LedgerGateway, VoteCastSubscription},
    tally::{ApplyOutcome, TallyCache},
    ControllerEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub version: u64,
    pub candidates: usize,
    pub applied: usize,
    pub roster_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Refreshed(RefreshSummary),
    Skipped,
    Failed(String),
}

pub struct Reconciler {
    gateway: Arc<dyn LedgerGateway>,
    cache: Arc<TallyCache>,
    batch_counter: AtomicU64,
    poll_in_flight: AtomicBool,
    events: broadcast::Sender<ControllerEvent>,
}

struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        cache: Arc<TallyCache>,
        events: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            gateway,
            cache,
            batch_counter: AtomicU64::new(0),
            poll_in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn cache(&self) -> &Arc<TallyCache> {
        &self.cache
    }

    /// Stamps a new fetch batch. Taken before the fetch starts, so a slow batch
    /// loses to any batch begun after it.
    fn next_batch_version(&self) -> u64 {
        let floor = self.cache.version();
        let previous = self
            .batch_counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |counter| {
                Some(counter.max(floor) + 1)
            })
            .unwrap_or_else(|counter| counter);
        previous.max(floor) + 1
    }

    /// Full roster and tally pull.
    pub async fn refresh_all(&self) -> GatewayResult<RefreshSummary> {
        let version = self.next_batch_version();
        let candidates = self.gateway.get_candidates().await?;
        let counts = try_join_all(candidates.iter().map(|candidate| {
            let gateway = Arc::clone(&self.gateway);
            let candidate_id = candidate.id;
            async move {
                gateway
                    .get_tally(candidate_id)
                    .await
                    .map(|votes| (candidate_id, votes))
            }
        }))
        .await?;

        let roster_changed = self.cache.merge_roster(&candidates);
        if roster_changed {
            let _ = self.events.send(ControllerEvent::RosterUpdated {
                candidates: self.cache.candidates().len(),
            });
        }

        let applied = self.cache.apply_batch(version, &counts);
        if applied > 0 {
            self.emit_tally_updated();
        }
        debug!(
            version,
            candidates = candidates.len(),
            applied,
            "reconcile: full refresh settled"
        );

        Ok(RefreshSummary {
            version,
            candidates: candidates.len(),
            applied,
            roster_changed,
        })
    }

    /// Targeted refetch after a vote-cast notification. The notification only
    /// says something changed; the count always comes from the ledger.
    pub async fn refresh_candidate(&self, candidate_id: CandidateId) -> GatewayResult<ApplyOutcome> {
        if !self.cache.contains_candidate(candidate_id) {
            info!(
                candidate_id = candidate_id.0,
                "reconcile: notification for unknown candidate, refreshing roster"
            );
            let summary = self.refresh_all().await?;
            return Ok(if summary.applied > 0 {
                ApplyOutcome::Applied
            } else {
                ApplyOutcome::Unchanged
            });
        }

        let version = self.next_batch_version();
        let votes = self.gateway.get_tally(candidate_id).await?;
        let outcome = self.cache.apply_update(candidate_id, votes, version);
        if outcome == ApplyOutcome::Applied {
            self.emit_tally_updated();
        }
        debug!(
            candidate_id = candidate_id.0,
            votes,
            version,
            outcome = ?outcome,
            "reconcile: targeted refetch settled"
        );
        Ok(outcome)
    }

    /// One poll tick. Skipped, not queued, while a previous poll is still running.
    pub async fn poll_once(&self) -> PollOutcome {
        if self
            .poll_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reconcile: poll tick skipped, previous poll still in flight");
            return PollOutcome::Skipped;
        }
        let _guard = PollGuard(&self.poll_in_flight);

        match self.refresh_all().await {
            Ok(summary) => PollOutcome::Refreshed(summary),
            Err(err) => {
                warn!("reconcile: poll refresh failed: {err}");
                PollOutcome::Failed(err.to_string())
            }
        }
    }

    /// Drives targeted refetches from a vote-cast subscription until it closes.
    /// Notifications queued while a refetch runs are coalesced per candidate.
    pub async fn consume_notifications(&self, mut subscription: VoteCastSubscription) {
        while let Some(first) = subscription.next().await {
            let mut batch = BTreeSet::from([first]);
            batch.extend(subscription.drain_ready());
            for candidate_id in batch {
                if let Err(err) = self.refresh_candidate(candidate_id).await {
                    warn!(
                        candidate_id = candidate_id.0,
                        "reconcile: push-triggered refetch failed: {err}"
                    );
                }
            }
        }
        warn!("reconcile: vote-cast subscription closed, only polling remains");
        let _ = self.events.send(ControllerEvent::PushSourceLost);
    }

    fn emit_tally_updated(&self) {
        let _ = self.events.send(ControllerEvent::TallyUpdated {
            version: self.cache.version(),
        });
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
