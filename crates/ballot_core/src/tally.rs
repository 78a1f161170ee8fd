//! Versioned cache of the candidate roster and vote counts.
//!
//! Snapshots are immutable: every accepted update swaps in a new
//! `Arc<TallySnapshot>`, so readers holding an older snapshot never see it change.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use shared::domain::{Candidate, CandidateId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyEntry {
    pub votes: u64,
    pub version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    version: u64,
    entries: BTreeMap<CandidateId, TallyEntry>,
}

impl TallySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn votes(&self, candidate_id: CandidateId) -> Option<u64> {
        self.entries.get(&candidate_id).map(|entry| entry.votes)
    }

    pub fn entry(&self, candidate_id: CandidateId) -> Option<TallyEntry> {
        self.entries.get(&candidate_id).copied()
    }

    pub fn counts(&self) -> impl Iterator<Item = (CandidateId, u64)> + '_ {
        self.entries.iter().map(|(id, entry)| (*id, entry.votes))
    }

    pub fn total_votes(&self) -> u64 {
        self.entries.values().map(|entry| entry.votes).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Unchanged,
    Stale,
}

#[derive(Default)]
pub struct TallyCache {
    roster: RwLock<Arc<Vec<Candidate>>>,
    snapshot: RwLock<Arc<TallySnapshot>>,
}

impl TallyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<TallySnapshot> {
        Arc::clone(&*self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    pub fn candidates(&self) -> Arc<Vec<Candidate>> {
        Arc::clone(&*self.roster.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn contains_candidate(&self, candidate_id: CandidateId) -> bool {
        self.candidates()
            .iter()
            .any(|candidate| candidate.id == candidate_id)
    }

    /// Appends candidates not yet known; existing entries are never replaced or removed.
    /// Returns whether the roster grew.
    pub fn merge_roster(&self, fetched: &[Candidate]) -> bool {
        let mut guard = self.roster.write().unwrap_or_else(PoisonError::into_inner);
        let additions: Vec<Candidate> = fetched
            .iter()
            .filter(|candidate| !guard.iter().any(|known| known.id == candidate.id))
            .cloned()
            .collect();
        if additions.is_empty() {
            return false;
        }

        let mut next = Vec::with_capacity(guard.len() + additions.len());
        next.extend(guard.iter().cloned());
        next.extend(additions);
        next.sort_by_key(|candidate| candidate.id);
        next.dedup_by_key(|candidate| candidate.id);
        *guard = Arc::new(next);
        true
    }

    /// Accepts the update iff `source_version >= version()`.
    ///
    /// On an equal version the higher reported count for the candidate wins.
    pub fn apply_update(
        &self,
        candidate_id: CandidateId,
        votes: u64,
        source_version: u64,
    ) -> ApplyOutcome {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let current = Arc::clone(&*guard);

        if source_version < current.version {
            debug!(
                candidate_id = candidate_id.0,
                source_version,
                cache_version = current.version,
                "tally: dropping stale update"
            );
            return ApplyOutcome::Stale;
        }

        if let Some(entry) = current.entries.get(&candidate_id) {
            let same_batch = entry.version == source_version;
            if same_batch && entry.votes >= votes {
                return ApplyOutcome::Unchanged;
            }
        }

        let mut next = TallySnapshot::clone(&current);
        next.version = source_version;
        next.entries.insert(
            candidate_id,
            TallyEntry {
                votes,
                version: source_version,
            },
        );
        *guard = Arc::new(next);
        ApplyOutcome::Applied
    }

    /// Applies every count under one batch version; returns how many were accepted.
    pub fn apply_batch(&self, source_version: u64, counts: &[(CandidateId, u64)]) -> usize {
        counts
            .iter()
            .filter(|(candidate_id, votes)| {
                self.apply_update(*candidate_id, *votes, source_version) == ApplyOutcome::Applied
            })
            .count()
    }
}

#[cfg(test)]
#[path = "tests/tally_tests.rs"]
mod tests;
