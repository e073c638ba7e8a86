//! Single-flight request bookkeeping.

use std::collections::HashMap;

use tracing::error;

use crate::model::PatchId;

/// State of an outstanding load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Submitted and wanted.
    Pending,
    /// Still running but no longer wanted. The result goes to the cache.
    Canceled,
}

/// Outcome of [`RequestTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// A new load must be submitted.
    New,
    /// A canceled load is still running and is wanted again.
    Revived,
    /// Already pending; nothing to do.
    Duplicate,
}

/// Outstanding loads keyed by patch. At most one per patch.
#[derive(Debug, Default)]
pub struct RequestTable {
    requests: HashMap<PatchId, RequestState>,
    /// Largest number of pending requests since the table was last empty.
    peak: usize,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, patch: PatchId) -> Insertion {
        let insertion = match self.requests.get_mut(&patch) {
            Some(state @ RequestState::Canceled) => {
                *state = RequestState::Pending;
                Insertion::Revived
            }
            Some(RequestState::Pending) => {
                error!(patch = %patch, "Patch is already being requested");
                Insertion::Duplicate
            }
            None => {
                self.requests.insert(patch, RequestState::Pending);
                Insertion::New
            }
        };
        self.peak = self.peak.max(self.pending());
        insertion
    }

    /// True when a load is pending and wanted.
    pub fn is_requesting(&self, patch: PatchId) -> bool {
        self.requests.get(&patch) == Some(&RequestState::Pending)
    }

    /// True when any load, wanted or not, is running for the patch.
    pub fn is_in_flight(&self, patch: PatchId) -> bool {
        self.requests.contains_key(&patch)
    }

    pub fn state(&self, patch: PatchId) -> Option<RequestState> {
        self.requests.get(&patch).copied()
    }

    /// Marks a pending load as canceled. Returns false when none was pending.
    pub fn cancel(&mut self, patch: PatchId) -> bool {
        match self.requests.get_mut(&patch) {
            Some(state @ RequestState::Pending) => {
                *state = RequestState::Canceled;
                true
            }
            _ => false,
        }
    }

    /// Forgets a request that never reached the worker.
    pub fn forget(&mut self, patch: PatchId) -> Option<RequestState> {
        let state = self.requests.remove(&patch);
        self.reset_peak_if_idle();
        state
    }

    /// Removes a finished load and returns the state it finished in.
    pub fn complete(&mut self, patch: PatchId) -> Option<RequestState> {
        self.forget(patch)
    }

    /// Loads pending and wanted.
    pub fn pending(&self) -> usize {
        self.requests
            .values()
            .filter(|&&s| s == RequestState::Pending)
            .count()
    }

    /// Loads still running, including canceled ones.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// `(finished, total)` of the current burst of requests.
    pub fn progress(&self) -> (usize, usize) {
        let pending = self.pending();
        (self.peak.saturating_sub(pending), self.peak)
    }

    fn reset_peak_if_idle(&mut self) {
        if self.pending() == 0 {
            self.peak = 0;
        }
    }
}
