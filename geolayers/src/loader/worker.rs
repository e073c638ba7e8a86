//! Background parse worker.
//!
//! One task drains a bounded job channel and runs each load on the blocking
//! pool, one at a time. Results go back on an outcome channel in completion
//! order. A load always runs to the end; cancellation is decided by whoever
//! receives the outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::data::{PatchData, PatchKind};
use crate::io::{self, CodecError, PatchFormat};
use crate::model::PatchId;

use super::LoadStats;

/// Default number of jobs queued ahead of the worker.
pub const DEFAULT_PARSE_QUEUE_CAPACITY: usize = 16;

/// A patch to load from `stem` (`.csv` or `.bin`, whichever is current).
#[derive(Debug, Clone)]
pub struct ParseJob {
    pub patch: PatchId,
    pub kind: PatchKind,
    pub stem: PathBuf,
}

/// Result of a [`ParseJob`].
#[derive(Debug)]
pub struct ParseOutcome {
    pub patch: PatchId,
    pub result: Result<(PatchData, PatchFormat), CodecError>,
}

/// Why a job was not accepted. The job is handed back.
#[derive(Debug)]
pub enum SubmitError {
    Full(ParseJob),
    Closed(ParseJob),
}

#[derive(Debug)]
pub struct ParseWorker {
    jobs: mpsc::Sender<ParseJob>,
    handle: JoinHandle<()>,
}

impl ParseWorker {
    /// Starts the worker on the current runtime.
    pub fn spawn(
        capacity: usize,
        outcomes: mpsc::UnboundedSender<ParseOutcome>,
        stats: Arc<LoadStats>,
    ) -> Self {
        let (jobs, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(rx, outcomes, stats));
        Self { jobs, handle }
    }

    /// Queues a job without waiting.
    pub fn try_submit(&self, job: ParseJob) -> Result<(), SubmitError> {
        self.jobs.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => SubmitError::Full(job),
            mpsc::error::TrySendError::Closed(job) => SubmitError::Closed(job),
        })
    }

    /// Queues a job, waiting for room.
    pub async fn submit(&self, job: ParseJob) -> Result<(), SubmitError> {
        self.jobs
            .send(job)
            .await
            .map_err(|e| SubmitError::Closed(e.0))
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Parse worker panicked");
        }
    }
}

async fn run(
    mut jobs: mpsc::Receiver<ParseJob>,
    outcomes: mpsc::UnboundedSender<ParseOutcome>,
    stats: Arc<LoadStats>,
) {
    debug!("Parse worker started");
    while let Some(ParseJob { patch, kind, stem }) = jobs.recv().await {
        let started = Instant::now();
        let file = stem.display().to_string();
        let result = tokio::task::spawn_blocking(move || io::load(kind, &stem))
            .await
            .unwrap_or_else(|e| Err(CodecError::invalid(format!("load task failed: {}", e))));

        match &result {
            Ok((_, PatchFormat::Csv)) => stats.csv_parsed(),
            Ok((_, PatchFormat::Bin)) => stats.bin_read(),
            Err(e) => {
                stats.load_failed();
                error!(patch = %patch, file = %file, error = %e, "Failed to load patch");
            }
        }
        trace!(
            patch = %patch,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Load finished"
        );

        if outcomes.send(ParseOutcome { patch, result }).is_err() {
            debug!("Outcome receiver dropped, stopping parse worker");
            break;
        }
    }
    debug!("Parse worker stopped");
}
