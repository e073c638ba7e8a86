//! Asynchronous patch loading.
//!
//! ```text
//!  request ──► RequestTable ──► ParseWorker ──► outcome ──┬─► shown
//!                (single-flight)   (one task)              └─► PatchCache (if canceled)
//!                                                               │ evicted
//!                                                               ▼
//!                                                            unload
//! ```
//!
//! A patch is in at most one of three places: shown by its layer, parked in
//! the [`PatchCache`], or in flight in the [`RequestTable`]. The pieces here
//! hold no patch data themselves; they pass [`PatchId`]s around and the
//! [`DataManager`] moves data in and out of the catalog.
//!
//! [`PatchId`]: crate::model::PatchId
//! [`DataManager`]: crate::manager::DataManager

mod cache;
mod request;
mod stats;
mod worker;

pub use cache::{PatchCache, DEFAULT_CACHE_CAPACITY};
pub use request::{Insertion, RequestState, RequestTable};
pub use stats::{LoadStats, LoadStatsSnapshot};
pub use worker::{
    ParseJob, ParseOutcome, ParseWorker, SubmitError, DEFAULT_PARSE_QUEUE_CAPACITY,
};
