//! HTTP control surface
//!
//! The upstream job controller talks to the courier over a small HTTP API:
//! enqueue batches, list pending shared files, cancel jobs, poll progress.
//! Routing lives in [`routes`]; the logic behind each handler lives in
//! [`gateway`] so it can be tested without HTTP plumbing.

pub mod gateway;
pub mod routes;

use crate::config::CourierConfig;
use crate::queue::{CancelSet, TransferQueue};
use crate::worker::CurrentTransfer;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

pub use routes::{build_router, serve};

/// Shared application state
pub struct AppState {
    pub config: Arc<CourierConfig>,
    pub queue: TransferQueue,
    pub cancel: CancelSet,
    pub current: CurrentTransfer,

    /// Highest job id accepted so far. Out-of-order ids are still
    /// accepted (concurrent controllers may race) but logged; rejection
    /// happens only against the cancel-set pruning floor.
    pub(crate) highest_job_id: AtomicU64,
}

impl AppState {
    pub fn new(config: Arc<CourierConfig>) -> Self {
        Self {
            config,
            queue: TransferQueue::new(),
            cancel: CancelSet::new(),
            current: CurrentTransfer::new(),
            highest_job_id: AtomicU64::new(0),
        }
    }
}
