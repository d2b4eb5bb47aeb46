//! Transfer queue and cancellation tracking
//!
//! The send queue is a lock-guarded FIFO: any number of gateway handlers
//! append batches at the tail, and exactly one worker pops tasks off the
//! head. Producers never block on the consumer. Snapshots give listing and
//! progress queries a consistent point-in-time view while producers keep
//! appending.
//!
//! Cancellation is tracked out-of-band in a separate set so canceling a job
//! never mutates the queue itself: the worker checks membership before each
//! transfer and still performs the dequeue/cleanup bookkeeping for canceled
//! tasks. Job ids are monotonically increasing (enforced at the gateway),
//! which lets the set be pruned after every processed task.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A single queued transfer: one source path bound for the remote storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// Controller-assigned job id, monotonically increasing across batches
    pub job_id: u64,

    /// Owner of the job, as reported by the controller
    pub owner: String,

    /// Absolute source path (file or directory)
    pub source: PathBuf,

    /// Number of real files in the enqueue batch this task came from.
    /// Kept for the legacy whole-batch progress formula; the current
    /// per-file formula does not use it.
    pub batch_files: usize,

    /// Empty = destination is the shared pool, otherwise the job-scoped
    /// subdirectory under the jobs root
    pub job_dir: String,

    /// Size of the source in bytes, precomputed at enqueue time
    /// (directories summed recursively, symlinks excluded)
    pub byte_size: u64,
}

impl TransferTask {
    /// Basename of the source path. Matches the leading component of the
    /// paths rsync reports while this task is in flight.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// True when the destination is the shared pool
    pub fn is_shared(&self) -> bool {
        self.job_dir.is_empty()
    }
}

/// Concurrency-safe FIFO of transfer tasks.
///
/// Cheap to clone; all clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct TransferQueue {
    inner: Arc<Mutex<VecDeque<TransferTask>>>,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single task at the tail.
    pub fn push(&self, task: TransferTask) {
        self.lock().push_back(task);
    }

    /// Append a whole batch under one lock, so concurrent enqueue calls
    /// interleave batch-by-batch rather than task-by-task and each batch
    /// stays contiguous in submission order.
    pub fn extend(&self, batch: impl IntoIterator<Item = TransferTask>) -> usize {
        let mut guard = self.lock();
        let before = guard.len();
        guard.extend(batch);
        guard.len() - before
    }

    /// Oldest task without removing it, or `None` on an empty queue.
    pub fn peek_front(&self) -> Option<TransferTask> {
        self.lock().front().cloned()
    }

    /// Remove and return the oldest task. Single-consumer discipline:
    /// only the worker loop calls this.
    pub fn pop_front(&self) -> Option<TransferTask> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ordered copy of the queue for listing/progress queries.
    pub fn snapshot(&self) -> Vec<TransferTask> {
        self.lock().iter().cloned().collect()
    }

    /// Number of queued tasks belonging to the given job.
    pub fn count_for_job(&self, job_id: u64) -> usize {
        self.lock().iter().filter(|t| t.job_id == job_id).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TransferTask>> {
        // A poisoned mutex means another thread panicked mid-mutation;
        // the queue holds only owned data, so the contents are still valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Set of job ids marked canceled.
///
/// Cheap to clone; all clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct CancelSet {
    inner: Arc<Mutex<BTreeSet<u64>>>,

    /// Highest `prune_below` argument seen. Entries below it are gone, so
    /// the gateway must not accept a job id below it (its cancel mark
    /// could already have been pruned away).
    floor: Arc<AtomicU64>,
}

impl CancelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job canceled. Idempotent.
    pub fn mark(&self, job_id: u64) {
        self.lock().insert(job_id);
    }

    /// Membership test, called by the worker before each transfer.
    pub fn is_canceled(&self, job_id: u64) -> bool {
        self.lock().contains(&job_id)
    }

    /// Drop every id strictly below `job_id`. Safe because job ids are
    /// monotonic: an id below the task just processed can never match a
    /// future task, so keeping it would only leak memory.
    pub fn prune_below(&self, job_id: u64) {
        let mut guard = self.lock();
        *guard = guard.split_off(&job_id);
        self.floor.fetch_max(job_id, Ordering::SeqCst);
    }

    /// Lowest job id still trackable: everything below has been pruned.
    pub fn floor(&self) -> u64 {
        self.floor.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<u64>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
