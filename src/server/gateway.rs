//! Gateway logic behind the HTTP handlers
//!
//! Everything here operates on [`AppState`] directly so the enqueue,
//! listing, cancel and progress semantics can be unit-tested without
//! spinning up an HTTP server.

use crate::error::{ServerError, ServerResult};
use crate::progress;
use crate::queue::TransferTask;
use crate::server::AppState;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Form body of `POST /send`.
///
/// The file lists arrive JSON-encoded inside urlencoded form fields, the
/// way the job controller has always sent them.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(rename = "jobID")]
    pub job_id: String,

    #[serde(rename = "jobDir", default)]
    pub job_dir: String,

    pub owner: String,

    /// JSON array of absolute shared-pool source paths
    #[serde(default = "empty_list")]
    pub files: String,

    /// JSON array of absolute job-scoped source paths
    #[serde(rename = "localFiles", default = "empty_list")]
    pub local_files: String,
}

fn empty_list() -> String {
    "[]".to_string()
}

/// Enqueue one batch: job-scoped files, then shared files, then exactly
/// one completion-marker task. Returns the total number of tasks enqueued
/// (including the marker).
pub fn enqueue_batch(state: &AppState, req: &SendRequest) -> ServerResult<usize> {
    let job_id: u64 = req
        .job_id
        .parse()
        .map_err(|_| ServerError::InvalidJobId(req.job_id.clone()))?;

    // Monotonicity is load-bearing: cancel marks below the pruning floor
    // are already gone, so a job this old could never be canceled again.
    // Ids above the floor but below the newest enqueue are tolerated
    // (concurrent enqueue calls may commit in either order) but flagged.
    let floor = state.cancel.floor();
    if job_id < floor {
        return Err(ServerError::StaleJobId { got: job_id, floor });
    }
    let highest = state.highest_job_id.fetch_max(job_id, Ordering::SeqCst);
    if job_id < highest {
        warn!(
            job_id,
            highest, "Out-of-order job id from the controller (ids should be monotonic)"
        );
    }

    let files = parse_file_list(&req.files, "files")?;
    let local_files = parse_file_list(&req.local_files, "localFiles")?;
    let batch_files = files.len() + local_files.len();

    info!(
        job_id,
        owner = %req.owner,
        files = batch_files,
        "Receiving files to upload"
    );

    let mut batch = Vec::with_capacity(batch_files + 1);
    for source in local_files {
        debug!(
            job_id,
            "Queueing '{}' for job directory '{}'",
            source.display(),
            req.job_dir
        );
        batch.push(make_task(state, &req.owner, job_id, source, batch_files, &req.job_dir));
    }
    for source in files {
        debug!(job_id, "Queueing '{}' for the shared pool", source.display());
        batch.push(make_task(state, &req.owner, job_id, source, batch_files, ""));
    }

    // The marker lands after every real file of the batch so the remote
    // side can tell when the whole job has arrived.
    batch.push(TransferTask {
        job_id,
        owner: req.owner.clone(),
        source: state.config.marker_file.clone(),
        batch_files,
        job_dir: req.job_dir.clone(),
        byte_size: 0,
    });

    Ok(state.queue.extend(batch))
}

/// Distinct basenames of queued shared-pool files, first-seen order.
/// Canceled jobs and the completion marker are excluded.
pub fn pending_shared(state: &AppState) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for task in state.queue.snapshot() {
        if !task.is_shared()
            || task.source == state.config.marker_file
            || state.cancel.is_canceled(task.job_id)
        {
            continue;
        }
        let name = task.file_name();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// Mark a job canceled and report how many queued tasks it still has.
///
/// Best-effort: a task the worker has already peeked may still be sent,
/// but everything not yet peeked is guaranteed suppressed once this
/// returns.
pub fn cancel_job(state: &AppState, owner: &str, job_id: u64) -> usize {
    info!(job_id, owner, "Receiving cancel order");
    state.cancel.mark(job_id);
    state.queue.count_for_job(job_id)
}

/// Per-file progress for one (owner, job): source path -> percentage.
///
/// Only still-queued tasks appear; files absent from the map have either
/// finished (popped) or were never enqueued. A task reports a real
/// percentage only while it is the file named by the progress sink.
pub fn job_progress(
    state: &AppState,
    owner: &str,
    job_id: u64,
) -> ServerResult<BTreeMap<String, u64>> {
    let snap = progress::read_sink(&state.config.progress_file)?;
    debug!(
        job_id,
        owner,
        current = %snap.current_file,
        bytes = snap.cumulative_bytes,
        active = ?state.current.get(),
        "Progress poll"
    );

    let mut report = BTreeMap::new();
    for task in state.queue.snapshot() {
        if task.job_id != job_id || task.owner != owner {
            continue;
        }
        let pct = if task.file_name() == snap.current_file {
            progress::percentage(snap.cumulative_bytes, task.byte_size)
        } else {
            0
        };
        report.insert(task.source.to_string_lossy().into_owned(), pct);
    }
    Ok(report)
}

/// Size of a source in bytes: file length, or the recursive sum of a
/// directory's files with symlinks excluded. A missing path is zero.
pub fn path_byte_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if meta.is_symlink() {
        return 0;
    }
    if meta.is_file() {
        return meta.len();
    }
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| path_byte_size(&entry.path()))
        .sum()
}

fn make_task(
    state: &AppState,
    owner: &str,
    job_id: u64,
    source: PathBuf,
    batch_files: usize,
    job_dir: &str,
) -> TransferTask {
    let byte_size = path_byte_size(&source);
    TransferTask {
        job_id,
        owner: owner.to_string(),
        source,
        batch_files,
        job_dir: job_dir.to_string(),
        byte_size,
    }
}

fn parse_file_list(raw: &str, field: &'static str) -> ServerResult<Vec<PathBuf>> {
    let paths: Vec<String> =
        serde_json::from_str(raw).map_err(|e| ServerError::InvalidFileList {
            field,
            reason: e.to_string(),
        })?;
    Ok(paths.into_iter().map(PathBuf::from).collect())
}
