//! The transfer worker
//!
//! A single long-lived task drains the send queue in strict enqueue order.
//! One transfer at a time, by design: the remote host only ever sees one
//! rsync/ssh session, which bounds outbound bandwidth and connection count.
//!
//! Each iteration peeks the head task, consults the cancel set, invokes
//! rsync with its stdout redirected to the progress sink, then pops the
//! task, clears the sink and prunes stale cancel entries. Cancellation
//! suppresses only the subprocess invocation - the bookkeeping runs for
//! every task exactly once, canceled or not.

use crate::config::CourierConfig;
use crate::queue::{CancelSet, TransferQueue, TransferTask};
use humansize::{format_size, BINARY};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// The job and file currently being sent, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransfer {
    pub job_id: u64,
    pub file: String,
}

/// Shared view of the transfer in flight.
///
/// Written by the worker, readable by anyone holding a clone. Replaces
/// global "current job/file" scalars so the state stays race-free even if
/// the worker is ever parallelized.
#[derive(Debug, Clone, Default)]
pub struct CurrentTransfer {
    inner: Arc<Mutex<Option<ActiveTransfer>>>,
}

impl CurrentTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ActiveTransfer> {
        self.lock().clone()
    }

    fn set(&self, active: ActiveTransfer) {
        *self.lock() = Some(active);
    }

    fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveTransfer>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The single sequential transfer worker.
pub struct Worker {
    config: Arc<CourierConfig>,
    queue: TransferQueue,
    cancel: CancelSet,
    current: CurrentTransfer,
}

impl Worker {
    pub fn new(
        config: Arc<CourierConfig>,
        queue: TransferQueue,
        cancel: CancelSet,
        current: CurrentTransfer,
    ) -> Self {
        Self {
            config,
            queue,
            cancel,
            current,
        }
    }

    /// Run forever, sleeping for the configured refresh interval whenever
    /// the queue is empty.
    pub async fn run(self) {
        info!(
            refresh_secs = self.config.refresh.as_secs(),
            "Transfer worker started"
        );
        loop {
            if !self.process_one().await {
                tokio::time::sleep(self.config.refresh).await;
            }
        }
    }

    /// Process the head task, if any. Returns `false` on an empty queue.
    ///
    /// Split out from [`run`] so tests can step the worker one task at a
    /// time without a live loop.
    pub async fn process_one(&self) -> bool {
        let Some(task) = self.queue.peek_front() else {
            return false;
        };

        if self.cancel.is_canceled(task.job_id) {
            info!(
                job_id = task.job_id,
                file = %task.file_name(),
                "Skipping transfer of canceled job"
            );
        } else {
            self.transfer(&task).await;
        }

        // Bookkeeping happens regardless of cancellation: the head task is
        // popped exactly once and never reinserted.
        self.queue.pop_front();

        if let Err(e) = tokio::fs::remove_file(&self.config.progress_file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove progress sink: {}", e);
            }
        }

        self.cancel.prune_below(task.job_id);
        true
    }

    /// Invoke rsync for one task, blocking until the subprocess exits.
    async fn transfer(&self, task: &TransferTask) {
        let source = normalize_source(&task.source);
        let dest = if task.is_shared() {
            self.config.shared_dest()
        } else {
            self.config.job_dest(&task.job_dir)
        };

        let kind = if source.is_dir() { "directory" } else { "file" };
        info!(
            job_id = task.job_id,
            "Sending {} '{}' ({}) to '{}'",
            kind,
            task.file_name(),
            format_size(task.byte_size, BINARY),
            dest
        );

        self.current.set(ActiveTransfer {
            job_id: task.job_id,
            file: task.file_name(),
        });

        let sink = match std::fs::File::create(&self.config.progress_file) {
            Ok(file) => Stdio::from(file),
            Err(e) => {
                warn!("Failed to create progress sink: {}", e);
                Stdio::null()
            }
        };

        let remote_shell = format!(
            "ssh -l {} -i \"{}\" -o \"StrictHostKeyChecking no\"",
            self.config.user,
            self.config.key_file.display()
        );

        let status = Command::new(&self.config.rsync_bin)
            .arg("-r")
            .arg("--ignore-existing")
            .arg("--exclude=*-wal")
            .arg("--progress")
            .arg("-e")
            .arg(remote_shell)
            .arg(&source)
            .arg(&dest)
            .stdout(sink)
            .stderr(Stdio::null())
            .status()
            .await;

        // The task is removed either way (at-most-once, no retry), but a
        // failed transfer is at least visible in the log.
        match status {
            Ok(s) if s.success() => {
                debug!(
                    job_id = task.job_id,
                    left = self.queue.len().saturating_sub(1),
                    "Transfer finished"
                );
            }
            Ok(s) => {
                warn!(
                    job_id = task.job_id,
                    file = %task.file_name(),
                    "rsync exited with {}",
                    s
                );
            }
            Err(e) => {
                warn!(
                    job_id = task.job_id,
                    file = %task.file_name(),
                    "Failed to spawn rsync: {}",
                    e
                );
            }
        }

        self.current.clear();
    }
}

/// Strip the trailing path separator from a directory source.
///
/// rsync treats `dir` and `dir/` differently: with the slash it copies the
/// directory's contents instead of the directory itself.
pub fn normalize_source(source: &Path) -> PathBuf {
    if !source.is_dir() {
        return source.to_path_buf();
    }
    let s = source.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        PathBuf::from(s.trim_end_matches('/'))
    } else {
        source.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_trailing_slash_on_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let with_slash = PathBuf::from(format!("{}/", dir.path().display()));
        assert_eq!(normalize_source(&with_slash), dir.path());
        assert_eq!(normalize_source(dir.path()), dir.path());
    }

    #[test]
    fn test_normalize_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.raw");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(normalize_source(&file), file);

        // Nonexistent paths pass through untouched
        let missing = PathBuf::from("/no/such/path");
        assert_eq!(normalize_source(&missing), missing);
    }

    #[test]
    fn test_current_transfer_accessor() {
        let current = CurrentTransfer::new();
        assert!(current.get().is_none());

        current.set(ActiveTransfer {
            job_id: 7,
            file: "a.raw".into(),
        });
        assert_eq!(
            current.get(),
            Some(ActiveTransfer {
                job_id: 7,
                file: "a.raw".into()
            })
        );

        current.clear();
        assert!(current.get().is_none());
    }
}
