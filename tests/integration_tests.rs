//! Integration tests for rsync-courier
//!
//! The worker is stepped one task at a time (`Worker::process_one`) and
//! rsync is replaced by a stub shell script that records its invocations,
//! so the full enqueue -> transfer -> progress -> cancel flow runs without
//! a network or a real rsync.

use rsync_courier::config::CourierConfig;
use rsync_courier::server::gateway::{self, SendRequest};
use rsync_courier::server::AppState;
use rsync_courier::worker::Worker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    state: Arc<AppState>,
    worker: Worker,
    invocations: PathBuf,
    _dir: TempDir,
}

/// Build a state + worker pair with rsync stubbed by a script that logs
/// its arguments and exits 0. The stub's stdout is empty, so the progress
/// sink ends up empty rather than missing after a transfer.
fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let invocations = dir.path().join("invocations.log");

    let stub = dir.path().join("rsync-stub.sh");
    std::fs::write(
        &stub,
        format!("#!/bin/sh\necho \"$*\" >> \"{}\"\n", invocations.display()),
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let mut config = CourierConfig::parse(
        "storage.host = storage.example.org\n\
         storage.path = /storage\n\
         storage.user = courier\n\
         storage.public_key = /etc/courier/courier.pem\n\
         refresh.rate = 1\n\
         final.file = /tmp/.courier.done\n\
         progress.file = /tmp/.courier.progress\n",
    )
    .unwrap();
    config.marker_file = dir.path().join(".courier.done");
    config.progress_file = dir.path().join(".courier.progress");
    config.rsync_bin = stub.to_string_lossy().into_owned();
    config.ensure_marker().unwrap();

    let config = Arc::new(config);
    let state = Arc::new(AppState::new(Arc::clone(&config)));
    let worker = Worker::new(
        config,
        state.queue.clone(),
        state.cancel.clone(),
        state.current.clone(),
    );

    Harness {
        state,
        worker,
        invocations,
        _dir: dir,
    }
}

fn send_req(job_id: u64, job_dir: &str, files: &[&Path], local: &[&Path]) -> SendRequest {
    let encode = |paths: &[&Path]| {
        serde_json::to_string(
            &paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        )
        .unwrap()
    };
    SendRequest {
        job_id: job_id.to_string(),
        job_dir: job_dir.to_string(),
        owner: "alice".to_string(),
        files: encode(files),
        local_files: encode(local),
    }
}

fn invocation_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => text.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn scenario_enqueue_and_list() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    let b = dir.join("b.raw");
    std::fs::write(&a, vec![0u8; 100]).unwrap();
    std::fs::write(&b, vec![0u8; 200]).unwrap();

    let queued = gateway::enqueue_batch(&h.state, &send_req(7, "", &[&a, &b], &[])).unwrap();
    assert_eq!(queued, 3); // 2 files + marker
    assert_eq!(h.state.queue.len(), 3);
    assert_eq!(gateway::pending_shared(&h.state), vec!["a.raw", "b.raw"]);

    let snap = h.state.queue.snapshot();
    assert_eq!(snap[0].byte_size, 100);
    assert_eq!(snap[1].byte_size, 200);
    assert_eq!(snap[2].source, h.state.config.marker_file);
}

#[tokio::test]
async fn scenario_cancel_before_worker_starts() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    let b = dir.join("b.raw");
    std::fs::write(&a, vec![0u8; 100]).unwrap();
    std::fs::write(&b, vec![0u8; 200]).unwrap();

    gateway::enqueue_batch(&h.state, &send_req(7, "", &[&a, &b], &[])).unwrap();
    assert_eq!(gateway::cancel_job(&h.state, "alice", 7), 3);

    // The worker still drains all three tasks, but never invokes rsync
    assert!(h.worker.process_one().await);
    assert!(h.worker.process_one().await);
    assert!(h.worker.process_one().await);
    assert!(!h.worker.process_one().await);

    assert_eq!(h.state.queue.len(), 0);
    assert!(invocation_lines(&h.invocations).is_empty());
    assert!(gateway::job_progress(&h.state, "alice", 7).unwrap().is_empty());
}

#[tokio::test]
async fn scenario_worker_invokes_rsync_with_flag_set() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    std::fs::write(&a, vec![0u8; 100]).unwrap();

    gateway::enqueue_batch(&h.state, &send_req(5, "run5", &[], &[&a])).unwrap();
    assert!(h.worker.process_one().await);

    let lines = invocation_lines(&h.invocations);
    assert_eq!(lines.len(), 1);
    let call = &lines[0];
    assert!(call.contains("-r"));
    assert!(call.contains("--ignore-existing"));
    assert!(call.contains("--exclude=*-wal"));
    assert!(call.contains("--progress"));
    assert!(call.contains("StrictHostKeyChecking no"));
    assert!(call.contains(a.to_str().unwrap()));
    assert!(call.contains("storage.example.org:/storage/jobs/run5"));

    // Marker goes to the same job directory, after the real file
    assert!(h.worker.process_one().await);
    let lines = invocation_lines(&h.invocations);
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains(h.state.config.marker_file.to_str().unwrap()));
    assert!(lines[1].contains("storage.example.org:/storage/jobs/run5"));

    // Progress sink is cleared between tasks
    assert!(!h.state.config.progress_file.exists());
    assert_eq!(h.state.queue.len(), 0);
}

#[tokio::test]
async fn scenario_shared_files_go_to_the_pool() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    std::fs::write(&a, vec![0u8; 100]).unwrap();

    gateway::enqueue_batch(&h.state, &send_req(6, "", &[&a], &[])).unwrap();
    assert!(h.worker.process_one().await);

    let lines = invocation_lines(&h.invocations);
    assert!(lines[0].contains("storage.example.org:/storage/data"));
}

#[test]
fn scenario_mid_transfer_progress() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    std::fs::write(&a, vec![0u8; 500_000]).unwrap();
    gateway::enqueue_batch(&h.state, &send_req(8, "run42", &[], &[&a])).unwrap();

    // Simulate rsync mid-transfer: 250,000 of 500,000 bytes sent, plus a
    // partial trailing line still being written
    std::fs::write(
        &h.state.config.progress_file,
        "a.raw\n    250,000  50%  1.82MB/s  0:00:01\n    311,2",
    )
    .unwrap();

    let report = gateway::job_progress(&h.state, "alice", 8).unwrap();
    assert_eq!(report.get(a.to_str().unwrap()), Some(&50));
}

#[test]
fn scenario_directory_progress_spans_member_files() {
    let h = harness();
    let dir = h._dir.path();

    // A directory task: ByteSize is the recursive sum of its files
    let run = dir.join("run42");
    std::fs::create_dir(&run).unwrap();
    std::fs::write(run.join("f1.raw"), vec![0u8; 250_000]).unwrap();
    std::fs::write(run.join("f2.raw"), vec![0u8; 250_000]).unwrap();
    gateway::enqueue_batch(&h.state, &send_req(8, "run42", &[], &[&run])).unwrap();
    assert_eq!(h.state.queue.peek_front().unwrap().byte_size, 500_000);

    // rsync -r reports each member relative to the transfer root; the
    // finished file's total folds into the running count of the next one
    std::fs::write(
        &h.state.config.progress_file,
        "run42/f1.raw\n    250,000 100%  1.82MB/s  0:00:00\n\
         run42/f2.raw\n    125,000  50%  1.82MB/s  0:00:01\n",
    )
    .unwrap();

    let report = gateway::job_progress(&h.state, "alice", 8).unwrap();
    assert_eq!(report.get(run.to_str().unwrap()), Some(&75));
}

#[test]
fn scenario_concurrent_enqueues_interleave_without_loss() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    let b = dir.join("b.raw");
    std::fs::write(&a, b"x").unwrap();
    std::fs::write(&b, b"y").unwrap();

    let state9 = Arc::clone(&h.state);
    let state10 = Arc::clone(&h.state);
    let req9 = send_req(9, "", &[&a, &b], &[]);
    let req10 = send_req(10, "run10", &[], &[&a]);

    let t9 = std::thread::spawn(move || gateway::enqueue_batch(&state9, &req9).unwrap());
    let t10 = std::thread::spawn(move || gateway::enqueue_batch(&state10, &req10).unwrap());
    let (n9, n10) = (t9.join().unwrap(), t10.join().unwrap());

    assert_eq!(n9 + n10, h.state.queue.len());

    // Each batch is contiguous and in submission order, marker last
    let snap = h.state.queue.snapshot();
    let job9: Vec<_> = snap.iter().filter(|t| t.job_id == 9).collect();
    assert_eq!(job9.len(), 3);
    assert_eq!(job9[0].source, a);
    assert_eq!(job9[1].source, b);
    assert_eq!(job9[2].source, h.state.config.marker_file);

    let job10: Vec<_> = snap.iter().filter(|t| t.job_id == 10).collect();
    assert_eq!(job10.len(), 2);
    assert_eq!(job10[1].source, h.state.config.marker_file);
    assert_eq!(job10[1].job_dir, "run10");
}

#[tokio::test]
async fn cancel_only_affects_still_queued_tasks() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    let b = dir.join("b.raw");
    std::fs::write(&a, b"x").unwrap();
    std::fs::write(&b, b"y").unwrap();

    gateway::enqueue_batch(&h.state, &send_req(3, "", &[&a, &b], &[])).unwrap();

    // First task is transferred before the cancel arrives
    assert!(h.worker.process_one().await);
    assert_eq!(invocation_lines(&h.invocations).len(), 1);

    assert_eq!(gateway::cancel_job(&h.state, "alice", 3), 2);

    // Remaining tasks are drained without further invocations
    assert!(h.worker.process_one().await);
    assert!(h.worker.process_one().await);
    assert_eq!(invocation_lines(&h.invocations).len(), 1);
    assert_eq!(h.state.queue.len(), 0);
}

#[tokio::test]
async fn cancel_set_is_pruned_by_later_jobs() {
    let h = harness();
    let dir = h._dir.path();

    let a = dir.join("a.raw");
    std::fs::write(&a, b"x").unwrap();

    gateway::enqueue_batch(&h.state, &send_req(2, "", &[&a], &[])).unwrap();
    gateway::cancel_job(&h.state, "alice", 2);

    // Drain job 2: its own entry survives (prune removes strictly-lower ids)
    assert!(h.worker.process_one().await);
    assert!(h.worker.process_one().await);
    assert!(h.state.cancel.is_canceled(2));

    // Processing a later job prunes the stale entry
    gateway::enqueue_batch(&h.state, &send_req(4, "", &[&a], &[])).unwrap();
    assert!(h.worker.process_one().await);
    assert!(!h.state.cancel.is_canceled(2));
}
