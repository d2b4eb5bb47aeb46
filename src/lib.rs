//! rsync-courier - Queued rsync transfer agent
//!
//! Receives file/directory transfer requests from an upstream job
//! controller over HTTP, queues them, and executes them one at a time
//! against a remote storage host via rsync over ssh. Tracks per-job
//! progress from rsync's `--progress` output and supports best-effort
//! cancellation of not-yet-started transfers.
//!
//! # Architecture
//!
//! ```text
//!  controller ──HTTP──▶ ┌──────────────────────────────┐
//!                       │  Gateway (axum)              │
//!                       │  /send /list /cancel         │
//!                       │  /progress                   │
//!                       └──────┬───────────────▲───────┘
//!                       enqueue│               │read
//!                              ▼               │
//!                       ┌──────────────┐  ┌────┴─────────┐
//!                       │ TransferQueue│  │ progress sink │
//!                       │  (FIFO)      │  │ (rsync stdout)│
//!                       └──────┬───────┘  └────▲─────────┘
//!                          pop │               │write
//!                              ▼               │
//!                       ┌──────────────┐   ┌───┴───────┐
//!                       │ Worker loop  ├──▶│ rsync/ssh │──▶ remote storage
//!                       │ (single)     │   └───────────┘
//!                       └──────────────┘
//! ```
//!
//! Transfers run strictly in enqueue order; each batch ends with a
//! zero-byte completion marker so the remote side can detect when a
//! whole job has arrived. The queue and the cancel set are in-memory
//! only - the controller re-submits lost batches after a restart.

pub mod config;
pub mod error;
pub mod progress;
pub mod queue;
pub mod server;
pub mod worker;

pub use config::{CliArgs, CourierConfig};
pub use error::{CourierError, Result};
pub use progress::ProgressSnapshot;
pub use queue::{CancelSet, TransferQueue, TransferTask};
pub use server::AppState;
pub use worker::{CurrentTransfer, Worker};
