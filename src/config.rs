//! Configuration types for rsync-courier
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The flat `key = value` config file loader
//! - Runtime configuration with validation

use crate::error::{ConfigError, ConfigResult};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default seconds the worker sleeps when the queue is empty
const DEFAULT_REFRESH_SECS: u64 = 15;

/// Queued rsync transfer agent with an HTTP control surface
#[derive(Parser, Debug, Clone)]
#[command(
    name = "rsync-courier",
    version,
    about = "Queued rsync transfer agent with an HTTP control surface",
    long_about = "Queues file/directory transfer requests from an upstream job \
                  controller and executes them one at a time over rsync/ssh.\n\n\
                  Transfers run strictly in enqueue order on a single worker so \
                  the remote host only ever sees one session at a time.",
    after_help = "EXAMPLES:\n    \
        rsync-courier --config courier.conf\n    \
        rsync-courier --config courier.conf --port 9090 -v"
)]
pub struct CliArgs {
    /// Path to the config file
    #[arg(short, long, default_value = "courier.conf", value_name = "FILE")]
    pub config: PathBuf,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", value_name = "ADDR")]
    pub bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8080", value_name = "PORT")]
    pub port: u16,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Validated runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct CourierConfig {
    /// Remote storage host
    pub host: String,

    /// Remote base path; `<base>/data` is the shared pool,
    /// `<base>/jobs/<dir>` the job-scoped destination
    pub base_path: String,

    /// Remote user for the ssh transport
    pub user: String,

    /// Private key for the ssh transport (absolute)
    pub key_file: PathBuf,

    /// How long the worker sleeps when the queue is empty
    pub refresh: Duration,

    /// Zero-byte completion marker sent last in every batch (absolute)
    pub marker_file: PathBuf,

    /// File capturing rsync's --progress output (absolute)
    pub progress_file: PathBuf,

    /// rsync binary to invoke
    pub rsync_bin: String,
}

impl CourierConfig {
    /// Load and validate a flat `key = value` config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// Parse config file contents. Split out from [`load`] for testability.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let mut host = None;
        let mut base_path = None;
        let mut user = None;
        let mut key_file = None;
        let mut refresh_secs = DEFAULT_REFRESH_SECS;
        let mut marker_file = None;
        let mut progress_file = None;
        let mut rsync_bin = "rsync".to_string();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or(ConfigError::MalformedLine {
                line: idx + 1,
                content: line.to_string(),
            })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "storage.host" => host = Some(value.to_string()),
                "storage.path" => base_path = Some(value.to_string()),
                "storage.user" => user = Some(value.to_string()),
                "storage.public_key" => key_file = Some(absolute(value)),
                "refresh.rate" => {
                    refresh_secs = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "refresh.rate",
                        reason: format!("expected an integer number of seconds, got '{}'", value),
                    })?;
                }
                "final.file" => marker_file = Some(absolute(value)),
                "progress.file" => progress_file = Some(absolute(value)),
                "rsync.bin" => rsync_bin = value.to_string(),
                other => {
                    tracing::warn!(key = other, "Ignoring unknown config key");
                }
            }
        }

        if refresh_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "refresh.rate",
                reason: "must be greater than zero".into(),
            });
        }

        let config = Self {
            host: require(host, "storage.host")?,
            base_path: require(base_path, "storage.path")?,
            user: require(user, "storage.user")?,
            key_file: require(key_file, "storage.public_key")?,
            refresh: Duration::from_secs(refresh_secs),
            marker_file: require(marker_file, "final.file")?,
            progress_file: require(progress_file, "progress.file")?,
            rsync_bin,
        };

        if config.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.host",
                reason: "must not be empty".into(),
            });
        }

        Ok(config)
    }

    /// Remote destination for shared-pool files.
    pub fn shared_dest(&self) -> String {
        format!("{}:{}/data", self.host, self.base_path)
    }

    /// Remote destination for a job-scoped directory.
    pub fn job_dest(&self, job_dir: &str) -> String {
        format!("{}:{}/jobs/{}", self.host, self.base_path, job_dir)
    }

    /// `user@host:path` string for startup logging.
    pub fn remote_display(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.base_path)
    }

    /// Create the completion marker as an empty file if it does not exist.
    ///
    /// The marker is transferred at the end of every batch; it must exist
    /// before the first enqueue so its size computes to zero.
    pub fn ensure_marker(&self) -> ConfigResult<()> {
        if self.marker_file.exists() {
            return Ok(());
        }
        std::fs::File::create(&self.marker_file)
            .map(drop)
            .map_err(|e| ConfigError::MarkerCreateFailed {
                path: self.marker_file.clone(),
                reason: e.to_string(),
            })
    }
}

fn require<T>(value: Option<T>, key: &'static str) -> ConfigResult<T> {
    value.ok_or(ConfigError::MissingKey { key })
}

fn absolute(value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    std::path::absolute(&path).unwrap_or(path)
}
