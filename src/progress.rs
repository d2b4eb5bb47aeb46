//! Progress sink parsing
//!
//! rsync runs with `--progress` and its stdout is redirected to the
//! progress sink file. While a transfer is in flight the sink keeps
//! growing; progress queries re-read and re-parse it on demand.
//!
//! Grammar of the sink:
//! - a non-indented line introduces a new file name (rsync prints the
//!   path of the file it is about to send, relative to the transfer
//!   root; only the first component is kept, since that is what
//!   identifies the queued task)
//! - an indented line begins with a human-formatted byte count
//!   ("1,234,567", thousands-grouped; cwrsync groups with dots) followed
//!   by percentage/rate fields which are ignored
//! - blank lines are ignored
//!
//! The sink is written concurrently by the subprocess, so the parser must
//! tolerate a partial trailing line and garbage tokens by skipping them
//! rather than failing. Parsing is kept decoupled from process invocation
//! so the grammar can be unit-tested on plain strings.

use regex::Regex;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

/// Leading byte count of an indented progress line
static BYTE_COUNT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9][0-9.,]*)").expect("Invalid byte count regex"));

/// Point-in-time view of the transfer in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// First path component of the name most recently introduced by the
    /// sink. rsync reports paths relative to the transfer root, so for a
    /// directory transfer every reported path starts with the directory's
    /// own name; for a flat file the path is the bare file name. Either
    /// way this component equals the basename of the task being sent.
    pub current_file: String,

    /// Fully-accounted file totals plus the latest file's running count
    pub cumulative_bytes: u64,
}

/// Parse the raw contents of a progress sink.
///
/// A trailing line not terminated by a newline is assumed to be mid-write
/// and is dropped.
pub fn parse_progress(text: &str) -> ProgressSnapshot {
    let complete = match text.rfind('\n') {
        Some(idx) => &text[..=idx],
        None => "",
    };

    let mut current_file = String::new();
    let mut current_count: u64 = 0;
    let mut total: u64 = 0;

    for line in complete.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(count) = parse_byte_count(line.trim_start()) {
                current_count = count;
            }
        } else {
            // New file: fold the previous file's total into the sum
            total += current_count;
            current_count = 0;
            current_file = first_component(line.trim_end()).to_string();
        }
    }

    ProgressSnapshot {
        current_file,
        cumulative_bytes: total + current_count,
    }
}

/// Read and parse the progress sink file.
///
/// A missing sink means no transfer has written progress yet and yields an
/// empty snapshot.
pub fn read_sink(path: &Path) -> io::Result<ProgressSnapshot> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_progress(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ProgressSnapshot::default()),
        Err(e) => Err(e),
    }
}

/// Integer percentage 0-100 of `cumulative` against `byte_size`.
///
/// A zero-byte source has nothing left to move and reports 100.
pub fn percentage(cumulative: u64, byte_size: u64) -> u64 {
    if byte_size == 0 {
        return 100;
    }
    (cumulative * 100 / byte_size).min(100)
}

/// Parse a thousands-grouped byte count ("1,234,567" or "1.234.567").
fn parse_byte_count(token: &str) -> Option<u64> {
    let m = BYTE_COUNT_REGEX.captures(token)?;
    let digits: String = m[1].chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// First path component of a slash-separated name.
fn first_component(name: &str) -> &str {
    name.trim_start_matches('/').split('/').next().unwrap_or(name)
}
