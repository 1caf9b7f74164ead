//! Rotation-aware log tailer.
//!
//! The tailer owns a read cursor into one log file and hands out complete
//! lines as they are appended. It is a small state machine:
//!
//! ```text
//!             ┌──────────────── backoff ───────────────┐
//!             v                                        │
//! FileMissing <── not found ── Opening ── I/O error ───┘
//!     │                           │ ^
//!     └──── retry ───────────────>│ └──────────── Rotated
//!                                 v                   ^
//!                              Tailing <──> EofWait ──┘ identity changed
//! ```
//!
//! The first successful open of the process seeks to the end of the file.
//! After a rotation the replacement file is read from its beginning.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::TailerConfig;
use crate::error::{Result, TailError};
use crate::identity::FileIdentity;

/// Current state of a [`LogTailer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// Resolving and opening the path.
    Opening,
    /// The path did not resolve; waiting before the next attempt.
    FileMissing,
    /// Reading lines from the open file.
    Tailing,
    /// At end of data; checking whether the file was rotated.
    EofWait,
    /// The path now points at a different file; finishing the old one.
    Rotated,
}

impl TailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TailState::Opening => "opening",
            TailState::FileMissing => "file_missing",
            TailState::Tailing => "tailing",
            TailState::EofWait => "eof_wait",
            TailState::Rotated => "rotated",
        }
    }
}

impl std::fmt::Display for TailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single [`LogTailer::advance`] step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A complete line, without its terminator.
    Line(String),
    /// No line is available; wait this long before advancing again.
    Idle(Duration),
}

/// Live counters of a tailer, shareable with readers on other tasks.
#[derive(Debug, Default)]
pub struct TailerCounters {
    opens: AtomicU64,
    open_failures: AtomicU64,
    rotations: AtomicU64,
    truncations: AtomicU64,
    io_errors: AtomicU64,
    lines: AtomicU64,
}

impl TailerCounters {
    /// Take a point-in-time copy of the counters.
    pub fn snapshot(&self) -> TailerStats {
        TailerStats {
            opens: self.opens.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            truncations: self.truncations.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            lines: self.lines.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Tailer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailerStats {
    /// Successful file opens.
    pub opens: u64,
    /// Open attempts that found no file.
    pub open_failures: u64,
    /// Rotations detected.
    pub rotations: u64,
    /// In-place truncations detected.
    pub truncations: u64,
    /// Transient I/O errors.
    pub io_errors: u64,
    /// Complete lines delivered.
    pub lines: u64,
}

/// Result of comparing the path's current file with the open one.
enum FileCheck {
    Unchanged,
    Truncated,
    Replaced,
    Missing,
}

/// Follows one log file across rotations.
pub struct LogTailer {
    path: PathBuf,
    config: TailerConfig,
    state: TailState,
    reader: Option<BufReader<File>>,
    /// Identity of the most recently opened file.
    identity: Option<FileIdentity>,
    /// Byte offset of the read cursor in the current file.
    offset: u64,
    /// Bytes of a line whose terminator has not arrived yet.
    pending: Vec<u8>,
    opened_once: bool,
    missing_reported: bool,
    counters: Arc<TailerCounters>,
}

impl LogTailer {
    /// Create a tailer for `path`. Nothing is opened until the first step.
    pub fn new(path: impl Into<PathBuf>, config: TailerConfig) -> Self {
        Self::with_counters(path, config, Arc::new(TailerCounters::default()))
    }

    /// Create a tailer that reports into existing counters.
    pub fn with_counters(
        path: impl Into<PathBuf>,
        config: TailerConfig,
        counters: Arc<TailerCounters>,
    ) -> Self {
        Self {
            path: path.into(),
            config,
            state: TailState::Opening,
            reader: None,
            identity: None,
            offset: 0,
            pending: Vec::new(),
            opened_once: false,
            missing_reported: false,
            counters,
        }
    }

    /// The monitored path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current state.
    pub fn state(&self) -> TailState {
        self.state
    }

    /// Byte offset of the read cursor in the current file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Shared handle to the live counters.
    pub fn counters(&self) -> Arc<TailerCounters> {
        self.counters.clone()
    }

    /// Current statistics.
    pub fn stats(&self) -> TailerStats {
        self.counters.snapshot()
    }

    /// Drive the state machine until a line is available or the caller
    /// should wait.
    ///
    /// Never blocks on the file beyond one read; all waiting is left to the
    /// caller through [`TailEvent::Idle`].
    pub async fn advance(&mut self) -> TailEvent {
        loop {
            match self.state {
                TailState::Opening => match self.open().await {
                    Ok(()) => self.state = TailState::Tailing,
                    Err(e) if e.is_unavailable() => {
                        TailerCounters::bump(&self.counters.open_failures);
                        if self.missing_reported {
                            debug!(path = %self.path.display(), "Log file still missing");
                        } else {
                            warn!(path = %self.path.display(), "Log file not found, retrying");
                            self.missing_reported = true;
                        }
                        self.state = TailState::FileMissing;
                        return TailEvent::Idle(self.config.missing_backoff());
                    }
                    Err(e) => return self.io_failure(e),
                },
                TailState::FileMissing => self.state = TailState::Opening,
                TailState::Tailing => match self.read_line().await {
                    Ok(Some(line)) => return TailEvent::Line(line),
                    Ok(None) => self.state = TailState::EofWait,
                    Err(e) => return self.io_failure(e),
                },
                TailState::EofWait => match self.check_file().await {
                    Ok(FileCheck::Unchanged) => {
                        self.state = TailState::Tailing;
                        return TailEvent::Idle(self.config.poll_interval());
                    }
                    Ok(FileCheck::Truncated) => {
                        if let Err(e) = self.rewind().await {
                            return self.io_failure(e);
                        }
                        self.state = TailState::Tailing;
                    }
                    Ok(FileCheck::Replaced) | Ok(FileCheck::Missing) => {
                        info!(path = %self.path.display(), "Log rotation detected, reopening file");
                        TailerCounters::bump(&self.counters.rotations);
                        self.state = TailState::Rotated;
                    }
                    Err(e) => return self.io_failure(e),
                },
                TailState::Rotated => {
                    // Lines written to the old file right before the switch
                    // are still delivered.
                    if let Ok(Some(line)) = self.read_line().await {
                        return TailEvent::Line(line);
                    }
                    if !self.pending.is_empty() {
                        debug!(
                            path = %self.path.display(),
                            bytes = self.pending.len(),
                            "Dropping unterminated line from rotated file"
                        );
                        self.pending.clear();
                    }
                    // The replacement may reuse the old inode; it must still
                    // be read from its start.
                    self.reader = None;
                    self.identity = None;
                    self.offset = 0;
                    self.state = TailState::Opening;
                }
            }
        }
    }

    /// Run until `shutdown` flips to `true`, handing every line to `on_line`.
    pub async fn run<F>(mut self, mut on_line: F, mut shutdown: watch::Receiver<bool>)
    where
        F: FnMut(String),
    {
        info!(path = %self.path.display(), "Starting log tailer");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.advance().await {
                TailEvent::Line(line) => on_line(line),
                TailEvent::Idle(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let stats = self.stats();
        info!(
            path = %self.path.display(),
            lines = stats.lines,
            rotations = stats.rotations,
            "Log tailer stopped"
        );
    }

    async fn open(&mut self) -> Result<()> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TailError::FileUnavailable {
                    path: self.path.display().to_string(),
                    source: e,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata().await?;
        let identity = FileIdentity::from_metadata(&metadata);
        let len = metadata.len();
        let same_file = self.identity == Some(identity);

        let start = if !self.opened_once {
            // Historical content is not replayed on startup.
            len
        } else if same_file && len >= self.offset {
            self.offset
        } else {
            0
        };

        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        if !same_file || start == 0 {
            self.pending.clear();
        }

        info!(
            path = %self.path.display(),
            identity = %identity,
            offset = start,
            "Opened log file"
        );

        self.reader = Some(BufReader::new(file));
        self.identity = Some(identity);
        self.offset = start;
        self.opened_once = true;
        self.missing_reported = false;
        TailerCounters::bump(&self.counters.opens);
        Ok(())
    }

    /// Read the next complete line. `None` means no full line is available.
    async fn read_line(&mut self) -> Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let read = reader.read_until(b'\n', &mut self.pending).await?;
        self.offset += read as u64;

        if self.pending.last() != Some(&b'\n') {
            if read > 0 {
                trace!(bytes = self.pending.len(), "Buffered partial line");
            }
            return Ok(None);
        }

        TailerCounters::bump(&self.counters.lines);
        Ok(Some(take_line(&mut self.pending)))
    }

    async fn check_file(&self) -> Result<FileCheck> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileCheck::Missing),
            Err(e) => return Err(e.into()),
        };

        if self.identity != Some(FileIdentity::from_metadata(&metadata)) {
            Ok(FileCheck::Replaced)
        } else if metadata.len() < self.offset {
            Ok(FileCheck::Truncated)
        } else {
            Ok(FileCheck::Unchanged)
        }
    }

    /// Restart at the beginning of a file truncated in place.
    async fn rewind(&mut self) -> Result<()> {
        info!(
            path = %self.path.display(),
            offset = self.offset,
            "Log file truncated, reading from start"
        );
        TailerCounters::bump(&self.counters.truncations);

        if let Some(reader) = self.reader.as_mut() {
            reader.seek(SeekFrom::Start(0)).await?;
        }
        self.offset = 0;
        self.pending.clear();
        Ok(())
    }

    fn io_failure(&mut self, error: TailError) -> TailEvent {
        warn!(path = %self.path.display(), error = %error, "Tailer I/O error, reopening");
        TailerCounters::bump(&self.counters.io_errors);
        self.reader = None;
        self.state = TailState::Opening;
        TailEvent::Idle(self.config.error_backoff())
    }
}

/// Take a terminated line out of `buf`, dropping `\n` or `\r\n`.
///
/// Invalid UTF-8 is replaced rather than rejected.
fn take_line(buf: &mut Vec<u8>) -> String {
    let mut bytes = std::mem::take(buf);
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
