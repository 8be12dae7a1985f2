//! Watching long-running acquisition commands.
//!
//! [`FetchMonitor::watch`] polls a streaming child at a fixed interval and
//! decides between four outcomes:
//!
//! - **Completed**: the child exited 0 and never printed a fatal marker.
//! - **FatalError**: some output contained a fatal marker. Checked on every
//!   chunk before the stall check, so it wins even at the stall boundary.
//!   The child is killed.
//! - **Stalled**: no output for longer than the session's threshold while
//!   the child is still running. The child is left alone; the caller may
//!   [`FetchSession::resume`] and watch again, or kill it.
//! - **Failed**: non-zero exit without a fatal marker.

pub mod runner;

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::process::{OutputEvent, OutputSource, ProcessError};

pub use runner::{FetchStep, MonitoredRunner, StepRunner};

/// Markers that mean the tool gave up, matched case-insensitively.
pub const DEFAULT_FATAL_MARKERS: &[&str] = &["fatal"];

/// Bound on each read while draining output after the child exits.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Source of time for the monitor.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed,
    Stalled {
        idle: Duration,
        last_line: Option<String>,
    },
    FatalError {
        line: String,
    },
    Failed {
        exit_code: i32,
        last_line: Option<String>,
    },
}

impl FetchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FetchOutcome::Completed)
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Completed => write!(f, "completed"),
            FetchOutcome::Stalled { idle, last_line } => {
                write!(f, "stalled with no output for {}s", idle.as_secs())?;
                if let Some(line) = last_line {
                    write!(f, " (last output: {line})")?;
                }
                Ok(())
            }
            FetchOutcome::FatalError { line } => write!(f, "fatal error: {line}"),
            FetchOutcome::Failed {
                exit_code,
                last_line,
            } => {
                write!(f, "exited with status {exit_code}")?;
                if let Some(line) = last_line {
                    write!(f, " (last output: {line})")?;
                }
                Ok(())
            }
        }
    }
}

/// State of one watched command. Discarded once the attempt is over.
#[derive(Debug)]
pub struct FetchSession {
    command: String,
    bytes_seen: u64,
    last_progress: Instant,
    stall_threshold: Duration,
    last_line: Option<String>,
    // Tail of the previous chunk, so a marker split across reads still matches.
    carry: Vec<u8>,
    log: Option<File>,
}

impl FetchSession {
    pub fn new(command: impl Into<String>, stall_threshold: Duration, now: Instant) -> Self {
        Self {
            command: command.into(),
            bytes_seen: 0,
            last_progress: now,
            stall_threshold,
            last_line: None,
            carry: Vec::new(),
            log: None,
        }
    }

    /// Copy all raw output into `log`.
    pub fn with_log(mut self, log: File) -> Self {
        self.log = Some(log);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Total bytes of output observed so far.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn last_line(&self) -> Option<&str> {
        self.last_line.as_deref()
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    /// Restart the stall timer, e.g. after the operator chose to keep waiting.
    pub fn resume(&mut self, now: Instant) {
        self.last_progress = now;
    }

    /// Account for a chunk of output. Returns the new display line, if any.
    fn record(&mut self, chunk: &[u8], now: Instant) -> Option<&str> {
        self.bytes_seen += chunk.len() as u64;
        self.last_progress = now;

        if let Some(log) = self.log.as_mut() {
            if let Err(err) = log.write_all(chunk) {
                warn!(command = %self.command, "disabling fetch log: {err}");
                self.log = None;
            }
        }

        let line = latest_line(chunk)?;
        self.last_line = Some(line);
        self.last_line.as_deref()
    }

    /// Find the first fatal marker in this chunk (plus carried-over tail).
    fn scan_fatal(&mut self, chunk: &[u8], markers: &[Vec<u8>]) -> Option<String> {
        let mut window = std::mem::take(&mut self.carry);
        window.extend_from_slice(chunk);
        let lowered = window.to_ascii_lowercase();

        let hit = markers
            .iter()
            .filter_map(|marker| find(&lowered, marker))
            .min();
        if let Some(index) = hit {
            return Some(line_around(&window, index));
        }

        let keep = markers
            .iter()
            .map(|marker| marker.len().saturating_sub(1))
            .max()
            .unwrap_or(0);
        self.carry = window[window.len().saturating_sub(keep)..].to_vec();
        None
    }
}

pub struct FetchMonitor<C: Clock = SystemClock> {
    poll_interval: Duration,
    fatal_markers: Vec<Vec<u8>>,
    clock: C,
}

impl FetchMonitor<SystemClock> {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_clock(poll_interval, SystemClock)
    }
}

impl<C: Clock> FetchMonitor<C> {
    pub fn with_clock(poll_interval: Duration, clock: C) -> Self {
        Self {
            poll_interval,
            fatal_markers: DEFAULT_FATAL_MARKERS
                .iter()
                .map(|marker| marker.as_bytes().to_vec())
                .collect(),
            clock,
        }
    }

    /// Replace the fatal markers. Matching is case-insensitive.
    pub fn with_fatal_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fatal_markers = markers
            .into_iter()
            .map(|marker| marker.as_ref().to_ascii_lowercase().into_bytes())
            .filter(|marker| !marker.is_empty())
            .collect();
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// New session whose stall timer starts now.
    pub fn start_session(&self, command: &str, stall_threshold: Duration) -> FetchSession {
        FetchSession::new(command, stall_threshold, self.clock.now())
    }

    /// Watch `source` until it completes, fails, stalls, or prints a fatal
    /// marker. `on_line` receives each new display line.
    pub fn watch(
        &self,
        session: &mut FetchSession,
        source: &mut dyn OutputSource,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<FetchOutcome, ProcessError> {
        let mut closed = false;

        loop {
            if closed {
                self.clock.sleep(self.poll_interval);
            } else {
                match source.poll_output(self.poll_interval) {
                    OutputEvent::Chunk(chunk) => {
                        if let Some(outcome) = self.ingest(session, &chunk, source, on_line)? {
                            return Ok(outcome);
                        }
                    }
                    OutputEvent::Quiet => {}
                    OutputEvent::Closed => closed = true,
                }
            }

            if let Some(exit_code) = source.try_exit_code()? {
                while let OutputEvent::Chunk(chunk) = source.poll_output(DRAIN_TIMEOUT) {
                    if let Some(outcome) = self.ingest(session, &chunk, source, on_line)? {
                        return Ok(outcome);
                    }
                }
                debug!(
                    command = %session.command,
                    exit_code,
                    bytes = session.bytes_seen,
                    "fetch command exited"
                );
                return Ok(if exit_code == 0 {
                    FetchOutcome::Completed
                } else {
                    FetchOutcome::Failed {
                        exit_code,
                        last_line: session.last_line.clone(),
                    }
                });
            }

            let idle = session.idle(self.clock.now());
            if idle > session.stall_threshold {
                warn!(
                    command = %session.command,
                    idle_secs = idle.as_secs(),
                    "fetch command stalled"
                );
                return Ok(FetchOutcome::Stalled {
                    idle,
                    last_line: session.last_line.clone(),
                });
            }
        }
    }

    fn ingest(
        &self,
        session: &mut FetchSession,
        chunk: &[u8],
        source: &mut dyn OutputSource,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<FetchOutcome>, ProcessError> {
        if let Some(line) = session.record(chunk, self.clock.now()) {
            on_line(line);
        }

        let Some(line) = session.scan_fatal(chunk, &self.fatal_markers) else {
            return Ok(None);
        };
        warn!(command = %session.command, %line, "fatal output from fetch command");
        source.kill()?;
        Ok(Some(FetchOutcome::FatalError { line }))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn is_line_break(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// The full output line containing byte `index`.
fn line_around(bytes: &[u8], index: usize) -> String {
    let start = bytes[..index]
        .iter()
        .rposition(|byte| is_line_break(*byte))
        .map_or(0, |pos| pos + 1);
    let end = bytes[index..]
        .iter()
        .position(|byte| is_line_break(*byte))
        .map_or(bytes.len(), |pos| index + pos);
    clean_line(&bytes[start..end])
}

/// Last non-blank line of a chunk. Progress meters redraw with `\r`, so
/// both `\r` and `\n` end a line.
fn latest_line(chunk: &[u8]) -> Option<String> {
    chunk
        .split(|byte| is_line_break(*byte))
        .map(clean_line)
        .rev()
        .find(|line| !line.is_empty())
}

/// Decode lossily, drop ANSI escape sequences and control characters.
fn clean_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // CSI: parameters until a final byte in '@'..='~'.
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        if !c.is_control() {
            out.push(c);
        }
    }
    out.trim().to_string()
}
