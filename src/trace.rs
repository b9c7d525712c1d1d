//! Serial-console trace output.
//!
//! Boards print one short line per event on a serial port. This module
//! renders `tracing` events the same way:
//!
//! ```text
//! <seq>:<ms>:<tag>:<target>:<message> key=value ...
//! ```
//!
//! where `<tag>` is one letter of `-EWNIDdV`. The tag follows the event's
//! `tracing` level; an integer [`LEVEL_FIELD`] on the event overrides it,
//! which is the only way to emit `d` (Debug2) and `V` (Verbose):
//!
//! ```text
//! tracing::trace!(trace_level = 6, written, "send would block");
//! ```
//!
//! Lines are built in a
//! [`TraceLine`] of fixed capacity, so an oversized record is cut short
//! instead of overrunning the sink.
//!
//! ## Environment Variables
//!
//! - `NETBRIDGE_LOG_LEVEL`: error, warn, notice, info, debug, verbose (default notice)
//! - `NETBRIDGE_LOG_FORMAT`: serial or compact (default serial)
//! - `RUST_LOG`: overrides the level filter

use std::env;
use std::fmt::{self, Write as _};
use std::io;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt as tsfmt};

use crate::core::Clock;
use crate::core::constants::TRACE_LINE_CAPACITY;
use crate::transport::MonotonicClock;

const LEVEL_TAGS: &[u8; 8] = b"-EWNIDdV";

/// Event field carrying an explicit [`TraceLevel`] index. Not printed.
pub const LEVEL_FIELD: &str = "trace_level";

/// The firmware's seven trace levels, plus "off".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TraceLevel {
    /// Nothing is printed.
    Off = 0,
    /// Errors.
    Error = 1,
    /// Warnings.
    Warn = 2,
    /// Notable events.
    Notice = 3,
    /// Informational.
    Info = 4,
    /// Debug.
    Debug1 = 5,
    /// More debug.
    Debug2 = 6,
    /// Everything.
    Verbose = 7,
}

impl TraceLevel {
    /// One-letter tag printed in each line.
    pub fn tag(self) -> char {
        char::from(LEVEL_TAGS[self as usize])
    }

    /// Level from its numeric value; values above 7 saturate to `Verbose`.
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => TraceLevel::Off,
            1 => TraceLevel::Error,
            2 => TraceLevel::Warn,
            3 => TraceLevel::Notice,
            4 => TraceLevel::Info,
            5 => TraceLevel::Debug1,
            6 => TraceLevel::Debug2,
            _ => TraceLevel::Verbose,
        }
    }

    /// Level assigned to a `tracing` event.
    pub fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::ERROR => TraceLevel::Error,
            Level::WARN => TraceLevel::Warn,
            Level::INFO => TraceLevel::Notice,
            Level::DEBUG => TraceLevel::Info,
            Level::TRACE => TraceLevel::Debug1,
        }
    }

    /// Most verbose `tracing` level this threshold lets through.
    pub fn to_tracing(self) -> Option<Level> {
        match self {
            TraceLevel::Off => None,
            TraceLevel::Error => Some(Level::ERROR),
            TraceLevel::Warn => Some(Level::WARN),
            TraceLevel::Notice => Some(Level::INFO),
            TraceLevel::Info => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        }
    }

    /// Parse a level name or digit; unknown input gives `Notice`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" => TraceLevel::Off,
            "error" | "err" => TraceLevel::Error,
            "warn" | "warning" => TraceLevel::Warn,
            "notice" => TraceLevel::Notice,
            "info" | "inf" => TraceLevel::Info,
            "debug" | "dbg" | "dbg1" => TraceLevel::Debug1,
            "dbg2" => TraceLevel::Debug2,
            "verbose" | "trace" => TraceLevel::Verbose,
            other => other.parse::<u8>().map(Self::from_index).unwrap_or(TraceLevel::Notice),
        }
    }
}

/// A single trace line of bounded size.
///
/// Writes past the capacity are dropped at a UTF-8 boundary and the line is
/// flagged as truncated. [`finish`](TraceLine::finish) always leaves room
/// for the newline.
#[derive(Debug, Clone)]
pub struct TraceLine {
    buf: String,
    capacity: usize,
    truncated: bool,
}

impl Default for TraceLine {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceLine {
    /// Empty line with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(TRACE_LINE_CAPACITY)
    }

    /// Empty line holding at most `capacity` bytes, newline included.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: String::with_capacity(capacity),
            capacity,
            truncated: false,
        }
    }

    /// Text so far.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Bytes so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether some text was dropped.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Terminate with exactly one newline and return the text.
    pub fn finish(mut self) -> String {
        while self.buf.ends_with('\n') {
            self.buf.pop();
        }
        self.buf.push('\n');
        self.buf
    }
}

impl fmt::Write for TraceLine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = (self.capacity - 1).saturating_sub(self.buf.len());
        if s.len() <= room {
            self.buf.push_str(s);
            return Ok(());
        }
        let mut cut = room;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&s[..cut]);
        self.truncated = true;
        Ok(())
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
    level: Option<TraceLevel>,
}

impl Visit for LineVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == LEVEL_FIELD {
            self.level = Some(TraceLevel::from_index(u8::try_from(value).unwrap_or(u8::MAX)));
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == LEVEL_FIELD {
            self.record_u64(field, u64::try_from(value).unwrap_or(0));
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[derive(Debug)]
struct TraceStats {
    seq: AtomicU32,
    max_line: AtomicUsize,
    level: AtomicU8,
}

/// Runtime control over an installed [`SerialTraceLayer`].
#[derive(Debug, Clone)]
pub struct TraceHandle {
    stats: Arc<TraceStats>,
}

impl TraceHandle {
    /// Change the threshold.
    pub fn set_level(&self, level: TraceLevel) {
        self.stats.level.store(level as u8, Ordering::Relaxed);
    }

    /// Current threshold.
    pub fn level(&self) -> TraceLevel {
        TraceLevel::from_index(self.stats.level.load(Ordering::Relaxed))
    }

    /// Longest line written so far, newline included.
    pub fn max_line_size(&self) -> usize {
        self.stats.max_line.load(Ordering::Relaxed)
    }

    /// Lines written so far.
    pub fn lines_written(&self) -> u32 {
        self.stats.seq.load(Ordering::Relaxed)
    }
}

/// `tracing` layer writing serial-style lines to `W`.
#[derive(Debug)]
pub struct SerialTraceLayer<W> {
    writer: Mutex<W>,
    clock: MonotonicClock,
    stats: Arc<TraceStats>,
}

impl<W: io::Write + Send + 'static> SerialTraceLayer<W> {
    /// Layer printing everything up to `Verbose`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            clock: MonotonicClock::new(),
            stats: Arc::new(TraceStats {
                seq: AtomicU32::new(0),
                max_line: AtomicUsize::new(0),
                level: AtomicU8::new(TraceLevel::Verbose as u8),
            }),
        }
    }

    /// Start at `level` instead.
    pub fn with_level(self, level: TraceLevel) -> Self {
        self.handle().set_level(level);
        self
    }

    /// Handle that stays valid after the layer is installed.
    pub fn handle(&self) -> TraceHandle {
        TraceHandle {
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S, W> Layer<S> for SerialTraceLayer<W>
where
    S: Subscriber,
    W: io::Write + Send + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let threshold = TraceLevel::from_index(self.stats.level.load(Ordering::Relaxed));
        let mut level = TraceLevel::from_tracing(metadata.level());
        if level > threshold {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        // An override only ever makes an event more verbose.
        if let Some(explicit) = visitor.level {
            level = level.max(explicit);
            if level > threshold {
                return;
            }
        }

        let seq = self.stats.seq.fetch_add(1, Ordering::Relaxed);
        let mut line = TraceLine::new();
        let _ = write!(
            line,
            "{}:{}:{}:{}:{}{}",
            seq,
            self.clock.now_ms(),
            level.tag(),
            metadata.target(),
            visitor.message,
            visitor.fields
        );
        let text = line.finish();
        self.stats.max_line.fetch_max(text.len(), Ordering::Relaxed);

        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = writer.write_all(text.as_bytes());
        let _ = writer.flush();
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One `seq:ms:tag:target:message` line per event.
    Serial,
    /// tracing-subscriber's compact format.
    Compact,
}

impl LogFormat {
    /// Parse a format name; unknown names give `Serial`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "compact" => LogFormat::Compact,
            _ => LogFormat::Serial,
        }
    }
}

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` overrides `level` when set.
pub fn init_logging(level: TraceLevel, format: LogFormat) -> Result<(), TryInitError> {
    let directive = level
        .to_tracing()
        .map(|l| l.to_string())
        .unwrap_or_else(|| "off".to_string());
    let mut filter = EnvFilter::new(directive);
    if let Ok(rust_log) = env::var("RUST_LOG") {
        filter = EnvFilter::new(rust_log);
    }

    let subscriber = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Serial => subscriber
            .with(SerialTraceLayer::new(io::stderr()).with_level(level))
            .try_init(),
        LogFormat::Compact => subscriber
            .with(tsfmt::layer().compact().with_writer(io::stderr))
            .try_init(),
    }
}

/// Install the global subscriber from `NETBRIDGE_LOG_LEVEL` and
/// `NETBRIDGE_LOG_FORMAT`.
pub fn init_default_logging() -> Result<(), TryInitError> {
    let level = env::var("NETBRIDGE_LOG_LEVEL")
        .map(|s| TraceLevel::parse(&s))
        .unwrap_or(TraceLevel::Notice);
    let format = env::var("NETBRIDGE_LOG_FORMAT")
        .map(|s| LogFormat::parse(&s))
        .unwrap_or(LogFormat::Serial);
    init_logging(level, format)
}
