//! Structured JSONL diagnostics.
//!
//! Every runtime event is one JSON object per line on stderr:
//! `{"timestamp":..,"trace_id":..,"level":..,"event":..,"session":..,"details":{..}}`.
//! Callers must already hold the reentrancy guard, since serialization
//! allocates.
//!
//! Lines go straight to fd 2 with one `write(2)` each. The std stderr lock
//! is avoided because a fork child can inherit it held by a dead thread.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config;

/// Severity level for log entries, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

static SEQ: AtomicU64 = AtomicU64::new(0);

fn next_trace_id() -> String {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed) + 1;
    format!("leaktrace::{}::{seq:03}", std::process::id())
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: next_trace_id(),
            level,
            event: event.into(),
            session: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: u64) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Writes entries at or above a threshold as JSON lines.
pub struct LogEmitter<W: Write> {
    writer: W,
    threshold: Option<LogLevel>,
}

impl<W: Write> LogEmitter<W> {
    pub fn new(writer: W, threshold: Option<LogLevel>) -> Self {
        Self { writer, threshold }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        passes(self.threshold, level)
    }

    /// Write `entry` if it passes the threshold. Returns whether it was
    /// written.
    pub fn emit_entry(&mut self, entry: &LogEntry) -> std::io::Result<bool> {
        if !self.enabled(entry.level) {
            return Ok(false);
        }
        let mut line = entry.to_jsonl().map_err(std::io::Error::other)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        Ok(true)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Unbuffered, lock-free writer for fd 2.
pub struct RawStderr;

impl Write for RawStderr {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        loop {
            // SAFETY: `buf` is valid for `buf.len()` bytes.
            let rc = unsafe { libc::write(libc::STDERR_FILENO, buf.as_ptr().cast(), buf.len()) };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Emit `entry` on stderr under the configured threshold. Failures are
/// dropped.
pub fn log(entry: LogEntry) {
    let threshold = config::log_threshold();
    if !passes(threshold, entry.level) {
        return;
    }
    let _ = LogEmitter::new(RawStderr, threshold).emit_entry(&entry);
}

/// Whether an entry at `level` would be written; lets callers skip building
/// details.
#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    passes(config::log_threshold(), level)
}

fn passes(threshold: Option<LogLevel>, level: LogLevel) -> bool {
    threshold.is_some_and(|t| level >= t)
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new(LogLevel::Info, "session_start");
        let json = entry.to_jsonl().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["level"], "info");
        assert_eq!(v["event"], "session_start");
        assert!(v["trace_id"].as_str().unwrap().starts_with("leaktrace::"));
        assert!(v.get("session").is_none());
        assert!(v.get("details").is_none());
    }

    #[test]
    fn optional_fields_serialize_when_set() {
        let entry = LogEntry::new(LogLevel::Warn, "report_io_failed")
            .with_session(3)
            .with_details(serde_json::json!({"path": "/tmp/x"}));
        let restored: LogEntry = serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert_eq!(restored.session, Some(3));
        assert_eq!(restored.details.unwrap()["path"], "/tmp/x");
        assert_eq!(restored.level, LogLevel::Warn);
    }

    #[test]
    fn emitter_respects_threshold() {
        let mut emitter = LogEmitter::new(Vec::new(), Some(LogLevel::Warn));
        assert!(!emitter
            .emit_entry(&LogEntry::new(LogLevel::Info, "quiet"))
            .unwrap());
        assert!(emitter
            .emit_entry(&LogEntry::new(LogLevel::Error, "loud"))
            .unwrap());
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("\"loud\""));
    }

    #[test]
    fn disabled_emitter_writes_nothing() {
        let mut emitter = LogEmitter::new(Vec::new(), None);
        assert!(!emitter
            .emit_entry(&LogEntry::new(LogLevel::Error, "dropped"))
            .unwrap());
        assert!(emitter.into_inner().is_empty());
    }

    #[test]
    fn threshold_filter() {
        assert!(!passes(None, LogLevel::Error));
        assert!(!passes(Some(LogLevel::Warn), LogLevel::Info));
        assert!(passes(Some(LogLevel::Warn), LogLevel::Warn));
        assert!(passes(Some(LogLevel::Trace), LogLevel::Debug));
    }

    #[test]
    fn entry_is_one_newline_terminated_write() {
        let mut emitter = LogEmitter::new(Vec::new(), Some(LogLevel::Trace));
        emitter
            .emit_entry(&LogEntry::new(LogLevel::Info, "fork_child_reset").with_session(0))
            .unwrap();
        let out = emitter.into_inner();
        assert_eq!(out.last(), Some(&b'\n'));
        assert_eq!(out.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn raw_stderr_accepts_writes() {
        assert_eq!(RawStderr.write(b"").unwrap(), 0);
        RawStderr.flush().unwrap();
    }

    #[test]
    fn trace_ids_increase() {
        let a = LogEntry::new(LogLevel::Info, "a").trace_id;
        let b = LogEntry::new(LogLevel::Info, "b").trace_id;
        assert_ne!(a, b);
    }

    #[test]
    fn utc_formatting() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        // 2024-02-29T12:34:56Z
        assert_eq!(format_utc(1_709_210_096, 7), "2024-02-29T12:34:56.007Z");
        // 2000-03-01T00:00:00Z
        assert_eq!(format_utc(951_868_800, 999), "2000-03-01T00:00:00.999Z");
    }
}
