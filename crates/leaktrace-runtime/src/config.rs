//! Runtime configuration.
//!
//! Read from the environment once:
//! - `LEAKTRACE_LOG`: structured log threshold
//!   (`off|error|warn|info|debug|trace`, default `warn`).
//! - `LEAKTRACE_SYMBOLIZE`: `on` (default) or `off`. With `off` reports print
//!   raw frame addresses only.
//! - `LEAKTRACE_REPORT_DIR`: when set, non-empty reports are also written to
//!   files in this directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::log::LogLevel;

pub const ENV_LOG: &str = "LEAKTRACE_LOG";
pub const ENV_SYMBOLIZE: &str = "LEAKTRACE_SYMBOLIZE";
pub const ENV_REPORT_DIR: &str = "LEAKTRACE_REPORT_DIR";

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Entries below this level are dropped; `None` disables logging.
    pub log_threshold: Option<LogLevel>,
    pub symbolize: bool,
    pub report_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_threshold: Some(LogLevel::Warn),
            symbolize: true,
            report_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_threshold: lookup(ENV_LOG)
                .map(|v| parse_log_threshold(&v))
                .unwrap_or(defaults.log_threshold),
            symbolize: lookup(ENV_SYMBOLIZE)
                .map(|v| parse_switch(&v, defaults.symbolize))
                .unwrap_or(defaults.symbolize),
            report_dir: lookup(ENV_REPORT_DIR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Parse a log threshold (case-insensitive). Unknown values keep the default.
#[must_use]
pub fn parse_log_threshold(raw: &str) -> Option<LogLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "none" | "0" => None,
        "error" => Some(LogLevel::Error),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        "trace" | "all" => Some(LogLevel::Trace),
        _ => Some(LogLevel::Warn),
    }
}

fn parse_switch(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => true,
        "off" | "0" | "false" | "no" => false,
        _ => default,
    }
}

// Packed cache of the hot settings: 0=unresolved, 255=resolving, otherwise
// RESOLVED_BIT | symbolize bit | threshold code. The env read happens inside
// the allocator, so a reentrant caller must not block on it.
static CACHED: AtomicU8 = AtomicU8::new(STATE_UNRESOLVED);

const STATE_UNRESOLVED: u8 = 0;
const STATE_RESOLVING: u8 = 255;
const RESOLVED_BIT: u8 = 0x80;
const SYMBOLIZE_BIT: u8 = 0x10;
const THRESHOLD_MASK: u8 = 0x0f;

fn threshold_code(level: Option<LogLevel>) -> u8 {
    level.map_or(0, |l| l as u8 + 1)
}

fn code_threshold(code: u8) -> Option<LogLevel> {
    match code {
        1 => Some(LogLevel::Trace),
        2 => Some(LogLevel::Debug),
        3 => Some(LogLevel::Info),
        4 => Some(LogLevel::Warn),
        5 => Some(LogLevel::Error),
        _ => None,
    }
}

fn pack(config: &RuntimeConfig) -> u8 {
    let mut packed = RESOLVED_BIT | threshold_code(config.log_threshold);
    if config.symbolize {
        packed |= SYMBOLIZE_BIT;
    }
    packed
}

fn cached() -> u8 {
    let cached = CACHED.load(Ordering::Acquire);
    if cached & RESOLVED_BIT != 0 && cached != STATE_RESOLVING {
        return cached;
    }
    if cached == STATE_RESOLVING {
        return pack(&RuntimeConfig::default());
    }
    if CACHED
        .compare_exchange(
            STATE_UNRESOLVED,
            STATE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED.load(Ordering::Acquire);
        return if v & RESOLVED_BIT != 0 && v != STATE_RESOLVING {
            v
        } else {
            pack(&RuntimeConfig::default())
        };
    }
    let packed = pack(&RuntimeConfig::from_env());
    CACHED.store(packed, Ordering::Release);
    packed
}

/// Configured log threshold.
#[must_use]
pub fn log_threshold() -> Option<LogLevel> {
    code_threshold(cached() & THRESHOLD_MASK)
}

/// Whether reports resolve frame symbols.
#[must_use]
pub fn symbolize_enabled() -> bool {
    cached() & SYMBOLIZE_BIT != 0
}

/// Directory for report files. Read on every call; only used off the
/// allocation path.
#[must_use]
pub fn report_dir() -> Option<PathBuf> {
    RuntimeConfig::from_env().report_dir
}
