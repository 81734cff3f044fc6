//! Leak reports for closed sessions.
//!
//! A report is rendered once into memory, written to the caller's stream
//! (stdout for the process hooks), and, when a report directory is
//! configured and something leaked, persisted as
//! `<dir>/<process-name>.<pid>.memoryleak.<session-id>`.

use std::io::Write;
use std::path::{Path, PathBuf};

use leaktrace_core::{
    FrameResolver, LeakSummary, NullResolver, ProcessResolver, SymbolCache, write_report,
};
use serde_json::json;
use thiserror::Error;

use crate::config;
use crate::log::{self, LogEntry, LogLevel};
use crate::session::ClosedSession;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot persist report to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders and delivers reports.
#[derive(Debug, Clone)]
pub struct LeakReporter {
    symbolize: bool,
    report_dir: Option<PathBuf>,
    process_name: String,
}

impl LeakReporter {
    pub fn new(symbolize: bool, report_dir: Option<PathBuf>, process_name: String) -> Self {
        Self {
            symbolize,
            report_dir,
            process_name,
        }
    }

    /// Reporter configured from the environment.
    pub fn from_config() -> Self {
        Self::new(
            config::symbolize_enabled(),
            config::report_dir(),
            process_name(),
        )
    }

    /// Render the report for `session` without delivering it.
    pub fn render(&self, session: &ClosedSession) -> Result<(Vec<u8>, LeakSummary), ReportError> {
        let mut text = Vec::new();
        let summary = if self.symbolize {
            let mut cache = SymbolCache::new(ProcessResolver);
            self.render_into(&mut text, session, &mut cache)?
        } else {
            let mut cache = SymbolCache::new(NullResolver);
            self.render_into(&mut text, session, &mut cache)?
        };
        Ok((text, summary))
    }

    fn render_into<R: FrameResolver>(
        &self,
        out: &mut Vec<u8>,
        session: &ClosedSession,
        cache: &mut SymbolCache<R>,
    ) -> std::io::Result<LeakSummary> {
        write_report(
            out,
            session.id,
            &session.opened_at,
            &session.closed_at,
            &session.registry,
            cache,
        )
    }

    /// Write the report for `session` to `out` and persist it if configured.
    ///
    /// A failure to persist is logged and does not fail the call.
    pub fn report<W: Write>(
        &self,
        session: &ClosedSession,
        out: &mut W,
    ) -> Result<LeakSummary, ReportError> {
        let (text, summary) = self.render(session)?;
        out.write_all(&text)?;
        out.flush()?;

        let mut persisted = None;
        if !summary.is_clean() {
            if let Some(path) = self.report_path(session.id) {
                match persist(&path, &text) {
                    Ok(()) => persisted = Some(path),
                    Err(err) => log::log(
                        LogEntry::new(LogLevel::Warn, "report_io_failed")
                            .with_session(session.id)
                            .with_details(json!({ "error": err.to_string() })),
                    ),
                }
            }
        }

        if log::enabled(LogLevel::Info) {
            log::log(
                LogEntry::new(LogLevel::Info, "report_written")
                    .with_session(session.id)
                    .with_details(json!({
                        "leaked_bytes": summary.leaked_bytes,
                        "leaked_allocations": summary.leaked_allocations,
                        "elapsed_us": summary.elapsed_us,
                        "file": persisted.as_ref().map(|p| p.display().to_string()),
                    })),
            );
        }
        Ok(summary)
    }

    /// File that a non-empty report for `session` is persisted to.
    pub fn report_path(&self, session: u64) -> Option<PathBuf> {
        let dir = self.report_dir.as_ref()?;
        Some(dir.join(format!(
            "{}.{}.memoryleak.{session}",
            self.process_name,
            std::process::id()
        )))
    }
}

fn persist(path: &Path, text: &[u8]) -> Result<(), ReportError> {
    std::fs::write(path, text).map_err(|source| ReportError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

/// Short name of the running process.
pub fn process_name() -> String {
    std::fs::read_to_string("/proc/self/comm")
        .ok()
        .map(|s| s.trim_end().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "process".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaktrace_core::{AllocationRegistry, Backtrace, SiteLabel};

    fn closed(id: u64, leaks: &[(usize, usize)]) -> ClosedSession {
        let mut registry = AllocationRegistry::new();
        for &(addr, size) in leaks {
            registry.insert(addr, size, Backtrace::from_frames(&[0x10]));
        }
        ClosedSession {
            id,
            opened_at: SiteLabel::new("main.c", "main", 3),
            closed_at: SiteLabel::new("main.c", "main", 9),
            registry,
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "leaktrace-reporter-{}-{tag}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn clean_session_writes_success_and_no_file() {
        let dir = scratch_dir("clean");
        let reporter = LeakReporter::new(false, Some(dir.clone()), "app".into());
        let mut out = Vec::new();
        let summary = reporter.report(&closed(0, &[]), &mut out).unwrap();
        assert!(summary.is_clean());
        assert!(String::from_utf8(out).unwrap().contains("no memory leak detected"));
        assert!(!reporter.report_path(0).unwrap().exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn leaky_session_is_persisted() {
        let dir = scratch_dir("leaky");
        let reporter = LeakReporter::new(false, Some(dir.clone()), "app".into());
        let mut out = Vec::new();
        let summary = reporter
            .report(&closed(4, &[(0x2000, 128), (0x3000, 8)]), &mut out)
            .unwrap();
        assert_eq!(summary.leaked_bytes, 136);

        let path = reporter.report_path(4).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("app.{}.memoryleak.4", std::process::id()));
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, out);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn persist_failure_does_not_fail_report() {
        let reporter = LeakReporter::new(
            false,
            Some(PathBuf::from("/nonexistent/leaktrace/reports")),
            "app".into(),
        );
        let mut out = Vec::new();
        let summary = reporter.report(&closed(1, &[(0x10, 1)]), &mut out).unwrap();
        assert_eq!(summary.leaked_bytes, 1);
        assert!(!out.is_empty());
    }

    #[test]
    fn no_dir_means_no_path() {
        let reporter = LeakReporter::new(true, None, "app".into());
        assert!(reporter.report_path(0).is_none());
    }

    #[test]
    fn unsymbolized_frames_print_null() {
        let reporter = LeakReporter::new(false, None, "app".into());
        let (text, _) = reporter.render(&closed(2, &[(0x2000, 4)])).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("#1 0x10 (null) (null)"));
    }

    #[test]
    fn process_name_is_not_empty() {
        assert!(!process_name().is_empty());
    }
}
