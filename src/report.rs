//! Run-scoped diagnostics.
//!
//! Warnings and errors raised during a run are collected here rather than
//! counted by a global logger, so the exit status can be derived from the
//! run itself. Each entry is also emitted as a `tracing` event.

use std::fmt;

use tracing::{error, info, warn};

use crate::deploy::DeployState;

/// How serious a diagnostic is.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    /// Progress information.
    Info,
    /// Something went wrong but the run continues.
    Warning,
    /// The run failed.
    Error,
    /// The run failed and may have left resources inconsistent.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// A single diagnostic and the state that raised it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// State the orchestrator was in.
    pub state: DeployState,
    /// Human readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.state, self.message)
    }
}

/// Ordered diagnostics for one run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunReport {
    entries: Vec<Diagnostic>,
}

impl RunReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records progress information.
    pub fn info(&mut self, state: DeployState, message: impl Into<String>) {
        self.push(Severity::Info, state, message.into());
    }

    /// Records a non-fatal problem.
    pub fn warning(&mut self, state: DeployState, message: impl Into<String>) {
        self.push(Severity::Warning, state, message.into());
    }

    /// Records a fatal problem.
    pub fn error(&mut self, state: DeployState, message: impl Into<String>) {
        self.push(Severity::Error, state, message.into());
    }

    /// Records a fatal problem that may need manual cleanup.
    pub fn critical(&mut self, state: DeployState, message: impl Into<String>) {
        self.push(Severity::Critical, state, message.into());
    }

    fn push(&mut self, severity: Severity, state: DeployState, message: String) {
        match severity {
            Severity::Info => info!(state = %state, "{message}"),
            Severity::Warning => warn!(state = %state, "{message}"),
            Severity::Error | Severity::Critical => {
                error!(state = %state, severity = %severity, "{message}");
            }
        }
        self.entries.push(Diagnostic {
            severity,
            state,
            message,
        });
    }

    /// Every diagnostic in the order it was recorded.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Number of diagnostics with the given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.severity == severity)
            .count()
    }

    /// Returns `true` when an error or critical diagnostic was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.severity >= Severity::Error)
    }

    /// `WARNINGS:n ERRORS:n CRITICAL:n`.
    #[must_use]
    pub fn status(&self) -> String {
        format!(
            "WARNINGS:{} ERRORS:{} CRITICAL:{}",
            self.count(Severity::Warning),
            self.count(Severity::Error),
            self.count(Severity::Critical)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn status_counts_each_severity() {
        let mut report = RunReport::new();
        report.info(DeployState::Discover, "found nothing");
        report.warning(DeployState::RetireOld, "log upload failed");
        report.warning(DeployState::RetireOld, "log upload failed again");
        report.error(DeployState::Cutover, "assign failed");

        assert_eq!(report.status(), "WARNINGS:2 ERRORS:1 CRITICAL:0");
        assert!(report.has_errors());
        assert_eq!(report.entries().len(), 4);
    }

    #[rstest]
    fn warnings_alone_are_not_errors() {
        let mut report = RunReport::new();
        report.warning(DeployState::RetireOld, "drain skipped");
        assert!(!report.has_errors());
        assert_eq!(report.status(), "WARNINGS:1 ERRORS:0 CRITICAL:0");
    }

    #[rstest]
    fn diagnostics_render_with_state() {
        let mut report = RunReport::new();
        report.critical(DeployState::AwaitBoot, "cleanup failed");
        let rendered = report
            .entries()
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();
        assert_eq!(rendered, "[CRITICAL] AWAIT_BOOT: cleanup failed");
    }
}
