//! Accumulates diagnostics that occur during a compiler stage.
//!
//! This is used for error recovery, so that multiple problems can be
//! reported at once rather than stopping at the first.

use std::mem::take;

use crate::report::Report;

#[derive(Debug, Default)]
pub struct Reporter {
    reports: Vec<Report>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a report to the accumulated set.
    pub fn add(&mut self, report: impl Into<Report>) -> &Report {
        self.reports.push(report.into());
        self.reports.last().unwrap()
    }

    /// Add a set of reports to the accumulated set.
    pub fn add_all(&mut self, reports: impl IntoIterator<Item = Report>) {
        self.reports.extend(reports);
    }

    /// Whether any accumulated report is an error.
    pub fn has_errors(&self) -> bool {
        self.reports.iter().any(|report| report.is_error())
    }

    /// Whether any report at all has accumulated.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    /// Take ownership of the accumulated reports, leaving the reporter empty.
    pub fn take_reports(&mut self) -> Vec<Report> {
        take(&mut self.reports)
    }

    /// Split the accumulated reports into (errors, non-errors).
    pub fn into_errors_and_warnings(self) -> (Vec<Report>, Vec<Report>) {
        self.reports.into_iter().partition(|report| report.is_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{code::DiagnosticCode, report::Report};

    #[test]
    fn accumulates_without_aborting() {
        let mut reporter = Reporter::new();
        reporter.add(Report::warning(DiagnosticCode::FoldDivisionByZero, "division by zero"));
        assert!(!reporter.has_errors());

        reporter.add(Report::error(DiagnosticCode::TypeMismatch, "mismatching types"));
        assert!(reporter.has_errors());

        let (errors, warnings) = reporter.into_errors_and_warnings();
        assert_eq!(errors.len(), 1);
        assert_eq!(warnings.len(), 1);
    }
}
