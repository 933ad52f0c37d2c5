//! The [Report] type and its builder-style methods.

use bug_source::Span;

use crate::code::DiagnosticCode;

/// Enumeration describing the kind of [Report]; either being a warning, info
/// or an error.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum ReportKind {
    /// The report is an error.
    Error,
    /// The report is a warning.
    Warning,
    /// The report is an informational diagnostic.
    Info,
}

impl ReportKind {
    /// Get the string label associated with the [ReportKind].
    pub fn message(&self) -> &'static str {
        match self {
            ReportKind::Error => "error",
            ReportKind::Warning => "warn",
            ReportKind::Info => "info",
        }
    }
}

/// The kind of [ReportNote], this is primarily used for rendering the label
/// of the [ReportNote].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportNoteKind {
    /// Additional information about the diagnostic.
    Note,
    /// A help message or a suggestion.
    Help,
    /// The snippet the compiler expected at the offending location.
    Expected,
    /// The snippet the compiler actually found.
    Actual,
}

impl ReportNoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportNoteKind::Note => "note",
            ReportNoteKind::Help => "help",
            ReportNoteKind::Expected => "expected",
            ReportNoteKind::Actual => "actual",
        }
    }
}

/// Data type representing a report note which consists of a label and the
/// message.
#[derive(Debug, Clone)]
pub struct ReportNote {
    pub label: ReportNoteKind,
    pub message: String,
}

impl ReportNote {
    pub fn new(label: ReportNoteKind, message: impl ToString) -> Self {
        Self { label, message: message.to_string() }
    }
}

/// A single diagnostic: severity, a stable [DiagnosticCode], a message, an
/// optional offending [Span] and any number of additional notes.
#[derive(Debug, Clone)]
pub struct Report {
    /// The general kind of the report.
    pub kind: ReportKind,
    /// The stable machine-readable code of the report.
    pub code: DiagnosticCode,
    /// The human-readable message.
    pub message: String,
    /// Where in the unit the problem is, when known.
    pub span: Option<Span>,
    /// Additional notes providing context (expected/actual snippets, help).
    pub notes: Vec<ReportNote>,
}

impl Report {
    /// Create an error [Report] with the given code and message.
    pub fn error(code: DiagnosticCode, message: impl ToString) -> Self {
        Self { kind: ReportKind::Error, code, message: message.to_string(), span: None, notes: vec![] }
    }

    /// Create a warning [Report] with the given code and message.
    pub fn warning(code: DiagnosticCode, message: impl ToString) -> Self {
        Self {
            kind: ReportKind::Warning,
            code,
            message: message.to_string(),
            span: None,
            notes: vec![],
        }
    }

    /// Create an informational [Report] with the given code and message.
    pub fn info(code: DiagnosticCode, message: impl ToString) -> Self {
        Self { kind: ReportKind::Info, code, message: message.to_string(), span: None, notes: vec![] }
    }

    /// Check if the report denotes an occurred error.
    pub fn is_error(&self) -> bool {
        self.kind == ReportKind::Error
    }

    /// Check if the report denotes an occurred warning.
    pub fn is_warning(&self) -> bool {
        self.kind == ReportKind::Warning
    }

    /// Attach the offending [Span] to the [Report].
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach an optional offending [Span] to the [Report].
    pub fn with_opt_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    /// Add a [`ReportNoteKind::Note`] with the given message to the [Report].
    pub fn add_note(mut self, message: impl ToString) -> Self {
        self.notes.push(ReportNote::new(ReportNoteKind::Note, message));
        self
    }

    /// Add a [`ReportNoteKind::Help`] with the given message to the [Report].
    pub fn add_help(mut self, message: impl ToString) -> Self {
        self.notes.push(ReportNote::new(ReportNoteKind::Help, message));
        self
    }

    /// Record what was expected and what was actually found.
    pub fn with_expected_actual(mut self, expected: impl ToString, actual: impl ToString) -> Self {
        self.notes.push(ReportNote::new(ReportNoteKind::Expected, expected));
        self.notes.push(ReportNote::new(ReportNoteKind::Actual, actual));
        self
    }

    /// The `expected` snippet, when one was recorded.
    pub fn expected(&self) -> Option<&str> {
        self.note_of(ReportNoteKind::Expected)
    }

    /// The `actual` snippet, when one was recorded.
    pub fn actual(&self) -> Option<&str> {
        self.note_of(ReportNoteKind::Actual)
    }

    fn note_of(&self, kind: ReportNoteKind) -> Option<&str> {
        self.notes.iter().find(|note| note.label == kind).map(|note| note.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_actual_round_trip() {
        let report = Report::error(DiagnosticCode::TypeMismatch, "mismatching types")
            .with_span(Span::new(3, 4))
            .with_expected_actual("uint256", "bool");

        assert!(report.is_error());
        assert_eq!(report.expected(), Some("uint256"));
        assert_eq!(report.actual(), Some("bool"));
        assert_eq!(report.code.as_str(), "TYPE_MISMATCH");
    }
}
