//! Plain-text rendering of [Report]s against a [Source].

use std::fmt;

use bug_source::Source;

use crate::report::{Report, ReportNoteKind};

/// Renders a [Report] with resolved row/column positions and the offending
/// source line. Borrowed so the same source can render many reports.
pub struct ReportWriter<'a> {
    report: &'a Report,
    source: &'a Source,
}

impl<'a> ReportWriter<'a> {
    pub fn new(report: &'a Report, source: &'a Source) -> Self {
        Self { report, source }
    }
}

impl fmt::Display for ReportWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Report { kind, code, message, span, notes } = self.report;

        write!(f, "{}[{}]: {}", kind.message(), code, message)?;

        if let Some(span) = span {
            let positions = self.source.row_col_span(*span);
            writeln!(f)?;
            writeln!(f, " --> {}:{}", self.source.name(), positions.start)?;

            let snippet = self.source.span_contents(*span);
            if !snippet.is_empty() && !snippet.contains('\n') {
                writeln!(f, "  | {snippet}")?;
            }
        } else {
            writeln!(f)?;
        }

        for note in notes {
            match note.label {
                ReportNoteKind::Expected | ReportNoteKind::Actual => {
                    writeln!(f, "  = {}: `{}`", note.label.as_str(), note.message)?
                }
                _ => writeln!(f, "  = {}: {}", note.label.as_str(), note.message)?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bug_source::{Source, Span};

    use super::*;
    use crate::code::DiagnosticCode;

    #[test]
    fn renders_location_and_snippet() {
        let source = Source::new("counter.bug", "name Counter;\ncode { cuont = 1; }\n");
        let report = Report::error(DiagnosticCode::TypeUnknownIdentifier, "unknown identifier")
            .with_span(Span::new(21, 5));

        let rendered = ReportWriter::new(&report, &source).to_string();
        assert!(rendered.contains("TYPE_UNKNOWN_IDENTIFIER"));
        assert!(rendered.contains("counter.bug:2:8"));
        assert!(rendered.contains("cuont"));
    }
}
