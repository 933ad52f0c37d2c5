//! Source location primitives shared by every stage of the BUG compiler.
//! A [Span] is a half-open byte range into the single compilation unit,
//! and a [Source] owns the unit's text so byte offsets can be resolved
//! into row/column pairs for reporting.

pub mod location;

pub use location::{RowCol, RowColSpan, Span};

/// A single BUG compilation unit: the module name the driver was given and
/// the raw source text. The compiler processes exactly one unit per
/// invocation, so no source-id indirection is needed.
#[derive(Debug, Clone)]
pub struct Source {
    /// Display name of the unit, used as a prefix in rendered diagnostics.
    name: String,
    /// The raw contents of the unit.
    contents: String,
}

impl Source {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self { name: name.into(), contents: contents.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Resolve a byte offset into a zero-indexed [RowCol]. Offsets past the
    /// end of the unit resolve to the final position.
    pub fn row_col_of(&self, offset: usize) -> RowCol {
        let offset = offset.min(self.contents.len());
        let mut row = 0;
        let mut line_start = 0;

        for (index, byte) in self.contents.bytes().enumerate() {
            if index >= offset {
                break;
            }
            if byte == b'\n' {
                row += 1;
                line_start = index + 1;
            }
        }

        RowCol { row, col: offset - line_start }
    }

    /// Resolve a [Span] into its row/column begin and end positions.
    pub fn row_col_span(&self, span: Span) -> RowColSpan {
        RowColSpan { start: self.row_col_of(span.start()), end: self.row_col_of(span.end()) }
    }

    /// The text the given [Span] covers.
    pub fn span_contents(&self, span: Span) -> &str {
        let start = span.start().min(self.contents.len());
        let end = span.end().min(self.contents.len());
        &self.contents[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_col_resolution() {
        let source = Source::new("test", "name A;\ncode {\n}\n");

        assert_eq!(source.row_col_of(0), RowCol { row: 0, col: 0 });
        assert_eq!(source.row_col_of(5), RowCol { row: 0, col: 5 });
        assert_eq!(source.row_col_of(8), RowCol { row: 1, col: 0 });
        assert_eq!(source.row_col_of(15), RowCol { row: 2, col: 0 });
    }

    #[test]
    fn span_contents() {
        let source = Source::new("test", "name Minimal;");
        assert_eq!(source.span_contents(Span::new(5, 7)), "Minimal");
    }
}
