//! The BUG parser. Takes a source unit, tokenises it and converts the token
//! stream into an AST. Parse failures are collected as diagnostics; the
//! parser recovers at statement boundaries so a single malformed statement
//! does not hide every later problem.

pub mod lexer;
pub mod parser;
pub mod token;

use bug_ast::Program;
use bug_reporting::Report;
use bug_source::Source;

/// Parse a full [Source] unit into a [Program]. Returns the program (when
/// the unit was structurally recoverable) together with all accumulated
/// diagnostics.
pub fn parse_source(source: &Source) -> (Option<Program>, Vec<Report>) {
    let (tokens, mut reports) = lexer::Lexer::new(source.contents()).tokenise();

    let mut gen = parser::AstGen::new(&tokens);
    let program = gen.parse_program();
    reports.extend(gen.into_reports());

    (program, reports)
}
