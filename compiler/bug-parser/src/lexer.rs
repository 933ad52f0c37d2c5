//! Hand-written lexer over the raw source bytes.

use alloy_primitives::U256;
use bug_reporting::{DiagnosticCode, Report};
use bug_source::Span;

use crate::token::{Keyword, Token, TokenKind};

pub struct Lexer<'s> {
    source: &'s str,
    bytes: &'s [u8],
    offset: usize,
    tokens: Vec<Token>,
    reports: Vec<Report>,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s str) -> Self {
        Self { source, bytes: source.as_bytes(), offset: 0, tokens: vec![], reports: vec![] }
    }

    /// Tokenise the whole unit. Unknown characters and malformed literals
    /// are reported and skipped so lexing always reaches the end.
    pub fn tokenise(mut self) -> (Vec<Token>, Vec<Report>) {
        while let Some(byte) = self.peek() {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(),
                b'0'..=b'9' => self.lex_number(),
                b'"' => self.lex_string(),
                _ => self.lex_symbol(),
            }
        }

        (self.tokens, self.reports)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.offset).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.offset + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.offset += 1;
        Some(byte)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token::new(kind, Span::from_range(start, self.offset)));
    }

    fn skip_line_comment(&mut self) {
        while let Some(byte) = self.peek() {
            if byte == b'\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_ident(&mut self) {
        let start = self.offset;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.bump();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.offset];
        let kind = match Keyword::from_ident(text) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(text.to_string()),
        };
        self.push(kind, start);
    }

    fn lex_number(&mut self) {
        let start = self.offset;
        let radix = if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X'))
        {
            self.bump();
            self.bump();
            16
        } else {
            10
        };

        let digits_start = self.offset;
        while let Some(byte) = self.peek() {
            let is_digit = match radix {
                16 => byte.is_ascii_hexdigit(),
                _ => byte.is_ascii_digit(),
            };
            if is_digit {
                self.bump();
            } else {
                break;
            }
        }

        let digits = &self.source[digits_start..self.offset];
        let span = Span::from_range(start, self.offset);

        if digits.is_empty() {
            self.reports.push(
                Report::error(DiagnosticCode::ParseInvalidLiteral, "number literal has no digits")
                    .with_span(span),
            );
            return;
        }

        match U256::from_str_radix(digits, radix) {
            Ok(value) => self.push(TokenKind::Number(value), start),
            Err(_) => self.reports.push(
                Report::error(
                    DiagnosticCode::ParseInvalidLiteral,
                    format!("number literal does not fit in 256 bits: `{digits}`"),
                )
                .with_span(span),
            ),
        }
    }

    fn lex_string(&mut self) {
        let start = self.offset;
        self.bump();

        let contents_start = self.offset;
        loop {
            match self.peek() {
                Some(b'"') => {
                    let contents = self.source[contents_start..self.offset].to_string();
                    self.bump();
                    self.push(TokenKind::String(contents), start);
                    return;
                }
                Some(_) => {
                    self.bump();
                }
                None => {
                    self.reports.push(
                        Report::error(
                            DiagnosticCode::ParseUnexpectedEof,
                            "unterminated string literal",
                        )
                        .with_span(Span::from_range(start, self.offset)),
                    );
                    return;
                }
            }
        }
    }

    fn lex_symbol(&mut self) {
        let start = self.offset;
        let byte = self.bump().unwrap();

        let two = |lexer: &mut Self, next: u8, yes: TokenKind, no: TokenKind| {
            if lexer.peek() == Some(next) {
                lexer.bump();
                yes
            } else {
                no
            }
        };

        let kind = match byte {
            b'(' => TokenKind::OpenParen,
            b')' => TokenKind::CloseParen,
            b'{' => TokenKind::OpenBrace,
            b'}' => TokenKind::CloseBrace,
            b'[' => TokenKind::OpenBracket,
            b']' => TokenKind::CloseBracket,
            b';' => TokenKind::Semi,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'=' => two(self, b'=', TokenKind::EqEq, TokenKind::Assign),
            b'!' => two(self, b'=', TokenKind::NotEq, TokenKind::Bang),
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::LtEq
                } else if self.peek() == Some(b'<') {
                    self.bump();
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::GtEq
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    TokenKind::Shr
                } else {
                    TokenKind::Gt
                }
            }
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.bump();
                    TokenKind::AndAnd
                } else {
                    self.report_unknown(start, byte);
                    return;
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.bump();
                    TokenKind::OrOr
                } else {
                    self.report_unknown(start, byte);
                    return;
                }
            }
            _ => {
                self.report_unknown(start, byte);
                return;
            }
        };

        self.push(kind, start);
    }

    fn report_unknown(&mut self, start: usize, byte: u8) {
        self.reports.push(
            Report::error(
                DiagnosticCode::ParseUnexpectedToken,
                format!("unexpected character `{}`", byte as char),
            )
            .with_span(Span::from_range(start, self.offset)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, reports) = Lexer::new(source).tokenise();
        assert!(reports.is_empty(), "unexpected lex reports: {reports:?}");
        tokens.into_iter().map(|token| token.kind).collect()
    }

    #[test]
    fn lexes_minimal_program() {
        let kinds = kinds("name Minimal; code {}");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword(Keyword::Name),
                TokenKind::Ident("Minimal".to_string()),
                TokenKind::Semi,
                TokenKind::Keyword(Keyword::Code),
                TokenKind::OpenBrace,
                TokenKind::CloseBrace,
            ]
        );
    }

    #[test]
    fn lexes_compound_operators() {
        let kinds = kinds("a <= b >> 2 != c && d");
        assert!(kinds.contains(&TokenKind::LtEq));
        assert!(kinds.contains(&TokenKind::Shr));
        assert!(kinds.contains(&TokenKind::NotEq));
        assert!(kinds.contains(&TokenKind::AndAnd));
    }

    #[test]
    fn lexes_hex_and_decimal_numbers() {
        let kinds = kinds("42 0xff");
        assert_eq!(
            kinds,
            vec![TokenKind::Number(U256::from(42u64)), TokenKind::Number(U256::from(255u64))]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let kinds = kinds("1 // two\n3");
        assert_eq!(
            kinds,
            vec![TokenKind::Number(U256::from(1u64)), TokenKind::Number(U256::from(3u64))]
        );
    }

    #[test]
    fn oversized_literal_is_reported() {
        let (_, reports) = Lexer::new(&format!("{}", "9".repeat(100))).tokenise();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].code, DiagnosticCode::ParseInvalidLiteral);
    }
}
