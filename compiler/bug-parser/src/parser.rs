//! Recursive-descent parser over the token stream. The generator keeps a
//! cursor into the stream and collects diagnostics as it goes; statement
//! parsing recovers at `;` / `}` boundaries.

use alloy_primitives::U256;
use bug_ast::{
    AstNode, BinOp, Block, Declaration, EnvOp, Expr, FieldDecl, FunctionDecl, Literal, Name,
    ParamDecl, Program, Statement, StorageDecl, StorageEntry, StructDecl, TyExpr, UnOp,
};
use bug_reporting::{DiagnosticCode, Report};
use bug_source::Span;

use crate::token::{Keyword, Token, TokenKind};

/// A parse failure. Converted into a [Report] when the surrounding
/// production gives up on the construct.
#[derive(Debug)]
pub struct ParseError {
    pub expected: String,
    pub found: Option<TokenKind>,
    pub span: Option<Span>,
}

impl From<ParseError> for Report {
    fn from(error: ParseError) -> Self {
        let report = match &error.found {
            Some(found) => Report::error(
                DiagnosticCode::ParseUnexpectedToken,
                format!("expected {}, found {found}", error.expected),
            ),
            None => Report::error(
                DiagnosticCode::ParseUnexpectedEof,
                format!("expected {}, found the end of the unit", error.expected),
            ),
        };
        report.with_opt_span(error.span)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct AstGen<'stream> {
    /// The token stream.
    stream: &'stream [Token],
    /// Current token stream offset.
    offset: usize,
    /// Collected diagnostics for the current generator.
    reports: Vec<Report>,
}

impl<'stream> AstGen<'stream> {
    pub fn new(stream: &'stream [Token]) -> Self {
        Self { stream, offset: 0, reports: vec![] }
    }

    pub fn into_reports(self) -> Vec<Report> {
        self.reports
    }

    // ------------------------------------------------------------------
    // Cursor primitives
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.stream.get(self.offset)
    }

    fn peek_second(&self) -> Option<&Token> {
        self.stream.get(self.offset + 1)
    }

    fn next_token(&mut self) -> Option<&Token> {
        let token = self.stream.get(self.offset);
        if token.is_some() {
            self.offset += 1;
        }
        token
    }

    /// The span to blame when the stream ends unexpectedly.
    fn eof_span(&self) -> Option<Span> {
        self.stream.last().map(|token| token.span)
    }

    fn current_span(&self) -> Option<Span> {
        self.peek().map(|token| token.span).or_else(|| self.eof_span())
    }

    fn error<T>(&self, expected: impl ToString) -> ParseResult<T> {
        Err(ParseError {
            expected: expected.to_string(),
            found: self.peek().map(|token| token.kind.clone()),
            span: self.current_span(),
        })
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Span> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                let span = token.span;
                self.offset += 1;
                Ok(span)
            }
            _ => self.error(expected),
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().map(|token| token.kind == kind).unwrap_or(false) {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(TokenKind::Keyword(keyword))
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Span> {
        self.expect(TokenKind::Keyword(keyword), &format!("`{}`", keyword.as_str()))
    }

    fn parse_name(&mut self) -> ParseResult<AstNode<Name>> {
        match self.peek() {
            Some(Token { kind: TokenKind::Ident(ident), span }) => {
                let node = AstNode::new(Name { ident: ident.clone() }, *span);
                self.offset += 1;
                Ok(node)
            }
            _ => self.error("an identifier"),
        }
    }

    /// Skip forward to just past the next `;`, or stop before a `}`. Used to
    /// resynchronise after a statement-level parse error.
    fn recover_to_statement_boundary(&mut self) {
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Semi => {
                    self.offset += 1;
                    return;
                }
                TokenKind::CloseBrace => return,
                _ => self.offset += 1,
            }
        }
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    /// Parse the whole program. Returns [None] only when the unit is too
    /// malformed to produce a tree at all (missing `name` or `code`).
    pub fn parse_program(&mut self) -> Option<Program> {
        match self.parse_program_inner() {
            Ok(program) => Some(program),
            Err(error) => {
                self.reports.push(error.into());
                None
            }
        }
    }

    fn parse_program_inner(&mut self) -> ParseResult<Program> {
        self.expect_keyword(Keyword::Name)?;
        let name = self.parse_name()?;
        self.expect(TokenKind::Semi, "`;`")?;

        let mut declarations = vec![];
        loop {
            match self.peek().map(|token| &token.kind) {
                Some(TokenKind::Keyword(Keyword::Struct)) => {
                    let declaration = self.parse_struct_decl()?;
                    declarations.push(declaration);
                }
                Some(TokenKind::Keyword(Keyword::Define)) => {
                    let declaration = self.parse_function_decl()?;
                    declarations.push(declaration);
                }
                Some(TokenKind::Keyword(Keyword::Storage)) => {
                    let declaration = self.parse_storage_decl()?;
                    declarations.push(declaration);
                }
                _ => break,
            }
        }

        let create = if self.peek().map(|token| token.kind == TokenKind::Keyword(Keyword::Create))
            == Some(true)
        {
            self.next_token();
            Some(self.parse_block()?)
        } else {
            None
        };

        self.expect_keyword(Keyword::Code)?;
        let main = self.parse_block()?;

        Ok(Program { name, declarations, create, main })
    }

    fn parse_struct_decl(&mut self) -> ParseResult<AstNode<Declaration>> {
        let start = self.expect_keyword(Keyword::Struct)?;
        let name = self.parse_name()?;
        self.expect(TokenKind::OpenBrace, "`{`")?;

        let mut fields = vec![];
        while !self.eat(TokenKind::CloseBrace) {
            let field_name = self.parse_name()?;
            self.expect(TokenKind::Colon, "`:`")?;
            let ty = self.parse_ty()?;
            let span = field_name.span().join(ty.span());
            self.expect(TokenKind::Semi, "`;`")?;
            fields.push(AstNode::new(FieldDecl { name: field_name, ty }, span));
        }

        let span = start.join(self.previous_span());
        Ok(AstNode::new(Declaration::Struct(StructDecl { name, fields }), span))
    }

    fn parse_function_decl(&mut self) -> ParseResult<AstNode<Declaration>> {
        let start = self.expect_keyword(Keyword::Define)?;
        self.expect_keyword(Keyword::Function)?;
        let name = self.parse_name()?;

        self.expect(TokenKind::OpenParen, "`(`")?;
        let mut params = vec![];
        if !self.eat(TokenKind::CloseParen) {
            loop {
                let param_name = self.parse_name()?;
                self.expect(TokenKind::Colon, "`:`")?;
                let ty = self.parse_ty()?;
                let span = param_name.span().join(ty.span());
                params.push(AstNode::new(ParamDecl { name: param_name, ty }, span));

                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::CloseParen, "`)`")?;
        }

        let returns =
            if self.eat_keyword(Keyword::Returns) { Some(self.parse_ty()?) } else { None };

        let body = self.parse_block()?;
        let span = start.join(body.span());
        Ok(AstNode::new(Declaration::Function(FunctionDecl { name, params, returns, body }), span))
    }

    fn parse_storage_decl(&mut self) -> ParseResult<AstNode<Declaration>> {
        let start = self.expect_keyword(Keyword::Storage)?;
        self.expect(TokenKind::OpenBrace, "`{`")?;

        let mut entries = vec![];
        while !self.eat(TokenKind::CloseBrace) {
            let slot_start = self.expect(TokenKind::OpenBracket, "`[`")?;
            let slot = match self.peek() {
                Some(Token { kind: TokenKind::Number(value), .. }) => {
                    let slot = value.saturating_to::<u64>();
                    self.offset += 1;
                    slot
                }
                _ => return self.error("a slot number"),
            };
            self.expect(TokenKind::CloseBracket, "`]`")?;

            let name = self.parse_name()?;
            self.expect(TokenKind::Colon, "`:`")?;
            let ty = self.parse_ty()?;
            let span = slot_start.join(ty.span());
            self.expect(TokenKind::Semi, "`;`")?;

            entries.push(AstNode::new(StorageEntry { slot, name, ty }, span));
        }

        let span = start.join(self.previous_span());
        Ok(AstNode::new(Declaration::Storage(StorageDecl { entries }), span))
    }

    fn previous_span(&self) -> Span {
        self.stream
            .get(self.offset.saturating_sub(1))
            .map(|token| token.span)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> ParseResult<AstNode<Block>> {
        let start = self.expect(TokenKind::OpenBrace, "`{`")?;

        let mut statements = vec![];
        while !self.eat(TokenKind::CloseBrace) {
            if self.peek().is_none() {
                return self.error("`}`");
            }

            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(error) => {
                    self.reports.push(error.into());
                    self.recover_to_statement_boundary();
                }
            }
        }

        let span = start.join(self.previous_span());
        Ok(AstNode::new(Block { statements }, span))
    }

    fn parse_statement(&mut self) -> ParseResult<AstNode<Statement>> {
        match self.peek().map(|token| token.kind.clone()) {
            Some(TokenKind::Keyword(Keyword::Let)) => self.parse_let_statement(),
            Some(TokenKind::Keyword(Keyword::If)) => self.parse_if_statement(),
            Some(TokenKind::Keyword(Keyword::While)) => self.parse_while_statement(),
            Some(TokenKind::Keyword(Keyword::For)) => self.parse_for_statement(),
            Some(TokenKind::Keyword(Keyword::Return)) => {
                let start = self.next_token().unwrap().span;
                let value = if self.peek().map(|token| token.kind == TokenKind::Semi) == Some(true)
                {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                let end = self.expect(TokenKind::Semi, "`;`")?;
                Ok(AstNode::new(Statement::Return { value }, start.join(end)))
            }
            Some(TokenKind::Keyword(Keyword::Break)) => {
                let start = self.next_token().unwrap().span;
                let end = self.expect(TokenKind::Semi, "`;`")?;
                Ok(AstNode::new(Statement::Break, start.join(end)))
            }
            Some(TokenKind::Keyword(Keyword::Continue)) => {
                let start = self.next_token().unwrap().span;
                let end = self.expect(TokenKind::Semi, "`;`")?;
                Ok(AstNode::new(Statement::Continue, start.join(end)))
            }
            Some(_) => {
                let statement = self.parse_assign_or_expr_statement()?;
                let end = self.expect(TokenKind::Semi, "`;`")?;
                Ok(AstNode::new(statement.0, statement.1.join(end)))
            }
            None => self.error("a statement"),
        }
    }

    fn parse_let_statement(&mut self) -> ParseResult<AstNode<Statement>> {
        let start = self.expect_keyword(Keyword::Let)?;
        let name = self.parse_name()?;

        let ty = if self.eat(TokenKind::Colon) { Some(self.parse_ty()?) } else { None };
        let value = if self.eat(TokenKind::Assign) { Some(self.parse_expr()?) } else { None };

        let end = self.expect(TokenKind::Semi, "`;`")?;
        Ok(AstNode::new(Statement::Let { name, ty, value }, start.join(end)))
    }

    fn parse_if_statement(&mut self) -> ParseResult<AstNode<Statement>> {
        let start = self.expect_keyword(Keyword::If)?;
        self.expect(TokenKind::OpenParen, "`(`")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::CloseParen, "`)`")?;

        let then_block = self.parse_block()?;
        let else_block =
            if self.eat_keyword(Keyword::Else) { Some(self.parse_block()?) } else { None };

        let end = else_block.as_ref().map(|block| block.span()).unwrap_or(then_block.span());
        Ok(AstNode::new(Statement::If { condition, then_block, else_block }, start.join(end)))
    }

    fn parse_while_statement(&mut self) -> ParseResult<AstNode<Statement>> {
        let start = self.expect_keyword(Keyword::While)?;
        self.expect(TokenKind::OpenParen, "`(`")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::CloseParen, "`)`")?;

        let body = self.parse_block()?;
        let span = start.join(body.span());
        Ok(AstNode::new(Statement::While { condition, body }, span))
    }

    fn parse_for_statement(&mut self) -> ParseResult<AstNode<Statement>> {
        let start = self.expect_keyword(Keyword::For)?;
        self.expect(TokenKind::OpenParen, "`(`")?;

        let init = if self.peek().map(|token| token.kind == TokenKind::Semi) == Some(true) {
            None
        } else if self.peek().map(|token| token.kind == TokenKind::Keyword(Keyword::Let))
            == Some(true)
        {
            // `parse_let_statement` consumes the separating `;` itself.
            let statement = self.parse_let_statement()?;
            return self.parse_for_rest(start, Some(statement));
        } else {
            let (statement, span) = self.parse_assign_or_expr_statement()?;
            Some(AstNode::new(statement, span))
        };
        self.expect(TokenKind::Semi, "`;`")?;

        self.parse_for_rest(start, init)
    }

    fn parse_for_rest(
        &mut self,
        start: Span,
        init: Option<AstNode<Statement>>,
    ) -> ParseResult<AstNode<Statement>> {
        let condition = if self.peek().map(|token| token.kind == TokenKind::Semi) == Some(true) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semi, "`;`")?;

        let update = if self.peek().map(|token| token.kind == TokenKind::CloseParen) == Some(true)
        {
            None
        } else {
            let (statement, span) = self.parse_assign_or_expr_statement()?;
            Some(AstNode::new(statement, span))
        };
        self.expect(TokenKind::CloseParen, "`)`")?;

        let body = self.parse_block()?;
        let span = start.join(body.span());
        Ok(AstNode::new(Statement::For { init, condition, update, body }, span))
    }

    /// Parse either an assignment or a bare expression statement, without
    /// consuming the trailing terminator.
    fn parse_assign_or_expr_statement(&mut self) -> ParseResult<(Statement, Span)> {
        let target = self.parse_expr()?;
        let span = target.span();

        if self.eat(TokenKind::Assign) {
            let value = self.parse_expr()?;
            let span = span.join(value.span());
            Ok((Statement::Assign { target, value }, span))
        } else {
            Ok((Statement::Expr(target), span))
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> ParseResult<AstNode<Expr>> {
        self.parse_binary_expr(0)
    }

    /// Precedence-climbing over the binary operator table.
    fn parse_binary_expr(&mut self, min_precedence: u8) -> ParseResult<AstNode<Expr>> {
        let mut lhs = self.parse_unary_expr()?;

        while let Some((op, precedence)) = self.peek_binary_op() {
            if precedence < min_precedence {
                break;
            }
            self.offset += 1;

            // All operators are left associative, so the right side climbs
            // one level higher.
            let rhs = self.parse_binary_expr(precedence + 1)?;
            let span = lhs.span().join(rhs.span());
            lhs = AstNode::new(Expr::Binary { op, lhs, rhs }, span);
        }

        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<(BinOp, u8)> {
        let op = match self.peek()?.kind {
            TokenKind::OrOr => (BinOp::Or, 1),
            TokenKind::AndAnd => (BinOp::And, 2),
            TokenKind::EqEq => (BinOp::Eq, 3),
            TokenKind::NotEq => (BinOp::Neq, 3),
            TokenKind::Lt => (BinOp::Lt, 4),
            TokenKind::LtEq => (BinOp::LtEq, 4),
            TokenKind::Gt => (BinOp::Gt, 4),
            TokenKind::GtEq => (BinOp::GtEq, 4),
            TokenKind::Shl => (BinOp::Shl, 5),
            TokenKind::Shr => (BinOp::Shr, 5),
            TokenKind::Plus => (BinOp::Add, 6),
            TokenKind::Minus => (BinOp::Sub, 6),
            TokenKind::Star => (BinOp::Mul, 7),
            TokenKind::Slash => (BinOp::Div, 7),
            TokenKind::Percent => (BinOp::Mod, 7),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary_expr(&mut self) -> ParseResult<AstNode<Expr>> {
        let op = match self.peek().map(|token| &token.kind) {
            Some(TokenKind::Bang) => Some(UnOp::Not),
            Some(TokenKind::Minus) => Some(UnOp::Neg),
            _ => None,
        };

        if let Some(op) = op {
            let start = self.next_token().unwrap().span;
            let operand = self.parse_unary_expr()?;
            let span = start.join(operand.span());
            return Ok(AstNode::new(Expr::Unary { op, operand }, span));
        }

        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> ParseResult<AstNode<Expr>> {
        let mut expr = self.parse_primary_expr()?;

        loop {
            if self.eat(TokenKind::OpenBracket) {
                let index = self.parse_expr()?;

                if self.eat(TokenKind::Colon) {
                    let end = self.parse_expr()?;
                    let close = self.expect(TokenKind::CloseBracket, "`]`")?;
                    let span = expr.span().join(close);
                    expr = AstNode::new(Expr::Slice { object: expr, start: index, end }, span);
                } else {
                    let close = self.expect(TokenKind::CloseBracket, "`]`")?;
                    let span = expr.span().join(close);
                    expr = AstNode::new(Expr::Index { object: expr, index }, span);
                }
            } else if self.eat(TokenKind::Dot) {
                let name = self.parse_name()?;
                let span = expr.span().join(name.span());
                expr = AstNode::new(Expr::Field { object: expr, name }, span);
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary_expr(&mut self) -> ParseResult<AstNode<Expr>> {
        match self.peek().cloned() {
            Some(Token { kind: TokenKind::Number(value), span }) => {
                self.offset += 1;
                Ok(AstNode::new(Expr::Literal(Literal::Number(value)), span))
            }
            Some(Token { kind: TokenKind::String(value), span }) => {
                self.offset += 1;
                Ok(AstNode::new(Expr::Literal(Literal::String(value)), span))
            }
            Some(Token { kind: TokenKind::Keyword(Keyword::True), span }) => {
                self.offset += 1;
                Ok(AstNode::new(Expr::Literal(Literal::Bool(true)), span))
            }
            Some(Token { kind: TokenKind::Keyword(Keyword::False), span }) => {
                self.offset += 1;
                Ok(AstNode::new(Expr::Literal(Literal::Bool(false)), span))
            }
            Some(Token { kind: TokenKind::OpenParen, .. }) => {
                self.offset += 1;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::CloseParen, "`)`")?;
                Ok(expr)
            }
            Some(Token { kind: TokenKind::Ident(ident), span }) => {
                self.parse_ident_expr(ident, span)
            }
            _ => self.error("an expression"),
        }
    }

    /// Identifier-led expressions: environment accessors, `keccak256(…)`,
    /// casts written in call notation, user function calls and plain
    /// references.
    fn parse_ident_expr(&mut self, ident: String, span: Span) -> ParseResult<AstNode<Expr>> {
        // `msg.sender`, `block.number`, … — the dotted member is part of the
        // operator, not a struct field access.
        if (ident == "msg" || ident == "block")
            && self.peek_second().map(|token| token.kind == TokenKind::Dot) == Some(true)
        {
            self.offset += 2;
            let member = self.parse_name()?;
            let op = match (ident.as_str(), member.ident.as_str()) {
                ("msg", "sender") => EnvOp::MsgSender,
                ("msg", "value") => EnvOp::MsgValue,
                ("msg", "data") => EnvOp::MsgData,
                ("block", "number") => EnvOp::BlockNumber,
                ("block", "timestamp") => EnvOp::BlockTimestamp,
                _ => {
                    return Err(ParseError {
                        expected: format!("a member of `{ident}`"),
                        found: Some(TokenKind::Ident(member.ident.clone())),
                        span: Some(member.span()),
                    })
                }
            };
            return Ok(AstNode::new(Expr::Env(op), span.join(member.span())));
        }

        self.offset += 1;

        if self.peek().map(|token| token.kind == TokenKind::OpenParen) == Some(true) {
            if ident == "keccak256" {
                self.offset += 1;
                let value = self.parse_expr()?;
                let close = self.expect(TokenKind::CloseParen, "`)`")?;
                return Ok(AstNode::new(Expr::Keccak { value }, span.join(close)));
            }

            if is_elementary_ty_name(&ident) {
                self.offset += 1;
                let value = self.parse_expr()?;
                let close = self.expect(TokenKind::CloseParen, "`)`")?;
                let ty = AstNode::new(TyExpr::Named(Name { ident }), span);
                return Ok(AstNode::new(Expr::Cast { ty, value }, span.join(close)));
            }

            self.offset += 1;
            let mut args = vec![];
            if !self.eat(TokenKind::CloseParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::CloseParen, "`)`")?;
            }

            let callee = AstNode::new(Name { ident }, span);
            let full = span.join(self.previous_span());
            return Ok(AstNode::new(Expr::Call { callee, args }, full));
        }

        Ok(AstNode::new(Expr::Ident(Name { ident }), span))
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_ty(&mut self) -> ParseResult<AstNode<TyExpr>> {
        match self.peek().cloned() {
            Some(Token { kind: TokenKind::Keyword(Keyword::Mapping), span }) => {
                self.offset += 1;
                self.expect(TokenKind::Lt, "`<`")?;
                let key = self.parse_ty()?;
                self.expect(TokenKind::Comma, "`,`")?;
                let value = self.parse_ty()?;
                let close = self.expect(TokenKind::Gt, "`>`")?;
                Ok(AstNode::new(TyExpr::Mapping { key, value }, span.join(close)))
            }
            Some(Token { kind: TokenKind::Keyword(Keyword::Array), span }) => {
                self.offset += 1;
                self.expect(TokenKind::Lt, "`<`")?;
                let element = self.parse_ty()?;

                let size = if self.eat(TokenKind::Comma) {
                    match self.peek() {
                        Some(Token { kind: TokenKind::Number(value), .. }) => {
                            let size = value.saturating_to::<u64>();
                            self.offset += 1;
                            Some(size)
                        }
                        _ => return self.error("an array size"),
                    }
                } else {
                    None
                };

                let close = self.expect(TokenKind::Gt, "`>`")?;
                Ok(AstNode::new(TyExpr::Array { element, size }, span.join(close)))
            }
            Some(Token { kind: TokenKind::Ident(ident), span }) => {
                self.offset += 1;
                Ok(AstNode::new(TyExpr::Named(Name { ident }), span))
            }
            _ => self.error("a type"),
        }
    }
}

/// Whether `ident` names an elementary type, making call notation over it a
/// cast rather than a function call.
pub fn is_elementary_ty_name(ident: &str) -> bool {
    if ident == "address" || ident == "bool" || ident == "bytes" || ident == "string" {
        return true;
    }

    for prefix in ["bytes", "uint", "int"] {
        if let Some(suffix) = ident.strip_prefix(prefix) {
            if let Ok(value) = suffix.parse::<u32>() {
                let valid = if prefix == "bytes" {
                    (1..=32).contains(&value)
                } else {
                    matches!(value, 8 | 16 | 32 | 64 | 128 | 256)
                };
                if valid {
                    return true;
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use bug_source::Source;

    use super::*;
    use crate::parse_source;

    fn parse_ok(source: &str) -> Program {
        let source = Source::new("test.bug", source);
        let (program, reports) = parse_source(&source);
        assert!(reports.is_empty(), "unexpected reports: {reports:?}");
        program.expect("expected a program")
    }

    #[test]
    fn parses_minimal_program() {
        let program = parse_ok("name Minimal; code {}");
        assert_eq!(program.name.ident, "Minimal");
        assert!(program.create.is_none());
        assert!(program.main.statements.is_empty());
    }

    #[test]
    fn parses_counter_program() {
        let program = parse_ok(
            "name Counter;\n\
             storage { [0] count: uint256; [1] owner: address; }\n\
             code { if (msg.sender != owner) { return; } count = count + 1; }",
        );

        assert_eq!(program.declarations.len(), 1);
        let Declaration::Storage(storage) = program.declarations[0].body() else {
            panic!("expected a storage declaration")
        };
        assert_eq!(storage.entries.len(), 2);
        assert_eq!(storage.entries[0].slot, 0);
        assert_eq!(storage.entries[1].name.ident, "owner");
        assert_eq!(program.main.statements.len(), 2);
    }

    #[test]
    fn parses_precedence() {
        let program = parse_ok("name P; code { let x = 1 + 2 * 3 == 7; }");
        let Statement::Let { value: Some(value), .. } = program.main.statements[0].body() else {
            panic!("expected a let statement")
        };

        // `==` binds loosest here.
        let Expr::Binary { op: BinOp::Eq, lhs, .. } = value.body() else {
            panic!("expected `==` at the root, got {value:?}")
        };
        let Expr::Binary { op: BinOp::Add, rhs: mul, .. } = lhs.body() else {
            panic!("expected `+` below `==`")
        };
        assert!(matches!(mul.body(), Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parses_env_cast_and_keccak() {
        let program = parse_ok(
            "name E; storage { [0] balances: mapping<address,uint256>; } \
             code { balances[msg.sender] = uint256(keccak256(msg.data)); }",
        );
        let Statement::Assign { target, value } = program.main.statements[0].body() else {
            panic!("expected an assignment")
        };
        assert!(matches!(target.body(), Expr::Index { .. }));
        let Expr::Cast { value: inner, .. } = value.body() else { panic!("expected a cast") };
        assert!(matches!(inner.body(), Expr::Keccak { .. }));
    }

    #[test]
    fn parses_struct_function_create() {
        let program = parse_ok(
            "name S;\n\
             struct Point { x: uint256; y: uint256; }\n\
             define function double(v: uint256) returns uint256 { return v * 2; }\n\
             storage { [0] origin: Point; }\n\
             create { origin.x = 1; }\n\
             code { origin.y = double(origin.x); }",
        );

        assert_eq!(program.declarations.len(), 3);
        assert!(program.create.is_some());

        let Declaration::Function(function) = program.declarations[1].body() else {
            panic!("expected a function declaration")
        };
        assert_eq!(function.name.ident, "double");
        assert_eq!(function.params.len(), 1);
        assert!(function.returns.is_some());
    }

    #[test]
    fn parses_loops_and_slices() {
        let program = parse_ok(
            "name L; code { \
                for (let i = 0; i < 10; i = i + 1) { continue; } \
                while (true) { break; } \
                let s = msg.data[0:4]; \
             }",
        );
        assert_eq!(program.main.statements.len(), 3);
        assert!(matches!(program.main.statements[0].body(), Statement::For { .. }));
        assert!(matches!(program.main.statements[1].body(), Statement::While { .. }));
    }

    #[test]
    fn recovers_after_bad_statement() {
        let source = Source::new("test.bug", "name R; code { let = ; let x = 1; }");
        let (program, reports) = parse_source(&source);
        let program = program.expect("recovery should still produce a program");

        assert!(!reports.is_empty());
        // The well-formed trailing statement survives recovery.
        assert_eq!(program.main.statements.len(), 1);
    }

    #[test]
    fn elementary_ty_names() {
        assert!(is_elementary_ty_name("uint256"));
        assert!(is_elementary_ty_name("uint8"));
        assert!(is_elementary_ty_name("bytes4"));
        assert!(is_elementary_ty_name("address"));
        assert!(!is_elementary_ty_name("uint7"));
        assert!(!is_elementary_ty_name("bytes33"));
        assert!(!is_elementary_ty_name("uint512"));
        assert!(!is_elementary_ty_name("Point"));
    }
}
