use std::collections::HashMap;
use std::ops::Range;

use crate::ast::{BlockDecl, BlockKind, Declaration, FunctionDecl, ImportName, Statement};
use crate::parser::error::ParseError;
use crate::parser::lexer::{Token, TokenKind};
use crate::{MainBlock, Program};

// ---------------------------------------------------------------------------
// Token cursor
// ---------------------------------------------------------------------------

/// Recursive-descent parser over the lexer's token stream.
/// Expression parsing lives in `expression.rs` as a second `impl` block.
pub(crate) struct TokenParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current INDENT nesting, maintained by `advance` for error recovery.
    depth: usize,
    pub(crate) file_id: usize,
}

impl TokenParser {
    pub(crate) fn new(tokens: Vec<Token>, file_id: usize) -> Self {
        TokenParser {
            tokens,
            pos: 0,
            depth: 0,
            file_id,
        }
    }

    pub(crate) fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)].kind
    }

    pub(crate) fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        match token.kind {
            TokenKind::Indent => self.depth += 1,
            TokenKind::Dedent => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        token
    }

    /// End offset of the most recently consumed token.
    pub(crate) fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.end)
            .unwrap_or(0)
    }

    pub(crate) fn error(&self, message: impl Into<String>, span: Range<usize>) -> ParseError {
        ParseError::error(message, span, self.file_id)
    }

    pub(crate) fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        self.error(
            format!("expected {}, found {}", expected, token.kind.describe()),
            token.span.clone(),
        )
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.at(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    pub(crate) fn expect_ident(&mut self, expected: &str) -> Result<(String, Range<usize>), ParseError> {
        match self.peek_kind() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(&TokenKind::Newline) {
            self.advance();
        }
    }

    /// Require the end of a logical line. A Dedent or Eof also ends the line.
    fn end_of_line(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Dedent | TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    /// Skip to the start of the next top-level item after an error.
    fn recover(&mut self) {
        loop {
            if self.at(&TokenKind::Eof) {
                return;
            }
            let token = self.advance();
            if self.depth == 0
                && matches!(token.kind, TokenKind::Newline | TokenKind::Dedent)
                && !self.at(&TokenKind::Indent)
            {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Program structure
// ---------------------------------------------------------------------------

impl TokenParser {
    pub(crate) fn parse_program(mut self) -> Result<Program, Vec<ParseError>> {
        let mut declarations = Vec::new();
        let mut blocks: Vec<BlockDecl> = Vec::new();
        let mut main: Option<MainBlock> = None;
        let mut errors = Vec::new();

        loop {
            self.skip_newlines();
            let start = self.peek().span.clone();

            let item = match self.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Main => self.parse_main().map(|m| {
                    if main.is_some() {
                        errors.push(self.error("multiple main blocks defined", m.span.clone()));
                    } else {
                        main = Some(m);
                    }
                }),
                TokenKind::OneShot
                | TokenKind::Counted
                | TokenKind::Forever
                | TokenKind::Parallel => self.parse_block().map(|b| blocks.push(b)),
                TokenKind::Def => self
                    .parse_function()
                    .map(|f| declarations.push(Declaration::Function(f))),
                TokenKind::Import => self.parse_import().map(|d| declarations.push(d)),
                TokenKind::From => self.parse_from_import().map(|d| declarations.push(d)),
                TokenKind::Ident(_) if self.peek_nth_kind(1) == &TokenKind::Assign => {
                    self.parse_variable().map(|d| declarations.push(d))
                }
                TokenKind::Indent => Err(self.error("unexpected indentation", start)),
                _ => Err(self.unexpected("a declaration, a block or `main`")),
            };

            if let Err(e) = item {
                errors.push(e);
                self.recover();
            }
        }

        check_block_names(&blocks, self.file_id, &mut errors);

        let Some(main) = main else {
            let end = self.peek().span.end;
            errors.push(
                self.error("no main block defined", end..end)
                    .with_note("every program needs a `main:` block"),
            );
            return Err(errors);
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Program {
            declarations,
            blocks,
            main,
            source_id: self.file_id,
        })
    }

    fn parse_main(&mut self) -> Result<MainBlock, ParseError> {
        let start = self.expect(TokenKind::Main, "`main`")?.span.start;
        self.expect(TokenKind::Colon, "`:` after `main`")?;
        let header = start..self.prev_end();
        let body = self.parse_body()?;
        Ok(MainBlock { body, span: header })
    }

    fn parse_block(&mut self) -> Result<BlockDecl, ParseError> {
        let start = self.peek().span.start;
        let parallel = if self.at(&TokenKind::Parallel) {
            self.advance();
            true
        } else {
            false
        };

        let kind_token = self.advance();
        let counted = match kind_token.kind {
            TokenKind::Counted => true,
            TokenKind::Forever => false,
            TokenKind::OneShot if parallel => {
                return Err(self.error(
                    "`parallel` applies only to `de` and `fo` blocks",
                    kind_token.span,
                ));
            }
            TokenKind::OneShot => false,
            other => {
                return Err(self.error(
                    format!("expected block kind (`os`, `de` or `fo`), found {}", other.describe()),
                    kind_token.span,
                ));
            }
        };

        let (name, name_span) = self.expect_ident("block name")?;

        let mut count = None;
        if self.at(&TokenKind::LParen) {
            self.advance();
            if counted {
                count = Some(self.parse_repeat_count(&name)?);
            }
            self.expect(TokenKind::RParen, "`)`")?;
        } else if counted {
            return Err(self
                .error(
                    format!("de block '{}' requires an iteration count in parentheses", name),
                    name_span,
                )
                .with_note(format!("write `de {}(N):`", name)));
        }

        self.expect(TokenKind::Colon, "`:` after block header")?;
        let span = start..self.prev_end();

        let kind = match (kind_token.kind, count) {
            (TokenKind::Counted, Some(n)) => BlockKind::Counted(n),
            (TokenKind::Forever, _) => BlockKind::Forever,
            _ => BlockKind::OneShot,
        };

        let body = self.parse_body()?;
        Ok(BlockDecl {
            name,
            kind,
            parallel,
            body,
            span,
        })
    }

    fn parse_repeat_count(&mut self, name: &str) -> Result<u64, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as u64),
            TokenKind::Number(_) => Err(self.error(
                format!("iteration count of '{}' must be a non-negative integer", name),
                token.span,
            )),
            other => Err(self.error(
                format!("expected iteration count, found {}", other.describe()),
                token.span,
            )),
        }
    }

    fn parse_function(&mut self) -> Result<FunctionDecl, ParseError> {
        let start = self.expect(TokenKind::Def, "`def`")?.span.start;
        let (name, _) = self.expect_ident("function name")?;
        self.expect(TokenKind::LParen, "`(` after function name")?;

        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let (param, span) = self.expect_ident("parameter name")?;
            if params.contains(&param) {
                return Err(self.error(format!("duplicate parameter '{}'", param), span));
            }
            params.push(param);
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)`")?;
        self.expect(TokenKind::Colon, "`:` after function signature")?;
        let span = start..self.prev_end();

        let body = self.parse_body()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            span,
        })
    }

    fn parse_import(&mut self) -> Result<Declaration, ParseError> {
        let start = self.expect(TokenKind::Import, "`import`")?.span.start;
        let (module, _) = self.expect_ident("module name")?;
        let alias = self.parse_alias()?;
        let span = start..self.prev_end();
        self.end_of_line()?;
        Ok(Declaration::Import { module, alias, span })
    }

    fn parse_from_import(&mut self) -> Result<Declaration, ParseError> {
        let start = self.expect(TokenKind::From, "`from`")?.span.start;
        let (module, _) = self.expect_ident("module name")?;
        self.expect(TokenKind::Import, "`import`")?;

        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_ident("imported name")?;
            let alias = self.parse_alias()?;
            names.push(ImportName { name, alias });
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let span = start..self.prev_end();
        self.end_of_line()?;
        Ok(Declaration::FromImport {
            module,
            names,
            span,
        })
    }

    fn parse_alias(&mut self) -> Result<Option<String>, ParseError> {
        if self.at(&TokenKind::As) {
            self.advance();
            Ok(Some(self.expect_ident("alias")?.0))
        } else {
            Ok(None)
        }
    }

    fn parse_variable(&mut self) -> Result<Declaration, ParseError> {
        let (name, name_span) = self.expect_ident("variable name")?;
        self.expect(TokenKind::Assign, "`=`")?;
        let value = self.parse_expression()?;
        let span = name_span.start..self.prev_end();
        self.end_of_line()?;
        Ok(Declaration::Variable { name, value, span })
    }
}

fn check_block_names(blocks: &[BlockDecl], file_id: usize, errors: &mut Vec<ParseError>) {
    let mut seen: HashMap<&str, &Range<usize>> = HashMap::new();
    for block in blocks {
        if block.name == "main" {
            errors.push(ParseError::error(
                "a block cannot be named 'main'",
                block.span.clone(),
                file_id,
            ));
            continue;
        }
        if let Some(first) = seen.get(block.name.as_str()) {
            errors.push(
                ParseError::error(
                    format!("block '{}' is declared more than once", block.name),
                    block.span.clone(),
                    file_id,
                )
                .with_note(format!("first declared at byte {}", first.start)),
            );
        } else {
            seen.insert(&block.name, &block.span);
        }
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

impl TokenParser {
    /// Parse `NEWLINE INDENT statement+ DEDENT`.
    fn parse_body(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.expect(TokenKind::Newline, "end of line after `:`")?;
        self.skip_newlines();
        self.expect(TokenKind::Indent, "an indented body")?;

        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                _ => body.push(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let start = self.peek().span.start;

        let statement = match self.peek_kind() {
            TokenKind::When => {
                self.advance();
                let condition = self.parse_expression()?;
                self.expect(TokenKind::Colon, "`:` after `when` condition")?;
                let span = start..self.prev_end();
                let body = self.parse_body()?;
                return Ok(Statement::When {
                    condition,
                    body,
                    span,
                });
            }
            TokenKind::Break => {
                self.advance();
                Statement::Break(start..self.prev_end())
            }
            TokenKind::Continue => {
                self.advance();
                Statement::Continue(start..self.prev_end())
            }
            TokenKind::Pass => {
                self.advance();
                Statement::Pass(start..self.prev_end())
            }
            TokenKind::Exit => {
                self.advance();
                if self.at(&TokenKind::LParen) {
                    self.advance();
                    self.expect(TokenKind::RParen, "`)` after `exit(`")?;
                }
                Statement::Exit(start..self.prev_end())
            }
            TokenKind::Return => {
                self.advance();
                let value = match self.peek_kind() {
                    TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof => None,
                    _ => Some(self.parse_expression()?),
                };
                Statement::Return {
                    value,
                    span: start..self.prev_end(),
                }
            }
            TokenKind::Ident(_) if self.peek_nth_kind(1) == &TokenKind::Assign => {
                let (name, _) = self.expect_ident("variable name")?;
                self.advance();
                let value = self.parse_expression()?;
                Statement::Assignment {
                    name,
                    value,
                    span: start..self.prev_end(),
                }
            }
            _ => {
                let value = self.parse_expression()?;
                Statement::Expression {
                    value,
                    span: start..self.prev_end(),
                }
            }
        };

        self.end_of_line()?;
        Ok(statement)
    }
}
