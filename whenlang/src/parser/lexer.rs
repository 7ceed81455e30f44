use std::ops::Range;

use crate::parser::error::ParseError;

const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    // Literals
    Number(f64),
    Str(String),
    Ident(String),

    // Keywords
    Main,
    OneShot,
    Counted,
    Forever,
    Parallel,
    Def,
    Import,
    From,
    As,
    When,
    Break,
    Continue,
    Exit,
    Pass,
    Return,
    True,
    False,
    None,
    And,
    Or,
    Not,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign, // =
    EqEq,   // == or `eq`
    NotEq,  // != or `ne`
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Punctuation
    LParen,
    RParen,
    Comma,
    Colon,
    Dot,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    /// Human-readable form used in "expected X, found Y" messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number `{}`", n),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Ident(name) => format!("identifier `{}`", name),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indentation".to_string(),
            TokenKind::Dedent => "end of indented block".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("`{}`", other.lexeme()),
        }
    }

    fn lexeme(&self) -> &'static str {
        match self {
            TokenKind::Main => "main",
            TokenKind::OneShot => "os",
            TokenKind::Counted => "de",
            TokenKind::Forever => "fo",
            TokenKind::Parallel => "parallel",
            TokenKind::Def => "def",
            TokenKind::Import => "import",
            TokenKind::From => "from",
            TokenKind::As => "as",
            TokenKind::When => "when",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Exit => "exit",
            TokenKind::Pass => "pass",
            TokenKind::Return => "return",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::None => "none",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Assign => "=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "main" => TokenKind::Main,
        "os" => TokenKind::OneShot,
        "de" => TokenKind::Counted,
        "fo" => TokenKind::Forever,
        "parallel" => TokenKind::Parallel,
        "def" => TokenKind::Def,
        "import" => TokenKind::Import,
        "from" => TokenKind::From,
        "as" => TokenKind::As,
        "when" => TokenKind::When,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "exit" => TokenKind::Exit,
        "pass" => TokenKind::Pass,
        "return" => TokenKind::Return,
        "true" | "True" => TokenKind::True,
        "false" | "False" => TokenKind::False,
        "none" | "None" => TokenKind::None,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        // Word forms of the comparison operators.
        "eq" => TokenKind::EqEq,
        "ne" => TokenKind::NotEq,
        "lt" => TokenKind::Lt,
        "gt" => TokenKind::Gt,
        "le" => TokenKind::LtEq,
        "ge" => TokenKind::GtEq,
        _ => return None,
    };
    Some(kind)
}

/// Indentation-aware tokenizer.
///
/// Produces `Newline` at the end of every logical line, `Indent`/`Dedent`
/// around indented bodies, and a final `Eof`. Newlines inside parentheses
/// are ignored so argument lists may span lines.
pub(crate) struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    file_id: usize,
    indent_stack: Vec<usize>,
    paren_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
    errors: Vec<ParseError>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(source: &'a str, file_id: usize) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            file_id,
            indent_stack: vec![0],
            paren_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn tokenize(mut self) -> Result<Vec<Token>, Vec<ParseError>> {
        while self.pos < self.bytes.len() {
            if self.at_line_start && self.paren_depth == 0 {
                self.at_line_start = false;
                if !self.handle_indentation() {
                    continue;
                }
            }
            self.lex_token();
        }

        let end = self.source.len();
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline)
        ) {
            self.push(TokenKind::Newline, end..end);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent, end..end);
        }
        self.push(TokenKind::Eof, end..end);

        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }

    fn push(&mut self, kind: TokenKind, span: Range<usize>) {
        self.tokens.push(Token { kind, span });
    }

    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    /// Measure the indentation of the line starting at `pos` and emit
    /// Indent/Dedent tokens. Returns false if the line is blank or
    /// comment-only (already consumed).
    fn handle_indentation(&mut self) -> bool {
        let line_start = self.pos;
        let mut width = 0;
        while let Some(b) = self.peek_byte(0) {
            match b {
                b' ' => width += 1,
                b'\t' => width += TAB_WIDTH - width % TAB_WIDTH,
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek_byte(0) {
            None => return false,
            Some(b'\n') | Some(b'\r') | Some(b'#') => {
                self.skip_to_line_end();
                self.consume_newline();
                self.at_line_start = true;
                return false;
            }
            Some(_) => {}
        }

        let current = *self.indent_stack.last().unwrap_or(&0);
        let span = line_start..self.pos;
        if width > current {
            self.indent_stack.push(width);
            self.push(TokenKind::Indent, span);
        } else if width < current {
            while let Some(&top) = self.indent_stack.last() {
                if top <= width {
                    break;
                }
                self.indent_stack.pop();
                self.push(TokenKind::Dedent, span.clone());
            }
            if self.indent_stack.last() != Some(&width) {
                self.errors.push(
                    ParseError::error(
                        "unindent does not match any outer indentation level",
                        span,
                        self.file_id,
                    )
                    .with_note("indent bodies consistently with spaces"),
                );
                self.indent_stack.push(width);
            }
        }
        true
    }

    fn skip_to_line_end(&mut self) {
        while let Some(b) = self.peek_byte(0) {
            if b == b'\n' || b == b'\r' {
                break;
            }
            self.pos += 1;
        }
    }

    fn consume_newline(&mut self) {
        if self.peek_byte(0) == Some(b'\r') {
            self.pos += 1;
        }
        if self.peek_byte(0) == Some(b'\n') {
            self.pos += 1;
        }
    }

    fn lex_token(&mut self) {
        let start = self.pos;
        let Some(c) = self.source[self.pos..].chars().next() else {
            return;
        };

        match c {
            ' ' | '\t' => {
                self.pos += 1;
            }
            '\r' | '\n' => {
                self.consume_newline();
                if self.paren_depth == 0 {
                    if !matches!(
                        self.tokens.last().map(|t| &t.kind),
                        None | Some(TokenKind::Newline)
                    ) {
                        self.push(TokenKind::Newline, start..start + 1);
                    }
                    self.at_line_start = true;
                }
            }
            '#' => self.skip_to_line_end(),
            '"' | '\'' => self.lex_string(c),
            '0'..='9' => self.lex_number(),
            c if c.is_alphabetic() || c == '_' => {
                while let Some(ch) = self.source[self.pos..].chars().next() {
                    if ch.is_alphanumeric() || ch == '_' {
                        self.pos += ch.len_utf8();
                    } else {
                        break;
                    }
                }
                let ident = &self.source[start..self.pos];
                let kind = keyword(ident).unwrap_or_else(|| TokenKind::Ident(ident.to_string()));
                self.push(kind, start..self.pos);
            }
            _ => self.lex_operator(c, start),
        }
    }

    fn lex_operator(&mut self, c: char, start: usize) {
        let next = self.peek_byte(1);
        let (kind, len) = match (c, next) {
            ('=', Some(b'=')) => (TokenKind::EqEq, 2),
            ('!', Some(b'=')) => (TokenKind::NotEq, 2),
            ('<', Some(b'=')) => (TokenKind::LtEq, 2),
            ('>', Some(b'=')) => (TokenKind::GtEq, 2),
            ('=', _) => (TokenKind::Assign, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('(', _) => {
                self.paren_depth += 1;
                (TokenKind::LParen, 1)
            }
            (')', _) => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                (TokenKind::RParen, 1)
            }
            _ => {
                self.pos += c.len_utf8();
                self.errors.push(ParseError::error(
                    format!("unexpected character `{}`", c),
                    start..self.pos,
                    self.file_id,
                ));
                return;
            }
        };
        self.pos += len;
        self.push(kind, start..self.pos);
    }

    fn lex_number(&mut self) {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(b) = self.peek_byte(0) {
            if b.is_ascii_digit() {
                self.pos += 1;
            } else if b == b'.'
                && !seen_dot
                && self.peek_byte(1).is_some_and(|n| n.is_ascii_digit())
            {
                seen_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => self.push(TokenKind::Number(n), start..self.pos),
            Err(_) => self.errors.push(ParseError::error(
                format!("invalid number literal `{}`", text),
                start..self.pos,
                self.file_id,
            )),
        }
    }

    fn lex_string(&mut self, quote: char) {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.source[self.pos..].chars().next() else {
                self.errors.push(ParseError::error(
                    "unterminated string literal",
                    start..self.pos,
                    self.file_id,
                ));
                return;
            };
            match c {
                '\n' | '\r' => {
                    self.errors.push(ParseError::error(
                        "unterminated string literal",
                        start..self.pos,
                        self.file_id,
                    ));
                    return;
                }
                '\\' => {
                    self.pos += 1;
                    let Some(escaped) = self.source[self.pos..].chars().next() else {
                        continue;
                    };
                    self.pos += escaped.len_utf8();
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                }
                c if c == quote => {
                    self.pos += 1;
                    break;
                }
                c => {
                    self.pos += c.len_utf8();
                    value.push(c);
                }
            }
        }
        self.push(TokenKind::Str(value), start..self.pos);
    }
}
