//! Guest tokenizer - converts guest source text into a token stream
//!
//! Handles: keywords, identifiers, string literals (single, double and
//! triple quoted), integer/float literals, operators and delimiters.
//! Block structure is indentation based, so the tokenizer also emits
//! `Newline`, `Indent` and `Dedent` layout tokens. Line breaks inside
//! brackets are ignored. Comments (`#`) are discarded.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every error carries line:column

use crate::{Error, Result};

/// Token types for guest syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Def,
    Return,
    If,
    Elif,
    Else,
    For,
    In,
    While,
    Break,
    Continue,
    Pass,
    Raise,
    And,
    Or,
    Not,
    Is,
    None,
    True,
    False,

    /// Words the sandbox reserves but does not implement (`import`, `class`, ...)
    Reserved(String),

    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Comma,    // ,
    Colon,    // :
    Dot,      // .

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    DoubleStar,   // **
    Slash,        // /
    DoubleSlash,  // //
    Percent,      // %
    EqEq,         // ==
    NotEq,        // !=
    Lt,           // <
    LtEq,         // <=
    Gt,           // >
    GtEq,         // >=
    Assign,       // =
    PlusAssign,   // +=
    MinusAssign,  // -=
    StarAssign,   // *=
    SlashAssign,  // /=
    PercentAssign, // %=

    // Layout
    Newline,
    Indent,
    Dedent,

    // Other
    Identifier(String),
    Eof,
}

impl Token {
    /// Short human-readable description used in parse errors
    pub fn describe(&self) -> String {
        match self {
            Token::Identifier(name) => format!("identifier '{}'", name),
            Token::StringLiteral(_) => "string literal".into(),
            Token::IntegerLiteral(i) => format!("integer {}", i),
            Token::FloatLiteral(f) => format!("float {}", f),
            Token::Reserved(word) => format!("'{}'", word),
            Token::Newline => "end of line".into(),
            Token::Indent => "indent".into(),
            Token::Dedent => "dedent".into(),
            Token::Eof => "end of input".into(),
            other => format!("{:?}", other),
        }
    }
}

const RESERVED_WORDS: &[&str] = &[
    "import", "from", "class", "try", "except", "finally", "with", "lambda", "global",
    "nonlocal", "del", "yield", "async", "await", "assert", "as",
];

/// Width a tab advances to, in columns
const TAB_WIDTH: usize = 8;

/// Position in source text for error reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenizer for guest source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    /// Open (, [ and { count; newlines inside brackets are not significant
    depth: usize,
    /// Indentation widths of enclosing blocks; always starts with 0
    indents: Vec<usize>,
    at_line_start: bool,
}

impl Tokenizer {
    /// Create a new tokenizer for the given input text
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            depth: 0,
            indents: vec![0],
            at_line_start: true,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>> {
        let mut tokens: Vec<SpannedToken> = Vec::new();

        loop {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                if !self.read_indentation(&mut tokens)? {
                    continue;
                }
            }

            self.skip_inline_whitespace_and_comments();

            if self.is_at_end() {
                break;
            }

            if self.peek() == Some('\n') {
                let span = self.current_span();
                self.advance();
                if self.depth == 0 {
                    tokens.push(SpannedToken {
                        token: Token::Newline,
                        span,
                    });
                    self.at_line_start = true;
                }
                continue;
            }

            // Explicit line continuation
            if self.peek() == Some('\\') && self.peek_ahead(1) == Some('\n') {
                self.advance();
                self.advance();
                continue;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        let span = self.current_span();
        if tokens
            .last()
            .is_some_and(|t| !matches!(t.token, Token::Newline | Token::Dedent))
        {
            tokens.push(SpannedToken {
                token: Token::Newline,
                span,
            });
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(SpannedToken {
                token: Token::Dedent,
                span,
            });
        }
        tokens.push(SpannedToken {
            token: Token::Eof,
            span,
        });

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    // ── Indentation ────────────────────────────────────────

    /// Measure the indentation of the line starting at the cursor and emit
    /// `Indent`/`Dedent` tokens. Returns `false` when the line is blank or
    /// comment-only and was consumed entirely.
    fn read_indentation(&mut self, tokens: &mut Vec<SpannedToken>) -> Result<bool> {
        let mut width = 0;
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.advance();
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.advance();
                self.at_line_start = true;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.advance();
                }
                self.at_line_start = true;
                return Ok(false);
            }
            _ => {}
        }

        let span = self.current_span();
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            tokens.push(SpannedToken {
                token: Token::Indent,
                span,
            });
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                tokens.push(SpannedToken {
                    token: Token::Dedent,
                    span,
                });
            }
            if self.indents.last() != Some(&width) {
                return Err(Error::ParseError(format!(
                    "Unindent does not match any outer indentation level at {}",
                    span
                )));
            }
        }
        Ok(true)
    }

    // ── Whitespace & Comments ──────────────────────────────

    fn skip_inline_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '#' {
                self.skip_comment();
            } else if ch == '\n' && self.depth == 0 {
                break;
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken> {
        let span = self.current_span();
        let Some(ch) = self.peek() else {
            return Ok(SpannedToken {
                token: Token::Eof,
                span,
            });
        };

        let token = match ch {
            '(' | '[' | '{' => {
                self.advance();
                self.depth += 1;
                match ch {
                    '(' => Token::LParen,
                    '[' => Token::LBracket,
                    _ => Token::LBrace,
                }
            }
            ')' | ']' | '}' => {
                self.advance();
                self.depth = self.depth.saturating_sub(1);
                match ch {
                    ')' => Token::RParen,
                    ']' => Token::RBracket,
                    _ => Token::RBrace,
                }
            }
            ',' => { self.advance(); Token::Comma }
            ':' => { self.advance(); Token::Colon }
            '.' if !self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.advance();
                Token::Dot
            }
            '+' => self.operator(Token::Plus, Token::PlusAssign),
            '-' => self.operator(Token::Minus, Token::MinusAssign),
            '%' => self.operator(Token::Percent, Token::PercentAssign),
            '*' => {
                if self.peek_ahead(1) == Some('*') {
                    self.advance();
                    self.advance();
                    Token::DoubleStar
                } else {
                    self.operator(Token::Star, Token::StarAssign)
                }
            }
            '/' => {
                if self.peek_ahead(1) == Some('/') {
                    self.advance();
                    self.advance();
                    Token::DoubleSlash
                } else {
                    self.operator(Token::Slash, Token::SlashAssign)
                }
            }
            '=' => self.operator(Token::Assign, Token::EqEq),
            '<' => self.operator(Token::Lt, Token::LtEq),
            '>' => self.operator(Token::Gt, Token::GtEq),
            '!' if self.peek_ahead(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::NotEq
            }
            '"' | '\'' => return self.read_string(span),
            c if c.is_ascii_digit() || c == '.' => return self.read_number(span),
            c if c.is_ascii_alphabetic() || c == '_' => {
                return self.read_identifier_or_keyword(span)
            }
            _ => {
                return Err(Error::ParseError(format!(
                    "Unexpected character '{}' at {}",
                    ch, span
                )))
            }
        };

        Ok(SpannedToken { token, span })
    }

    /// Consume a one-character operator, or its `=`-suffixed form
    fn operator(&mut self, plain: Token, with_equals: Token) -> Token {
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            with_equals
        } else {
            plain
        }
    }

    // ── String literals ────────────────────────────────────

    fn read_string(&mut self, span: Span) -> Result<SpannedToken> {
        let quote = self.advance().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(Error::ParseError(format!(
                        "Unterminated string starting at {}",
                        span
                    )));
                }
                Some('\n') if !triple => {
                    return Err(Error::ParseError(format!(
                        "Unterminated string starting at {}",
                        span
                    )));
                }
                Some(c) if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote) {
                        self.advance();
                        self.advance();
                        break;
                    }
                    value.push(c);
                }
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('\'') => value.push('\''),
                    Some('"') => value.push('"'),
                    Some('\n') => {}
                    Some(c) => {
                        return Err(Error::ParseError(format!(
                            "Invalid escape sequence '\\{}' at {}",
                            c,
                            self.current_span()
                        )));
                    }
                    None => {
                        return Err(Error::ParseError(format!(
                            "Unterminated escape sequence at {}",
                            self.current_span()
                        )));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(SpannedToken {
            token: Token::StringLiteral(value),
            span,
        })
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self, span: Span) -> Result<SpannedToken> {
        let start = self.position;
        let mut is_float = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.'
                && !is_float
                && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_float = true;
                self.advance();
            } else {
                break;
            }
        }

        // Exponent: 1e9, 2.5E-3
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_ahead(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_ahead(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance();
                if sign {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        if is_float {
            let val: f64 = text.parse().map_err(|_| {
                Error::ParseError(format!("Invalid float '{}' at {}", text, span))
            })?;
            Ok(SpannedToken {
                token: Token::FloatLiteral(val),
                span,
            })
        } else {
            let val: i64 = text.parse().map_err(|_| {
                Error::ParseError(format!("Invalid integer '{}' at {}", text, span))
            })?;
            Ok(SpannedToken {
                token: Token::IntegerLiteral(val),
                span,
            })
        }
    }

    // ── Identifiers & Keywords ─────────────────────────────

    fn read_identifier_or_keyword(&mut self, span: Span) -> Result<SpannedToken> {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = match text.as_str() {
            "def" => Token::Def,
            "return" => Token::Return,
            "if" => Token::If,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "while" => Token::While,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "pass" => Token::Pass,
            "raise" => Token::Raise,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "is" => Token::Is,
            "None" => Token::None,
            "True" => Token::True,
            "False" => Token::False,
            word if RESERVED_WORDS.contains(&word) => Token::Reserved(text),
            _ => Token::Identifier(text),
        };

        Ok(SpannedToken { token, span })
    }
}
