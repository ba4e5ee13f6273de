use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("Inconsistent indentation at line {line}: dedent to {indent} columns matches no enclosing block")]
    InvalidDedent { indent: usize, line: usize },
    #[error("Unexpected character '{character}' at line {line}. The system does not recognize this symbol.")]
    UnexpectedCharacter { character: char, line: usize },
    #[error("Unexpected '!' at line {line}. Did you intend '!='?")]
    StrayBang { line: usize },
    #[error("Unterminated string at line {line}. Your words trail off...")]
    UnterminatedString { line: usize },
    #[error("Invalid numeric literal '{literal}' at line {line}")]
    InvalidNumber { literal: String, line: usize },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            Self::InvalidDedent { line, .. }
            | Self::UnexpectedCharacter { line, .. }
            | Self::StrayBang { line }
            | Self::UnterminatedString { line }
            | Self::InvalidNumber { line, .. } => *line,
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;

/// Indentation-aware lexer. A tab counts as four columns, a space as one.
/// Blank lines and comment-only lines leave the indentation stack untouched.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    indent_stack: Vec<usize>,
    pending_dedents: usize,
    at_line_start: bool,
    token_start: usize,
    token_line: usize,
    token_column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            pending_dedents: 0,
            at_line_start: true,
            token_start: 0,
            token_line: 1,
            token_column: 1,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        if self.pending_dedents > 0 {
            self.pending_dedents -= 1;
            return Ok(self.synthetic(TokenKind::Dedent));
        }

        if self.at_line_start && !self.at_end() {
            self.at_line_start = false;
            if let Some(token) = self.handle_indentation()? {
                return Ok(token);
            }
        }

        self.skip_inline_whitespace();
        if self.peek() == Some('#') {
            self.skip_comment();
        }

        self.mark_token_start();

        if self.at_end() {
            if self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                return Ok(self.synthetic(TokenKind::Dedent));
            }
            return Ok(self.synthetic(TokenKind::EOF));
        }

        let c = self.advance().expect("checked not at end");
        match c {
            '\n' => {
                self.at_line_start = true;
                Ok(self.make_token(TokenKind::Newline))
            }
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier()),
            '"' | '\'' => self.read_string(c),
            '+' => Ok(self.make_token(TokenKind::Plus)),
            '-' => Ok(self.make_token(TokenKind::Minus)),
            '*' => {
                if self.matches('*') {
                    Ok(self.make_token(TokenKind::DoubleStar))
                } else {
                    Ok(self.make_token(TokenKind::Star))
                }
            }
            '/' => {
                if self.matches('/') {
                    Ok(self.make_token(TokenKind::DoubleSlash))
                } else {
                    Ok(self.make_token(TokenKind::Slash))
                }
            }
            '%' => Ok(self.make_token(TokenKind::Percent)),
            '=' => {
                if self.matches('=') {
                    Ok(self.make_token(TokenKind::Equal))
                } else if self.matches('>') {
                    Ok(self.make_token(TokenKind::Arrow))
                } else {
                    Ok(self.make_token(TokenKind::Assign))
                }
            }
            ':' => {
                if self.matches('=') {
                    Ok(self.make_token(TokenKind::Walrus))
                } else {
                    Ok(self.make_token(TokenKind::Colon))
                }
            }
            '!' => {
                if self.matches('=') {
                    Ok(self.make_token(TokenKind::NotEqual))
                } else {
                    Err(LexError::StrayBang {
                        line: self.token_line,
                    })
                }
            }
            '<' => {
                if self.matches('=') {
                    Ok(self.make_token(TokenKind::LessEqual))
                } else {
                    Ok(self.make_token(TokenKind::Less))
                }
            }
            '>' => {
                if self.matches('=') {
                    Ok(self.make_token(TokenKind::GreaterEqual))
                } else {
                    Ok(self.make_token(TokenKind::Greater))
                }
            }
            '.' => {
                if self.matches('.') {
                    if self.matches('.') {
                        Ok(self.make_token(TokenKind::Ellipsis))
                    } else {
                        Err(LexError::UnexpectedCharacter {
                            character: '.',
                            line: self.token_line,
                        })
                    }
                } else {
                    Ok(self.make_token(TokenKind::Dot))
                }
            }
            '(' => Ok(self.make_token(TokenKind::LParen)),
            ')' => Ok(self.make_token(TokenKind::RParen)),
            '[' => Ok(self.make_token(TokenKind::LBracket)),
            ']' => Ok(self.make_token(TokenKind::RBracket)),
            '{' => Ok(self.make_token(TokenKind::LBrace)),
            '}' => Ok(self.make_token(TokenKind::RBrace)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            other => Err(LexError::UnexpectedCharacter {
                character: other,
                line: self.token_line,
            }),
        }
    }

    /// At a fresh line: measure the indent and queue INDENT/DEDENT tokens.
    /// Returns the INDENT token directly when one is due.
    fn handle_indentation(&mut self) -> LexResult<Option<Token<'a>>> {
        let mut indent = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => indent += 1,
                '\t' => indent += 4,
                _ => break,
            }
            self.advance();
        }

        // Blank lines and comment-only lines do not alter the stack.
        match self.peek() {
            Some('\n') | None => return Ok(None),
            Some('#') => return Ok(None),
            _ => {}
        }

        let current = *self.indent_stack.last().expect("indent stack never empty");
        if indent > current {
            self.indent_stack.push(indent);
            self.mark_token_start();
            return Ok(Some(self.synthetic(TokenKind::Indent)));
        }
        if indent < current {
            while self
                .indent_stack
                .last()
                .is_some_and(|&top| top > indent && self.indent_stack.len() > 1)
            {
                self.indent_stack.pop();
                self.pending_dedents += 1;
            }
            if *self.indent_stack.last().expect("indent stack never empty") != indent {
                return Err(LexError::InvalidDedent {
                    indent,
                    line: self.line,
                });
            }
            if self.pending_dedents > 0 {
                self.pending_dedents -= 1;
                self.mark_token_start();
                return Ok(Some(self.synthetic(TokenKind::Dedent)));
            }
        }
        Ok(None)
    }

    fn read_number(&mut self) -> LexResult<Token<'a>> {
        let mut is_float = false;
        self.consume_while(|c| c.is_ascii_digit());

        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            self.consume_while(|c| c.is_ascii_digit());
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let exponent_digits = match self.peek_next() {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if exponent_digits {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                self.consume_while(|c| c.is_ascii_digit());
            }
        }

        let lexeme = &self.source[self.token_start..self.pos];
        if is_float {
            let value = lexeme.parse::<f64>().map_err(|_| LexError::InvalidNumber {
                literal: lexeme.to_string(),
                line: self.token_line,
            })?;
            Ok(self.make_token(TokenKind::Float(value)))
        } else {
            let value = lexeme.parse::<i64>().map_err(|_| LexError::InvalidNumber {
                literal: lexeme.to_string(),
                line: self.token_line,
            })?;
            Ok(self.make_token(TokenKind::Integer(value)))
        }
    }

    fn read_identifier(&mut self) -> Token<'a> {
        self.consume_while(|c| c.is_alphanumeric() || c == '_');
        let lexeme = &self.source[self.token_start..self.pos];
        let kind = TokenKind::keyword(lexeme).unwrap_or(TokenKind::Identifier(lexeme));
        self.make_token(kind)
    }

    fn read_string(&mut self, quote: char) -> LexResult<Token<'a>> {
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexError::UnterminatedString {
                        line: self.token_line,
                    });
                }
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(self.make_token(TokenKind::Str(value)));
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('\\') => value.push('\\'),
                        Some('\'') => value.push('\''),
                        Some('"') => value.push('"'),
                        // Unknown escapes keep the literal character.
                        Some(other) => value.push(other),
                        None => {
                            return Err(LexError::UnterminatedString {
                                line: self.token_line,
                            });
                        }
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn skip_inline_whitespace(&mut self) {
        self.consume_while(|c| c == ' ' || c == '\t' || c == '\r');
    }

    fn skip_comment(&mut self) {
        self.consume_while(|c| c != '\n');
    }

    fn consume_while<P>(&mut self, keep: P)
    where
        P: Fn(char) -> bool,
    {
        while let Some(c) = self.peek() {
            if !keep(c) {
                break;
            }
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        self.peek_at(1)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn mark_token_start(&mut self) {
        self.token_start = self.pos;
        self.token_line = self.line;
        self.token_column = self.column;
    }

    fn make_token(&self, kind: TokenKind<'a>) -> Token<'a> {
        Token::new(
            kind,
            Span::new(
                self.token_start,
                self.pos,
                self.token_line,
                self.token_column,
            ),
        )
    }

    fn synthetic(&self, kind: TokenKind<'a>) -> Token<'a> {
        Token::new(kind, Span::point(self.pos, self.line, self.column))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) => Some(Ok(token)),
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn tokenize(source: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::EOF);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
