use std::rc::Rc;

use thiserror::Error;

pub mod ast;

use crate::ast::{
    Alignment, BinaryOp, Expr, ExprKind, LambdaBody, LambdaDef, Param, Program, ProtocolDef,
    RecoverClause, Stmt, StmtKind, UnaryOp,
};
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Structural anomaly at line {line}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Hand-written recursive-descent parser with panic-mode recovery at
/// NEWLINE/DEDENT boundaries. All structural errors are collected in one
/// pass; `parse_tokens` surfaces the first.
pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    source: &'a str,
    pos: usize,
    errors: Vec<SyntaxError>,
    panic_mode: bool,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>, source: &'a str) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::EOF, Span::default()));
        }
        Self {
            tokens,
            source,
            pos: 0,
            errors: Vec::new(),
            panic_mode: false,
        }
    }

    pub fn parse_program(mut self) -> (Program, Vec<SyntaxError>) {
        let mut statements = Vec::new();
        self.skip_newlines();

        while !self.at_end() {
            match self.parse_statement() {
                Some(stmt) => {
                    statements.push(stmt);
                    if self.panic_mode {
                        self.synchronize();
                    }
                }
                None => {
                    if matches!(self.kind(), TokenKind::Dedent) {
                        self.error("Unexpected indentation decrease at top level.");
                    }
                    if self.panic_mode {
                        self.synchronize();
                    } else if !self.at_end() {
                        self.advance();
                    }
                }
            }
            self.skip_newlines();
        }

        (Program { statements }, self.errors)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Option<Stmt> {
        self.skip_newlines();
        let span = self.current_span();

        if self.eat(TokenKind::Designate) {
            return self.parse_designate(span);
        }
        if self.eat(TokenKind::Foresee) {
            return self.parse_foresee(span);
        }
        if self.eat(TokenKind::Cycle) {
            return self.parse_cycle(span);
        }
        if self.eat(TokenKind::Async) {
            if self.eat(TokenKind::Protocol) {
                return self.parse_protocol(span, false, true);
            }
            if self.eat(TokenKind::Sequence) {
                return self.parse_protocol(span, true, true);
            }
            self.error("Expected 'protocol' or 'sequence' after 'async'.");
            return None;
        }
        if self.eat(TokenKind::Protocol) {
            return self.parse_protocol(span, false, false);
        }
        if self.eat(TokenKind::Sequence) {
            return self.parse_protocol(span, true, false);
        }
        if self.eat(TokenKind::Yield) {
            return self.parse_yield(span);
        }
        if self.eat(TokenKind::Delegate) {
            let iterable = self.parse_expression()?;
            return Some(Stmt::new(StmtKind::Delegate(iterable), span));
        }
        if self.eat(TokenKind::Scheme) {
            return self.parse_scheme(span);
        }
        if self.eat(TokenKind::Preview) {
            let expr = self.parse_expression()?;
            self.eat(TokenKind::Newline);
            return Some(Stmt::new(StmtKind::Preview(expr), span));
        }
        if self.eat(TokenKind::Override) {
            return self.parse_override(span);
        }
        if self.eat(TokenKind::Absolute) {
            return self.parse_absolute(span);
        }
        if self.eat(TokenKind::Anomaly) {
            let body = self.parse_block();
            return Some(Stmt::new(StmtKind::Anomaly { body }, span));
        }
        if self.eat(TokenKind::Entity) {
            return self.parse_entity(span);
        }
        if self.eat(TokenKind::Incorporate) {
            return self.parse_incorporate(span);
        }
        if self.eat(TokenKind::Break) {
            return Some(Stmt::new(StmtKind::Break, span));
        }
        if self.eat(TokenKind::Continue) {
            return Some(Stmt::new(StmtKind::Continue, span));
        }
        if self.eat(TokenKind::Attempt) {
            return self.parse_attempt(span);
        }
        if self.eat(TokenKind::Situation) {
            return self.parse_situation(span);
        }

        // Expression statement or assignment.
        self.skip_newlines();
        if matches!(self.kind(), TokenKind::Dedent | TokenKind::EOF) {
            return None;
        }
        let expr = self.parse_expression()?;
        if matches!(self.kind(), TokenKind::Assign | TokenKind::Walrus) {
            self.advance();
            let value = self.parse_expression()?;
            self.eat(TokenKind::Newline);
            let span = expr.span;
            return Some(Stmt::new(
                StmtKind::Assign {
                    target: expr,
                    value,
                },
                span,
            ));
        }
        self.eat(TokenKind::Newline);
        let span = expr.span;
        Some(Stmt::new(StmtKind::Expr(expr), span))
    }

    fn parse_designate(&mut self, span: Span) -> Option<Stmt> {
        let name_span = self.current_span();
        let name = self.expect_identifier("Expected variable name after 'designate'.")?;
        self.expect(TokenKind::Assign, "Expected '=' in designation.");
        let value = self.parse_expression()?;
        self.eat(TokenKind::Newline);
        Some(Stmt::new(
            StmtKind::Designate {
                target: Expr::new(ExprKind::Identifier(name), name_span),
                value,
            },
            span,
        ))
    }

    fn parse_foresee(&mut self, span: Span) -> Option<Stmt> {
        let condition = self.parse_expression()?;
        let body = self.parse_block();

        let mut alternates = Vec::new();
        loop {
            self.skip_newlines();
            if !self.eat(TokenKind::Alternate) {
                break;
            }
            let alt_condition = self.parse_expression()?;
            let alt_body = self.parse_block();
            alternates.push((alt_condition, alt_body));
        }

        self.skip_newlines();
        let otherwise = if self.eat(TokenKind::Otherwise) {
            self.parse_block()
        } else {
            Vec::new()
        };

        Some(Stmt::new(
            StmtKind::Foresee {
                condition,
                body,
                alternates,
                otherwise,
            },
            span,
        ))
    }

    fn parse_cycle(&mut self, span: Span) -> Option<Stmt> {
        if self.eat(TokenKind::While) {
            let condition = self.parse_expression()?;
            let body = self.parse_block();
            return Some(Stmt::new(StmtKind::CycleWhile { condition, body }, span));
        }

        if self.eat(TokenKind::Through) {
            let iterable = self.parse_expression()?;
            self.expect(TokenKind::As, "Expected 'as' after iterable.");
            let pattern = self.parse_primary()?;
            let body = self.parse_block();
            return Some(Stmt::new(
                StmtKind::CycleThrough {
                    iterable,
                    pattern,
                    body,
                },
                span,
            ));
        }

        if self.eat(TokenKind::From) {
            let start = self.parse_expression()?;
            self.expect(TokenKind::To, "Expected 'to' in range.");
            let end = self.parse_expression()?;
            let pattern = if self.eat(TokenKind::As) {
                self.parse_primary()?
            } else {
                Expr::new(ExprKind::Identifier("i".to_string()), span)
            };
            let body = self.parse_block();
            return Some(Stmt::new(
                StmtKind::CycleFromTo {
                    start,
                    end,
                    pattern,
                    body,
                },
                span,
            ));
        }

        self.error("Expected 'while', 'through', or 'from' after 'cycle'.");
        None
    }

    fn parse_protocol(&mut self, span: Span, is_sequence: bool, is_async: bool) -> Option<Stmt> {
        let name = self.expect_identifier("Expected protocol name.")?;
        self.expect(TokenKind::LParen, "Expected '(' after protocol name.");
        let params = self.parse_params();
        self.expect(TokenKind::RParen, "Expected ')' after parameters.");
        let body = self.parse_block();

        Some(Stmt::new(
            StmtKind::Protocol(Rc::new(ProtocolDef {
                name,
                params,
                body,
                is_sequence,
                is_async,
            })),
            span,
        ))
    }

    fn parse_params(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        if matches!(self.kind(), TokenKind::RParen) {
            return params;
        }
        loop {
            let is_rest = self.eat(TokenKind::Ellipsis);
            let Some(pattern) = self.parse_primary() else {
                break;
            };
            let default = if !is_rest
                && (self.eat(TokenKind::Walrus) || self.eat(TokenKind::Assign))
            {
                self.parse_expression()
            } else {
                None
            };
            params.push(Param {
                pattern,
                default,
                is_rest,
            });
            // A rest parameter must be last.
            if is_rest || !self.eat(TokenKind::Comma) {
                break;
            }
        }
        params
    }

    fn parse_yield(&mut self, span: Span) -> Option<Stmt> {
        let value = if matches!(
            self.kind(),
            TokenKind::Newline | TokenKind::Dedent | TokenKind::EOF
        ) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.eat(TokenKind::Newline);
        Some(Stmt::new(StmtKind::Yield(value), span))
    }

    fn parse_scheme(&mut self, span: Span) -> Option<Stmt> {
        let body = self.parse_block();
        self.skip_newlines();
        self.expect(TokenKind::Execute, "Expected 'execute' to close the scheme.");
        self.eat(TokenKind::Newline);
        Some(Stmt::new(StmtKind::Scheme { body }, span))
    }

    fn parse_override(&mut self, span: Span) -> Option<Stmt> {
        let name = self.expect_identifier("Expected variable name after 'override'.")?;
        self.expect(TokenKind::Assign, "Expected '=' in override.");
        let value = self.parse_expression()?;
        self.eat(TokenKind::Newline);
        Some(Stmt::new(StmtKind::Override { name, value }, span))
    }

    fn parse_absolute(&mut self, span: Span) -> Option<Stmt> {
        // Keep the literal source text of the condition for the deviation
        // report.
        let text_start = self.current_span().start;
        let condition = self.parse_expression()?;
        let text_end = self.previous_span().end;
        let text = self.source[text_start..text_end].trim().to_string();
        self.eat(TokenKind::Newline);
        Some(Stmt::new(StmtKind::Absolute { condition, text }, span))
    }

    fn parse_entity(&mut self, span: Span) -> Option<Stmt> {
        let name = self.expect_identifier("Expected entity name after 'entity'.")?;
        let parent = if self.eat(TokenKind::Inherits) {
            Some(self.expect_identifier("Expected parent entity name after 'inherits'.")?)
        } else {
            None
        };
        let members = self.parse_block();
        Some(Stmt::new(
            StmtKind::Entity {
                name,
                parent,
                members,
            },
            span,
        ))
    }

    fn parse_incorporate(&mut self, span: Span) -> Option<Stmt> {
        let path = if let TokenKind::Str(path) = self.kind() {
            let path = path.clone();
            self.advance();
            path
        } else {
            self.error("Expected file path string after 'incorporate'.");
            return None;
        };
        self.eat(TokenKind::Newline);
        Some(Stmt::new(StmtKind::Incorporate { path }, span))
    }

    fn parse_attempt(&mut self, span: Span) -> Option<Stmt> {
        let body = self.parse_block();
        self.skip_newlines();

        let recover = if self.eat(TokenKind::Recover) {
            let binding = if self.eat(TokenKind::As) {
                self.expect_identifier("Expected error variable name after 'as'.")
            } else if let TokenKind::Identifier(name) = self.kind() {
                // `recover err:` shorthand.
                let name = name.to_string();
                self.advance();
                Some(name)
            } else {
                None
            };
            let body = self.parse_block();
            Some(RecoverClause { binding, body })
        } else {
            None
        };

        Some(Stmt::new(StmtKind::Attempt { body, recover }, span))
    }

    fn parse_situation(&mut self, span: Span) -> Option<Stmt> {
        let value = self.parse_expression()?;
        self.expect(TokenKind::Colon, "Expected ':' after situation value.");
        self.skip_newlines();
        self.expect(TokenKind::Indent, "Expected indentation after situation.");

        let mut alignments = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.kind(), TokenKind::Dedent | TokenKind::EOF) {
                break;
            }
            if self.eat(TokenKind::Alignment) {
                let mut values = Vec::new();
                loop {
                    if let Some(v) = self.parse_expression() {
                        values.push(v);
                    }
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::Colon, "Expected ':' after alignment values.");
                let body = self.parse_alignment_body();
                alignments.push(Alignment {
                    is_otherwise: false,
                    values,
                    body,
                });
            } else if self.eat(TokenKind::Otherwise) {
                self.expect(TokenKind::Colon, "Expected ':' after otherwise.");
                let body = self.parse_alignment_body();
                alignments.push(Alignment {
                    is_otherwise: true,
                    values: Vec::new(),
                    body,
                });
            } else {
                break;
            }
        }

        self.expect(TokenKind::Dedent, "Expected dedent after situation statement.");
        Some(Stmt::new(StmtKind::Situation { value, alignments }, span))
    }

    /// An alignment body is either an indented block or a single statement on
    /// the same line.
    fn parse_alignment_body(&mut self) -> Vec<Stmt> {
        let mut body = Vec::new();
        self.skip_newlines();
        if self.eat(TokenKind::Indent) {
            while !matches!(self.kind(), TokenKind::Dedent | TokenKind::EOF) {
                match self.parse_statement() {
                    Some(stmt) => body.push(stmt),
                    None => {
                        if self.panic_mode {
                            self.synchronize();
                        } else {
                            break;
                        }
                    }
                }
                self.skip_newlines();
            }
            self.expect(TokenKind::Dedent, "Expected dedent after alignment body.");
        } else if let Some(stmt) = self.parse_statement() {
            body.push(stmt);
        }
        body
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();

        self.expect(TokenKind::Colon, "Expected ':' to begin block.");
        self.skip_newlines();
        if !self.eat(TokenKind::Indent) {
            self.error("Expected indented block.");
            return statements;
        }

        while !matches!(self.kind(), TokenKind::Dedent | TokenKind::EOF) {
            match self.parse_statement() {
                Some(stmt) => statements.push(stmt),
                None => {
                    if self.panic_mode {
                        self.synchronize();
                    } else if !matches!(self.kind(), TokenKind::Dedent | TokenKind::EOF) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.skip_newlines();
        }

        self.eat(TokenKind::Dedent);
        statements
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> Option<Expr> {
        // Lambda lookahead: scan past a matching ')' for '=>' without
        // consuming anything.
        if matches!(self.kind(), TokenKind::LParen) && self.lambda_follows() {
            let span = self.current_span();
            self.advance(); // consume '('
            return self.parse_lambda(span);
        }

        let expr = self.parse_or()?;

        // Postfix ternary: expr foresee condition otherwise other.
        if matches!(self.kind(), TokenKind::Foresee)
            && !matches!(self.peek_kind(1), TokenKind::Colon)
        {
            let span = self.current_span();
            self.advance();
            let condition = self.parse_or()?;
            self.expect(
                TokenKind::Otherwise,
                "Expected 'otherwise' in ternary expression.",
            );
            let when_false = self.parse_or()?;
            return Some(Expr::new(
                ExprKind::Ternary {
                    condition: Box::new(condition),
                    when_true: Box::new(expr),
                    when_false: Box::new(when_false),
                },
                span,
            ));
        }

        Some(expr)
    }

    fn lambda_follows(&self) -> bool {
        let mut depth = 0usize;
        let mut idx = self.pos;
        while idx < self.tokens.len() {
            match self.tokens[idx].kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(idx + 1).map(|t| &t.kind),
                            Some(TokenKind::Arrow)
                        );
                    }
                }
                TokenKind::Newline | TokenKind::EOF => return false,
                _ => {}
            }
            idx += 1;
        }
        false
    }

    fn parse_lambda(&mut self, span: Span) -> Option<Expr> {
        let mut params = Vec::new();
        if !matches!(self.kind(), TokenKind::RParen) {
            loop {
                let is_rest = self.eat(TokenKind::Ellipsis);
                let Some(pattern) = self.parse_primary() else {
                    break;
                };
                params.push(Param {
                    pattern,
                    default: None,
                    is_rest,
                });
                if is_rest || !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "Expected ')' after lambda parameters.");
        self.expect(TokenKind::Arrow, "Expected '=>' after lambda parameters.");

        let body = if matches!(self.kind(), TokenKind::Colon) {
            LambdaBody::Block(self.parse_block())
        } else {
            LambdaBody::Expr(self.parse_expression()?)
        };

        Some(Expr::new(
            ExprKind::Lambda(Rc::new(LambdaDef { params, body })),
            span,
        ))
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.kind(), TokenKind::Or) {
            let span = self.current_span();
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right, span);
        }
        Some(left)
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut left = self.parse_not()?;
        while matches!(self.kind(), TokenKind::And) {
            let span = self.current_span();
            self.advance();
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right, span);
        }
        Some(left)
    }

    fn parse_not(&mut self) -> Option<Expr> {
        if matches!(self.kind(), TokenKind::Not) {
            let span = self.current_span();
            self.advance();
            let operand = self.parse_not()?;
            return Some(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Option<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::Equal => BinaryOp::Eq,
                TokenKind::NotEqual => BinaryOp::Ne,
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right, span);
        }
        Some(left)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right, span);
        }
        Some(left)
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::DoubleSlash => BinaryOp::IntDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_power()?;
            left = binary(op, left, right, span);
        }
        Some(left)
    }

    fn parse_power(&mut self) -> Option<Expr> {
        let left = self.parse_unary()?;
        if matches!(self.kind(), TokenKind::DoubleStar) {
            let span = self.current_span();
            self.advance();
            // Right-associative.
            let right = self.parse_power()?;
            return Some(binary(BinaryOp::Pow, left, right, span));
        }
        Some(left)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let span = self.current_span();
        if self.eat(TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Some(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        if self.eat(TokenKind::Not) {
            let operand = self.parse_unary()?;
            return Some(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        if self.eat(TokenKind::Await) {
            let operand = self.parse_unary()?;
            return Some(Expr::new(ExprKind::Await(Box::new(operand)), span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut left = self.parse_primary()?;

        loop {
            if self.eat(TokenKind::LParen) {
                let args = self.parse_args(TokenKind::RParen);
                self.expect(TokenKind::RParen, "Expected ')' after arguments.");
                let span = left.span;
                left = match left.kind {
                    ExprKind::Identifier(name) => {
                        Expr::new(ExprKind::Call { name, args }, span)
                    }
                    ExprKind::Member { object, name } => Expr::new(
                        ExprKind::MethodCall {
                            object,
                            method: name,
                            args,
                        },
                        span,
                    ),
                    _ => {
                        self.error("Can only call functions by name or methods.");
                        return None;
                    }
                };
            } else if self.eat(TokenKind::LBracket) {
                left = self.parse_index_or_slice(left)?;
            } else if self.eat(TokenKind::Dot) {
                let name = self.expect_identifier("Expected member name after '.'.")?;
                let span = left.span;
                left = Expr::new(
                    ExprKind::Member {
                        object: Box::new(left),
                        name,
                    },
                    span,
                );
            } else {
                break;
            }
        }

        Some(left)
    }

    fn parse_index_or_slice(&mut self, object: Expr) -> Option<Expr> {
        let span = object.span;
        let mut start = None;
        if !matches!(self.kind(), TokenKind::Colon | TokenKind::RBracket) {
            start = Some(Box::new(self.parse_expression()?));
        }

        if self.eat(TokenKind::Colon) {
            let mut end = None;
            let mut step = None;
            if !matches!(self.kind(), TokenKind::Colon | TokenKind::RBracket) {
                end = Some(Box::new(self.parse_expression()?));
            }
            if self.eat(TokenKind::Colon) && !matches!(self.kind(), TokenKind::RBracket) {
                step = Some(Box::new(self.parse_expression()?));
            }
            self.expect(TokenKind::RBracket, "Expected ']' after slice.");
            return Some(Expr::new(
                ExprKind::Slice {
                    object: Box::new(object),
                    start,
                    end,
                    step,
                },
                span,
            ));
        }

        self.expect(TokenKind::RBracket, "Expected ']' after index.");
        let index = start?;
        Some(Expr::new(
            ExprKind::Index {
                object: Box::new(object),
                index,
            },
            span,
        ))
    }

    fn parse_args(&mut self, closing: TokenKind<'a>) -> Vec<Expr> {
        let mut args = Vec::new();
        if self.kind() == &closing {
            return args;
        }
        loop {
            if let Some(arg) = self.parse_expression() {
                args.push(arg);
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        args
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let span = self.current_span();

        match self.kind().clone() {
            TokenKind::Integer(value) => {
                self.advance();
                Some(Expr::new(ExprKind::Integer(value), span))
            }
            TokenKind::Float(value) => {
                self.advance();
                Some(Expr::new(ExprKind::Float(value), span))
            }
            TokenKind::Str(value) => {
                self.advance();
                Some(Expr::new(ExprKind::Str(value), span))
            }
            TokenKind::True => {
                self.advance();
                Some(Expr::new(ExprKind::Bool(true), span))
            }
            TokenKind::False => {
                self.advance();
                Some(Expr::new(ExprKind::Bool(false), span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Some(Expr::new(ExprKind::Identifier(name.to_string()), span))
            }
            TokenKind::LBracket => {
                self.advance();
                self.parse_list_or_comprehension(span)
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_dict(span)
            }
            TokenKind::LParen => {
                self.advance();
                self.parse_paren_or_gen_expr(span)
            }
            TokenKind::Manifest => {
                self.advance();
                self.parse_manifest(span)
            }
            TokenKind::Ellipsis => {
                self.advance();
                let expr = self.parse_expression()?;
                Some(Expr::new(ExprKind::Spread(Box::new(expr)), span))
            }
            TokenKind::SelfKw => {
                self.advance();
                Some(Expr::new(ExprKind::SelfRef, span))
            }
            TokenKind::Ascend => {
                self.advance();
                self.parse_ascend(span)
            }
            _ => {
                self.error("Expected expression. The system awaits valid syntax.");
                None
            }
        }
    }

    fn parse_list_or_comprehension(&mut self, span: Span) -> Option<Expr> {
        if self.eat(TokenKind::RBracket) {
            return Some(Expr::new(ExprKind::List(Vec::new()), span));
        }

        let first = self.parse_expression()?;

        if self.eat(TokenKind::Cycle) {
            // [expr cycle through iterable as var foresee cond]
            self.expect(
                TokenKind::Through,
                "Expected 'through' after 'cycle' in list comprehension.",
            );
            let iterable = self.parse_expression()?;
            self.expect(
                TokenKind::As,
                "Expected 'as' before iteration variable in list comprehension.",
            );
            let var = self.expect_identifier("Expected iteration variable name.")?;
            let condition = if self.eat(TokenKind::Foresee) {
                Some(Box::new(self.parse_expression()?))
            } else {
                None
            };
            self.expect(TokenKind::RBracket, "Expected ']' after list comprehension.");
            return Some(Expr::new(
                ExprKind::ListComp {
                    expr: Box::new(first),
                    iterable: Box::new(iterable),
                    var,
                    condition,
                },
                span,
            ));
        }

        let mut elements = vec![first];
        while self.eat(TokenKind::Comma) {
            if matches!(self.kind(), TokenKind::RBracket) {
                break;
            }
            if let Some(elem) = self.parse_expression() {
                elements.push(elem);
            }
        }
        self.expect(TokenKind::RBracket, "Expected ']' after list elements.");
        Some(Expr::new(ExprKind::List(elements), span))
    }

    fn parse_dict(&mut self, span: Span) -> Option<Expr> {
        let mut pairs = Vec::new();
        if !matches!(self.kind(), TokenKind::RBrace) {
            loop {
                let key = self.parse_expression()?;
                self.expect(TokenKind::Colon, "Expected ':' after dictionary key.");
                let value = self.parse_expression()?;
                pairs.push((key, value));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "Expected '}' after dictionary pairs.");
        Some(Expr::new(ExprKind::Dict(pairs), span))
    }

    fn parse_paren_or_gen_expr(&mut self, span: Span) -> Option<Expr> {
        let expr = self.parse_expression()?;

        if self.eat(TokenKind::For) {
            // (expr for var through iterable where cond)
            let var = self
                .expect_identifier("Expected variable name after 'for' in generator expression.")?;
            self.expect(
                TokenKind::Through,
                "Expected 'through' after variable in generator expression.",
            );
            let iterable = self.parse_expression()?;
            let condition = if self.eat(TokenKind::Where) {
                Some(Box::new(self.parse_expression()?))
            } else {
                None
            };
            self.expect(TokenKind::RParen, "Expected ')' after generator expression.");
            return Some(Expr::new(
                ExprKind::GenExpr {
                    expr: Box::new(expr),
                    iterable: Box::new(iterable),
                    var,
                    condition,
                },
                span,
            ));
        }

        self.expect(TokenKind::RParen, "Expected ')' after expression.");
        Some(expr)
    }

    fn parse_manifest(&mut self, span: Span) -> Option<Expr> {
        let class = self.expect_identifier("Expected class name after 'manifest'.")?;
        self.expect(TokenKind::LParen, "Expected '(' after class name.");
        let args = self.parse_args(TokenKind::RParen);
        self.expect(TokenKind::RParen, "Expected ')' after arguments.");
        Some(Expr::new(ExprKind::Manifest { class, args }, span))
    }

    fn parse_ascend(&mut self, span: Span) -> Option<Expr> {
        let name = self.expect_identifier("Expected protocol name after 'ascend'.")?;
        self.expect(TokenKind::LParen, "Expected '(' after protocol name.");
        let args = self.parse_args(TokenKind::RParen);
        self.expect(TokenKind::RParen, "Expected ')' after arguments.");
        Some(Expr::new(ExprKind::Ascend { name, args }, span))
    }

    // ------------------------------------------------------------------
    // Token access and error handling
    // ------------------------------------------------------------------

    fn kind(&self) -> &TokenKind<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind<'a> {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn at_end(&self) -> bool {
        matches!(self.kind(), TokenKind::EOF)
    }

    fn advance(&mut self) {
        if !self.at_end() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, kind: TokenKind<'a>) -> bool {
        if self.kind() == &kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind<'a>, message: &str) -> bool {
        if self.eat(kind) {
            true
        } else {
            self.error(message);
            false
        }
    }

    fn expect_identifier(&mut self, message: &str) -> Option<String> {
        if let TokenKind::Identifier(name) = self.kind() {
            let name = name.to_string();
            self.advance();
            Some(name)
        } else {
            self.error(message);
            None
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn error(&mut self, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let span = self.current_span();
        self.errors.push(SyntaxError {
            message: message.to_string(),
            line: span.line,
            column: span.column,
        });
    }

    /// Panic-mode recovery: drop tokens until a statement boundary.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.at_end() && !matches!(self.kind(), TokenKind::Newline | TokenKind::Dedent) {
            self.advance();
        }
        self.advance();
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, span: Span) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

/// Parse a token stream, surfacing the first structural error if any.
pub fn parse_tokens<'a>(tokens: Vec<Token<'a>>, source: &'a str) -> Result<Program, SyntaxError> {
    let (program, mut errors) = Parser::new(tokens, source).parse_program();
    if errors.is_empty() {
        Ok(program)
    } else {
        Err(errors.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use indoc::indoc;

    fn parse(source: &str) -> Program {
        let tokens = tokenize(source).expect("tokenize should succeed");
        parse_tokens(tokens, source).expect("parse should succeed")
    }

    fn parse_err(source: &str) -> SyntaxError {
        let tokens = tokenize(source).expect("tokenize should succeed");
        parse_tokens(tokens, source).expect_err("expected parse failure")
    }

    #[test]
    fn parses_designation_with_precedence() {
        let program = parse("designate n = 1 + 2 * 3\n");
        assert_eq!(program.statements.len(), 1);
        let StmtKind::Designate { target, value } = &program.statements[0].kind else {
            panic!("expected designation");
        };
        assert_eq!(target.kind, ExprKind::Identifier("n".to_string()));
        // 1 + (2 * 3)
        let ExprKind::Binary {
            op: BinaryOp::Add,
            right,
            ..
        } = &value.kind
        else {
            panic!("expected addition at the top");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn power_is_right_associative() {
        let program = parse("x = 2 ** 3 ** 2\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary {
            op: BinaryOp::Pow,
            right,
            ..
        } = &value.kind
        else {
            panic!("expected power at the top");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn parses_foresee_with_alternates_and_otherwise() {
        let program = parse(indoc! {"
            foresee x == 1:
                declare(1)
            alternate x == 2:
                declare(2)
            alternate x == 3:
                declare(3)
            otherwise:
                declare(0)
        "});
        let StmtKind::Foresee {
            alternates,
            otherwise,
            ..
        } = &program.statements[0].kind
        else {
            panic!("expected foresee");
        };
        assert_eq!(alternates.len(), 2);
        assert_eq!(otherwise.len(), 1);
    }

    #[test]
    fn parses_sequence_with_params_and_rest() {
        let program = parse(indoc! {"
            sequence g(a, b := 2, ...rest):
                yield a
        "});
        let StmtKind::Protocol(def) = &program.statements[0].kind else {
            panic!("expected protocol definition");
        };
        assert!(def.is_sequence);
        assert!(!def.is_async);
        assert_eq!(def.params.len(), 3);
        assert!(def.params[1].default.is_some());
        assert!(def.params[2].is_rest);
    }

    #[test]
    fn parses_lambda_with_lookahead() {
        let program = parse("f = (a, b) => a + b\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Lambda(def) = &value.kind else {
            panic!("expected lambda, got {:?}", value.kind);
        };
        assert_eq!(def.params.len(), 2);
        assert!(matches!(def.body, LambdaBody::Expr(_)));
    }

    #[test]
    fn parenthesized_expression_is_not_a_lambda() {
        let program = parse("x = (1 + 2) * 3\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_postfix_ternary() {
        let program = parse("x = 1 foresee y > 0 otherwise 2\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn parses_list_comprehension() {
        let program = parse("x = [n * n cycle through span(5) as n foresee n > 1]\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::ListComp { var, condition, .. } = &value.kind else {
            panic!("expected list comprehension");
        };
        assert_eq!(var, "n");
        assert!(condition.is_some());
    }

    #[test]
    fn parses_generator_expression() {
        let program = parse("g = (n * 2 for n through items where n > 0)\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::GenExpr { .. }));
    }

    #[test]
    fn parses_slice_and_index() {
        let program = parse("a = xs[1:5:2]\nb = xs[0]\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Slice { .. }));
        let StmtKind::Assign { value, .. } = &program.statements[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn parses_method_call_and_member() {
        let program = parse("x = obj.describe(1, 2)\ny = obj.field\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::MethodCall { method, args, .. } = &value.kind else {
            panic!("expected method call");
        };
        assert_eq!(method, "describe");
        assert_eq!(args.len(), 2);
        let StmtKind::Assign { value, .. } = &program.statements[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Member { .. }));
    }

    #[test]
    fn parses_entity_with_inheritance() {
        let program = parse(indoc! {"
            entity B inherits A:
                protocol construct(x):
                    self.x = x
        "});
        let StmtKind::Entity {
            name,
            parent,
            members,
        } = &program.statements[0].kind
        else {
            panic!("expected entity");
        };
        assert_eq!(name, "B");
        assert_eq!(parent.as_deref(), Some("A"));
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn parses_attempt_with_bare_recover_binding() {
        let program = parse(indoc! {"
            attempt:
                declare(1 / 0)
            recover e:
                declare(e)
        "});
        let StmtKind::Attempt { recover, .. } = &program.statements[0].kind else {
            panic!("expected attempt");
        };
        let recover = recover.as_ref().expect("expected recover clause");
        assert_eq!(recover.binding.as_deref(), Some("e"));
    }

    #[test]
    fn parses_attempt_with_as_binding() {
        let program = parse(indoc! {"
            attempt:
                declare(1)
            recover as err:
                declare(err)
        "});
        let StmtKind::Attempt { recover, .. } = &program.statements[0].kind else {
            panic!("expected attempt");
        };
        assert_eq!(
            recover.as_ref().and_then(|r| r.binding.as_deref()),
            Some("err")
        );
    }

    #[test]
    fn parses_situation_with_alignments() {
        let program = parse(indoc! {"
            situation x:
                alignment 1, 2:
                    declare(\"low\")
                alignment 3:
                    declare(\"three\")
                otherwise:
                    declare(\"high\")
        "});
        let StmtKind::Situation { alignments, .. } = &program.statements[0].kind else {
            panic!("expected situation");
        };
        assert_eq!(alignments.len(), 3);
        assert_eq!(alignments[0].values.len(), 2);
        assert!(alignments[2].is_otherwise);
    }

    #[test]
    fn parses_scheme_execute_and_absolute() {
        let program = parse(indoc! {"
            scheme:
                x = 1
            execute
            absolute x == 1
        "});
        assert!(matches!(program.statements[0].kind, StmtKind::Scheme { .. }));
        let StmtKind::Absolute { text, .. } = &program.statements[1].kind else {
            panic!("expected absolute");
        };
        assert_eq!(text, "x == 1");
    }

    #[test]
    fn parses_destructuring_assignment() {
        let program = parse("[a, b] = [1, 2]\n");
        let StmtKind::Assign { target, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target.kind, ExprKind::List(_)));
    }

    #[test]
    fn parses_spread_argument() {
        let program = parse("declare(...args)\n");
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(args[0].kind, ExprKind::Spread(_)));
    }

    #[test]
    fn parses_delegate_and_await() {
        let program = parse(indoc! {"
            sequence g(inner):
                delegate inner
            x = await p
        "});
        let StmtKind::Protocol(def) = &program.statements[0].kind else {
            panic!("expected sequence");
        };
        assert!(matches!(def.body[0].kind, StmtKind::Delegate(_)));
        let StmtKind::Assign { value, .. } = &program.statements[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Await(_)));
    }

    #[test]
    fn reports_error_with_line_number() {
        let err = parse_err("x = )\n");
        assert_eq!(err.line, 1);
        assert!(err.message.contains("Expected expression"));
    }

    #[test]
    fn recovers_and_reports_first_error_of_many() {
        let tokens = tokenize("x = )\ny = ]\nz = 3\n").expect("tokenize should succeed");
        let (program, errors) = Parser::new(tokens, "x = )\ny = ]\nz = 3\n").parse_program();
        assert_eq!(errors.len(), 2);
        // The well-formed trailing statement still parses.
        assert!(program
            .statements
            .iter()
            .any(|s| matches!(&s.kind, StmtKind::Assign { target, .. }
                if target.kind == ExprKind::Identifier("z".to_string()))));
    }
}
