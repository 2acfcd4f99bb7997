//! Recursive-descent parser with precedence climbing.
//!
//! ```text
//! expression := primary (binary-op primary)*
//! primary    := NUMBER | IDENTIFIER | "(" expression ")" | ("-" | "!") primary
//! ```
//!
//! The parser never aborts: an unparseable primary becomes
//! [`Expr::Invalid`] and a diagnostic is recorded. Input nested past
//! [`MAX_NESTING`] groups or operators, or producing a tree taller than
//! [`MAX_TREE_HEIGHT`], is abandoned with a single E0103.

use crate::ast::{BinaryOp, Expr, LiteralKind, UnaryOp};
use crate::diagnostic::Diagnostic;
use crate::lexer::{Lexer, Token, TokenKind};

/// Deepest recursion through groups, unary operators and tighter-binding
/// operands.
pub const MAX_NESTING: usize = 256;

/// Tallest expression tree the parser hands out. Compilation walks the tree
/// recursively.
pub const MAX_TREE_HEIGHT: usize = 1024;

#[derive(Debug)]
pub struct ParseResult {
    pub expr: Expr,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_result(self) -> Result<Expr, Vec<Diagnostic>> {
        if self.diagnostics.is_empty() {
            Ok(self.expr)
        } else {
            Err(self.diagnostics)
        }
    }
}

pub fn parse(source: &str) -> ParseResult {
    let mut parser = Parser::new(source);
    let (expr, _) = parser.parse_expr();
    parser.expect_end();
    ParseResult {
        expr,
        diagnostics: parser.diagnostics,
    }
}

struct Parser<'src> {
    lexer: Lexer<'src>,
    source: &'src str,
    previous: Token,
    current: Token,
    diagnostics: Vec<Diagnostic>,
    depth: usize,
    /// Set once the input has been abandoned for nesting too deeply.
    abandoned: bool,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Parser {
            lexer,
            source,
            previous: current,
            current,
            diagnostics: Vec::new(),
            depth: 0,
            abandoned: false,
        }
    }

    fn advance(&mut self) {
        self.previous = self.current;
        self.current = self.lexer.next_token();
    }

    /// Parse an expression, returning it with the height of its tree.
    fn parse_expr(&mut self) -> (Expr, usize) {
        let (lhs, height) = self.parse_primary();
        self.parse_binary_rhs(0, lhs, height)
    }

    fn parse_primary(&mut self) -> (Expr, usize) {
        let token = self.current;
        let expr = match token.kind {
            TokenKind::LParen | TokenKind::Minus | TokenKind::Bang
                if self.depth >= MAX_NESTING =>
            {
                return (self.abandon(), 1);
            }
            TokenKind::LParen => {
                self.advance();
                self.depth += 1;
                let (inner, height) = self.parse_expr();
                self.depth -= 1;
                if self.current.kind == TokenKind::RParen {
                    self.advance();
                    return (inner, height);
                }
                self.report_current("expected ')' to close this group", "E0101");
                Expr::Invalid {
                    span: token.span.to(self.previous.span),
                }
            }
            TokenKind::Minus | TokenKind::Bang => {
                self.advance();
                let op = if token.kind == TokenKind::Minus {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Not
                };
                self.depth += 1;
                let (operand, height) = self.parse_primary();
                self.depth -= 1;
                if height >= MAX_TREE_HEIGHT {
                    return (self.abandon(), 1);
                }
                let span = token.span.to(operand.span());
                let expr = Expr::Unary {
                    op,
                    operand: Box::new(operand),
                    span,
                };
                return (expr, height + 1);
            }
            _ => self.parse_leaf(token),
        };
        (expr, 1)
    }

    fn parse_leaf(&mut self, token: Token) -> Expr {
        match token.kind {
            TokenKind::IntLiteral | TokenKind::FloatLiteral => {
                self.advance();
                let kind = if token.kind == TokenKind::FloatLiteral {
                    LiteralKind::Float
                } else {
                    LiteralKind::Int
                };
                Expr::Number {
                    kind,
                    text: token.text(self.source).to_string(),
                    span: token.span,
                }
            }
            TokenKind::Ident => {
                self.advance();
                Expr::Identifier {
                    name: token.text(self.source).to_string(),
                    span: token.span,
                }
            }
            _ => {
                self.report_current("expected an expression", "E0100");
                if token.is_error() {
                    self.advance();
                }
                Expr::Invalid { span: token.span }
            }
        }
    }

    /// Fold operators of at least `min_prec` onto `lhs`. A right operand is
    /// extended first when the operator after it binds tighter.
    fn parse_binary_rhs(
        &mut self,
        min_prec: i32,
        mut lhs: Expr,
        mut height: usize,
    ) -> (Expr, usize) {
        loop {
            let Some(op) = binary_op(self.current.kind) else {
                break;
            };
            let op_prec = op.precedence();
            if op_prec < min_prec {
                break;
            }
            self.advance();

            let (mut rhs, mut rhs_height) = self.parse_primary();
            let next_prec = binary_op(self.current.kind).map_or(-1, BinaryOp::precedence);
            if op_prec < next_prec {
                if self.depth >= MAX_NESTING {
                    return (self.abandon(), 1);
                }
                self.depth += 1;
                (rhs, rhs_height) = self.parse_binary_rhs(op_prec + 1, rhs, rhs_height);
                self.depth -= 1;
            }

            height = height.max(rhs_height) + 1;
            if height > MAX_TREE_HEIGHT {
                return (self.abandon(), 1);
            }
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
                span,
            };
        }
        (lhs, height)
    }

    /// Report E0103 once and skip the rest of the input, so enclosing groups
    /// and operators unwind without further diagnostics.
    fn abandon(&mut self) -> Expr {
        let span = self.current.span;
        if !self.abandoned {
            self.diagnostics.push(
                Diagnostic::error("expression nested too deeply", span).with_code("E0103"),
            );
            self.abandoned = true;
        }
        while self.current.kind != TokenKind::Eof {
            self.advance();
        }
        Expr::Invalid { span }
    }

    fn expect_end(&mut self) {
        if self.current.kind == TokenKind::Eof {
            return;
        }
        // Keep a lexical error visible even after an earlier parse error.
        if self.current.is_error() || self.diagnostics.is_empty() {
            self.report_current("unexpected input after the end of the expression", "E0102");
        }
    }

    /// Report a problem at the current token. Error tokens report their own
    /// lexical diagnostic instead of `message`.
    fn report_current(&mut self, message: &str, code: &'static str) {
        if self.abandoned {
            return;
        }
        let token = self.current;
        let diagnostic = match token.diagnostic() {
            Some(lexical) => lexical,
            None if token.kind == TokenKind::Eof => {
                Diagnostic::error(format!("{message}, found end of input"), token.span)
                    .with_code(code)
            }
            None if token.kind == TokenKind::StringLiteral => {
                Diagnostic::error(
                    format!("{message}, found a string literal (strings are not values)"),
                    token.span,
                )
                .with_code(code)
            }
            None => Diagnostic::error(
                format!("{message}, found `{}`", token.text(self.source)),
                token.span,
            )
            .with_code(code),
        };
        self.diagnostics.push(diagnostic);
    }
}

fn binary_op(kind: TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Comma => BinaryOp::Comma,
        TokenKind::Pipe => BinaryOp::BitOr,
        TokenKind::Caret => BinaryOp::BitXor,
        TokenKind::Amp => BinaryOp::BitAnd,
        TokenKind::EqualEqual => BinaryOp::Eq,
        TokenKind::BangEqual => BinaryOp::Ne,
        TokenKind::Greater => BinaryOp::Gt,
        TokenKind::Less => BinaryOp::Lt,
        TokenKind::GreaterEqual => BinaryOp::Ge,
        TokenKind::LessEqual => BinaryOp::Le,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Dot => BinaryOp::Member,
        _ => return None,
    };
    Some(op)
}
