//! Expression tree produced by the parser.
//!
//! Each composite node owns its children through `Box`, so dropping the
//! root releases the whole tree, including partially built ones.

use std::fmt;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Int,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`, bitwise not
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Comma,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Member,
}

impl BinaryOp {
    /// Binding strength, from 0 (loosest) to 8 (tightest).
    pub fn precedence(self) -> i32 {
        match self {
            BinaryOp::Comma => 0,
            BinaryOp::BitOr => 1,
            BinaryOp::BitXor => 2,
            BinaryOp::BitAnd => 3,
            BinaryOp::Eq | BinaryOp::Ne => 4,
            BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div => 7,
            BinaryOp::Member => 8,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Comma => ",",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Member => ".",
        }
    }
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number {
        kind: LiteralKind,
        text: String,
        span: Span,
    },
    Identifier {
        name: String,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    /// Placeholder for an expression the parser could not form. Always
    /// accompanied by a parse diagnostic.
    Invalid { span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Invalid { span } => *span,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Expr::Number { .. } | Expr::Identifier { .. } => true,
            Expr::Unary { operand, .. } => operand.is_valid(),
            Expr::Binary { left, right, .. } => left.is_valid() && right.is_valid(),
            Expr::Invalid { .. } => false,
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            Expr::Number { text, .. } => writeln!(f, "{pad}{text}"),
            Expr::Identifier { name, .. } => writeln!(f, "{pad}{name}"),
            Expr::Unary { op, operand, .. } => {
                writeln!(f, "{pad}{}", op.symbol())?;
                operand.write_tree(f, indent + 1)
            }
            Expr::Binary { op, left, right, .. } => {
                left.write_tree(f, indent + 1)?;
                writeln!(f, "{pad}{}", op.symbol())?;
                right.write_tree(f, indent + 1)
            }
            Expr::Invalid { .. } => writeln!(f, "{pad}<invalid>"),
        }
    }
}

/// Sideways tree: a binary node sits between its children, indented one
/// level less.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(text: &str) -> Box<Expr> {
        Box::new(Expr::Number {
            kind: LiteralKind::Int,
            text: text.to_string(),
            span: Span::default(),
        })
    }

    #[test]
    fn dumps_sideways_tree() {
        let expr = Expr::Binary {
            op: BinaryOp::Add,
            left: num("1"),
            right: Box::new(Expr::Unary {
                op: UnaryOp::Neg,
                operand: num("2"),
                span: Span::default(),
            }),
            span: Span::default(),
        };
        assert_eq!(expr.to_string(), "  1\n+\n  -\n    2\n");
    }

    #[test]
    fn invalid_children_poison_the_tree() {
        let expr = Expr::Binary {
            op: BinaryOp::Mul,
            left: num("3"),
            right: Box::new(Expr::Invalid { span: Span::default() }),
            span: Span::default(),
        };
        assert!(!expr.is_valid());
        assert!(num("3").is_valid());
    }

    #[test]
    fn precedence_table_is_ordered() {
        assert!(BinaryOp::Comma.precedence() < BinaryOp::BitOr.precedence());
        assert!(BinaryOp::BitAnd.precedence() < BinaryOp::Eq.precedence());
        assert!(BinaryOp::Add.precedence() < BinaryOp::Mul.precedence());
        assert_eq!(BinaryOp::Member.precedence(), 8);
    }
}
