//! AST to bytecode compilation.
//!
//! The walk is post-order. Every sub-expression leaves its value in the
//! `left` register and reports its [`TypeTag`]; a binary node spills its
//! left operand to the operand stack while the right one is evaluated,
//! converts both sides to their common type and emits the operation tagged
//! with that type.

use tracing::debug;

use crate::ast::{BinaryOp, Expr, LiteralKind, UnaryOp};
use crate::bytecode::{CodeBuffer, Instruction, Register, RegisterOperand};
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::error::CoreError;
use crate::parser::parse;
use crate::span::Span;
use crate::types::{ScalarClass, TypeTag, common_type};
use crate::value::Scalar;
use crate::vm::{Fault, Vm, VmConfig};

/// Smallest positive normal `f32`; literals at or below it are stored as `f64`.
const F32_MIN_MAGNITUDE: f64 = 1.175494351e-38;
const F32_MAX_MAGNITUDE: f64 = 3.4028235e+38;

/// A complete, directly executable program.
///
/// Layout: instructions first, ending in `RETURN`, followed by the
/// constant region starting at [`Program::code_len`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bytes: Vec<u8>,
    code_len: usize,
    result_type: TypeTag,
}

impl Program {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn code_len(&self) -> usize {
        self.code_len
    }

    pub fn code(&self) -> &[u8] {
        &self.bytes[..self.code_len]
    }

    pub fn constants(&self) -> &[u8] {
        &self.bytes[self.code_len..]
    }

    /// Type of the value the program leaves in the `left` register.
    pub fn result_type(&self) -> TypeTag {
        self.result_type
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Compile expression source text.
///
/// Any lexical, parse or type diagnostic fails the whole compilation; no
/// partial bytecode is returned.
pub fn compile(source: &str) -> Result<Program, Diagnostics> {
    let parsed = parse(source);
    if !parsed.diagnostics.is_empty() {
        return Err(Diagnostics::new(parsed.diagnostics));
    }
    compile_expr(&parsed.expr)
}

/// Compile an already parsed expression.
pub fn compile_expr(expr: &Expr) -> Result<Program, Diagnostics> {
    let mut compiler = Compiler::new();
    let result_type = compiler.expr(expr);
    if result_type.is_none() && compiler.diagnostics.is_empty() {
        compiler.error(expr.span(), "E0204", "expression does not produce a value");
    }
    if !compiler.diagnostics.is_empty() {
        return Err(Diagnostics::new(compiler.diagnostics));
    }

    compiler.code.emit(Instruction::Return);
    let assembled = compiler.code.finish().map_err(|err| {
        Diagnostics::new(vec![
            Diagnostic::error(err.to_string(), expr.span()).with_code("E0205"),
        ])
    })?;

    debug!(
        bytes = assembled.bytes.len(),
        code_len = assembled.code_len,
        result_type = %result_type,
        "compiled program"
    );
    Ok(Program {
        bytes: assembled.bytes,
        code_len: assembled.code_len,
        result_type,
    })
}

/// Compile `source`, run it on a fresh VM and read back the result.
pub fn evaluate(source: &str, config: &VmConfig) -> Result<Scalar, CoreError> {
    let program = compile(source)?;
    let mut vm = Vm::with_config(config.clone());
    vm.load(program.bytes());
    vm.execute()?;
    let value = vm.result(program.result_type()).ok_or(Fault::InvalidState)?;
    Ok(value)
}

struct Compiler {
    code: CodeBuffer,
    diagnostics: Vec<Diagnostic>,
}

impl Compiler {
    fn new() -> Self {
        Compiler {
            code: CodeBuffer::new(),
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, span: Span, code: &'static str, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(message, span).with_code(code));
    }

    fn expr(&mut self, expr: &Expr) -> TypeTag {
        match expr {
            Expr::Number { kind, text, span } => self.literal(*kind, text, *span),
            Expr::Identifier { name, span } => {
                // Identifiers have no storage yet; binding them is left to hosts
                // that extend the compiler.
                self.error(*span, "E0201", format!("cannot resolve identifier `{name}`"));
                TypeTag::NONE
            }
            Expr::Unary { op, operand, span } => self.unary(*op, operand, *span),
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => self.binary(*op, left, right, *span),
            // The parser always reports these; nothing further to say.
            Expr::Invalid { .. } => TypeTag::NONE,
        }
    }

    fn literal(&mut self, kind: LiteralKind, text: &str, span: Span) -> TypeTag {
        let value = match kind {
            LiteralKind::Int => text.parse::<u64>().ok().map(narrowest_unsigned),
            LiteralKind::Float => text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(float_literal),
        };
        match value {
            Some(value) => {
                self.code.emit_constant(value);
                value.type_tag()
            }
            None => {
                self.error(span, "E0200", format!("literal `{text}` is out of range"));
                TypeTag::NONE
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> TypeTag {
        let ty = self.expr(operand);
        if ty.is_none() {
            self.none_operand(op.symbol(), span);
            return TypeTag::NONE;
        }
        match op {
            UnaryOp::Neg => {
                let ty = if ty.class() == ScalarClass::Unsigned {
                    let signed = ty.with_class(ScalarClass::Signed);
                    self.code.emit(Instruction::Conv { from: ty, to: signed });
                    signed
                } else {
                    ty
                };
                self.code.emit(Instruction::Neg(ty));
                ty
            }
            UnaryOp::Not => {
                self.code.emit(Instruction::Not(ty));
                ty
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> TypeTag {
        let make: fn(TypeTag) -> Instruction = match op {
            BinaryOp::Member => {
                self.error(
                    span,
                    "E0203",
                    "member access needs storage, which expressions do not have",
                );
                return TypeTag::NONE;
            }
            BinaryOp::Comma => {
                // Left side is evaluated and discarded.
                self.expr(left);
                return self.expr(right);
            }
            BinaryOp::Add => Instruction::Add,
            BinaryOp::Sub => Instruction::Sub,
            BinaryOp::Mul => Instruction::Mul,
            BinaryOp::Div => Instruction::Div,
            BinaryOp::BitAnd => Instruction::And,
            BinaryOp::BitOr => Instruction::Or,
            BinaryOp::BitXor => Instruction::Xor,
            BinaryOp::Eq | BinaryOp::Ne => Instruction::CmpE,
            BinaryOp::Lt | BinaryOp::Ge => Instruction::CmpL,
            BinaryOp::Gt | BinaryOp::Le => Instruction::CmpG,
        };

        let Some(ty) = self.operands(op, left, right, span) else {
            return TypeTag::NONE;
        };
        self.code.emit(make(ty));

        if !op.is_comparison() {
            return ty;
        }
        if matches!(op, BinaryOp::Ne | BinaryOp::Ge | BinaryOp::Le) {
            self.invert_bool();
        }
        TypeTag::BOOL
    }

    /// Evaluate both operands, leaving `left` and `right` holding them
    /// converted to their common type, which is returned.
    fn operands(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> Option<TypeTag> {
        let left_ty = self.expr(left);
        if !left_ty.is_none() {
            self.code
                .emit(Instruction::Push(RegisterOperand::new(Register::Left, left_ty.size())));
        }
        let right_ty = self.expr(right);
        if left_ty.is_none() || right_ty.is_none() {
            self.none_operand(op.symbol(), span);
            return None;
        }

        let ty = common_type(left_ty, right_ty);
        if right_ty != ty {
            self.code.emit(Instruction::Conv { from: right_ty, to: ty });
        }
        self.code.emit(Instruction::Swap);
        self.code
            .emit(Instruction::Pop(RegisterOperand::new(Register::Left, left_ty.size())));
        if left_ty != ty {
            self.code.emit(Instruction::Conv { from: left_ty, to: ty });
        }
        Some(ty)
    }

    /// `left = 1 ^ left`, flipping a 0/1 comparison result.
    fn invert_bool(&mut self) {
        self.code.emit(Instruction::Swap);
        self.code.emit_constant(Scalar::U8(1));
        self.code.emit(Instruction::Xor(TypeTag::BOOL));
    }

    fn none_operand(&mut self, symbol: &str, span: Span) {
        self.error(
            span,
            "E0202",
            format!("operator `{symbol}` applied to an operand without a value"),
        );
    }
}

fn narrowest_unsigned(value: u64) -> Scalar {
    if let Ok(v) = u8::try_from(value) {
        Scalar::U8(v)
    } else if let Ok(v) = u16::try_from(value) {
        Scalar::U16(v)
    } else if let Ok(v) = u32::try_from(value) {
        Scalar::U32(v)
    } else {
        Scalar::U64(value)
    }
}

/// Zero and normal magnitudes inside the `f32` range are stored as `f32`;
/// subnormal and larger magnitudes keep `f64`.
fn float_literal(value: f64) -> Scalar {
    let magnitude = value.abs();
    if magnitude == 0.0 || (magnitude > F32_MIN_MAGNITUDE && magnitude < F32_MAX_MAGNITUDE) {
        Scalar::F32(value as f32)
    } else {
        Scalar::F64(value)
    }
}
