//! Typed scalar values.
//!
//! Registers and constants are stored as raw little-endian bytes. A
//! [`Scalar`] is the decoded view of those bytes under a [`TypeTag`]; all
//! arithmetic is done on scalars of matching kinds, never on aliased memory.

use std::fmt;

use crate::types::TypeTag;

/// Width of a VM register in bytes.
pub const REGISTER_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// Why a scalar operation could not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarError {
    /// Operands of different kinds, or an operation undefined for the kind.
    KindMismatch,
    /// Integer division by zero.
    DivisionByZero,
}

/// Expand `$body` once per scalar kind with `$v` bound to the payload.
macro_rules! each_kind {
    ($value:expr, |$v:ident| $body:expr) => {
        match $value {
            Scalar::U8($v) => $body,
            Scalar::U16($v) => $body,
            Scalar::U32($v) => $body,
            Scalar::U64($v) => $body,
            Scalar::I8($v) => $body,
            Scalar::I16($v) => $body,
            Scalar::I32($v) => $body,
            Scalar::I64($v) => $body,
            Scalar::F32($v) => $body,
            Scalar::F64($v) => $body,
        }
    };
}

/// Pair two scalars of the same kind; integers and floats get separate
/// expressions so float bit tricks can differ from integer ones.
macro_rules! same_kind {
    ($lhs:expr, $rhs:expr, |$a:ident, $b:ident| int => $int:expr, float => $float:expr) => {
        match ($lhs, $rhs) {
            (Scalar::U8($a), Scalar::U8($b)) => Ok(Scalar::U8($int)),
            (Scalar::U16($a), Scalar::U16($b)) => Ok(Scalar::U16($int)),
            (Scalar::U32($a), Scalar::U32($b)) => Ok(Scalar::U32($int)),
            (Scalar::U64($a), Scalar::U64($b)) => Ok(Scalar::U64($int)),
            (Scalar::I8($a), Scalar::I8($b)) => Ok(Scalar::I8($int)),
            (Scalar::I16($a), Scalar::I16($b)) => Ok(Scalar::I16($int)),
            (Scalar::I32($a), Scalar::I32($b)) => Ok(Scalar::I32($int)),
            (Scalar::I64($a), Scalar::I64($b)) => Ok(Scalar::I64($int)),
            (Scalar::F32($a), Scalar::F32($b)) => Ok(Scalar::F32($float)),
            (Scalar::F64($a), Scalar::F64($b)) => Ok(Scalar::F64($float)),
            _ => Err(ScalarError::KindMismatch),
        }
    };
}

macro_rules! compare_same_kind {
    ($lhs:expr, $rhs:expr, $op:tt) => {
        match ($lhs, $rhs) {
            (Scalar::U8(a), Scalar::U8(b)) => Ok(a $op b),
            (Scalar::U16(a), Scalar::U16(b)) => Ok(a $op b),
            (Scalar::U32(a), Scalar::U32(b)) => Ok(a $op b),
            (Scalar::U64(a), Scalar::U64(b)) => Ok(a $op b),
            (Scalar::I8(a), Scalar::I8(b)) => Ok(a $op b),
            (Scalar::I16(a), Scalar::I16(b)) => Ok(a $op b),
            (Scalar::I32(a), Scalar::I32(b)) => Ok(a $op b),
            (Scalar::I64(a), Scalar::I64(b)) => Ok(a $op b),
            (Scalar::F32(a), Scalar::F32(b)) => Ok(a $op b),
            (Scalar::F64(a), Scalar::F64(b)) => Ok(a $op b),
            _ => Err(ScalarError::KindMismatch),
        }
    };
}

/// `as`-cast a primitive into the scalar kind named by `$to`.
macro_rules! cast_into {
    ($v:expr, $to:expr) => {
        match $to {
            TypeTag::U8 => Some(Scalar::U8($v as u8)),
            TypeTag::U16 => Some(Scalar::U16($v as u16)),
            TypeTag::U32 => Some(Scalar::U32($v as u32)),
            TypeTag::U64 => Some(Scalar::U64($v as u64)),
            TypeTag::I8 => Some(Scalar::I8($v as i8)),
            TypeTag::I16 => Some(Scalar::I16($v as i16)),
            TypeTag::I32 => Some(Scalar::I32($v as i32)),
            TypeTag::I64 => Some(Scalar::I64($v as i64)),
            TypeTag::F32 => Some(Scalar::F32($v as f32)),
            TypeTag::F64 => Some(Scalar::F64($v as f64)),
            _ => None,
        }
    };
}

impl Scalar {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Scalar::U8(_) => TypeTag::U8,
            Scalar::U16(_) => TypeTag::U16,
            Scalar::U32(_) => TypeTag::U32,
            Scalar::U64(_) => TypeTag::U64,
            Scalar::I8(_) => TypeTag::I8,
            Scalar::I16(_) => TypeTag::I16,
            Scalar::I32(_) => TypeTag::I32,
            Scalar::I64(_) => TypeTag::I64,
            Scalar::F32(_) => TypeTag::F32,
            Scalar::F64(_) => TypeTag::F64,
        }
    }

    /// Decode the leading bytes of a register under `tag`. Returns `None`
    /// for NONE or an unknown tag.
    pub fn from_register(tag: TypeTag, bytes: &[u8; REGISTER_WIDTH]) -> Option<Scalar> {
        let b = *bytes;
        let value = match tag {
            TypeTag::U8 => Scalar::U8(b[0]),
            TypeTag::U16 => Scalar::U16(u16::from_le_bytes([b[0], b[1]])),
            TypeTag::U32 => Scalar::U32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            TypeTag::U64 => Scalar::U64(u64::from_le_bytes(b)),
            TypeTag::I8 => Scalar::I8(b[0] as i8),
            TypeTag::I16 => Scalar::I16(i16::from_le_bytes([b[0], b[1]])),
            TypeTag::I32 => Scalar::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            TypeTag::I64 => Scalar::I64(i64::from_le_bytes(b)),
            TypeTag::F32 => Scalar::F32(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            TypeTag::F64 => Scalar::F64(f64::from_le_bytes(b)),
            _ => return None,
        };
        Some(value)
    }

    /// Encode into a full register, zero-filling bytes past the type width.
    pub fn to_register(self) -> [u8; REGISTER_WIDTH] {
        let mut register = [0u8; REGISTER_WIDTH];
        let bytes = self.to_le_bytes();
        register[..bytes.len()].copy_from_slice(&bytes);
        register
    }

    /// Little-endian bytes of exactly the type's width.
    pub fn to_le_bytes(self) -> Vec<u8> {
        each_kind!(self, |v| v.to_le_bytes().to_vec())
    }

    /// Numeric conversion with `as` semantics: integers truncate or
    /// sign-extend, floats saturate when narrowed to integers.
    pub fn convert(self, to: TypeTag) -> Option<Scalar> {
        each_kind!(self, |v| cast_into!(v, to))
    }

    pub fn add(self, rhs: Scalar) -> Result<Scalar, ScalarError> {
        same_kind!(self, rhs, |a, b| int => a.wrapping_add(b), float => a + b)
    }

    pub fn sub(self, rhs: Scalar) -> Result<Scalar, ScalarError> {
        same_kind!(self, rhs, |a, b| int => a.wrapping_sub(b), float => a - b)
    }

    pub fn mul(self, rhs: Scalar) -> Result<Scalar, ScalarError> {
        same_kind!(self, rhs, |a, b| int => a.wrapping_mul(b), float => a * b)
    }

    pub fn div(self, rhs: Scalar) -> Result<Scalar, ScalarError> {
        if rhs.is_integer_zero() {
            return Err(ScalarError::DivisionByZero);
        }
        same_kind!(self, rhs, |a, b| int => a.wrapping_div(b), float => a / b)
    }

    /// Bitwise operations treat floats as their IEEE bit pattern.
    pub fn bit_and(self, rhs: Scalar) -> Result<Scalar, ScalarError> {
        same_kind!(self, rhs, |a, b| int => a & b, float => from_bits(a.to_bits() & b.to_bits()))
    }

    pub fn bit_or(self, rhs: Scalar) -> Result<Scalar, ScalarError> {
        same_kind!(self, rhs, |a, b| int => a | b, float => from_bits(a.to_bits() | b.to_bits()))
    }

    pub fn bit_xor(self, rhs: Scalar) -> Result<Scalar, ScalarError> {
        same_kind!(self, rhs, |a, b| int => a ^ b, float => from_bits(a.to_bits() ^ b.to_bits()))
    }

    pub fn neg(self) -> Scalar {
        match self {
            Scalar::U8(v) => Scalar::U8(v.wrapping_neg()),
            Scalar::U16(v) => Scalar::U16(v.wrapping_neg()),
            Scalar::U32(v) => Scalar::U32(v.wrapping_neg()),
            Scalar::U64(v) => Scalar::U64(v.wrapping_neg()),
            Scalar::I8(v) => Scalar::I8(v.wrapping_neg()),
            Scalar::I16(v) => Scalar::I16(v.wrapping_neg()),
            Scalar::I32(v) => Scalar::I32(v.wrapping_neg()),
            Scalar::I64(v) => Scalar::I64(v.wrapping_neg()),
            Scalar::F32(v) => Scalar::F32(-v),
            Scalar::F64(v) => Scalar::F64(-v),
        }
    }

    pub fn bit_not(self) -> Scalar {
        match self {
            Scalar::U8(v) => Scalar::U8(!v),
            Scalar::U16(v) => Scalar::U16(!v),
            Scalar::U32(v) => Scalar::U32(!v),
            Scalar::U64(v) => Scalar::U64(!v),
            Scalar::I8(v) => Scalar::I8(!v),
            Scalar::I16(v) => Scalar::I16(!v),
            Scalar::I32(v) => Scalar::I32(!v),
            Scalar::I64(v) => Scalar::I64(!v),
            Scalar::F32(v) => Scalar::F32(f32::from_bits(!v.to_bits())),
            Scalar::F64(v) => Scalar::F64(f64::from_bits(!v.to_bits())),
        }
    }

    pub fn floor(self) -> Result<Scalar, ScalarError> {
        match self {
            Scalar::F32(v) => Ok(Scalar::F32(v.floor())),
            Scalar::F64(v) => Ok(Scalar::F64(v.floor())),
            _ => Err(ScalarError::KindMismatch),
        }
    }

    pub fn ceil(self) -> Result<Scalar, ScalarError> {
        match self {
            Scalar::F32(v) => Ok(Scalar::F32(v.ceil())),
            Scalar::F64(v) => Ok(Scalar::F64(v.ceil())),
            _ => Err(ScalarError::KindMismatch),
        }
    }

    pub fn equals(self, rhs: Scalar) -> Result<bool, ScalarError> {
        compare_same_kind!(self, rhs, ==)
    }

    pub fn less_than(self, rhs: Scalar) -> Result<bool, ScalarError> {
        compare_same_kind!(self, rhs, <)
    }

    pub fn greater_than(self, rhs: Scalar) -> Result<bool, ScalarError> {
        compare_same_kind!(self, rhs, >)
    }

    fn is_integer_zero(&self) -> bool {
        match *self {
            Scalar::F32(_) | Scalar::F64(_) => false,
            other => other.convert(TypeTag::U64) == Some(Scalar::U64(0)),
        }
    }
}

/// Rebuild a float of the same width from a bit pattern.
fn from_bits<B: FloatBits>(bits: B) -> B::Float {
    bits.into_float()
}

trait FloatBits {
    type Float;
    fn into_float(self) -> Self::Float;
}

impl FloatBits for u32 {
    type Float = f32;
    fn into_float(self) -> f32 {
        f32::from_bits(self)
    }
}

impl FloatBits for u64 {
    type Float = f64;
    fn into_float(self) -> f64 {
        f64::from_bits(self)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        each_kind!(self, |v| write!(f, "{v}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_bytes_are_little_endian_and_zero_filled() {
        let reg = Scalar::U16(0x1234).to_register();
        assert_eq!(reg, [0x34, 0x12, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Scalar::from_register(TypeTag::U16, &reg), Some(Scalar::U16(0x1234)));
        assert_eq!(Scalar::from_register(TypeTag::NONE, &reg), None);
    }

    #[test]
    fn decodes_every_tag_from_its_own_encoding() {
        let samples = [
            Scalar::U8(200),
            Scalar::U32(70_000),
            Scalar::I16(-300),
            Scalar::I64(i64::MIN),
            Scalar::F32(1.5),
            Scalar::F64(-2.25),
        ];
        for value in samples {
            let reg = value.to_register();
            assert_eq!(Scalar::from_register(value.type_tag(), &reg), Some(value));
        }
    }

    #[test]
    fn converts_between_classes() {
        assert_eq!(Scalar::U8(5).convert(TypeTag::I8), Some(Scalar::I8(5)));
        assert_eq!(Scalar::U8(255).convert(TypeTag::I8), Some(Scalar::I8(-1)));
        assert_eq!(Scalar::I8(-2).convert(TypeTag::I32), Some(Scalar::I32(-2)));
        assert_eq!(Scalar::U16(300).convert(TypeTag::F32), Some(Scalar::F32(300.0)));
        assert_eq!(Scalar::F64(1e20).convert(TypeTag::I32), Some(Scalar::I32(i32::MAX)));
        assert_eq!(Scalar::U8(1).convert(TypeTag::NONE), None);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(Scalar::U8(250).add(Scalar::U8(10)), Ok(Scalar::U8(4)));
        assert_eq!(Scalar::U8(1).sub(Scalar::U8(2)), Ok(Scalar::U8(255)));
        assert_eq!(Scalar::I8(-128).div(Scalar::I8(-1)), Ok(Scalar::I8(-128)));
        assert_eq!(Scalar::I8(-128).neg(), Scalar::I8(-128));
    }

    #[test]
    fn rejects_mismatched_kinds_and_zero_divisors() {
        assert_eq!(Scalar::U8(1).add(Scalar::U16(1)), Err(ScalarError::KindMismatch));
        assert_eq!(Scalar::I32(7).div(Scalar::I32(0)), Err(ScalarError::DivisionByZero));
        assert!(matches!(Scalar::F32(1.0).div(Scalar::F32(0.0)), Ok(Scalar::F32(v)) if v.is_infinite()));
        assert_eq!(Scalar::U8(3).floor(), Err(ScalarError::KindMismatch));
    }

    #[test]
    fn float_bitwise_ops_use_bit_patterns() {
        let neg_zero = Scalar::F32(0.0).bit_xor(Scalar::F32(-0.0)).unwrap();
        assert!(matches!(neg_zero, Scalar::F32(v) if v.to_bits() == 0x8000_0000));
        assert_eq!(
            Scalar::F64(2.0).bit_not().bit_not(),
            Scalar::F64(2.0)
        );
    }

    #[test]
    fn compares_same_kinds() {
        assert_eq!(Scalar::I16(-1).less_than(Scalar::I16(1)), Ok(true));
        assert_eq!(Scalar::U16(3).greater_than(Scalar::U16(3)), Ok(false));
        assert_eq!(Scalar::F64(f64::NAN).equals(Scalar::F64(f64::NAN)), Ok(false));
        assert_eq!(Scalar::U8(1).equals(Scalar::I8(1)), Err(ScalarError::KindMismatch));
    }
}
