//! Scalar type tags.
//!
//! A type tag is a single byte. The upper nibble holds the scalar class
//! and the lower nibble the size class:
//!
//! ```text
//!   7      4 3      0
//!  +--------+--------+
//!  | class  |  size  |
//!  +--------+--------+
//! ```
//!
//! Classes are ranked for promotion as float > signed > unsigned. Size
//! classes are the log2 of the byte width. Tag `0x00` is NONE, the type of
//! an expression that produced no value.

use std::fmt;

/// Scalar class stored in the upper nibble, in promotion-rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ScalarClass {
    None = 0,
    Unsigned = 1,
    Signed = 2,
    Float = 3,
}

/// Size class stored in the lower nibble (log2 of the byte width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SizeClass {
    B8 = 0,
    B16 = 1,
    B32 = 2,
    B64 = 3,
}

impl SizeClass {
    pub fn from_bits(bits: u8) -> Option<SizeClass> {
        match bits {
            0 => Some(SizeClass::B8),
            1 => Some(SizeClass::B16),
            2 => Some(SizeClass::B32),
            3 => Some(SizeClass::B64),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn byte_width(self) -> usize {
        1 << (self as u8)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(u8);

impl TypeTag {
    pub const NONE: TypeTag = TypeTag(0x00);

    pub const U8: TypeTag = TypeTag::new(ScalarClass::Unsigned, SizeClass::B8);
    pub const U16: TypeTag = TypeTag::new(ScalarClass::Unsigned, SizeClass::B16);
    pub const U32: TypeTag = TypeTag::new(ScalarClass::Unsigned, SizeClass::B32);
    pub const U64: TypeTag = TypeTag::new(ScalarClass::Unsigned, SizeClass::B64);
    pub const I8: TypeTag = TypeTag::new(ScalarClass::Signed, SizeClass::B8);
    pub const I16: TypeTag = TypeTag::new(ScalarClass::Signed, SizeClass::B16);
    pub const I32: TypeTag = TypeTag::new(ScalarClass::Signed, SizeClass::B32);
    pub const I64: TypeTag = TypeTag::new(ScalarClass::Signed, SizeClass::B64);
    pub const F32: TypeTag = TypeTag::new(ScalarClass::Float, SizeClass::B32);
    pub const F64: TypeTag = TypeTag::new(ScalarClass::Float, SizeClass::B64);

    /// Comparisons produce a one-byte unsigned 0 or 1.
    pub const BOOL: TypeTag = TypeTag::U8;

    /// Every tag the virtual machine can operate on.
    pub const SCALARS: [TypeTag; 10] = [
        TypeTag::U8,
        TypeTag::U16,
        TypeTag::U32,
        TypeTag::U64,
        TypeTag::I8,
        TypeTag::I16,
        TypeTag::I32,
        TypeTag::I64,
        TypeTag::F32,
        TypeTag::F64,
    ];

    pub const fn new(class: ScalarClass, size: SizeClass) -> TypeTag {
        TypeTag(((class as u8) << 4) | size as u8)
    }

    /// Decode a tag byte. Only NONE and the ten scalar tags are accepted;
    /// float tags narrower than 32 bits do not exist.
    pub fn from_bits(bits: u8) -> Option<TypeTag> {
        if bits == 0 {
            return Some(TypeTag::NONE);
        }
        let tag = TypeTag(bits);
        TypeTag::SCALARS.contains(&tag).then_some(tag)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn class(self) -> ScalarClass {
        match self.0 >> 4 {
            1 => ScalarClass::Unsigned,
            2 => ScalarClass::Signed,
            3 => ScalarClass::Float,
            _ => ScalarClass::None,
        }
    }

    pub fn size(self) -> SizeClass {
        SizeClass::from_bits(self.0 & 0x0F).unwrap_or(SizeClass::B8)
    }

    pub fn byte_width(self) -> usize {
        self.size().byte_width()
    }

    pub fn is_none(self) -> bool {
        self.class() == ScalarClass::None
    }

    /// Same size, different class.
    pub fn with_class(self, class: ScalarClass) -> TypeTag {
        TypeTag::new(class, self.size())
    }
}

/// The type both operands of a binary operation are converted to.
///
/// A higher-ranked class wins outright; within one class the wider size
/// wins. The rule is symmetric in its arguments.
pub fn common_type(a: TypeTag, b: TypeTag) -> TypeTag {
    match a.class().cmp(&b.class()) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal => TypeTag::new(a.class(), a.size().max(b.size())),
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.class() {
            ScalarClass::None => return f.write_str("none"),
            ScalarClass::Unsigned => "u",
            ScalarClass::Signed => "i",
            ScalarClass::Float => "f",
        };
        write!(f, "{}{}", prefix, self.byte_width() * 8)
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({self}, 0x{:02x})", self.0)
    }
}
