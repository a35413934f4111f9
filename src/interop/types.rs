//! Type definitions for marshalled values
//!
//! `TypeTag` describes a native parameter or return slot; `Value` is the
//! runtime representation handed to native functions.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Native integer widths a parameter can declare
///
/// Every width is carried in an `i64`; the width only narrows the
/// accepted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl IntWidth {
    /// Get size of type in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
            Self::I64 => 8,
        }
    }

    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    #[inline]
    pub const fn min(self) -> i64 {
        match self {
            Self::I8 => i8::MIN as i64,
            Self::I16 => i16::MIN as i64,
            Self::I32 => i32::MIN as i64,
            Self::I64 => i64::MIN,
            Self::U8 | Self::U16 | Self::U32 => 0,
        }
    }

    #[inline]
    pub const fn max(self) -> i64 {
        match self {
            Self::I8 => i8::MAX as i64,
            Self::I16 => i16::MAX as i64,
            Self::I32 => i32::MAX as i64,
            Self::I64 => i64::MAX,
            Self::U8 => u8::MAX as i64,
            Self::U16 => u16::MAX as i64,
            Self::U32 => u32::MAX as i64,
        }
    }

    /// Check if a value is representable in this width
    #[inline]
    pub const fn contains(self, value: i64) -> bool {
        value >= self.min() && value <= self.max()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
        }
    }
}

impl fmt::Display for IntWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a parameter or return slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    /// No value; only valid as a return type
    Unit,
    Int(IntWidth),
    Float,
    Bool,
    Str,
    Seq(Box<TypeTag>),
}

impl TypeTag {
    /// 64-bit signed integer
    #[inline]
    pub const fn int() -> Self {
        Self::Int(IntWidth::I64)
    }

    pub fn seq(element: TypeTag) -> Self {
        Self::Seq(Box::new(element))
    }

    /// Values of this type live in a native heap buffer
    #[inline]
    pub fn is_heap(&self) -> bool {
        matches!(self, Self::Str | Self::Seq(_))
    }

    /// Check that `Unit` appears only where it is allowed
    pub fn is_valid_param(&self) -> bool {
        match self {
            Self::Unit => false,
            Self::Seq(element) => element.is_valid_param(),
            _ => true,
        }
    }

    /// Host-facing type name used in error messages
    pub fn host_name(&self) -> String {
        match self {
            Self::Unit => "None".to_string(),
            Self::Int(_) => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Str => "str".to_string(),
            Self::Seq(element) => format!("list[{}]", element.host_name()),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("unit"),
            Self::Int(width) => write!(f, "{}", width),
            Self::Float => f.write_str("f64"),
            Self::Bool => f.write_str("bool"),
            Self::Str => f.write_str("str"),
            Self::Seq(element) => write!(f, "seq<{}>", element),
        }
    }
}

/// Handle to a buffer tracked by a call's ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufId(pub(crate) u32);

impl BufId {
    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marshalled native value
///
/// Scalars are held inline. Text and sequences refer to native buffers
/// owned by the call's `Ledger`; read them through `Ledger::str` and
/// `Ledger::seq`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Unit,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(BufId),
    Seq(BufId),
}

impl Value {
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Ledger buffer behind this value, if any
    #[inline]
    pub fn buffer(&self) -> Option<BufId> {
        match *self {
            Self::Str(id) | Self::Seq(id) => Some(id),
            _ => None,
        }
    }

    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Str(_) => "str",
            Self::Seq(_) => "seq",
        }
    }
}
