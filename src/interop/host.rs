//! Host object protocol
//!
//! The marshalling engine never inspects host objects directly. A host
//! adapter answers one capability question per object (`shape`) and
//! provides the handful of documented object-protocol calls the decoder
//! and encoder need.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host exception classes surfaced by the bridge
///
/// Type/arity/range failures and native errors never share a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExceptionKind {
    /// Arity, type and range failures while decoding arguments
    TypeError,
    /// Declared native error tags
    #[default]
    ValueError,
    /// Unregistered tags, allocation failures, internal encode failures
    RuntimeError,
}

impl ExceptionKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::RuntimeError => "RuntimeError",
        }
    }
}

/// Exception raised into the host
///
/// Displays as the bare message, which is what the host's `str(exc)` yields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostException {
    pub kind: ExceptionKind,
    pub message: String,
}

impl HostException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }
}

/// What a host object can be used as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    None,
    Bool,
    Int,
    Float,
    Text,
    /// Ordered, indexable, with a length known up front
    Sequence { len: usize },
    Mapping,
    Set,
    /// Iterable without a known length (generators, iterators)
    Iterator,
    Other(String),
}

impl Shape {
    /// Host type name for error messages
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "str",
            Self::Sequence { .. } => "sequence",
            Self::Mapping => "dict",
            Self::Set => "set",
            Self::Iterator => "iterator",
            Self::Other(name) => name,
        }
    }
}

/// Object-protocol calls the engine relies on
///
/// Extractors are only called after `shape` has classified the object:
/// `int_value` for `Int`, `float_value` for `Int` or `Float`, `bool_value`
/// for `Bool`, `text_value` for `Text`, `item` for `Sequence`.
pub trait HostProtocol {
    type Object: Clone;

    fn shape(&self, obj: &Self::Object) -> Shape;

    /// `None` when the integer does not fit in 64 bits
    fn int_value(&self, obj: &Self::Object) -> Option<i64>;

    /// `None` when the number is not representable as a finite `f64` conversion
    fn float_value(&self, obj: &Self::Object) -> Option<f64>;

    fn bool_value(&self, obj: &Self::Object) -> bool;

    fn text_value<'o>(&self, obj: &'o Self::Object) -> Result<Cow<'o, str>, HostException>;

    fn item(&self, obj: &Self::Object, index: usize) -> Result<Self::Object, HostException>;

    /// Short rendering for diagnostics
    fn repr(&self, obj: &Self::Object) -> String;

    fn none(&self) -> Self::Object;

    fn new_int(&self, value: i64) -> Self::Object;

    fn new_float(&self, value: f64) -> Self::Object;

    fn new_bool(&self, value: bool) -> Self::Object;

    /// Build a text object that takes over `text`
    fn new_text(&self, text: String) -> Self::Object;

    fn new_list(&self, items: Vec<Self::Object>) -> Result<Self::Object, HostException>;
}
