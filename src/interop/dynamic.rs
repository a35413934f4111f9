//! In-process model of a dynamically typed host
//!
//! `HostValue` mirrors the host's built-in object kinds closely enough to
//! exercise every acceptance rule: integers wider than 64 bits, booleans
//! that are distinct from integers, tuples next to lists, and containers
//! the bridge must refuse (dicts, sets, byte strings, generators).

use std::borrow::Cow;
use std::fmt;

use num_traits::ToPrimitive;

use super::host::{HostException, HostProtocol, Shape};

/// Host-side object
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    /// Byte string; indexable like a sequence of ints but never a list
    Bytes(Vec<u8>),
    List(Vec<HostValue>),
    Tuple(Vec<HostValue>),
    Dict(Vec<(HostValue, HostValue)>),
    Set(Vec<HostValue>),
    /// One-shot iterator; its length is not known without consuming it
    Generator(Vec<HostValue>),
}

impl HostValue {
    pub fn list<T: Into<HostValue>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn tuple<T: Into<HostValue>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::Tuple(items.into_iter().map(Into::into).collect())
    }

    pub fn as_int(&self) -> Option<i128> {
        match *self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Integers of a list, if every element is an integer
    pub fn int_list(&self) -> Option<Vec<i128>> {
        self.as_list()?.iter().map(HostValue::as_int).collect()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Generator(_) => "generator",
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[HostValue]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{:?}", v),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Bytes(bytes) => write!(f, "b{:?}", String::from_utf8_lossy(bytes)),
            Self::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Self::Tuple(items) => {
                f.write_str("(")?;
                join(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Self::Set(items) => {
                f.write_str("{")?;
                join(f, items)?;
                f.write_str("}")
            }
            Self::Generator(_) => f.write_str("<generator object>"),
        }
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        Self::Int(v.into())
    }
}

impl From<i128> for HostValue {
    fn from(v: i128) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        Self::list(items)
    }
}

/// Host adapter over `HostValue`
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicHost;

impl HostProtocol for DynamicHost {
    type Object = HostValue;

    fn shape(&self, obj: &HostValue) -> Shape {
        match obj {
            HostValue::None => Shape::None,
            HostValue::Bool(_) => Shape::Bool,
            HostValue::Int(_) => Shape::Int,
            HostValue::Float(_) => Shape::Float,
            HostValue::Str(_) => Shape::Text,
            HostValue::List(items) | HostValue::Tuple(items) => Shape::Sequence { len: items.len() },
            HostValue::Dict(_) => Shape::Mapping,
            HostValue::Set(_) => Shape::Set,
            HostValue::Bytes(_) => Shape::Other(obj.type_name().to_owned()),
            HostValue::Generator(_) => Shape::Iterator,
        }
    }

    fn int_value(&self, obj: &HostValue) -> Option<i64> {
        obj.as_int()?.to_i64()
    }

    fn float_value(&self, obj: &HostValue) -> Option<f64> {
        match *obj {
            HostValue::Float(v) => Some(v),
            HostValue::Int(v) => v.to_f64(),
            _ => None,
        }
    }

    fn bool_value(&self, obj: &HostValue) -> bool {
        obj.as_bool().unwrap_or(false)
    }

    fn text_value<'o>(&self, obj: &'o HostValue) -> Result<Cow<'o, str>, HostException> {
        obj.as_str()
            .map(Cow::Borrowed)
            .ok_or_else(|| HostException::type_error(format!("'{}' object is not str", obj.type_name())))
    }

    fn item(&self, obj: &HostValue, index: usize) -> Result<HostValue, HostException> {
        match obj {
            HostValue::List(items) | HostValue::Tuple(items) => items
                .get(index)
                .cloned()
                .ok_or_else(|| HostException::runtime_error(format!("index {} out of range", index))),
            other => Err(HostException::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn repr(&self, obj: &HostValue) -> String {
        obj.to_string()
    }

    fn none(&self) -> HostValue {
        HostValue::None
    }

    fn new_int(&self, value: i64) -> HostValue {
        HostValue::Int(value.into())
    }

    fn new_float(&self, value: f64) -> HostValue {
        HostValue::Float(value)
    }

    fn new_bool(&self, value: bool) -> HostValue {
        HostValue::Bool(value)
    }

    fn new_text(&self, text: String) -> HostValue {
        HostValue::Str(text)
    }

    fn new_list(&self, items: Vec<HostValue>) -> Result<HostValue, HostException> {
        Ok(HostValue::List(items))
    }
}
