//! Function descriptors - explicit signatures for bound native functions
//!
//! Descriptors are authored by hand (or by a codegen step, as JSON/TOML)
//! and never inferred. They are built once while the module initialises and
//! stay immutable for the life of the process.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::host::ExceptionKind;
use super::types::TypeTag;

/// Native-side error identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTag {
    pub name: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorTag {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            message: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            message: None,
        }
    }

    /// Attach a diagnostic message; it is logged but never shown to the host
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An error a function declares it may return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredError {
    pub name: String,
    #[serde(default)]
    pub kind: ExceptionKind,
}

/// The error tags a function may return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSet {
    /// Any tag is accepted and raised as `ValueError`
    Open,
    /// Only the listed tags are expected
    Closed(Vec<DeclaredError>),
}

impl ErrorSet {
    /// Exception class for a tag, or `None` if the tag was never declared
    pub fn resolve(&self, tag: &ErrorTag) -> Option<ExceptionKind> {
        match self {
            Self::Open => Some(ExceptionKind::ValueError),
            Self::Closed(declared) => declared.iter().find(|e| e.name == tag.name()).map(|e| e.kind),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Closed(declared) if declared.is_empty())
    }
}

impl Default for ErrorSet {
    fn default() -> Self {
        Self::Closed(Vec::new())
    }
}

/// Signature of one bound native function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypeTag>,
    #[serde(default = "unit")]
    pub returns: TypeTag,
    #[serde(default)]
    pub errors: ErrorSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

fn unit() -> TypeTag {
    TypeTag::Unit
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: TypeTag::Unit,
            errors: ErrorSet::default(),
            doc: None,
        }
    }

    pub fn param(mut self, ty: TypeTag) -> Self {
        self.params.push(ty);
        self
    }

    pub fn returns(mut self, ty: TypeTag) -> Self {
        self.returns = ty;
        self
    }

    /// Declare an error tag raised as `ValueError`
    pub fn error(self, name: impl Into<String>) -> Self {
        self.error_as(name, ExceptionKind::ValueError)
    }

    /// Declare an error tag raised with a specific exception class
    pub fn error_as(mut self, name: impl Into<String>, kind: ExceptionKind) -> Self {
        let declared = DeclaredError {
            name: name.into(),
            kind,
        };
        match &mut self.errors {
            ErrorSet::Closed(list) => list.push(declared),
            ErrorSet::Open => self.errors = ErrorSet::Closed(vec![declared]),
        }
        self
    }

    /// Accept any error tag
    pub fn open_errors(mut self) -> Self {
        self.errors = ErrorSet::Open;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Human-readable signature, e.g. `add(i32, i32) -> i32`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        format!("{}({}) -> {}", self.name, params.join(", "), self.returns)
    }
}
