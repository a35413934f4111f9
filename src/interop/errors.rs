//! Marshalling errors and their mapping onto host exceptions
//!
//! Two taxonomies reach the host and are never conflated:
//! - argument problems (arity, type, range) raise `TypeError`
//! - native error tags raise the class their descriptor declares
//!   (`ValueError` unless stated otherwise)
//!
//! Everything else (allocation failure, a native result that does not
//! match its declared type, ledger misuse) is an internal failure and
//! raises `RuntimeError`.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use super::descriptor::{ErrorTag, FunctionDescriptor};
use super::host::{ExceptionKind, HostException};
use super::types::IntWidth;
use crate::ledger::LedgerError;

/// Location of a value inside the argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgPath {
    /// Zero-based parameter index
    pub param: usize,
    /// Element indices into nested sequences, outermost first
    pub indices: SmallVec<[usize; 2]>,
}

impl ArgPath {
    pub fn param(param: usize) -> Self {
        Self {
            param,
            indices: SmallVec::new(),
        }
    }

    #[inline]
    pub fn is_element(&self) -> bool {
        !self.indices.is_empty()
    }
}

impl fmt::Display for ArgPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "argument {}", self.param + 1)?;
        for index in &self.indices {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

/// Argument decoding failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("takes {expected} argument{} but {got} {} given", plural(.expected), verb(.got))]
    Arity { expected: usize, got: usize },

    #[error("{path} must be {expected}, not {found}")]
    TypeMismatch {
        path: ArgPath,
        expected: String,
        found: String,
    },

    #[error("{path} must be {expected}, not {found}")]
    ElementType {
        path: ArgPath,
        expected: String,
        found: String,
    },

    #[error("{path} value {value} is out of range for {target}")]
    Range {
        path: ArgPath,
        value: String,
        target: String,
    },

    #[error("{path}: {source}")]
    Allocation {
        path: ArgPath,
        #[source]
        source: LedgerError,
    },

    #[error("{path}: {source}")]
    Host {
        path: ArgPath,
        #[source]
        source: HostException,
    },
}

fn plural(n: &usize) -> &'static str {
    if *n == 1 {
        ""
    } else {
        "s"
    }
}

fn verb(n: &usize) -> &'static str {
    if *n == 1 {
        "was"
    } else {
        "were"
    }
}

impl DecodeError {
    /// Taxonomy name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Arity { .. } => "ArityError",
            Self::TypeMismatch { .. } => "TypeMismatchError",
            Self::ElementType { .. } => "ElementTypeError",
            Self::Range { .. } => "RangeError",
            Self::Allocation { .. } => "AllocationFailure",
            Self::Host { .. } => "HostError",
        }
    }

    pub fn path(&self) -> Option<&ArgPath> {
        match self {
            Self::Arity { .. } => None,
            Self::TypeMismatch { path, .. }
            | Self::ElementType { path, .. }
            | Self::Range { path, .. }
            | Self::Allocation { path, .. }
            | Self::Host { path, .. } => Some(path),
        }
    }
}

/// Result encoding failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("native result must be {expected}, got {found}")]
    ReturnType { expected: String, found: &'static str },

    #[error("native result {value} does not fit {width}")]
    Range { value: i64, width: IntWidth },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Host(HostException),
}

/// Failure reported by a native function body
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeFault {
    #[error("native error {0}")]
    Error(ErrorTag),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<ErrorTag> for NativeFault {
    fn from(tag: ErrorTag) -> Self {
        Self::Error(tag)
    }
}

/// Everything that can end a call without a value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("unknown native function `{0}`")]
    UnknownFunction(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("native error {0}")]
    Native(ErrorTag),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<NativeFault> for CallError {
    fn from(fault: NativeFault) -> Self {
        match fault {
            NativeFault::Error(tag) => Self::Native(tag),
            NativeFault::Ledger(err) => Self::Ledger(err),
        }
    }
}

impl CallError {
    /// Argument problem surfaced to the host as `TypeError`
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            Self::Decode(
                DecodeError::Arity { .. }
                    | DecodeError::TypeMismatch { .. }
                    | DecodeError::ElementType { .. }
                    | DecodeError::Range { .. }
            )
        )
    }

    /// Convert into the exception the host will see
    pub fn to_exception(&self, descriptor: &FunctionDescriptor) -> HostException {
        match self {
            Self::Native(tag) => map_error_tag(descriptor, tag),
            Self::Decode(DecodeError::Host { source, .. }) => source.clone(),
            Self::Decode(err) if self.is_argument_error() => {
                HostException::type_error(format!("{}() {}", descriptor.name, err))
            }
            Self::Encode(EncodeError::Host(exc)) => exc.clone(),
            other => HostException::runtime_error(format!("{}(): {}", descriptor.name, other)),
        }
    }
}

/// Map a native error tag to its host exception
///
/// The message is the tag name exactly. Tags the descriptor never declared
/// become a generic `RuntimeError`.
pub fn map_error_tag(descriptor: &FunctionDescriptor, tag: &ErrorTag) -> HostException {
    match descriptor.errors.resolve(tag) {
        Some(kind) => HostException::new(kind, tag.name()),
        None => HostException::new(
            ExceptionKind::RuntimeError,
            format!("unregistered native error: {}", tag.name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::TypeTag;

    fn divide() -> FunctionDescriptor {
        FunctionDescriptor::new("divide")
            .param(TypeTag::Float)
            .param(TypeTag::Float)
            .returns(TypeTag::Float)
            .error("ValueError")
    }

    #[test]
    fn declared_tag_message_is_the_tag_name() {
        let exc = CallError::Native(ErrorTag::new("ValueError").with_message("x / 0"))
            .to_exception(&divide());
        assert_eq!(exc.kind, ExceptionKind::ValueError);
        assert_eq!(exc.to_string(), "ValueError");
    }

    #[test]
    fn unknown_tag_is_generic_failure() {
        let exc = map_error_tag(&divide(), &ErrorTag::new("Surprise"));
        assert_eq!(exc.kind, ExceptionKind::RuntimeError);
        assert_eq!(exc.message, "unregistered native error: Surprise");
    }

    #[test]
    fn argument_errors_are_type_errors() {
        let exc = CallError::Decode(DecodeError::Arity { expected: 2, got: 1 }).to_exception(&divide());
        assert_eq!(exc.kind, ExceptionKind::TypeError);
        assert_eq!(exc.message, "divide() takes 2 arguments but 1 was given");

        let mut path = ArgPath::param(0);
        path.indices.push(3);
        let err = DecodeError::ElementType {
            path,
            expected: "int".into(),
            found: "float".into(),
        };
        assert_eq!(err.to_string(), "argument 1[3] must be int, not float");
        assert_eq!(CallError::from(err).to_exception(&divide()).kind, ExceptionKind::TypeError);
    }

    #[test]
    fn allocation_failure_is_internal() {
        let err = CallError::Ledger(LedgerError::BudgetExceeded { limit: 8, requested: 16 });
        assert_eq!(err.to_exception(&divide()).kind, ExceptionKind::RuntimeError);
    }
}
