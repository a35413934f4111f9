//! Argument decoding - host objects to native values
//!
//! Design: strict, exact-type acceptance independent of host duck-typing.
//! Each object is classified once through `HostProtocol::shape`; the
//! declared `TypeTag` then decides whether that shape is acceptable.
//! Decoding is all-or-nothing: on failure every buffer built so far for
//! this argument list is freed before the error is returned.

use smallvec::SmallVec;
use tracing::debug;

use super::descriptor::FunctionDescriptor;
use super::errors::{ArgPath, DecodeError};
use super::host::{HostProtocol, Shape};
use super::types::{TypeTag, Value};
use crate::ledger::Ledger;

/// Decoded argument list
pub type Args = SmallVec<[Value; 4]>;

/// Decode a full argument list against a descriptor
pub fn decode<H: HostProtocol>(
    host: &H,
    descriptor: &FunctionDescriptor,
    args: &[H::Object],
    ledger: &mut Ledger<'_>,
) -> Result<Args, DecodeError> {
    if args.len() != descriptor.arity() {
        return Err(DecodeError::Arity {
            expected: descriptor.arity(),
            got: args.len(),
        });
    }

    let mark = ledger.mark();
    let mut decoded = Args::with_capacity(args.len());

    for (index, (obj, ty)) in args.iter().zip(&descriptor.params).enumerate() {
        let mut path = ArgPath::param(index);
        match decode_value(host, obj, ty, ledger, &mut path) {
            Ok(value) => decoded.push(value),
            Err(err) => {
                let freed = ledger.rollback(mark);
                debug!(
                    function = %descriptor.name,
                    error = err.name(),
                    freed,
                    "argument decoding failed"
                );
                return Err(err);
            }
        }
    }

    Ok(decoded)
}

/// Decode a single host object as `ty`
///
/// Buffers allocated here stay in `ledger`; callers that need
/// all-or-nothing behaviour take a `mark` first.
pub fn decode_value<H: HostProtocol>(
    host: &H,
    obj: &H::Object,
    ty: &TypeTag,
    ledger: &mut Ledger<'_>,
    path: &mut ArgPath,
) -> Result<Value, DecodeError> {
    let shape = host.shape(obj);

    match (ty, &shape) {
        (TypeTag::Int(width), Shape::Int) => host
            .int_value(obj)
            .filter(|v| width.contains(*v))
            .map(Value::Int)
            .ok_or_else(|| DecodeError::Range {
                path: path.clone(),
                value: host.repr(obj),
                target: width.to_string(),
            }),

        (TypeTag::Float, Shape::Int | Shape::Float) => {
            host.float_value(obj).map(Value::Float).ok_or_else(|| DecodeError::Range {
                path: path.clone(),
                value: host.repr(obj),
                target: "f64".to_string(),
            })
        }

        (TypeTag::Bool, Shape::Bool) => Ok(Value::Bool(host.bool_value(obj))),

        (TypeTag::Str, Shape::Text) => {
            let text = host.text_value(obj).map_err(|source| DecodeError::Host {
                path: path.clone(),
                source,
            })?;
            ledger.alloc_str(&text).map_err(|source| DecodeError::Allocation {
                path: path.clone(),
                source,
            })
        }

        (TypeTag::Seq(element), Shape::Sequence { len }) => {
            let mut items: SmallVec<[Value; 8]> = SmallVec::with_capacity(*len);
            for index in 0..*len {
                let item = host.item(obj, index).map_err(|source| DecodeError::Host {
                    path: path.clone(),
                    source,
                })?;
                path.indices.push(index);
                items.push(decode_value(host, &item, element, ledger, path)?);
                path.indices.pop();
            }
            ledger.alloc_seq(&items).map_err(|source| DecodeError::Allocation {
                path: path.clone(),
                source,
            })
        }

        _ => Err(mismatch(path, ty, &shape)),
    }
}

fn mismatch(path: &ArgPath, expected: &TypeTag, found: &Shape) -> DecodeError {
    let expected = expected.host_name();
    let found = found.type_name().to_string();
    if path.is_element() {
        DecodeError::ElementType {
            path: path.clone(),
            expected,
            found,
        }
    } else {
        DecodeError::TypeMismatch {
            path: path.clone(),
            expected,
            found,
        }
    }
}
