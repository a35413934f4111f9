//! Result encoding - native values to host objects
//!
//! Ownership rules:
//! - scalars are copied, nothing crosses the boundary
//! - text buffers are transferred into the host text object
//! - sequence backing buffers are released once every element is encoded
//!
//! All of this happens before `encode` returns, so the host never holds an
//! object that aliases a buffer the native side will free later.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::errors::EncodeError;
use super::host::HostProtocol;
use super::types::{BufId, TypeTag, Value};
use crate::ledger::{Ledger, Owner};

/// Encode a native value of declared type `ty` into a host object
pub fn encode<H: HostProtocol>(
    host: &H,
    ty: &TypeTag,
    value: Value,
    ledger: &mut Ledger<'_>,
) -> Result<H::Object, EncodeError> {
    let mut encoder = Encoder {
        host,
        ledger: &mut *ledger,
        texts: HashMap::new(),
        backing: SmallVec::new(),
    };
    let result = encoder.value(ty, value);
    let backing = std::mem::take(&mut encoder.backing);

    // Backing stores go back to the native heap whether or not encoding
    // succeeded; a sequence may be referenced more than once.
    for id in backing {
        if ledger.owner(id) == Some(Owner::Native) {
            ledger.release(id)?;
        }
    }

    result
}

struct Encoder<'h, 'l, 'a, H: HostProtocol> {
    host: &'h H,
    ledger: &'l mut Ledger<'a>,
    /// Text buffers already handed to the host, by buffer
    texts: HashMap<BufId, H::Object>,
    /// Sequence buffers to release once encoding is complete
    backing: SmallVec<[BufId; 4]>,
}

impl<H: HostProtocol> Encoder<'_, '_, '_, H> {
    fn value(&mut self, ty: &TypeTag, value: Value) -> Result<H::Object, EncodeError> {
        match (ty, value) {
            (TypeTag::Unit, Value::Unit) => Ok(self.host.none()),

            (TypeTag::Int(width), Value::Int(v)) => {
                if width.contains(v) {
                    Ok(self.host.new_int(v))
                } else {
                    Err(EncodeError::Range { value: v, width: *width })
                }
            }

            (TypeTag::Float, Value::Float(v)) => Ok(self.host.new_float(v)),

            (TypeTag::Bool, Value::Bool(v)) => Ok(self.host.new_bool(v)),

            (TypeTag::Str, Value::Str(id)) => {
                if let Some(obj) = self.texts.get(&id) {
                    return Ok(obj.clone());
                }
                let text = self.ledger.take_string(value)?;
                let obj = self.host.new_text(text);
                self.texts.insert(id, obj.clone());
                Ok(obj)
            }

            (TypeTag::Seq(element), Value::Seq(id)) => {
                let items: SmallVec<[Value; 16]> = SmallVec::from_slice(self.ledger.seq(value)?);
                if !self.backing.contains(&id) {
                    self.backing.push(id);
                }
                let mut objects = Vec::with_capacity(items.len());
                for item in items {
                    objects.push(self.value(element, item)?);
                }
                self.host.new_list(objects).map_err(EncodeError::Host)
            }

            (expected, found) => Err(EncodeError::ReturnType {
                expected: expected.to_string(),
                found: found.kind_name(),
            }),
        }
    }
}
