//! Type descriptor registry
//!
//! Two phases:
//! 1. Initialisation - `RegistryBuilder::register` collects descriptors
//! 2. Frozen - `Registry` is immutable and shared read-only by every call
//!
//! Once frozen there is nothing to lock: concurrent lookups are plain reads.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use super::descriptor::FunctionDescriptor;
use super::errors::NativeFault;
use super::types::{TypeTag, Value};
use crate::ledger::Ledger;

/// Bound native function body
///
/// Receives the call's ledger (to read text and sequence arguments and to
/// allocate its result) and the decoded arguments.
pub type NativeFn = fn(&mut Ledger<'_>, &[Value]) -> Result<Value, NativeFault>;

/// Stable index of a registered function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u32);

impl FunctionId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Registration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("function `{0}` is already registered")]
    DuplicateRegistration(String),

    #[error("function `{name}` has an invalid signature: {reason}")]
    InvalidSignature { name: String, reason: String },

    #[error("a module registry is already installed")]
    AlreadyInstalled,
}

/// Descriptor paired with its native body
#[derive(Clone)]
pub struct BoundFunction {
    descriptor: FunctionDescriptor,
    native: NativeFn,
}

impl BoundFunction {
    #[inline]
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    /// Run the native body on already decoded arguments
    #[inline]
    pub fn call(&self, ledger: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
        (self.native)(ledger, args)
    }
}

impl std::fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundFunction")
            .field("signature", &self.descriptor.signature())
            .finish()
    }
}

/// Mutable registry used during initialisation
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    functions: Vec<BoundFunction>,
    by_name: HashMap<String, FunctionId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function
    pub fn register(
        &mut self,
        descriptor: FunctionDescriptor,
        native: NativeFn,
    ) -> Result<FunctionId, RegistryError> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateRegistration(descriptor.name));
        }
        if let Some(index) = descriptor.params.iter().position(|p| !p.is_valid_param()) {
            return Err(RegistryError::InvalidSignature {
                name: descriptor.name,
                reason: format!("parameter {} cannot carry a unit value", index + 1),
            });
        }
        if let TypeTag::Seq(element) = &descriptor.returns {
            if !element.is_valid_param() {
                return Err(RegistryError::InvalidSignature {
                    name: descriptor.name,
                    reason: "sequence elements cannot be unit".to_string(),
                });
            }
        }

        let id = FunctionId(
            u32::try_from(self.functions.len()).map_err(|_| RegistryError::InvalidSignature {
                name: descriptor.name.clone(),
                reason: "too many functions".to_string(),
            })?,
        );
        debug!(function = %descriptor.signature(), "registered native function");
        self.by_name.insert(descriptor.name.clone(), id);
        self.functions.push(BoundFunction { descriptor, native });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// End the initialisation phase
    pub fn freeze(self) -> Registry {
        info!(functions = self.functions.len(), "descriptor registry frozen");
        Registry {
            functions: self.functions.into_boxed_slice(),
            by_name: self.by_name,
        }
    }
}

/// Immutable descriptor table
#[derive(Debug)]
pub struct Registry {
    functions: Box<[BoundFunction]>,
    by_name: HashMap<String, FunctionId>,
}

impl Registry {
    #[inline]
    pub fn lookup(&self, id: FunctionId) -> Option<&BoundFunction> {
        self.functions.get(id.index())
    }

    #[inline]
    pub fn descriptor(&self, id: FunctionId) -> Option<&FunctionDescriptor> {
        self.lookup(id).map(BoundFunction::descriptor)
    }

    pub fn id_of(&self, name: &str) -> Option<FunctionId> {
        self.by_name.get(name).copied()
    }

    pub fn lookup_name(&self, name: &str) -> Option<(FunctionId, &BoundFunction)> {
        let id = self.id_of(name)?;
        self.lookup(id).map(|f| (id, f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, &BoundFunction)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i as u32), f))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// JSON description of every bound signature
    pub fn manifest(&self) -> serde_json::Value {
        let functions: Vec<serde_json::Value> = self
            .functions
            .iter()
            .map(|f| {
                json!({
                    "signature": f.descriptor.signature(),
                    "descriptor": f.descriptor,
                })
            })
            .collect();
        json!({ "functions": functions })
    }
}

static MODULE: OnceCell<Registry> = OnceCell::new();

/// Install the process-wide module registry
pub fn install(registry: Registry) -> Result<&'static Registry, RegistryError> {
    MODULE.set(registry).map_err(|_| RegistryError::AlreadyInstalled)?;
    MODULE.get().ok_or(RegistryError::AlreadyInstalled)
}

/// Install the registry built by `init` unless one is already present
pub fn get_or_install(
    init: impl FnOnce(&mut RegistryBuilder) -> Result<(), RegistryError>,
) -> Result<&'static Registry, RegistryError> {
    MODULE.get_or_try_init(|| {
        let mut builder = RegistryBuilder::new();
        init(&mut builder)?;
        Ok(builder.freeze())
    })
}

/// The installed module registry, if initialisation has happened
pub fn global() -> Option<&'static Registry> {
    MODULE.get()
}
