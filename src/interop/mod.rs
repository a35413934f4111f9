//! Interoperability - marshal values between native functions and a dynamic host
//!
//! Design: explicit descriptors, strict decoding, ownership-checked encoding
//!
//! Architecture:
//! - `types.rs` - value and type model (TypeTag, IntWidth, Value)
//! - `descriptor.rs` - function signatures and declared error sets
//! - `registry.rs` - frozen, process-wide descriptor table
//! - `host.rs` - host object protocol and exception classes
//! - `dynamic.rs` - in-process host model
//! - `decode.rs` - host objects to native values
//! - `encode.rs` - native values to host objects
//! - `errors.rs` - error taxonomy and exception mapping
//! - `call.rs` - call dispatch under a ledger scope

mod types;
mod descriptor;
mod registry;
mod host;
mod dynamic;
mod decode;
mod encode;
mod errors;
mod call;

pub use types::{BufId, IntWidth, TypeTag, Value};
pub use descriptor::{DeclaredError, ErrorSet, ErrorTag, FunctionDescriptor};
pub use registry::{
    get_or_install, global, install, BoundFunction, FunctionId, NativeFn, Registry, RegistryBuilder,
    RegistryError,
};
pub use host::{ExceptionKind, HostException, HostProtocol, Shape};
pub use dynamic::{DynamicHost, HostValue};
pub use decode::{decode, decode_value, Args};
pub use encode::encode;
pub use errors::{map_error_tag, ArgPath, CallError, DecodeError, EncodeError, NativeFault};
pub use call::{Dispatcher, InteropStats};
