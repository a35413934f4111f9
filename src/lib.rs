//! Typthon Bind - value marshalling between typed native functions and a dynamic host
//!
//! Native functions are described by explicit `FunctionDescriptor`s and
//! registered once. Each host call is decoded, run, and encoded under a
//! call-scoped `Ledger` that guarantees every native buffer is either
//! released or handed to the host exactly once.

pub mod allocator;
pub mod config;
pub mod interop;
pub mod ledger;
pub mod logging;
pub mod samples;

#[cfg(feature = "python")]
pub mod python;

// Re-export core types
pub use allocator::{AllocError, AllocatorStats, NativeAllocator};
pub use config::{BridgeConfig, ConfigError};
pub use interop::{
    CallError, Dispatcher, ErrorSet, ErrorTag, ExceptionKind, FunctionDescriptor, FunctionId,
    HostException, HostProtocol, IntWidth, Registry, RegistryBuilder, TypeTag, Value,
};
pub use ledger::{Ledger, LedgerError, Owner};

/// Bridge initialization
pub fn init() {
    allocator::init();
}
