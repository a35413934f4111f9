//! Call dispatch - decode, invoke, encode under one ledger scope
//!
//! Control flow per call:
//!
//! ```text
//!   raw host args --decode--> Values --native fn--> Value | ErrorTag
//!                                                  |          |
//!                                               encode    map_error_tag
//!                                                  |          |
//!                                              host object  host exception
//! ```
//!
//! The ledger lives on the dispatcher's stack frame and is closed when the
//! frame unwinds, so buffers are released on every exit path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, debug_span, info};

use super::decode::decode;
use super::encode::encode;
use super::errors::CallError;
use super::host::{HostException, HostProtocol};
use super::registry::{BoundFunction, FunctionId, Registry};
use crate::allocator::NativeAllocator;
use crate::config::BridgeConfig;
use crate::ledger::Ledger;

/// Dispatches host calls to bound native functions
pub struct Dispatcher<'r> {
    registry: &'r Registry,
    allocator: &'r NativeAllocator,
    max_call_bytes: Option<usize>,
    trace_calls: bool,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    calls: AtomicUsize,
    invocations: AtomicUsize,
    decode_failures: AtomicUsize,
    native_errors: AtomicUsize,
    internal_failures: AtomicUsize,
}

impl<'r> Dispatcher<'r> {
    /// Dispatcher over `registry` using the process-wide allocator
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            allocator: NativeAllocator::global(),
            max_call_bytes: None,
            trace_calls: false,
            counters: Counters::default(),
        }
    }

    pub fn with_allocator(mut self, allocator: &'r NativeAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_config(mut self, config: &BridgeConfig) -> Self {
        self.max_call_bytes = config.max_call_bytes;
        self.trace_calls = config.trace_calls;
        self
    }

    #[inline]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    #[inline]
    pub fn allocator(&self) -> &'r NativeAllocator {
        self.allocator
    }

    /// Invoke a function, translating failures into host exceptions
    pub fn invoke<H: HostProtocol>(
        &self,
        host: &H,
        id: FunctionId,
        args: &[H::Object],
    ) -> Result<H::Object, HostException> {
        let Some(function) = self.registry.lookup(id) else {
            return Err(HostException::runtime_error(format!("unknown native function id {}", id.index())));
        };
        self.call(host, id, args)
            .map_err(|err| err.to_exception(function.descriptor()))
    }

    /// Invoke a function by name
    pub fn invoke_by_name<H: HostProtocol>(
        &self,
        host: &H,
        name: &str,
        args: &[H::Object],
    ) -> Result<H::Object, HostException> {
        match self.registry.id_of(name) {
            Some(id) => self.invoke(host, id, args),
            None => Err(HostException::runtime_error(
                CallError::UnknownFunction(name.to_string()).to_string(),
            )),
        }
    }

    /// Invoke a function and report the untranslated outcome
    pub fn call<H: HostProtocol>(
        &self,
        host: &H,
        id: FunctionId,
        args: &[H::Object],
    ) -> Result<H::Object, CallError> {
        let function = self
            .registry
            .lookup(id)
            .ok_or_else(|| CallError::UnknownFunction(format!("#{}", id.index())))?;
        let descriptor = function.descriptor();

        let span = debug_span!("call", function = %descriptor.name, args = args.len());
        let _enter = span.enter();
        let started = self.trace_calls.then(Instant::now);
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        let mut ledger = Ledger::new(self.allocator).with_budget(self.max_call_bytes);

        let outcome = self.run(host, function, args, &mut ledger);
        let released = ledger.release_all();

        match &outcome {
            Ok(_) => debug!(released, "call completed"),
            Err(err) => {
                let counter = match err {
                    CallError::Decode(_) => &self.counters.decode_failures,
                    CallError::Native(_) => &self.counters.native_errors,
                    _ => &self.counters.internal_failures,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(released, error = %err, "call failed");
            }
        }

        if let Some(started) = started {
            info!(
                function = %descriptor.name,
                elapsed_us = started.elapsed().as_micros() as u64,
                ok = outcome.is_ok(),
                "native call"
            );
        }

        outcome
    }

    fn run<H: HostProtocol>(
        &self,
        host: &H,
        function: &BoundFunction,
        args: &[H::Object],
        ledger: &mut Ledger<'_>,
    ) -> Result<H::Object, CallError> {
        let descriptor = function.descriptor();
        let decoded = decode(host, descriptor, args, ledger)?;

        self.counters.invocations.fetch_add(1, Ordering::Relaxed);
        let value = function.call(ledger, &decoded)?;

        Ok(encode(host, &descriptor.returns, value, ledger)?)
    }

    /// Snapshot of dispatch counters
    pub fn stats(&self) -> InteropStats {
        InteropStats {
            calls_made: self.counters.calls.load(Ordering::Relaxed),
            native_invocations: self.counters.invocations.load(Ordering::Relaxed),
            marshaling_errors: self.counters.decode_failures.load(Ordering::Relaxed),
            native_errors: self.counters.native_errors.load(Ordering::Relaxed),
            internal_failures: self.counters.internal_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Dispatcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("functions", &self.registry.len())
            .field("max_call_bytes", &self.max_call_bytes)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteropStats {
    pub calls_made: usize,
    /// Calls whose arguments decoded and reached native code
    pub native_invocations: usize,
    /// Calls rejected while decoding arguments
    pub marshaling_errors: usize,
    pub native_errors: usize,
    pub internal_failures: usize,
}
