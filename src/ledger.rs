//! Allocation ledger - per-call ownership bookkeeping for native buffers
//!
//! Every heap buffer a call creates (decoded text, sequence backing stores,
//! buffers built by the native function) is tracked here with exactly one
//! owner at a time:
//!
//! ```text
//!   Native --release--> Released
//!   Native --transfer-> Host      (dropped from the ledger, never freed here)
//! ```
//!
//! Reads are only permitted while a buffer is native-owned. The ledger is
//! closed on drop, so every remaining native buffer is freed on every exit
//! path of a call.

use core::alloc::Layout;
use core::ptr::NonNull;

use thiserror::Error;
use tracing::{error, trace};

use crate::allocator::{AllocError, NativeAllocator};
use crate::interop::{BufId, Value};

/// Current owner of a tracked buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Native,
    Host,
    Released,
}

/// What a buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// UTF-8 bytes
    Text,
    /// Contiguous `Value`s
    Seq,
}

impl BufferKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Text => "str",
            Self::Seq => "seq",
        }
    }
}

/// One native buffer and its ownership state
#[derive(Debug)]
pub struct AllocationRecord {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
    kind: BufferKind,
    owner: Owner,
}

impl AllocationRecord {
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Element count (bytes for text, values for sequences)
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    #[inline]
    pub fn owner(&self) -> Owner {
        self.owner
    }
}

/// Ledger bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("allocation failure: {0}")]
    AllocationFailure(#[from] AllocError),

    #[error("allocation failure: call budget of {limit} bytes exhausted ({requested} more requested)")]
    BudgetExceeded { limit: usize, requested: usize },

    #[error("buffer {0} was transferred to the host")]
    UseAfterTransfer(BufId),

    #[error("buffer {0} was already released")]
    UseAfterRelease(BufId),

    #[error("buffer {0} released twice")]
    DoubleRelease(BufId),

    #[error("buffer {0} is not tracked by this call")]
    UnknownBuffer(BufId),

    #[error("expected a {expected} value, found {found}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("buffer {0} does not hold valid UTF-8")]
    InvalidText(BufId),
}

impl LedgerError {
    /// Allocation could not be satisfied (heap or call budget)
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::AllocationFailure(_) | Self::BudgetExceeded { .. })
    }
}

/// Position in the ledger, used to undo a partially built result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// Call-scoped ownership ledger
pub struct Ledger<'a> {
    allocator: &'a NativeAllocator,
    records: Vec<AllocationRecord>,
    budget: Option<usize>,
    used: usize,
}

impl<'a> Ledger<'a> {
    pub fn new(allocator: &'a NativeAllocator) -> Self {
        Self {
            allocator,
            records: Vec::new(),
            budget: None,
            used: 0,
        }
    }

    /// Cap the bytes this call may allocate
    pub fn with_budget(mut self, budget: Option<usize>) -> Self {
        self.budget = budget;
        self
    }

    /// Start tracking a buffer; the ledger becomes responsible for freeing it
    pub(crate) fn track(&mut self, record: AllocationRecord) -> Result<BufId, LedgerError> {
        let index = u32::try_from(self.records.len()).map_err(|_| AllocError::LayoutOverflow)?;
        let id = BufId(index);
        trace!(target: "ledger", id = %id, size = record.size(), kind = record.kind.name(), "tracking buffer");
        self.records.push(record);
        Ok(id)
    }

    fn allocate(&mut self, layout: Layout, len: usize, kind: BufferKind) -> Result<BufId, LedgerError> {
        if let Some(limit) = self.budget {
            if self.used.saturating_add(layout.size()) > limit {
                return Err(LedgerError::BudgetExceeded {
                    limit,
                    requested: layout.size(),
                });
            }
        }

        let ptr = self.allocator.alloc(layout)?;
        self.used += layout.size();

        let record = AllocationRecord {
            ptr,
            layout,
            len,
            kind,
            owner: Owner::Native,
        };
        match self.track(record) {
            Ok(id) => Ok(id),
            Err(err) => {
                // SAFETY: the block was just allocated with this layout and never shared.
                unsafe { self.allocator.free(ptr, layout) };
                Err(err)
            }
        }
    }

    /// Copy text into a new native buffer
    pub fn alloc_str(&mut self, text: &str) -> Result<Value, LedgerError> {
        let bytes = text.as_bytes();
        let layout = Layout::array::<u8>(bytes.len()).map_err(|_| AllocError::LayoutOverflow)?;
        let id = self.allocate(layout, bytes.len(), BufferKind::Text)?;
        let ptr = self.records[id.index()].ptr;

        // SAFETY: fresh block of exactly `bytes.len()` bytes.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        Ok(Value::Str(id))
    }

    /// Copy values into a new native sequence buffer
    pub fn alloc_seq(&mut self, items: &[Value]) -> Result<Value, LedgerError> {
        let layout = Layout::array::<Value>(items.len()).map_err(|_| AllocError::LayoutOverflow)?;
        let id = self.allocate(layout, items.len(), BufferKind::Seq)?;
        let ptr = self.records[id.index()].ptr;

        // SAFETY: fresh block sized and aligned for `items.len()` values; `Value` is `Copy`.
        unsafe {
            core::ptr::copy_nonoverlapping(items.as_ptr(), ptr.as_ptr().cast::<Value>(), items.len())
        };
        Ok(Value::Seq(id))
    }

    /// Fill a new native sequence buffer from an iterator of known length
    ///
    /// Avoids an intermediate host-heap copy for generated sequences.
    pub fn alloc_seq_iter<I>(&mut self, items: I) -> Result<Value, LedgerError>
    where
        I: ExactSizeIterator<Item = Value>,
    {
        let len = items.len();
        let layout = Layout::array::<Value>(len).map_err(|_| AllocError::LayoutOverflow)?;
        let id = self.allocate(layout, len, BufferKind::Seq)?;
        let ptr = self.records[id.index()].ptr.as_ptr().cast::<Value>();

        let mut written = 0;
        for item in items.take(len) {
            // SAFETY: `written < len`, so the slot lies inside the fresh block.
            unsafe { ptr.add(written).write(item) };
            written += 1;
        }
        // A short iterator leaves the tail unread.
        self.records[id.index()].len = written;
        Ok(Value::Seq(id))
    }

    /// Borrow the text behind a `Value::Str`
    pub fn str(&self, value: Value) -> Result<&str, LedgerError> {
        let Value::Str(id) = value else {
            return Err(LedgerError::WrongKind {
                expected: "str",
                found: value.kind_name(),
            });
        };
        let record = self.readable(id, BufferKind::Text)?;

        // SAFETY: native-owned records are live and were fully initialised on allocation.
        let bytes = unsafe { core::slice::from_raw_parts(record.ptr.as_ptr(), record.len) };
        core::str::from_utf8(bytes).map_err(|_| LedgerError::InvalidText(id))
    }

    /// Borrow the elements behind a `Value::Seq`
    pub fn seq(&self, value: Value) -> Result<&[Value], LedgerError> {
        let Value::Seq(id) = value else {
            return Err(LedgerError::WrongKind {
                expected: "seq",
                found: value.kind_name(),
            });
        };
        let record = self.readable(id, BufferKind::Seq)?;

        // SAFETY: native-owned records are live and hold `len` initialised values.
        Ok(unsafe { core::slice::from_raw_parts(record.ptr.as_ptr().cast::<Value>(), record.len) })
    }

    /// Hand a text buffer to the host as an owned `String`
    ///
    /// The buffer is transferred, not copied: afterwards the ledger will
    /// neither read nor free it.
    pub fn take_string(&mut self, value: Value) -> Result<String, LedgerError> {
        let Value::Str(id) = value else {
            return Err(LedgerError::WrongKind {
                expected: "str",
                found: value.kind_name(),
            });
        };
        self.str(value)?;
        let (ptr, len) = {
            let record = &self.records[id.index()];
            (record.ptr, record.len)
        };
        self.transfer(id)?;

        // SAFETY: the block was allocated by the global allocator as `[u8; len]`,
        // holds valid UTF-8, and no longer belongs to the native side.
        Ok(unsafe { String::from_raw_parts(ptr.as_ptr(), len, len) })
    }

    /// Mark a buffer as host-owned without freeing it
    ///
    /// The new owner is responsible for freeing the block through the
    /// global allocator.
    pub fn transfer(&mut self, id: BufId) -> Result<(), LedgerError> {
        let allocator = self.allocator;
        let record = self.record_mut(id)?;
        match record.owner {
            Owner::Native => {
                if !allocator.disown(record.ptr, record.layout) {
                    return Err(LedgerError::UnknownBuffer(id));
                }
                record.owner = Owner::Host;
                trace!(target: "ledger", id = %id, size = record.size(), "buffer transferred to host");
                Ok(())
            }
            Owner::Host => Err(LedgerError::UseAfterTransfer(id)),
            Owner::Released => Err(LedgerError::UseAfterRelease(id)),
        }
    }

    /// Free a native-owned buffer now
    pub fn release(&mut self, id: BufId) -> Result<(), LedgerError> {
        let allocator = self.allocator;
        let record = self.record_mut(id)?;
        match record.owner {
            Owner::Native => {
                // SAFETY: native-owned records are live blocks from this allocator.
                unsafe { allocator.free(record.ptr, record.layout) };
                record.owner = Owner::Released;
                trace!(target: "ledger", id = %id, size = record.size(), "buffer released");
                Ok(())
            }
            Owner::Host => Err(LedgerError::UseAfterTransfer(id)),
            Owner::Released => {
                error!(target: "ledger", id = %id, "double release of native buffer");
                debug_assert!(false, "double release of native buffer {}", id);
                Err(LedgerError::DoubleRelease(id))
            }
        }
    }

    /// Free every buffer still owned by the native side and close the scope
    ///
    /// Host-owned entries are simply dropped. Returns the number of buffers freed.
    pub fn release_all(&mut self) -> usize {
        let mut freed = 0;
        for record in self.records.drain(..) {
            if record.owner == Owner::Native {
                // SAFETY: native-owned records are live blocks from this allocator.
                unsafe { self.allocator.free(record.ptr, record.layout) };
                freed += 1;
            }
        }
        if freed > 0 {
            trace!(target: "ledger", freed, "ledger scope closed");
        }
        freed
    }

    /// Current position, for `rollback`
    #[inline]
    pub fn mark(&self) -> Mark {
        Mark(self.records.len())
    }

    /// Free every native buffer tracked since `mark` and forget those records
    ///
    /// Bytes of forgotten records no longer count against the call budget,
    /// except those the host adopted.
    pub fn rollback(&mut self, mark: Mark) -> usize {
        let mut freed = 0;
        for record in self.records.drain(mark.0..) {
            match record.owner {
                Owner::Native => {
                    // SAFETY: native-owned records are live blocks from this allocator.
                    unsafe { self.allocator.free(record.ptr, record.layout) };
                    freed += 1;
                }
                Owner::Released => {}
                Owner::Host => continue,
            }
            self.used = self.used.saturating_sub(record.layout.size());
        }
        freed
    }

    pub fn owner(&self, id: BufId) -> Option<Owner> {
        self.records.get(id.index()).map(|r| r.owner)
    }

    pub fn record(&self, id: BufId) -> Option<&AllocationRecord> {
        self.records.get(id.index())
    }

    /// Number of buffers still owned by the native side
    pub fn outstanding(&self) -> usize {
        self.records.iter().filter(|r| r.owner == Owner::Native).count()
    }

    /// Bytes allocated through this ledger so far
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.used
    }

    fn record_mut(&mut self, id: BufId) -> Result<&mut AllocationRecord, LedgerError> {
        self.records.get_mut(id.index()).ok_or(LedgerError::UnknownBuffer(id))
    }

    fn readable(&self, id: BufId, kind: BufferKind) -> Result<&AllocationRecord, LedgerError> {
        let record = self.records.get(id.index()).ok_or(LedgerError::UnknownBuffer(id))?;
        match record.owner {
            Owner::Native if record.kind == kind => Ok(record),
            Owner::Native => Err(LedgerError::WrongKind {
                expected: kind.name(),
                found: record.kind.name(),
            }),
            Owner::Host => Err(LedgerError::UseAfterTransfer(id)),
            Owner::Released => Err(LedgerError::UseAfterRelease(id)),
        }
    }
}

impl Drop for Ledger<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl core::fmt::Debug for Ledger<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ledger")
            .field("records", &self.records.len())
            .field("outstanding", &self.outstanding())
            .field("bytes_used", &self.used)
            .field("budget", &self.budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trips_through_native_buffer() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);

        let value = ledger.alloc_str("世界").unwrap();
        assert_eq!(ledger.str(value).unwrap(), "世界");
        assert_eq!(heap.stats().outstanding_bytes, "世界".len());
    }

    #[test]
    fn drop_releases_everything() {
        let heap = NativeAllocator::new();
        {
            let mut ledger = Ledger::new(&heap);
            let a = ledger.alloc_str("abc").unwrap();
            let items = [Value::Int(1), a, Value::Int(3)];
            ledger.alloc_seq(&items).unwrap();
            assert_eq!(ledger.outstanding(), 2);
        }
        assert!(heap.stats().is_balanced());
    }

    #[test]
    fn release_all_leaves_no_native_records() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);
        ledger.alloc_str("x").unwrap();
        ledger.alloc_seq(&[Value::Bool(true)]).unwrap();

        assert_eq!(ledger.release_all(), 2);
        assert_eq!(ledger.outstanding(), 0);
        assert!(heap.stats().is_balanced());
        assert_eq!(ledger.release_all(), 0);
    }

    #[test]
    fn transfer_blocks_further_native_access() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);

        let value = ledger.alloc_str("owned").unwrap();
        let Value::Str(id) = value else { unreachable!() };

        let text = ledger.take_string(value).unwrap();
        assert_eq!(text, "owned");
        assert_eq!(ledger.owner(id), Some(Owner::Host));
        assert_eq!(ledger.str(value), Err(LedgerError::UseAfterTransfer(id)));
        assert_eq!(ledger.release(id), Err(LedgerError::UseAfterTransfer(id)));

        // Host copy is accounted outside the native heap
        let stats = heap.stats();
        assert!(stats.is_balanced());
        assert_eq!(stats.total_adopted, 1);

        // Closing the scope does not touch host-owned buffers
        assert_eq!(ledger.release_all(), 0);
        assert_eq!(heap.stats().total_frees, 0);
    }

    #[test]
    fn empty_text_transfer() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);
        let value = ledger.alloc_str("").unwrap();
        assert_eq!(ledger.take_string(value).unwrap(), "");
        assert!(heap.stats().is_balanced());
    }

    #[test]
    fn sequence_from_iterator() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);
        let value = ledger.alloc_seq_iter((0..3usize).map(|i| Value::Int(i as i64))).unwrap();
        assert_eq!(ledger.seq(value).unwrap(), &[Value::Int(0), Value::Int(1), Value::Int(2)]);
        assert_eq!(heap.stats().outstanding_bytes, 3 * core::mem::size_of::<Value>());
    }

    #[test]
    fn released_buffer_is_unreadable() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);
        let value = ledger.alloc_seq(&[Value::Int(7)]).unwrap();
        let Value::Seq(id) = value else { unreachable!() };

        ledger.release(id).unwrap();
        assert_eq!(ledger.seq(value), Err(LedgerError::UseAfterRelease(id)));
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "double release")]
    fn double_release_fails_loudly() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);
        let Value::Seq(id) = ledger.alloc_seq(&[]).unwrap() else { unreachable!() };
        ledger.release(id).unwrap();
        let _ = ledger.release(id);
    }

    #[test]
    fn rollback_frees_only_newer_records() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap);

        let kept = ledger.alloc_str("kept").unwrap();
        let mark = ledger.mark();
        ledger.alloc_str("dropped").unwrap();
        ledger.alloc_seq(&[Value::Int(1), Value::Int(2)]).unwrap();

        assert_eq!(ledger.rollback(mark), 2);
        assert_eq!(ledger.outstanding(), 1);
        assert_eq!(ledger.str(kept).unwrap(), "kept");
        assert_eq!(heap.stats().outstanding_bytes, 4);
    }

    #[test]
    fn rollback_refunds_the_call_budget() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap).with_budget(Some(8));

        ledger.alloc_str("1234").unwrap();
        let mark = ledger.mark();
        ledger.alloc_str("5678").unwrap();
        assert_eq!(ledger.bytes_used(), 8);

        ledger.rollback(mark);
        assert_eq!(ledger.bytes_used(), 4);
        let retry = ledger.alloc_str("abcd").unwrap();
        assert_eq!(ledger.str(retry).unwrap(), "abcd");
        assert!(ledger.alloc_str("!").unwrap_err().is_allocation_failure());
    }

    #[test]
    fn budget_limits_call_allocation() {
        let heap = NativeAllocator::new();
        let mut ledger = Ledger::new(&heap).with_budget(Some(8));

        ledger.alloc_str("12345678").unwrap();
        let err = ledger.alloc_str("9").unwrap_err();
        assert!(err.is_allocation_failure());
        assert_eq!(err, LedgerError::BudgetExceeded { limit: 8, requested: 1 });
    }

    #[test]
    fn heap_limit_surfaces_as_allocation_failure() {
        let heap = NativeAllocator::with_limit(4);
        let mut ledger = Ledger::new(&heap);
        let err = ledger.alloc_str("too long").unwrap_err();
        assert!(matches!(err, LedgerError::AllocationFailure(AllocError::LimitExceeded { .. })));
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let heap = NativeAllocator::new();
        let ledger = Ledger::new(&heap);
        assert_eq!(
            ledger.seq(Value::Int(3)),
            Err(LedgerError::WrongKind { expected: "seq", found: "int" })
        );
    }
}
