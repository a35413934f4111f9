//! Native allocator - process-wide heap for buffers that cross the boundary
//!
//! Design: Thin layer over the system allocator with exact accounting:
//! 1. Every live block is recorded (address -> layout) in a concurrent map
//! 2. Outstanding bytes are tracked atomically, so leak checks are a single load
//! 3. Blocks adopted by host objects leave the accounting without being freed
//!
//! The allocator is thread-safe; calls on independent threads share it
//! without a lock on the hot path.


use core::alloc::Layout;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, error, trace};

static GLOBAL: Lazy<NativeAllocator> = Lazy::new(NativeAllocator::new);

/// Initialize the process-wide allocator
pub fn init() {
    Lazy::force(&GLOBAL);
    debug!(target: "allocator", "native allocator ready");
}

/// Allocation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("system allocator returned no memory for {size} bytes")]
    OutOfMemory { size: usize },

    #[error("allocation of {requested} bytes exceeds the native heap limit of {limit} bytes")]
    LimitExceeded { requested: usize, limit: usize },

    #[error("buffer layout overflows the address space")]
    LayoutOverflow,
}

/// Leak-checking allocator for native buffers
pub struct NativeAllocator {
    live: DashMap<usize, Layout>,
    outstanding_bytes: AtomicUsize,
    total_allocs: AtomicUsize,
    total_frees: AtomicUsize,
    total_adopted: AtomicUsize,
    limit: Option<usize>,
}

impl NativeAllocator {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
            outstanding_bytes: AtomicUsize::new(0),
            total_allocs: AtomicUsize::new(0),
            total_frees: AtomicUsize::new(0),
            total_adopted: AtomicUsize::new(0),
            limit: None,
        }
    }

    /// Allocator that refuses to hold more than `limit` outstanding bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// The process-wide instance
    #[inline]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Allocate a block for `layout`
    ///
    /// Zero-sized requests return a dangling, well-aligned pointer and are
    /// not recorded.
    pub fn alloc(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let size = layout.size();
        if size == 0 {
            return NonNull::new(layout.align() as *mut u8).ok_or(AllocError::LayoutOverflow);
        }

        let previous = self.outstanding_bytes.fetch_add(size, Ordering::AcqRel);
        if let Some(limit) = self.limit {
            if previous.saturating_add(size) > limit {
                self.outstanding_bytes.fetch_sub(size, Ordering::AcqRel);
                return Err(AllocError::LimitExceeded { requested: size, limit });
            }
        }

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            self.outstanding_bytes.fetch_sub(size, Ordering::AcqRel);
            return Err(AllocError::OutOfMemory { size });
        };

        self.live.insert(ptr.as_ptr() as usize, layout);
        self.total_allocs.fetch_add(1, Ordering::Relaxed);
        trace!(target: "allocator", size, ptr = ?ptr, "allocated native buffer");
        Ok(ptr)
    }

    /// Return a block to the system allocator
    ///
    /// # Safety
    /// - `ptr` must come from `alloc` on this allocator with the same layout
    /// - The block must not be read or written afterwards
    pub unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        if !self.forget(ptr, layout) {
            return;
        }

        std::alloc::dealloc(ptr.as_ptr(), layout);
        self.total_frees.fetch_add(1, Ordering::Relaxed);
        trace!(target: "allocator", size = layout.size(), ptr = ?ptr, "freed native buffer");
    }

    /// Drop a block from the accounting without freeing it
    ///
    /// Used when a host-side owner adopts the memory; that owner frees it
    /// through the global allocator. Returns `false` if the block was unknown.
    pub fn disown(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        if layout.size() == 0 {
            return true;
        }
        if !self.forget(ptr, layout) {
            return false;
        }

        self.total_adopted.fetch_add(1, Ordering::Relaxed);
        trace!(target: "allocator", size = layout.size(), ptr = ?ptr, "native buffer adopted by host");
        true
    }

    /// Check whether a block is currently owned by the native heap
    pub fn is_live(&self, ptr: NonNull<u8>) -> bool {
        self.live.contains_key(&(ptr.as_ptr() as usize))
    }

    /// Get allocator statistics
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            outstanding_bytes: self.outstanding_bytes.load(Ordering::Acquire),
            outstanding_blocks: self.live.len(),
            total_allocs: self.total_allocs.load(Ordering::Relaxed),
            total_frees: self.total_frees.load(Ordering::Relaxed),
            total_adopted: self.total_adopted.load(Ordering::Relaxed),
        }
    }

    fn forget(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        match self.live.remove(&(ptr.as_ptr() as usize)) {
            Some((_, recorded)) => {
                debug_assert_eq!(recorded, layout, "native buffer released with a different layout");
                self.outstanding_bytes.fetch_sub(recorded.size(), Ordering::AcqRel);
                true
            }
            None => {
                error!(target: "allocator", ptr = ?ptr, "release of a block the native heap does not own");
                debug_assert!(false, "release of a block the native heap does not own");
                false
            }
        }
    }
}

impl Default for NativeAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for NativeAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeAllocator")
            .field("stats", &self.stats())
            .field("limit", &self.limit)
            .finish()
    }
}

/// Allocator statistics for monitoring and leak checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStats {
    pub outstanding_bytes: usize,
    pub outstanding_blocks: usize,
    pub total_allocs: usize,
    pub total_frees: usize,
    pub total_adopted: usize,
}

impl AllocatorStats {
    /// No native block is outstanding
    #[inline]
    pub fn is_balanced(&self) -> bool {
        self.outstanding_bytes == 0 && self.outstanding_blocks == 0
    }
}
