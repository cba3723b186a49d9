//! Heap-backed stand-in for coherent DMA memory.

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::constants::DMA_PAGE_SIZE;
use crate::dma::{DmaMemory, DmaRegion, PhysAddr};
use crate::error::AllocError;

/// First synthetic bus address handed out.
const BASE_ADDR: PhysAddr = 0x3C00_0000;

/// Allocator producing [`HeapRegion`]s with page-aligned synthetic bus
/// addresses. Tracks live allocations so tests can assert nothing leaks.
#[derive(Debug)]
pub struct HeapMemory {
    next_addr: AtomicU64,
    budget: Option<usize>,
    live_bytes: AtomicUsize,
    live_regions: AtomicUsize,
}

impl HeapMemory {
    /// Unbounded allocator.
    pub fn new() -> Self {
        Self {
            next_addr: AtomicU64::new(BASE_ADDR),
            budget: None,
            live_bytes: AtomicUsize::new(0),
            live_regions: AtomicUsize::new(0),
        }
    }

    /// Allocator that fails once more than `bytes` would be live at once.
    pub fn with_budget(bytes: usize) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::new()
        }
    }

    /// Bytes currently allocated and not yet released.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    /// Regions currently allocated and not yet released.
    pub fn live_regions(&self) -> usize {
        self.live_regions.load(Ordering::SeqCst)
    }
}

impl Default for HeapMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaMemory for HeapMemory {
    type Region = HeapRegion;

    fn alloc(&self, size: usize) -> Result<HeapRegion, AllocError> {
        let reserved = self
            .live_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                let total = live.checked_add(size)?;
                match self.budget {
                    Some(budget) if total > budget => None,
                    _ => Some(total),
                }
            });
        if reserved.is_err() {
            return Err(AllocError::OutOfMemory { size });
        }

        let span = size.div_ceil(DMA_PAGE_SIZE).max(1) * DMA_PAGE_SIZE;
        let phys_addr = self.next_addr.fetch_add(span as u64, Ordering::SeqCst);
        self.live_regions.fetch_add(1, Ordering::SeqCst);

        Ok(HeapRegion {
            phys_addr,
            storage: (0..size).map(|_| UnsafeCell::new(0)).collect(),
        })
    }

    fn release(&self, region: HeapRegion) {
        self.live_bytes.fetch_sub(region.len(), Ordering::SeqCst);
        self.live_regions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Zero-initialised heap memory posing as a DMA region.
pub struct HeapRegion {
    phys_addr: PhysAddr,
    storage: Box<[UnsafeCell<u8>]>,
}

// SAFETY: all access goes through `read_at`/`write_at`, which copy whole
// byte ranges. The ring hands the consumer one period at a time and the
// (simulated) hardware never writes memory, so concurrent copies never
// overlap a region being written.
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    fn check_range(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len);
        assert!(
            end.is_some_and(|end| end <= self.storage.len()),
            "range {offset}+{len} outside region of {} bytes",
            self.storage.len()
        );
    }

    fn base(&self) -> *mut u8 {
        // UnsafeCell<u8> has the same layout as u8; the slice is contiguous.
        UnsafeCell::raw_get(self.storage.as_ptr())
    }
}

impl DmaRegion for HeapRegion {
    fn phys_addr(&self) -> PhysAddr {
        self.phys_addr
    }

    fn len(&self) -> usize {
        self.storage.len()
    }

    fn read_at(&self, offset: usize, out: &mut [u8]) {
        self.check_range(offset, out.len());
        // SAFETY: range checked above; `out` cannot alias the region because
        // the region is only reachable through `&self`.
        unsafe {
            core::ptr::copy_nonoverlapping(self.base().add(offset), out.as_mut_ptr(), out.len());
        }
    }

    fn write_at(&self, offset: usize, data: &[u8]) {
        self.check_range(offset, data.len());
        // SAFETY: range checked above; see the `Sync` impl for aliasing.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(offset), data.len());
        }
    }
}

impl core::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapRegion")
            .field("phys_addr", &format_args!("{:#x}", self.phys_addr))
            .field("len", &self.storage.len())
            .finish()
    }
}
