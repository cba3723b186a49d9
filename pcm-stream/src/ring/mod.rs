//! Period ring buffer shared between a DMA completion context and one
//! blocking consumer.
//!
//! ## Accounting
//!
//! The ring tracks an explicit count of ready periods rather than comparing
//! offsets. Coinciding producer and consumer offsets are ambiguous (full or
//! empty); the count is not, and an overrun is simply the count exceeding the
//! ring's period count.
//!
//! The producer's period index and the ready count live in one `AtomicU64`
//! (`fill`), so the completion hook advances both in a single
//! read-modify-write and a concurrent [`reset()`](RingBuffer::reset) is
//! observed either entirely before or entirely after it.
//!
//! ```text
//!            consumer_offset           producer_offset
//!                  │                         │
//!  ┌───────┬───────▼───────┬───────┬─────────▼─────┐
//!  │ free  │ ready │ ready │ ready │ hw busy       │   available = 3 periods
//!  └───────┴───────┴───────┴───────┴───────────────┘
//! ```
//!
//! ## Contexts
//!
//! | Context | Calls | Touches |
//! |---------|-------|---------|
//! | Completion (producer) | [`on_period_complete()`](RingBuffer::on_period_complete) | `fill`, `xruns`, signal |
//! | Consumer (one thread) | [`read()`](RingBuffer::read) / [`write()`](RingBuffer::write) | `consumer_offset`, `fill`, memory |
//! | Control | [`reset()`](RingBuffer::reset), [`release()`](RingBuffer::release) | everything, under the region lock |
//!
//! The producer never blocks: it uses atomic read-modify-write on the shared
//! counters and a `try_lock`-based wake-up ([`PeriodSignal`]). `reset` may
//! overlap the producer; `release` requires it stopped.
//!
//! The consumer holds the region lock for the whole copy and re-checks
//! readiness under it, so a `reset` that lands between the wait and the copy
//! sends the consumer back to waiting instead of copying a period that is no
//! longer accounted for.

mod signal;

pub use signal::PeriodSignal;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::dma::{CyclicTransfer, Direction, DmaMemory, DmaRegion, PhysAddr};
use crate::error::{Error, Result};
use crate::geometry::PeriodGeometry;

/// Ring of fixed-size periods over one DMA region.
///
/// See the [module documentation](self) for the concurrency contract: one
/// producer (the completion hook) and at most one consumer at a time.
pub struct RingBuffer<R> {
    geometry: PeriodGeometry,
    phys_addr: PhysAddr,
    /// `None` once released. Locked by the consumer for each copy and by the
    /// control path; never by the producer.
    region: Mutex<Option<R>>,
    /// Producer period index (high half) and ready periods (low half).
    fill: AtomicU64,
    consumer_offset: AtomicUsize,
    xruns: AtomicU32,
    released: AtomicBool,
    signal: PeriodSignal,
}

impl<R: DmaRegion> RingBuffer<R> {
    /// Allocate a ring of `period_count` periods of `period_frames` stereo
    /// frames from `memory`. Offsets and counters start at zero.
    pub fn init<M>(memory: &M, period_frames: u32, period_count: u32) -> Result<Self>
    where
        M: DmaMemory<Region = R>,
    {
        let geometry = PeriodGeometry::new(period_frames, period_count)?;
        Self::with_geometry(memory, geometry)
    }

    /// Allocate a ring with an already validated layout.
    pub fn with_geometry<M>(memory: &M, geometry: PeriodGeometry) -> Result<Self>
    where
        M: DmaMemory<Region = R>,
    {
        let region = memory.alloc(geometry.total_size())?;
        debug_assert_eq!(region.len(), geometry.total_size());
        let phys_addr = region.phys_addr();

        debug!(
            period_size = geometry.period_size(),
            total_size = geometry.total_size(),
            phys_addr,
            "ring buffer allocated"
        );

        Ok(Self {
            geometry,
            phys_addr,
            region: Mutex::new(Some(region)),
            fill: AtomicU64::new(0),
            consumer_offset: AtomicUsize::new(0),
            xruns: AtomicU32::new(0),
            released: AtomicBool::new(false),
            signal: PeriodSignal::new(),
        })
    }

    /// Return the memory to `memory`. Blocked consumers wake up with
    /// [`Error::NotRunning`]; later calls are no-ops.
    ///
    /// The producer must already be stopped.
    pub fn release<M>(&self, memory: &M)
    where
        M: DmaMemory<Region = R>,
    {
        self.released.store(true, Ordering::SeqCst);
        self.signal.raise();

        if let Some(region) = self.lock_region().take() {
            memory.release(region);
            debug!(phys_addr = self.phys_addr, "ring buffer released");
        }
    }

    /// Copy one period from the ring into `out` (capture direction).
    ///
    /// Blocks until a full period is available. Fails fast with
    /// [`Error::SizeMismatch`] or [`Error::Overrun`] without touching the
    /// ring, and with [`Error::Busy`] if another thread is already blocked
    /// on this ring.
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        self.transfer(out.len(), |region, offset| region.read_at(offset, out))
    }

    /// Copy one period from `data` into the ring (playback direction).
    ///
    /// Same blocking and failure rules as [`read()`](Self::read).
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.transfer(data.len(), |region, offset| region.write_at(offset, data))
    }

    fn transfer(&self, size: usize, copy: impl FnOnce(&R, usize)) -> Result<usize> {
        let period_size = self.geometry.period_size();
        if size != period_size {
            return Err(Error::SizeMismatch {
                expected: period_size,
                actual: size,
            });
        }

        loop {
            self.wait_until_available(period_size)?;

            let region = self.lock_region();
            let Some(region) = region.as_ref() else {
                return Err(Error::NotRunning);
            };
            // A reset may have landed since the wait returned.
            match self.poll(period_size) {
                Some(Ok(())) => {}
                Some(Err(err)) => return Err(err),
                None => continue,
            }

            let offset = self.consumer_offset.load(Ordering::Acquire);
            copy(region, offset);
            self.consumer_offset
                .store(self.geometry.advance(offset), Ordering::Release);
            let _ = self
                .fill
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |fill| {
                    let (index, periods) = unpack(fill);
                    Some(pack(index, periods.saturating_sub(1)))
                });

            trace!(offset, "period transferred");
            return Ok(period_size);
        }
    }

    /// Completion hook: one more period has been transferred by hardware.
    ///
    /// Runs in the completion context. Never blocks, allocates or logs.
    pub fn on_period_complete(&self) {
        let count = self.geometry.period_count();
        let previous = self
            .fill
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |fill| {
                let (index, periods) = unpack(fill);
                Some(pack((index + 1) % count, periods.saturating_add(1)))
            })
            .unwrap_or_else(|fill| fill);

        if unpack(previous).1 >= count {
            self.xruns.fetch_add(1, Ordering::SeqCst);
        }

        self.signal.raise();
    }

    /// Snapshot of the bytes the consumer may transfer.
    pub fn available(&self) -> usize {
        let (_, periods) = unpack(self.fill.load(Ordering::SeqCst));
        (periods as usize).saturating_mul(self.geometry.period_size())
    }

    /// Block until at least `min_bytes` are available.
    ///
    /// The overrun flag is checked before blocking and after every wake, so
    /// a consumer never sleeps through an overrun. Only one thread may block
    /// per ring; a second gets [`Error::Busy`].
    pub fn wait_until_available(&self, min_bytes: usize) -> Result<()> {
        self.signal.wait_until(|| self.poll(min_bytes))?
    }

    /// `None` while the consumer has to keep waiting.
    fn poll(&self, min_bytes: usize) -> Option<Result<()>> {
        if self.released.load(Ordering::SeqCst) {
            return Some(Err(Error::NotRunning));
        }
        let xruns = self.xruns.load(Ordering::SeqCst);
        if xruns > 0 {
            return Some(Err(Error::Overrun { xruns }));
        }
        (self.available() >= min_bytes).then_some(Ok(()))
    }

    /// Overruns detected since the last [`reset_xruns()`](Self::reset_xruns).
    pub fn xruns(&self) -> u32 {
        self.xruns.load(Ordering::SeqCst)
    }

    /// Clear the overrun counter. Offsets and `available` are untouched.
    pub fn reset_xruns(&self) {
        self.xruns.store(0, Ordering::SeqCst);
    }

    /// Rewind both offsets and drop all accounting, keeping the memory and
    /// the overrun counter.
    ///
    /// Waits for an in-flight consumer copy to finish. A completion that
    /// races the reset counts either before it (and is discarded) or after
    /// it (and is the first period of the rewound ring).
    pub fn reset(&self) {
        let _region = self.lock_region();
        self.rewind();
    }

    /// Caller holds the region lock.
    fn rewind(&self) {
        self.consumer_offset.store(0, Ordering::SeqCst);
        self.fill.store(0, Ordering::SeqCst);
    }

    /// Parameters for arming a cyclic DMA transfer over this ring.
    pub fn cyclic_transfer(&self, direction: Direction) -> CyclicTransfer {
        CyclicTransfer {
            phys_addr: self.phys_addr,
            total_size: self.geometry.total_size(),
            period_size: self.geometry.period_size(),
            direction,
        }
    }

    fn lock_region(&self) -> MutexGuard<'_, Option<R>> {
        self.region.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> RingBuffer<R> {
    pub fn geometry(&self) -> PeriodGeometry {
        self.geometry
    }

    pub fn period_size(&self) -> usize {
        self.geometry.period_size()
    }

    pub fn total_size(&self) -> usize {
        self.geometry.total_size()
    }

    /// Bus address of the ring memory; stable for the ring's lifetime.
    pub fn phys_addr(&self) -> PhysAddr {
        self.phys_addr
    }

    /// Where the next hardware-completed period lands.
    pub fn producer_offset(&self) -> usize {
        let (index, _) = unpack(self.fill.load(Ordering::SeqCst));
        index as usize * self.geometry.period_size()
    }

    /// Where the next consumer transfer happens.
    pub fn consumer_offset(&self) -> usize {
        self.consumer_offset.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl<R> core::fmt::Debug for RingBuffer<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("geometry", &self.geometry)
            .field("phys_addr", &self.phys_addr)
            .field("producer_offset", &self.producer_offset())
            .field("consumer_offset", &self.consumer_offset())
            .field("ready_periods", &unpack(self.fill.load(Ordering::SeqCst)).1)
            .field("xruns", &self.xruns.load(Ordering::SeqCst))
            .field("released", &self.is_released())
            .finish()
    }
}

fn pack(index: u32, periods: u32) -> u64 {
    (u64::from(index) << 32) | u64::from(periods)
}

fn unpack(fill: u64) -> (u32, u32) {
    ((fill >> 32) as u32, fill as u32)
}
