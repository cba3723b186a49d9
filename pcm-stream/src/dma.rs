//! DMA collaborator interfaces.
//!
//! The stream core never programs a DMA controller itself. It talks to two
//! platform services:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`DmaMemory`] | Coherent, physically contiguous buffer allocation |
//! | [`DmaTransfer`] | Cyclic transfers that fire a callback once per period |
//!
//! A platform implements both for its DMA engine. The `sim` feature provides
//! software implementations in [`crate::sim`].
//!
//! ## Completion context
//!
//! The [`PeriodCallback`] handed to [`DmaTransfer::start_cyclic`] runs in the
//! engine's completion context (an interrupt handler or equivalent). It is
//! allocated once when the transfer is armed and must not be invoked again
//! after [`DmaTransfer::stop`] returns.

use crate::error::{AllocError, DmaError};

/// Bus address of a DMA region as seen by the DMA engine.
pub type PhysAddr = u64;

/// Transfer direction of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Memory → device. The consumer writes periods for the hardware.
    Playback,
    /// Device → memory. The consumer reads periods captured by the hardware.
    Capture,
}

impl Direction {
    /// DMA channel carrying this direction.
    pub fn channel_name(self) -> &'static str {
        match self {
            Direction::Playback => crate::constants::TX_CHANNEL,
            Direction::Capture => crate::constants::RX_CHANNEL,
        }
    }
}

/// A block of memory shared between software and a DMA engine.
///
/// Hardware may be transferring any period of the region at any time, so
/// software access goes through copies of explicit `offset`/length pairs
/// instead of references.
pub trait DmaRegion: Send + Sync {
    /// Bus address of the first byte.
    fn phys_addr(&self) -> PhysAddr;

    /// Size of the region in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `out.len()` bytes starting at `offset` out of the region.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    fn read_at(&self, offset: usize, out: &mut [u8]);

    /// Copy `data` into the region starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    fn write_at(&self, offset: usize, data: &[u8]);
}

/// Allocator for coherent DMA memory.
pub trait DmaMemory {
    type Region: DmaRegion;

    /// Allocate at least `size` bytes. The region reports exactly `size`
    /// from [`DmaRegion::len`].
    fn alloc(&self, size: usize) -> Result<Self::Region, AllocError>;

    /// Return a region to the allocator.
    fn release(&self, region: Self::Region);
}

/// Completion hook invoked once per finished period.
pub type PeriodCallback = Box<dyn FnMut() + Send + 'static>;

/// Parameters of one cyclic transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclicTransfer {
    pub phys_addr: PhysAddr,
    pub total_size: usize,
    pub period_size: usize,
    pub direction: Direction,
}

impl CyclicTransfer {
    /// Reject transfers the engine cannot express.
    pub fn validate(&self) -> Result<(), DmaError> {
        if self.period_size == 0 || self.total_size == 0 || self.total_size % self.period_size != 0
        {
            return Err(DmaError::InvalidTransfer {
                total_size: self.total_size,
                period_size: self.period_size,
            });
        }
        Ok(())
    }
}

/// A DMA engine capable of cyclic (ring) transfers.
pub trait DmaTransfer {
    type Channel;

    /// Request a slave channel by name, targeting the peripheral register at
    /// `address_offset` from the device base.
    fn create_channel(
        &self,
        name: &'static str,
        address_offset: u32,
    ) -> Result<Self::Channel, AllocError>;

    /// Arm a cyclic transfer over `transfer` and issue it.
    ///
    /// `on_complete` is invoked from the completion context after every
    /// period.
    fn start_cyclic(
        &self,
        channel: &mut Self::Channel,
        transfer: CyclicTransfer,
        on_complete: PeriodCallback,
    ) -> Result<(), DmaError>;

    /// Terminate the transfer synchronously. When this returns the completion
    /// callback is not running and will not run again.
    fn stop(&self, channel: &mut Self::Channel);

    /// Release the channel. Stops any transfer still in flight.
    fn close_channel(&self, channel: Self::Channel);
}
