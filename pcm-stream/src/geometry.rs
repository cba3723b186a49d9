//! Period geometry: frame counts to byte sizes.
//!
//! Every transfer between the DMA engine and the consumer is exactly one
//! period. A ring holds `period_count` periods back to back:
//!
//! ```text
//! offset 0          period_size        2*period_size            total_size
//! ├─────────────────┼──────────────────┼───────── ... ──────────┤
//! │ frame frame ... │ frame frame ...  │                        │
//! └─────────────────┴──────────────────┴───────── ... ──────────┘
//! frame = [L: i16][R: i16]
//! ```

use crate::constants::{DEFAULT_PERIOD_COUNT, DEFAULT_PERIOD_FRAMES, FRAME_SIZE};
use crate::error::{Error, Result};

/// Caller-supplied stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Stereo frames per period.
    pub period_frames: u32,
    /// Periods per ring.
    pub period_count: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            period_frames: DEFAULT_PERIOD_FRAMES,
            period_count: DEFAULT_PERIOD_COUNT,
        }
    }
}

/// Validated byte layout of one ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodGeometry {
    period_frames: u32,
    period_count: u32,
    period_size: usize,
    total_size: usize,
}

impl PeriodGeometry {
    /// Compute the layout for `period_count` periods of `period_frames`
    /// stereo 16-bit frames.
    ///
    /// Fails with [`Error::InvalidGeometry`] for an empty period, an empty
    /// ring, or a size that does not fit in `usize`.
    pub fn new(period_frames: u32, period_count: u32) -> Result<Self> {
        let invalid = || Error::InvalidGeometry {
            period_frames,
            period_count,
        };
        if period_frames == 0 || period_count == 0 {
            return Err(invalid());
        }
        let period_size = (period_frames as usize)
            .checked_mul(FRAME_SIZE)
            .ok_or_else(invalid)?;
        let total_size = period_size
            .checked_mul(period_count as usize)
            .ok_or_else(invalid)?;

        Ok(Self {
            period_frames,
            period_count,
            period_size,
            total_size,
        })
    }

    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    pub fn period_count(&self) -> u32 {
        self.period_count
    }

    /// Bytes per period: the only legal read/write size.
    pub fn period_size(&self) -> usize {
        self.period_size
    }

    /// Bytes in the whole ring.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Offset of the period following the one at `offset`, wrapping at the
    /// end of the ring.
    pub fn advance(&self, offset: usize) -> usize {
        (offset + self.period_size) % self.total_size
    }
}

impl TryFrom<StreamConfig> for PeriodGeometry {
    type Error = Error;

    fn try_from(config: StreamConfig) -> Result<Self> {
        Self::new(config.period_frames, config.period_count)
    }
}
