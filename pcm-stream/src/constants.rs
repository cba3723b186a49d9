/// Number of interleaved channels per frame (stereo).
pub const CHANNEL_COUNT: usize = 2;

/// Bytes per sample (signed 16-bit).
pub const SAMPLE_WIDTH: usize = core::mem::size_of::<i16>();

/// Bytes per stereo frame.
pub const FRAME_SIZE: usize = CHANNEL_COUNT * SAMPLE_WIDTH;

/// Period length used when the caller does not pick one.
pub const DEFAULT_PERIOD_FRAMES: u32 = 128;

/// Number of periods in the ring when the caller does not pick one.
pub const DEFAULT_PERIOD_COUNT: u32 = 4;

/// Granularity of coherent DMA allocations.
pub const DMA_PAGE_SIZE: usize = 4096;

/// Offset of the PCM FIFO register from the peripheral base; both DMA
/// channels target this address.
pub const FIFO_OFFSET: u32 = 0x04;

/// DMA channel name for playback (memory → device).
pub const TX_CHANNEL: &str = "tx";

/// DMA channel name for capture (device → memory).
pub const RX_CHANNEL: &str = "rx";
