//! Error types shared by the ring buffer, the DMA collaborators and the
//! stream controller.

/// Failure to acquire a DMA resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Coherent memory could not be allocated.
    #[error("out of DMA memory ({size} bytes requested)")]
    OutOfMemory { size: usize },
    /// The named DMA channel could not be requested.
    #[error("DMA channel `{name}` unavailable")]
    Channel { name: &'static str },
}

/// Failure reported by the DMA transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DmaError {
    /// The engine could not prepare a cyclic descriptor.
    #[error("DMA engine busy")]
    Busy,
    /// Total size is not a non-zero multiple of the period size.
    #[error("invalid cyclic transfer: {total_size} bytes in periods of {period_size}")]
    InvalidTransfer {
        total_size: usize,
        period_size: usize,
    },
    /// The channel was already closed.
    #[error("DMA channel `{name}` is closed")]
    ChannelClosed { name: &'static str },
}

/// Errors surfaced by stream operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error("DMA transfer failed: {0}")]
    Dma(#[from] DmaError),

    #[error("hardware control failed: {0}")]
    Hardware(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// Transfers must be exactly one period long.
    #[error("transfer of {actual} bytes does not match period size {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The producer outran the consumer; cleared by `reset_xruns`.
    #[error("overrun: {xruns} xrun(s) pending")]
    Overrun { xruns: u32 },

    #[error("device or stream busy")]
    Busy,

    #[error("stream is not running")]
    NotRunning,

    #[error("invalid period geometry: {period_frames} frames x {period_count} periods")]
    InvalidGeometry { period_frames: u32, period_count: u32 },
}

impl Error {
    /// Whether this is the overrun condition, which callers typically
    /// answer with `restart` + `reset_xruns` rather than tearing down.
    pub fn is_overrun(&self) -> bool {
        matches!(self, Error::Overrun { .. })
    }

    pub(crate) fn hardware<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Hardware(Box::new(err))
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
