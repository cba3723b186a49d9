//! Software platform for running streams without hardware.
//!
//! | Type | Stands in for |
//! |------|---------------|
//! | [`HeapMemory`] / [`HeapRegion`] | Coherent DMA allocator and its buffers |
//! | [`SoftDma`] / [`SoftChannel`] | Cyclic DMA engine; periods complete on [`SoftDma::fire`] or a [`SoftClock`] |
//! | [`RegisterFile`] | Memory-mapped PCM register window |
//!
//! # Feature gate
//!
//! This module is available when the `sim` feature is enabled (on by default).

mod dma;
mod memory;
mod registers;

pub use dma::{SoftChannel, SoftClock, SoftDma};
pub use memory::{HeapMemory, HeapRegion};
pub use registers::RegisterFile;
