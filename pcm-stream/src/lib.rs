//! # pcm-stream
//!
//! Period-synchronous PCM/I²S streaming over cyclic DMA ring buffers.
//!
//! Hardware moves audio between an interface FIFO and a ring of fixed-size
//! periods in DMA memory, signalling once per completed period. This crate
//! keeps the accounting for each ring, detects when the hardware laps a
//! slow consumer (an *overrun*), and exposes a blocking, period-at-a-time
//! read/write API on top.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Config | [`constants`] / [`geometry`] | Frame format, default and validated period layout |
//! | Platform | [`dma`] / [`control`] | `DmaMemory`, `DmaTransfer` and `HardwareControl` traits |
//! | Core | [`ring`] | Period ring buffer with overrun detection and blocking consumers |
//! | Control | [`stream`] | `StreamController` lifecycle, `Device` / `Session` surface |
//! | Driver | [`pcm`] | PCM/I²S register-level interface driver (feature-gated) |
//! | Sim | [`sim`] | Heap DMA memory, software DMA engine, register file (feature-gated) |
//!
//! ## Quick start
//!
//! ```ignore
//! use pcm_stream::sim::{HeapMemory, RegisterFile, SoftDma};
//! use pcm_stream::{Device, PcmInterface};
//!
//! let dma = SoftDma::new();
//! let device = Device::new(HeapMemory::new(), dma.clone(), PcmInterface::new(RegisterFile::new()))?;
//! let session = device.open()?;
//! session.start(128, 4)?;
//!
//! let _clock = dma.spawn_clock(std::time::Duration::from_millis(3));
//! let mut period = vec![0u8; session.geometry().unwrap().period_size()];
//! loop {
//!     match session.read(&mut period) {
//!         Ok(_) => { /* consume one period */ }
//!         Err(err) if err.is_overrun() => {
//!             session.restart()?;
//!             session.reset_xruns()?;
//!         }
//!         Err(err) => return Err(err),
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `pcm` | yes | PCM/I²S interface driver over a `RegisterMap` |
//! | `sim` | yes | Software platform for tests and demos (implies `pcm`) |
//!
//! ## Audio parameters
//!
//! - **Channels:** 2 ([`constants::CHANNEL_COUNT`])
//! - **Sample format:** `i16` (signed 16-bit, interleaved)
//! - **Default period:** 128 frames × 4 periods
//!   ([`constants::DEFAULT_PERIOD_FRAMES`], [`constants::DEFAULT_PERIOD_COUNT`])

pub mod constants;
pub mod control;
pub mod dma;
pub mod error;
pub mod geometry;
pub mod ring;
pub mod stream;

#[cfg(feature = "pcm")]
pub mod pcm;

#[cfg(feature = "sim")]
pub mod sim;

pub use control::HardwareControl;
pub use dma::{CyclicTransfer, Direction, DmaMemory, DmaRegion, DmaTransfer, PeriodCallback, PhysAddr};
pub use error::{AllocError, DmaError, Error, Result};
pub use geometry::{PeriodGeometry, StreamConfig};
pub use ring::RingBuffer;
pub use stream::{Device, Session, StreamController, StreamState};

#[cfg(feature = "pcm")]
pub use pcm::{PcmInterface, RegisterMap};
