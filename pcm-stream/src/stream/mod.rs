//! Stream controller: owns one capture and one playback ring and drives the
//! DMA channels and the audio interface through their lifecycle.
//!
//! ## State machine
//!
//! ```text
//!            start(frames, count)
//!  Stopped ───────────────────────► Running ──┐
//!     ▲                                │  ▲    │ restart()
//!     └──────────── stop() ────────────┘  └────┘
//! ```
//!
//! `start` acquires resources in a fixed order (capture ring, playback ring,
//! TX transfer, RX transfer, hardware) and releases everything it acquired
//! if any step fails, so a failed start always leaves the controller
//! `Stopped` with nothing allocated. `stop` tears down in reverse: hardware,
//! DMA, then ring memory.
//!
//! Consumers block inside the rings, not inside the controller. Callers that
//! share a controller between threads (see [`Device`]) clone the ring handle
//! via [`ring()`](StreamController::ring) and release any lock before
//! blocking.

mod device;

#[cfg(test)]
mod integration_tests;

pub use device::{Device, Session};

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::constants::{FIFO_OFFSET, RX_CHANNEL, TX_CHANNEL};
use crate::control::HardwareControl;
use crate::dma::{Direction, DmaMemory, DmaRegion, DmaTransfer, PeriodCallback};
use crate::error::{Error, Result};
use crate::geometry::PeriodGeometry;
use crate::ring::RingBuffer;

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Running,
}

struct Channels<C> {
    tx: C,
    rx: C,
}

/// The ring pair of a running stream.
struct Rings<R> {
    capture: Arc<RingBuffer<R>>,
    playback: Arc<RingBuffer<R>>,
}

impl<R> Clone for Rings<R> {
    fn clone(&self) -> Self {
        Self {
            capture: Arc::clone(&self.capture),
            playback: Arc::clone(&self.playback),
        }
    }
}

impl<R: DmaRegion> Rings<R> {
    fn get(&self, direction: Direction) -> &Arc<RingBuffer<R>> {
        match direction {
            Direction::Capture => &self.capture,
            Direction::Playback => &self.playback,
        }
    }

    fn release<M: DmaMemory<Region = R>>(&self, memory: &M) {
        self.playback.release(memory);
        self.capture.release(memory);
    }
}

enum State<R> {
    Stopped,
    Running(Rings<R>),
}

/// Owner of the DMA channels, the audio interface and, while running, the
/// two period rings.
pub struct StreamController<M: DmaMemory, D: DmaTransfer, H: HardwareControl> {
    memory: M,
    dma: D,
    hardware: H,
    /// `None` only while dropping.
    channels: Option<Channels<D::Channel>>,
    state: State<M::Region>,
}

impl<M, D, H> StreamController<M, D, H>
where
    M: DmaMemory,
    M::Region: 'static,
    D: DmaTransfer,
    H: HardwareControl,
{
    /// Take ownership of the platform services and request the `"tx"` and
    /// `"rx"` channels, both targeting the interface FIFO.
    pub fn new(memory: M, dma: D, hardware: H) -> Result<Self> {
        let tx = dma.create_channel(TX_CHANNEL, FIFO_OFFSET)?;
        let rx = match dma.create_channel(RX_CHANNEL, FIFO_OFFSET) {
            Ok(rx) => rx,
            Err(err) => {
                dma.close_channel(tx);
                return Err(err.into());
            }
        };
        debug!("DMA channels acquired");

        Ok(Self {
            memory,
            dma,
            hardware,
            channels: Some(Channels { tx, rx }),
            state: State::Stopped,
        })
    }

    /// Allocate both rings, arm cyclic DMA on each and start the interface.
    ///
    /// Returns [`Error::Busy`] if already running; the running stream is
    /// left untouched. On any other failure everything acquired so far is
    /// released and the controller stays stopped.
    pub fn start(&mut self, period_frames: u32, period_count: u32) -> Result<()> {
        if self.is_running() {
            warn!("start rejected: stream already running");
            return Err(Error::Busy);
        }

        let geometry = PeriodGeometry::new(period_frames, period_count)?;
        let capture = Arc::new(RingBuffer::with_geometry(&self.memory, geometry)?);
        let playback = match RingBuffer::with_geometry(&self.memory, geometry) {
            Ok(ring) => Arc::new(ring),
            Err(err) => {
                capture.release(&self.memory);
                return Err(err);
            }
        };
        let rings = Rings { capture, playback };

        if let Err(err) = self.launch(&rings) {
            error!(%err, "stream start failed, rolling back");
            rings.release(&self.memory);
            return Err(err);
        }

        info!(
            period_size = geometry.period_size(),
            total_size = geometry.total_size(),
            "stream started"
        );
        self.state = State::Running(rings);
        Ok(())
    }

    /// Arm TX then RX, then start the interface. Undoes its own partial
    /// progress on failure; the caller still owns the ring memory.
    fn launch(&mut self, rings: &Rings<M::Region>) -> Result<()> {
        let Some(channels) = self.channels.as_mut() else {
            return Err(Error::NotRunning);
        };

        self.dma.start_cyclic(
            &mut channels.tx,
            rings.playback.cyclic_transfer(Direction::Playback),
            completion_hook(&rings.playback),
        )?;

        if let Err(err) = self.dma.start_cyclic(
            &mut channels.rx,
            rings.capture.cyclic_transfer(Direction::Capture),
            completion_hook(&rings.capture),
        ) {
            self.dma.stop(&mut channels.tx);
            return Err(err.into());
        }

        if let Err(err) = self.hardware.start() {
            // The interface may be partially programmed.
            if let Err(stop_err) = self.hardware.stop() {
                warn!(%stop_err, "error stopping interface after failed start");
            }
            self.dma.stop(&mut channels.tx);
            self.dma.stop(&mut channels.rx);
            return Err(Error::hardware(err));
        }

        Ok(())
    }
}

impl<M, D, H> StreamController<M, D, H>
where
    M: DmaMemory,
    D: DmaTransfer,
    H: HardwareControl,
{
    /// Stop the interface and both DMA channels, then free the rings.
    ///
    /// Consumers blocked in [`read()`](Self::read) or
    /// [`write()`](Self::write) wake up with [`Error::NotRunning`]. Teardown
    /// always completes; a hardware error is reported afterwards.
    pub fn stop(&mut self) -> Result<()> {
        let State::Running(rings) = std::mem::replace(&mut self.state, State::Stopped) else {
            return Err(Error::NotRunning);
        };

        let stopped = self.hardware.stop();
        if let Some(channels) = self.channels.as_mut() {
            self.dma.stop(&mut channels.tx);
            self.dma.stop(&mut channels.rx);
        }
        rings.release(&self.memory);

        match stopped {
            Ok(()) => {
                info!("stream stopped");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "stream stopped, hardware reported an error");
                Err(Error::hardware(err))
            }
        }
    }

    /// Recover from an overrun: stop the interface, rewind both rings and
    /// start the interface again. DMA stays armed and the ring memory is
    /// kept; the overrun counters are left for
    /// [`reset_xruns()`](Self::reset_xruns).
    ///
    /// If the interface cannot be cycled the stream is torn down.
    pub fn restart(&mut self) -> Result<()> {
        let rings = match &self.state {
            State::Running(rings) => rings.clone(),
            State::Stopped => return Err(Error::NotRunning),
        };

        let cycled = self.hardware.stop().and_then(|()| {
            rings.capture.reset();
            rings.playback.reset();
            self.hardware.start()
        });

        match cycled {
            Ok(()) => {
                info!(
                    capture_xruns = rings.capture.xruns(),
                    playback_xruns = rings.playback.xruns(),
                    "stream restarted"
                );
                Ok(())
            }
            Err(err) => {
                error!(%err, "restart failed, stopping stream");
                if let Err(stop_err) = self.stop() {
                    warn!(%stop_err, "error stopping stream after failed restart");
                }
                Err(Error::hardware(err))
            }
        }
    }

    /// Handle to the ring for `direction`.
    pub fn ring(&self, direction: Direction) -> Result<Arc<RingBuffer<M::Region>>> {
        match &self.state {
            State::Running(rings) => Ok(Arc::clone(rings.get(direction))),
            State::Stopped => Err(Error::NotRunning),
        }
    }

    /// Read one captured period. Blocks until one is available.
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        self.ring(Direction::Capture)?.read(out)
    }

    /// Queue one period for playback. Blocks until a period is free.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.ring(Direction::Playback)?.write(data)
    }

    /// Clear the overrun counters of both rings.
    pub fn reset_xruns(&self) -> Result<()> {
        let State::Running(rings) = &self.state else {
            return Err(Error::NotRunning);
        };
        rings.capture.reset_xruns();
        rings.playback.reset_xruns();
        debug!("xrun counters cleared");
        Ok(())
    }

    pub fn available(&self, direction: Direction) -> Result<usize> {
        Ok(self.ring(direction)?.available())
    }

    pub fn xruns(&self, direction: Direction) -> Result<u32> {
        Ok(self.ring(direction)?.xruns())
    }

    /// Layout of the running stream.
    pub fn geometry(&self) -> Option<PeriodGeometry> {
        match &self.state {
            State::Running(rings) => Some(rings.capture.geometry()),
            State::Stopped => None,
        }
    }

    pub fn state(&self) -> StreamState {
        match self.state {
            State::Running(_) => StreamState::Running,
            State::Stopped => StreamState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn dma(&self) -> &D {
        &self.dma
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }
}

impl<M, D, H> Drop for StreamController<M, D, H>
where
    M: DmaMemory,
    D: DmaTransfer,
    H: HardwareControl,
{
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                warn!(%err, "error stopping stream on drop");
            }
        }
        if let Some(Channels { tx, rx }) = self.channels.take() {
            self.dma.close_channel(tx);
            self.dma.close_channel(rx);
            debug!("DMA channels closed");
        }
    }
}

impl<M, D, H> core::fmt::Debug for StreamController<M, D, H>
where
    M: DmaMemory,
    D: DmaTransfer,
    H: HardwareControl,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut out = f.debug_struct("StreamController");
        out.field("state", &self.state());
        if let State::Running(rings) = &self.state {
            out.field("capture", &rings.capture)
                .field("playback", &rings.playback);
        }
        out.finish()
    }
}

/// Completion callback bound to one ring.
fn completion_hook<R>(ring: &Arc<RingBuffer<R>>) -> PeriodCallback
where
    R: DmaRegion + 'static,
{
    let ring = Arc::clone(ring);
    Box::new(move || ring.on_period_complete())
}
