//! Caller-facing device handle with single-session semantics.
//!
//! A [`Device`] wraps one [`StreamController`] behind a mutex. At most one
//! [`Session`] exists at a time; a second [`open()`](Device::open) fails with
//! [`Error::Busy`]. Session operations lock the controller only long enough
//! to change state or fetch a ring handle, so a reader blocked on capture
//! never stalls a writer, `stop()` or `restart()`.
//!
//! ```ignore
//! let device = Device::new(memory, dma, pcm)?;
//! let session = device.open()?;
//! session.start(128, 4)?;
//! let mut period = vec![0u8; session.geometry().unwrap().period_size()];
//! session.read(&mut period)?;
//! session.close();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use super::StreamController;
use crate::control::HardwareControl;
use crate::dma::{Direction, DmaMemory, DmaTransfer};
use crate::error::{Error, Result};
use crate::geometry::PeriodGeometry;

/// A streaming PCM device.
pub struct Device<M: DmaMemory, D: DmaTransfer, H: HardwareControl> {
    controller: Mutex<StreamController<M, D, H>>,
    open: AtomicBool,
}

impl<M, D, H> Device<M, D, H>
where
    M: DmaMemory,
    M::Region: 'static,
    D: DmaTransfer,
    H: HardwareControl,
{
    /// Bind the platform services and acquire the DMA channels.
    pub fn new(memory: M, dma: D, hardware: H) -> Result<Self> {
        Ok(Self {
            controller: Mutex::new(StreamController::new(memory, dma, hardware)?),
            open: AtomicBool::new(false),
        })
    }
}

impl<M, D, H> Device<M, D, H>
where
    M: DmaMemory,
    D: DmaTransfer,
    H: HardwareControl,
{
    /// Open the single session. Fails with [`Error::Busy`] while another
    /// session is alive.
    pub fn open(&self) -> Result<Session<'_, M, D, H>> {
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("open rejected: device already open");
            return Err(Error::Busy);
        }
        info!("device opened");
        Ok(Session { device: self })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Run `f` against the controller, e.g. to inspect the platform
    /// services.
    pub fn with_controller<T>(&self, f: impl FnOnce(&StreamController<M, D, H>) -> T) -> T {
        f(&self.controller())
    }

    fn controller(&self) -> MutexGuard<'_, StreamController<M, D, H>> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An open device. Closing (or dropping) the session stops a running stream
/// and lets the device be opened again.
///
/// All operations take `&self`: one thread may read while another writes.
pub struct Session<'a, M: DmaMemory, D: DmaTransfer, H: HardwareControl> {
    device: &'a Device<M, D, H>,
}

impl<M, D, H> Session<'_, M, D, H>
where
    M: DmaMemory,
    M::Region: 'static,
    D: DmaTransfer,
    H: HardwareControl,
{
    /// Start streaming with `period_count` periods of `period_frames`
    /// frames in each direction.
    pub fn start(&self, period_frames: u32, period_count: u32) -> Result<()> {
        self.device.controller().start(period_frames, period_count)
    }
}

impl<M, D, H> Session<'_, M, D, H>
where
    M: DmaMemory,
    D: DmaTransfer,
    H: HardwareControl,
{
    pub fn stop(&self) -> Result<()> {
        self.device.controller().stop()
    }

    /// Rewind both rings after an overrun. Follow with
    /// [`reset_xruns()`](Self::reset_xruns) to resume transfers.
    pub fn restart(&self) -> Result<()> {
        self.device.controller().restart()
    }

    /// Read exactly one captured period into `out`.
    ///
    /// One thread per direction: a second reader blocked alongside the first
    /// gets [`Error::Busy`](crate::Error::Busy).
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        let ring = self.device.controller().ring(Direction::Capture)?;
        ring.read(out)
            .inspect_err(|err| note_overrun(err, Direction::Capture))
    }

    /// Write exactly one period from `data` for playback. Same one-thread
    /// rule as [`read()`](Self::read).
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let ring = self.device.controller().ring(Direction::Playback)?;
        ring.write(data)
            .inspect_err(|err| note_overrun(err, Direction::Playback))
    }

    pub fn reset_xruns(&self) -> Result<()> {
        self.device.controller().reset_xruns()
    }

    pub fn available(&self, direction: Direction) -> Result<usize> {
        self.device.controller().available(direction)
    }

    pub fn xruns(&self, direction: Direction) -> Result<u32> {
        self.device.controller().xruns(direction)
    }

    pub fn geometry(&self) -> Option<PeriodGeometry> {
        self.device.controller().geometry()
    }

    pub fn is_running(&self) -> bool {
        self.device.controller().is_running()
    }

    /// Close the session, stopping the stream if it is running.
    pub fn close(self) {}
}

impl<M, D, H> Drop for Session<'_, M, D, H>
where
    M: DmaMemory,
    D: DmaTransfer,
    H: HardwareControl,
{
    fn drop(&mut self) {
        {
            let mut controller = self.device.controller();
            if controller.is_running() {
                if let Err(err) = controller.stop() {
                    warn!(%err, "error stopping stream on close");
                }
            }
        }
        self.device.open.store(false, Ordering::Release);
        info!("device closed");
    }
}

fn note_overrun(err: &Error, direction: Direction) {
    if let Error::Overrun { xruns } = err {
        warn!(?direction, xruns, "overrun");
    }
}
