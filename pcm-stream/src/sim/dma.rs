//! Software DMA engine.
//!
//! [`SoftDma`] keeps the completion callback of every armed channel and
//! invokes it on demand ([`fire()`](SoftDma::fire)) or from a background
//! clock thread ([`spawn_clock()`](SoftDma::spawn_clock)). Memory is not
//! touched: the simulated peripheral neither produces nor consumes samples.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use crate::dma::{CyclicTransfer, DmaTransfer, PeriodCallback};
use crate::error::{AllocError, DmaError};

struct Armed {
    transfer: CyclicTransfer,
    on_complete: PeriodCallback,
    periods: u64,
}

struct Slot {
    name: &'static str,
    address_offset: u32,
    open: bool,
    armed: Option<Armed>,
}

#[derive(Default)]
struct State {
    slots: Vec<Slot>,
    refused: Vec<&'static str>,
    fail_next_start: Vec<&'static str>,
}

/// Handle to a channel created by [`SoftDma`].
#[derive(Debug)]
pub struct SoftChannel {
    index: usize,
    name: &'static str,
}

impl SoftChannel {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// In-process DMA engine. Cloning yields another handle to the same engine.
#[derive(Clone, Default)]
pub struct SoftDma {
    state: Arc<Mutex<State>>,
}

impl SoftDma {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make [`create_channel`](DmaTransfer::create_channel) fail for `name`.
    pub fn refuse_channel(self, name: &'static str) -> Self {
        self.lock().refused.push(name);
        self
    }

    /// Make the next [`start_cyclic`](DmaTransfer::start_cyclic) on the
    /// named channel fail with [`DmaError::Busy`].
    pub fn fail_next_start(&self, name: &'static str) {
        self.lock().fail_next_start.push(name);
    }

    /// Complete one period on the named channel, as the hardware would.
    ///
    /// Returns `false` if the channel has no armed transfer.
    pub fn fire(&self, name: &str) -> bool {
        let mut state = self.lock();
        let Some(armed) = state
            .slots
            .iter_mut()
            .find(|slot| slot.open && slot.name == name)
            .and_then(|slot| slot.armed.as_mut())
        else {
            return false;
        };
        armed.periods += 1;
        (armed.on_complete)();
        true
    }

    /// Complete one period on every armed channel.
    pub fn fire_all(&self) {
        let mut state = self.lock();
        for armed in state.slots.iter_mut().filter_map(|slot| slot.armed.as_mut()) {
            armed.periods += 1;
            (armed.on_complete)();
        }
    }

    /// Whether the named channel has an armed transfer.
    pub fn is_armed(&self, name: &str) -> bool {
        self.lock()
            .slots
            .iter()
            .any(|slot| slot.open && slot.name == name && slot.armed.is_some())
    }

    /// Parameters of the transfer armed on the named channel.
    pub fn transfer(&self, name: &str) -> Option<CyclicTransfer> {
        self.lock()
            .slots
            .iter()
            .filter(|slot| slot.open && slot.name == name)
            .find_map(|slot| slot.armed.as_ref().map(|armed| armed.transfer))
    }

    /// Periods completed on the named channel since it was last armed.
    pub fn periods(&self, name: &str) -> u64 {
        self.lock()
            .slots
            .iter()
            .filter(|slot| slot.open && slot.name == name)
            .find_map(|slot| slot.armed.as_ref().map(|armed| armed.periods))
            .unwrap_or(0)
    }

    /// Register offset the named channel was created with.
    pub fn address_offset(&self, name: &str) -> Option<u32> {
        self.lock()
            .slots
            .iter()
            .find(|slot| slot.open && slot.name == name)
            .map(|slot| slot.address_offset)
    }

    /// Number of channels created and not yet closed.
    pub fn open_channels(&self) -> usize {
        self.lock().slots.iter().filter(|slot| slot.open).count()
    }

    /// Drive every armed channel from a background thread, one period per
    /// `period`. The clock stops when the returned handle is dropped.
    pub fn spawn_clock(&self, period: Duration) -> SoftClock {
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let dma = self.clone();
            let running = Arc::clone(&running);
            thread::spawn(move || {
                while running.load(Ordering::Acquire) {
                    thread::sleep(period);
                    dma.fire_all();
                }
            })
        };
        debug!(?period, "soft DMA clock started");
        SoftClock {
            running,
            thread: Some(thread),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DmaTransfer for SoftDma {
    type Channel = SoftChannel;

    fn create_channel(
        &self,
        name: &'static str,
        address_offset: u32,
    ) -> Result<SoftChannel, AllocError> {
        let mut state = self.lock();
        if state.refused.contains(&name) {
            return Err(AllocError::Channel { name });
        }
        state.slots.push(Slot {
            name,
            address_offset,
            open: true,
            armed: None,
        });
        Ok(SoftChannel {
            index: state.slots.len() - 1,
            name,
        })
    }

    fn start_cyclic(
        &self,
        channel: &mut SoftChannel,
        transfer: CyclicTransfer,
        on_complete: PeriodCallback,
    ) -> Result<(), DmaError> {
        transfer.validate()?;
        let mut state = self.lock();
        if let Some(pos) = state.fail_next_start.iter().position(|n| *n == channel.name) {
            state.fail_next_start.remove(pos);
            return Err(DmaError::Busy);
        }
        let slot = &mut state.slots[channel.index];
        if !slot.open {
            return Err(DmaError::ChannelClosed { name: slot.name });
        }
        slot.armed = Some(Armed {
            transfer,
            on_complete,
            periods: 0,
        });
        trace!(channel = channel.name, ?transfer, "cyclic transfer armed");
        Ok(())
    }

    fn stop(&self, channel: &mut SoftChannel) {
        // Callbacks run under the same lock, so none is in flight once the
        // slot is cleared.
        self.lock().slots[channel.index].armed = None;
    }

    fn close_channel(&self, channel: SoftChannel) {
        let mut state = self.lock();
        let slot = &mut state.slots[channel.index];
        slot.armed = None;
        slot.open = false;
    }
}

impl core::fmt::Debug for SoftDma {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("SoftDma")
            .field("channels", &state.slots.iter().map(|s| s.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Background clock started by [`SoftDma::spawn_clock`].
pub struct SoftClock {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SoftClock {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
