//! PCM/I²S interface driver.
//!
//! Programs the audio interface that clocks stereo 16-bit frames between the
//! codec and the DMA FIFO. The driver is generic over any [`RegisterMap`],
//! the memory-mapped register window of the block.
//!
//! # Feature gate
//!
//! This module is available when the `pcm` feature is enabled (on by default).
//!
//! # Example
//!
//! ```ignore
//! let mut pcm = PcmInterface::new(mmio);
//! pcm.start()?;   // 64-clock frames, two 16-bit channels, DMA enabled
//! pcm.stop()?;    // CS_A = 0
//! ```

pub mod registers;

use tracing::debug;

use self::registers as reg;
use crate::constants::SAMPLE_WIDTH;
use crate::control::HardwareControl;
use crate::dma::PhysAddr;

/// Bit clocks per frame (two 32-clock slots).
pub const FRAME_CLOCKS: u32 = 64;

/// Bit position of the left channel within the frame.
pub const LEFT_POSITION: u32 = 1;

/// Bit position of the right channel within the frame.
pub const RIGHT_POSITION: u32 = 33;

/// Memory-mapped 32-bit register window.
pub trait RegisterMap {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read(&mut self, register: u32) -> Result<u32, Self::Error>;

    fn write(&mut self, register: u32, value: u32) -> Result<(), Self::Error>;

    /// Read-modify-write: `new = (current & !mask) | (value & mask)`.
    fn update_bits(&mut self, register: u32, mask: u32, value: u32) -> Result<(), Self::Error> {
        let current = self.read(register)?;
        self.write(register, (current & !mask) | (value & mask))
    }
}

/// Channel configuration word for one enabled channel of `width_bits` at
/// `position`, as written to TXC_A/RXC_A.
///
/// Widths are encoded as `width - 8` with the extension bit above 24 bits.
pub const fn channel_config(channel: u8, position: u32, width_bits: u32) -> u32 {
    let encoded = width_bits - 8;
    let (wid, wex) = (encoded & 0xF, encoded > 0xF);
    match channel {
        1 => {
            reg::XC_CH1EN
                | reg::xc_ch1pos(position)
                | reg::xc_ch1wid(wid)
                | if wex { reg::XC_CH1WEX } else { 0 }
        }
        _ => {
            reg::XC_CH2EN
                | reg::xc_ch2pos(position)
                | reg::xc_ch2wid(wid)
                | if wex { reg::XC_CH2WEX } else { 0 }
        }
    }
}

/// Stereo 16-bit layout used for both directions.
pub const STEREO_CHANNELS: u32 = channel_config(1, LEFT_POSITION, SAMPLE_WIDTH as u32 * 8)
    | channel_config(2, RIGHT_POSITION, SAMPLE_WIDTH as u32 * 8);

/// Slave-mode frame format: external bit clock and frame sync, both
/// inverted, packed FIFO words.
pub const MODE: u32 = reg::MODE_FSM
    | reg::MODE_CLKM
    | reg::MODE_FSI
    | reg::MODE_CLKI
    | reg::MODE_FTXP
    | reg::MODE_FRXP
    | reg::mode_flen(FRAME_CLOCKS);

/// FIFO thresholds for DMA and panic requests.
pub const DREQ: u32 = reg::dreq_tx_req(0x30)
    | reg::dreq_tx_panic(0x10)
    | reg::dreq_rx_req(0x20)
    | reg::dreq_rx_panic(0x30);

/// PCM/I²S interface driver.
#[derive(Debug)]
pub struct PcmInterface<M> {
    registers: M,
    running: bool,
}

impl<M: RegisterMap> PcmInterface<M> {
    pub fn new(registers: M) -> Self {
        Self {
            registers,
            running: false,
        }
    }

    /// Bus address the DMA channels must target for a block mapped at `base`.
    pub fn fifo_address(base: PhysAddr) -> PhysAddr {
        base + reg::FIFO_A as PhysAddr
    }

    /// Bring the interface up: enable the block, program the frame format
    /// and channel layout, flush both FIFOs, set DMA thresholds and finally
    /// enable DMA requests with TX and RX.
    pub fn start(&mut self) -> Result<(), M::Error> {
        self.registers.write(reg::CS_A, reg::CS_EN | reg::CS_STBY)?;
        self.registers.write(reg::MODE_A, MODE)?;
        self.registers.write(reg::TXC_A, STEREO_CHANNELS)?;
        self.registers.write(reg::RXC_A, STEREO_CHANNELS)?;

        let clear = reg::CS_RXCLR | reg::CS_TXCLR;
        self.registers.update_bits(reg::CS_A, clear, clear)?;

        self.registers.write(reg::DREQ_A, DREQ)?;

        let enable = reg::CS_DMAEN | reg::CS_TXON | reg::CS_RXON;
        self.registers.update_bits(reg::CS_A, enable, enable)?;

        self.running = true;
        debug!("pcm interface started");
        Ok(())
    }

    /// Disable the whole block.
    pub fn stop(&mut self) -> Result<(), M::Error> {
        self.registers.write(reg::CS_A, 0)?;
        self.running = false;
        debug!("pcm interface stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn registers(&self) -> &M {
        &self.registers
    }

    /// Release the register window.
    pub fn release(self) -> M {
        self.registers
    }
}

// ── HardwareControl trait implementation ───────────────────────────────────

impl<M: RegisterMap> HardwareControl for PcmInterface<M> {
    type Error = M::Error;

    fn start(&mut self) -> Result<(), Self::Error> {
        PcmInterface::start(self)
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        PcmInterface::stop(self)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
