//! PCM/I²S block register addresses and bitfield definitions.
//!
//! Register layout of the BCM2835-family PCM audio interface. All registers
//! are 32 bits wide with a stride of 4; the block occupies `0x00..=0x20`.

// INTEN_A, INTSTC_A and GRAY are defined for completeness but the driver
// runs the interface purely through DMA requests.
#![allow(dead_code)]

// ── Register addresses ─────────────────────────────────────────────────────

/// Control and status.
pub const CS_A: u32 = 0x00;

/// FIFO data. Both DMA channels target this register.
pub const FIFO_A: u32 = crate::constants::FIFO_OFFSET;

/// Mode (frame sync and clock configuration).
pub const MODE_A: u32 = 0x08;

/// Receive channel configuration.
pub const RXC_A: u32 = 0x0c;

/// Transmit channel configuration.
pub const TXC_A: u32 = 0x10;

/// DMA request thresholds.
pub const DREQ_A: u32 = 0x14;

/// Interrupt enables.
pub const INTEN_A: u32 = 0x18;

/// Interrupt status and clear.
pub const INTSTC_A: u32 = 0x1c;

/// Gray code mode control.
pub const GRAY: u32 = 0x20;

/// Highest valid register address.
pub const MAX_REGISTER: u32 = GRAY;

/// Distance between consecutive registers.
pub const REG_STRIDE: u32 = 4;

const fn bit(n: u32) -> u32 {
    1 << n
}

// ── CS_A fields ────────────────────────────────────────────────────────────

/// Enable the PCM block.
pub const CS_EN: u32 = bit(0);
/// Enable reception.
pub const CS_RXON: u32 = bit(1);
/// Enable transmission.
pub const CS_TXON: u32 = bit(2);
/// Clear the TX FIFO (self-clearing).
pub const CS_TXCLR: u32 = bit(3);
/// Clear the RX FIFO (self-clearing).
pub const CS_RXCLR: u32 = bit(4);
/// Route FIFO thresholds to DMA requests.
pub const CS_DMAEN: u32 = bit(9);
/// Clear RAM standby.
pub const CS_STBY: u32 = bit(25);

// ── MODE_A fields ──────────────────────────────────────────────────────────

/// Frame sync length in bit clocks.
pub const fn mode_fslen(clocks: u32) -> u32 {
    clocks
}

/// Frame length in bit clocks (encoded as `clocks - 1`).
pub const fn mode_flen(clocks: u32) -> u32 {
    (clocks - 1) << 10
}

/// Invert frame sync.
pub const MODE_FSI: u32 = bit(20);
/// Frame sync is an input (slave).
pub const MODE_FSM: u32 = bit(21);
/// Invert bit clock.
pub const MODE_CLKI: u32 = bit(22);
/// Bit clock is an input (slave).
pub const MODE_CLKM: u32 = bit(23);
/// Pack two 16-bit TX channels into one FIFO word.
pub const MODE_FTXP: u32 = bit(24);
/// Pack two 16-bit RX channels into one FIFO word.
pub const MODE_FRXP: u32 = bit(25);

// ── RXC_A / TXC_A fields ───────────────────────────────────────────────────

/// Channel 2 width (`bits - 8`, lower four bits).
pub const fn xc_ch2wid(val: u32) -> u32 {
    val
}

/// Channel 2 position in bit clocks from frame start.
pub const fn xc_ch2pos(val: u32) -> u32 {
    val << 4
}

/// Enable channel 2.
pub const XC_CH2EN: u32 = bit(14);
/// Channel 2 width extension.
pub const XC_CH2WEX: u32 = bit(15);

/// Channel 1 width (`bits - 8`, lower four bits).
pub const fn xc_ch1wid(val: u32) -> u32 {
    val << 16
}

/// Channel 1 position in bit clocks from frame start.
pub const fn xc_ch1pos(val: u32) -> u32 {
    val << 20
}

/// Enable channel 1.
pub const XC_CH1EN: u32 = bit(30);
/// Channel 1 width extension.
pub const XC_CH1WEX: u32 = bit(31);

// ── DREQ_A fields ──────────────────────────────────────────────────────────

/// RX FIFO level that raises a DMA request.
pub const fn dreq_rx_req(val: u32) -> u32 {
    val
}

/// TX FIFO level that raises a DMA request.
pub const fn dreq_tx_req(val: u32) -> u32 {
    val << 8
}

/// RX FIFO level that raises a panic request.
pub const fn dreq_rx_panic(val: u32) -> u32 {
    val << 16
}

/// TX FIFO level that raises a panic request.
pub const fn dreq_tx_panic(val: u32) -> u32 {
    val << 24
}
