// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register map of the DesignWare SSI block and the access trait the driver
//! goes through.

use bitflags::bitflags;

/// Register offsets from the start of the block.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u32)]
pub enum Reg {
    Ctrlr0 = 0x00,
    Ctrlr1 = 0x04,
    Ssienr = 0x08,
    Ser = 0x10,
    Baudr = 0x14,
    Txftlr = 0x18,
    Rxftlr = 0x1c,
    Txflr = 0x20,
    Rxflr = 0x24,
    Sr = 0x28,
    Imr = 0x2c,
    Isr = 0x30,
    Risr = 0x34,
    Icr = 0x48,
    Dmacr = 0x4c,
    Dmatdlr = 0x50,
    Dmardlr = 0x54,
    Dr = 0x60,
    RxSampleDly = 0xf0,
    SpiCtrlr0 = 0xf4,
    XipIncrInst = 0x100,
    XipWrapInst = 0x104,
    XipCtrl = 0x108,
    XipWriteIncrInst = 0x140,
    XipWriteWrapInst = 0x144,
    XipWriteCtrl = 0x148,
}

impl Reg {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

/// 32-bit access to one controller's registers.
///
/// Reads may have side effects (`DR` pops the receive FIFO, `ICR` clears
/// interrupts), which is why implementations behind an auxiliary bus are
/// expected to forward every call rather than cache.
pub trait Regs {
    fn read(&self, reg: Reg) -> u32;
    fn write(&mut self, reg: Reg, value: u32);
}

/// Memory-mapped register block.
pub struct Mmio {
    base: *mut u32,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a DesignWare SSI register block that
    /// nothing else accesses for the lifetime of the returned value.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base: base as *mut u32,
        }
    }
}

impl Regs for Mmio {
    fn read(&self, reg: Reg) -> u32 {
        // Safety: `new` requires `base` to point at the register block, and
        // every `Reg` offset is a word-aligned register inside it.
        unsafe { self.base.byte_add(reg.offset()).read_volatile() }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        // Safety: as above.
        unsafe { self.base.byte_add(reg.offset()).write_volatile(value) }
    }
}

/// Builds a contiguous bit mask covering bits `lo..=hi`.
pub const fn genmask(hi: u32, lo: u32) -> u32 {
    (u32::MAX >> (31 - hi)) & (u32::MAX << lo)
}

/// Shifts `value` into the field described by `mask`.
pub const fn field_prep(mask: u32, value: u32) -> u32 {
    (value << mask.trailing_zeros()) & mask
}

/// Extracts the field described by `mask` from `reg`.
pub const fn field_get(mask: u32, reg: u32) -> u32 {
    (reg & mask) >> mask.trailing_zeros()
}

/// Largest value that fits in the field described by `mask`.
pub const fn field_max(mask: u32) -> u32 {
    mask >> mask.trailing_zeros()
}

pub mod ctrlr0 {
    use super::genmask;

    pub const DFS: u32 = genmask(4, 0);
    pub const FRF: u32 = genmask(7, 6);
    pub const SCPH: u32 = 1 << 8;
    pub const SCPOL: u32 = 1 << 9;
    pub const TMOD: u32 = genmask(11, 10);
    pub const SPI_FRF: u32 = genmask(23, 22);

    pub const FRF_SPI: u32 = 0;

    pub const TMOD_TX_RX: u32 = 0;
    pub const TMOD_TX: u32 = 1;
    pub const TMOD_RX: u32 = 2;

    pub const SPI_FRF_STANDARD: u32 = 0;
    pub const SPI_FRF_DUAL: u32 = 1;
    pub const SPI_FRF_QUAD: u32 = 2;
    pub const SPI_FRF_OCTAL: u32 = 3;

    /// Data frame size values, in bits minus one.
    pub const DFS_8: u32 = 7;
    pub const DFS_16: u32 = 15;
    pub const DFS_32: u32 = 31;
}

pub mod ctrlr1 {
    use super::genmask;

    pub const NDF: u32 = genmask(15, 0);
}

pub mod ssienr {
    pub const SSIC_EN: u32 = 1 << 0;
}

pub mod txftlr {
    use super::genmask;

    /// Interrupt threshold.
    pub const TFT: u32 = genmask(7, 0);
    /// Start level: transmission begins once the FIFO holds more entries.
    pub const TXFTHR: u32 = genmask(23, 16);
}

pub mod rxftlr {
    use super::genmask;

    pub const RFT: u32 = genmask(7, 0);
}

pub mod dmacr {
    pub const RDMAE: u32 = 1 << 0;
    pub const TDMAE: u32 = 1 << 1;
}

pub mod spi_ctrlr0 {
    use super::genmask;

    pub const TRANS_TYPE: u32 = genmask(1, 0);
    pub const ADDR_L: u32 = genmask(5, 2);
    pub const INST_L: u32 = genmask(9, 8);
    pub const WAIT_CYCLES: u32 = genmask(15, 11);
    pub const CLK_STRETCH_EN: u32 = 1 << 30;

    pub const TRANS_TYPE_TT0: u32 = 0;
    pub const TRANS_TYPE_TT1: u32 = 1;
    pub const TRANS_TYPE_TT2: u32 = 2;

    pub const INST_L_0: u32 = 0;
    pub const INST_L_8: u32 = 2;
    pub const INST_L_16: u32 = 3;
}

pub mod xip_ctrl {
    use super::genmask;

    pub const FRF: u32 = genmask(1, 0);
    pub const TRANS_TYPE: u32 = genmask(3, 2);
    pub const ADDR_L: u32 = genmask(7, 4);
    pub const INST_L: u32 = genmask(10, 9);
    pub const WAIT_CYCLES: u32 = genmask(17, 13);
    pub const INST_EN: u32 = 1 << 22;
}

pub mod xip_write_ctrl {
    use super::genmask;

    pub const FRF: u32 = genmask(1, 0);
    pub const TRANS_TYPE: u32 = genmask(3, 2);
    pub const ADDR_L: u32 = genmask(7, 4);
    pub const INST_L: u32 = genmask(9, 8);
    pub const WAIT_CYCLES: u32 = genmask(20, 16);
}

bitflags! {
    /// Bits of `SR`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Status: u32 {
        const BUSY = 1 << 0;
        const TFNF = 1 << 1;
        const TFE = 1 << 2;
        const RFNE = 1 << 3;
        const RFF = 1 << 4;
    }
}

bitflags! {
    /// Interrupt bits, laid out identically in `IMR`, `ISR` and `RISR`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Irq: u32 {
        /// Transmit FIFO at or below threshold.
        const TXE = 1 << 0;
        const TXO = 1 << 1;
        const RXU = 1 << 2;
        /// Receive FIFO overflow.
        const RXO = 1 << 3;
        /// Receive FIFO above threshold.
        const RXF = 1 << 4;
        const MST = 1 << 5;
    }
}
