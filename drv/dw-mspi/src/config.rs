// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance configuration, and translation of device configurations into
//! register values.
//!
//! Nothing in here touches hardware. Device configuration is staged into a
//! [`Shadow`] that the sequencer writes out at the start of every packet,
//! since `CTRLR0` and friends can only be changed with the controller
//! disabled.

use drv_mspi_api::{
    CeLine, CePolarity, Cpp, DataRate, DevConfigMask, DeviceConfig, Endian,
    IoMode, MspiError, OpMode,
};
use static_assertions::const_assert;

use crate::platform::FifoContext;
use crate::regs::{ctrlr0, ctrlr1, field_max, field_prep, spi_ctrlr0, xip_ctrl};
use crate::regs::xip_write_ctrl;

/// Controllers with shallower FIFOs than this aren't worth supporting: the
/// dummy byte budget would leave almost no room for real data.
pub const MIN_FIFO_DEPTH: usize = 8;

/// Largest number of frames one packet can carry (`CTRLR1.NDF` + 1).
pub const MAX_FRAMES: u32 = field_max(ctrlr1::NDF) + 1;

/// `BAUDR` holds an even divider in 2..=65534.
pub const MIN_DIVIDER: u32 = 2;
pub const MAX_DIVIDER: u32 = 65534;

/// Divider for `BAUDR` giving at most `freq`: rounded up to the next even
/// value and kept within the register's range.
pub(crate) fn baud_divider(clock: u32, freq: u32) -> u32 {
    let div = clock.div_ceil(freq.max(1));
    (div + (div & 1)).clamp(MIN_DIVIDER, MAX_DIVIDER)
}

/// How long a device waits for another to give up the controller.
pub const DEFAULT_REBIND_TIMEOUT_MS: u32 = 200;

const_assert!(MAX_FRAMES == 65536);
const_assert!(
    field_max(spi_ctrlr0::WAIT_CYCLES) <= field_max(xip_ctrl::WAIT_CYCLES)
);
const_assert!(
    field_max(spi_ctrlr0::WAIT_CYCLES)
        <= field_max(xip_write_ctrl::WAIT_CYCLES)
);

/// How the data phase of a packet is moved between memory and the FIFOs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferMode {
    /// The FIFO pump does everything.
    Pio,
    /// Data phases are handed to the vendor DMA hooks. `tx_level` and
    /// `rx_level` go to `DMATDLR`/`DMARDLR`.
    Dma { tx_level: u8, rx_level: u8 },
}

/// Fixed description of one controller instance.
#[derive(Copy, Clone, Debug)]
pub struct DwMspiConfig {
    /// Frequency of the clock feeding the baud rate divider, in Hz.
    pub clock_frequency: u32,
    /// GPIO chip enables; driven inactive at init.
    pub ce_lines: &'static [CeLine],
    pub tx_fifo_depth_minus_1: u8,
    pub tx_fifo_threshold: u8,
    pub rx_fifo_threshold: u8,
    /// Upper bound on dummy bytes sitting in the TX FIFO at once. Must not
    /// exceed the RX FIFO depth minus one: every byte shifted out comes back
    /// into the RX FIFO, and one more may be on the wire without showing up
    /// in `RXFLR` yet.
    pub max_queued_dummy_bytes: u8,
    pub rx_sample_delay: u8,
    pub op_mode: OpMode,
    /// Several devices may share the controller with a configuration pass on
    /// each switch, even an empty one.
    pub sw_multi_periph: bool,
    pub transfer_mode: TransferMode,
    pub xip: bool,
    pub async_transfers: bool,
    pub fifo_context: FifoContext,
    pub rebind_timeout_ms: u32,
}

impl DwMspiConfig {
    /// Configuration for a controller with `fifo_depth`-entry FIFOs in both
    /// directions, with the other knobs at their usual values.
    pub const fn new(clock_frequency: u32, fifo_depth: u8) -> Self {
        Self {
            clock_frequency,
            ce_lines: &[],
            tx_fifo_depth_minus_1: fifo_depth - 1,
            tx_fifo_threshold: fifo_depth / 2,
            rx_fifo_threshold: fifo_depth / 2 - 1,
            max_queued_dummy_bytes: fifo_depth - 1,
            rx_sample_delay: 0,
            op_mode: OpMode::Controller,
            sw_multi_periph: false,
            transfer_mode: TransferMode::Pio,
            xip: false,
            async_transfers: false,
            fifo_context: FifoContext::Interrupt,
            rebind_timeout_ms: DEFAULT_REBIND_TIMEOUT_MS,
        }
    }

    pub fn tx_fifo_depth(&self) -> u32 {
        u32::from(self.tx_fifo_depth_minus_1) + 1
    }

    pub(crate) fn validate(&self) -> Result<(), MspiError> {
        if self.op_mode != OpMode::Controller {
            return Err(MspiError::NotSupported);
        }
        let depth = self.tx_fifo_depth() as usize;
        if depth < MIN_FIFO_DEPTH
            || self.clock_frequency < MIN_DIVIDER
            || u32::from(self.tx_fifo_threshold) >= self.tx_fifo_depth()
            || u32::from(self.rx_fifo_threshold) >= self.tx_fifo_depth()
            || self.max_queued_dummy_bytes == 0
            || u32::from(self.max_queued_dummy_bytes) >= self.tx_fifo_depth()
        {
            return Err(MspiError::InvalidArgument);
        }
        Ok(())
    }
}

/// Register values staged for the bound device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Shadow {
    pub ctrlr0: u32,
    pub spi_ctrlr0: u32,
    pub baudr: u32,
    pub standard_spi: bool,
    pub freq: u32,
    pub cpp: Cpp,
}

impl Shadow {
    pub const fn new() -> Self {
        Self {
            ctrlr0: 0,
            spi_ctrlr0: 0,
            baudr: 0,
            standard_spi: true,
            freq: 0,
            cpp: Cpp::Mode0,
        }
    }
}

/// Device-scoped parameters used to program the XIP registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct XipParams {
    pub read_cmd: u32,
    pub write_cmd: u32,
    pub rx_dummy: u16,
    pub tx_dummy: u16,
    pub cmd_length: u8,
    pub addr_length: u8,
    pub io_mode: IoMode,
}

impl XipParams {
    pub const fn new() -> Self {
        Self {
            read_cmd: 0,
            write_cmd: 0,
            rx_dummy: 0,
            tx_dummy: 0,
            cmd_length: 0,
            addr_length: 0,
            io_mode: IoMode::Single,
        }
    }

    /// Fields that must match between devices sharing an XIP session.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.read_cmd != other.read_cmd
            || self.write_cmd != other.write_cmd
            || self.cmd_length != other.cmd_length
            || self.addr_length != other.addr_length
            || self.rx_dummy != other.rx_dummy
            || self.tx_dummy != other.tx_dummy
    }
}

/// Frame format and instruction/address transfer type for a multi-line
/// mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct LineEncoding {
    pub frf: u32,
    pub trans_type: u32,
}

/// Encodes `mode`; `None` means standard (single line) SPI.
pub(crate) fn line_encoding(
    mode: IoMode,
) -> Result<Option<LineEncoding>, MspiError> {
    use IoMode::*;

    let frf = match mode {
        Single => return Ok(None),
        Dual | Dual1_1_2 | Dual1_2_2 => ctrlr0::SPI_FRF_DUAL,
        Quad | Quad1_1_4 | Quad1_4_4 => ctrlr0::SPI_FRF_QUAD,
        Octal | Octal1_1_8 | Octal1_8_8 => ctrlr0::SPI_FRF_OCTAL,
        HexDecimal | Hex8_8_16 | Hex8_16_16 => {
            return Err(MspiError::InvalidArgument)
        }
    };
    // Instruction and address both on one line, only the instruction on one
    // line, or everything on all lines.
    let trans_type = match mode {
        Dual1_1_2 | Quad1_1_4 | Octal1_1_8 => spi_ctrlr0::TRANS_TYPE_TT0,
        Dual1_2_2 | Quad1_4_4 | Octal1_8_8 => spi_ctrlr0::TRANS_TYPE_TT1,
        _ => spi_ctrlr0::TRANS_TYPE_TT2,
    };
    Ok(Some(LineEncoding { frf, trans_type }))
}

/// `INST_L` encoding for a command of `cmd_length` bytes.
pub(crate) fn inst_l(cmd_length: u8) -> Result<u32, MspiError> {
    match cmd_length {
        0 => Ok(spi_ctrlr0::INST_L_0),
        1 => Ok(spi_ctrlr0::INST_L_8),
        2 => Ok(spi_ctrlr0::INST_L_16),
        _ => Err(MspiError::InvalidArgument),
    }
}

/// `ADDR_L` encoding (4-bit units) for an address of `addr_length` bytes.
pub(crate) fn addr_l(addr_length: u8) -> Result<u32, MspiError> {
    if addr_length > 4 {
        return Err(MspiError::InvalidArgument);
    }
    Ok(u32::from(addr_length) * 2)
}

/// Checks that `dummy` clock cycles can be produced in the current framing:
/// whole filler bytes in standard SPI, the `WAIT_CYCLES` field otherwise.
pub(crate) fn check_dummy(
    standard_spi: bool,
    dummy: u16,
) -> Result<(), MspiError> {
    let ok = if standard_spi {
        dummy % 8 == 0
    } else {
        u32::from(dummy) <= field_max(spi_ctrlr0::WAIT_CYCLES)
    };
    if ok {
        Ok(())
    } else {
        Err(MspiError::InvalidArgument)
    }
}

/// Applies an I/O mode to the shadow frame format fields.
pub(crate) fn apply_io_mode(
    shadow: &mut Shadow,
    mode: IoMode,
) -> Result<(), MspiError> {
    let encoding = line_encoding(mode)?;

    shadow.ctrlr0 &= !ctrlr0::SPI_FRF;
    shadow.spi_ctrlr0 &= !spi_ctrlr0::TRANS_TYPE;
    match encoding {
        None => {
            shadow.standard_spi = true;
            shadow.ctrlr0 |=
                field_prep(ctrlr0::SPI_FRF, ctrlr0::SPI_FRF_STANDARD);
        }
        Some(enc) => {
            shadow.standard_spi = false;
            shadow.ctrlr0 |= field_prep(ctrlr0::SPI_FRF, enc.frf);
            shadow.spi_ctrlr0 |=
                field_prep(spi_ctrlr0::TRANS_TYPE, enc.trans_type);
        }
    }
    Ok(())
}

/// Sets the command and address lengths in the shadow `SPI_CTRLR0`.
pub(crate) fn apply_lengths(
    shadow: &mut Shadow,
    cmd_length: u8,
    addr_length: u8,
) -> Result<(), MspiError> {
    let inst = inst_l(cmd_length)?;
    let addr = addr_l(addr_length)?;
    shadow.spi_ctrlr0 &= !(spi_ctrlr0::INST_L | spi_ctrlr0::ADDR_L);
    shadow.spi_ctrlr0 |= field_prep(spi_ctrlr0::INST_L, inst)
        | field_prep(spi_ctrlr0::ADDR_L, addr);
    Ok(())
}

/// Clock settings in use by an active XIP session, which device
/// configuration must not disturb.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct XipClock {
    pub freq: u32,
    pub cpp: Cpp,
}

/// Validates the fields of `cfg` selected by `mask` and returns the updated
/// shadow and stored XIP parameters. On error nothing is returned, so the
/// caller's copies stay as they were.
pub(crate) fn stage(
    instance: &DwMspiConfig,
    mut shadow: Shadow,
    mut stored: XipParams,
    xip_clock: Option<XipClock>,
    mask: DevConfigMask,
    cfg: &DeviceConfig,
) -> Result<(Shadow, XipParams), MspiError> {
    if mask.contains(DevConfigMask::ENDIAN) && cfg.endian != Endian::Big {
        return Err(MspiError::NotSupported);
    }

    if mask.contains(DevConfigMask::CE_POL)
        && cfg.ce_polarity != CePolarity::ActiveLow
    {
        return Err(MspiError::NotSupported);
    }

    if mask.intersects(DevConfigMask::MEM_BOUND | DevConfigMask::BREAK_TIME)
        && (cfg.mem_boundary != 0 || cfg.time_to_break != 0)
    {
        return Err(MspiError::NotSupported);
    }

    if mask.contains(DevConfigMask::IO_MODE) {
        apply_io_mode(&mut shadow, cfg.io_mode)?;
        stored.io_mode = cfg.io_mode;
    }

    if mask.contains(DevConfigMask::CPP) {
        if matches!(xip_clock, Some(x) if x.cpp != cfg.cpp) {
            return Err(MspiError::InvalidArgument);
        }
        shadow.ctrlr0 &= !(ctrlr0::SCPOL | ctrlr0::SCPH);
        if cfg.cpp.cpol() {
            shadow.ctrlr0 |= ctrlr0::SCPOL;
        }
        if cfg.cpp.cpha() {
            shadow.ctrlr0 |= ctrlr0::SCPH;
        }
        shadow.cpp = cfg.cpp;
    }

    if mask.contains(DevConfigMask::FREQUENCY) {
        let clock = instance.clock_frequency;
        if cfg.freq == 0
            || cfg.freq < clock / MAX_DIVIDER
            || cfg.freq > clock / MIN_DIVIDER
        {
            return Err(MspiError::InvalidArgument);
        }
        if matches!(xip_clock, Some(x) if x.freq != cfg.freq) {
            return Err(MspiError::InvalidArgument);
        }
        shadow.baudr = baud_divider(clock, cfg.freq);
        shadow.freq = cfg.freq;
    }

    if mask.contains(DevConfigMask::DATA_RATE)
        && cfg.data_rate != DataRate::Single
    {
        return Err(MspiError::NotSupported);
    }

    if mask.contains(DevConfigMask::DQS) && cfg.dqs_enable {
        return Err(MspiError::NotSupported);
    }

    if mask.contains(DevConfigMask::CMD_LEN) {
        inst_l(cfg.cmd_length)?;
        stored.cmd_length = cfg.cmd_length;
    }
    if mask.contains(DevConfigMask::ADDR_LEN) {
        addr_l(cfg.addr_length)?;
        stored.addr_length = cfg.addr_length;
    }
    if mask.contains(DevConfigMask::RX_DUMMY) {
        check_dummy(shadow.standard_spi, cfg.rx_dummy)?;
        stored.rx_dummy = cfg.rx_dummy;
    }
    if mask.contains(DevConfigMask::TX_DUMMY) {
        check_dummy(shadow.standard_spi, cfg.tx_dummy)?;
        stored.tx_dummy = cfg.tx_dummy;
    }
    if mask.contains(DevConfigMask::READ_CMD) {
        stored.read_cmd = cfg.read_cmd;
    }
    if mask.contains(DevConfigMask::WRITE_CMD) {
        stored.write_cmd = cfg.write_cmd;
    }

    // Motorola frames with clock stretching, whatever else was asked for.
    shadow.ctrlr0 &= !ctrlr0::FRF;
    shadow.ctrlr0 |= field_prep(ctrlr0::FRF, ctrlr0::FRF_SPI);
    shadow.spi_ctrlr0 |= spi_ctrlr0::CLK_STRETCH_EN;

    Ok((shadow, stored))
}
