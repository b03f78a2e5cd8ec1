// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client-facing types for multi-line SPI (MSPI) controllers.
//!
//! A controller is shared by several peripherals. Each peripheral is named by
//! a [`DeviceId`]; the one that last configured the controller is "bound" and
//! is the only one allowed to issue transfers until it gives the controller
//! back.

#![no_std]

use bitflags::bitflags;
use num_derive::FromPrimitive;

/// Maximum number of packets carried by a single [`Transfer`].
pub const MAX_PACKETS: usize = 16;

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum MspiError {
    /// Parameter (or combination of them) the controller can't express
    InvalidArgument = 1,

    /// Feature exists in the API but not in this controller
    NotSupported = 2,

    /// Controller is claimed by another device or is in use
    Busy = 3,

    /// Packet didn't complete before its deadline
    TimedOut = 4,

    /// Receive FIFO overflowed during a packet
    Overrun = 5,

    /// Power management refused to hand out a reference
    Power = 6,

    /// Controller was suspended underneath the caller
    Suspended = 7,

    /// Chip enable GPIO couldn't be driven
    Gpio = 8,
}

impl From<MspiError> for u32 {
    fn from(rc: MspiError) -> Self {
        rc as u32
    }
}

/// A GPIO line used as a chip enable, on top of the controller's own select
/// lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CeLine {
    pub port: u8,
    pub pin: u8,
}

/// Identity of a peripheral attached to a controller.
///
/// `index` selects the controller's built-in slave select line (and the XIP
/// session bit); `ce`, if present, is an extra GPIO driven around every
/// packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceId {
    pub index: u8,
    pub ce: Option<CeLine>,
}

impl DeviceId {
    pub const fn new(index: u8) -> Self {
        Self { index, ce: None }
    }

    pub const fn with_ce(index: u8, ce: CeLine) -> Self {
        Self {
            index,
            ce: Some(ce),
        }
    }
}

/// Number of lines used for each of the instruction, address, and data
/// phases. A mode without a suffix clocks everything over all lines; the
/// `1-1-n` and `1-n-n` variants keep the early phases on a single line.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum IoMode {
    Single,
    Dual,
    Dual1_1_2,
    Dual1_2_2,
    Quad,
    Quad1_1_4,
    Quad1_4_4,
    Octal,
    Octal1_1_8,
    Octal1_8_8,
    HexDecimal,
    Hex8_8_16,
    Hex8_16_16,
}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum DataRate {
    Single,
    Dual,
    SingleSingleDual,
    SingleDualDual,
}

/// Clock polarity and phase.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum Cpp {
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl Cpp {
    /// Clock idles high.
    pub fn cpol(self) -> bool {
        matches!(self, Self::Mode2 | Self::Mode3)
    }

    /// Data is sampled on the second clock edge.
    pub fn cpha(self) -> bool {
        matches!(self, Self::Mode1 | Self::Mode3)
    }
}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum CePolarity {
    ActiveLow,
    ActiveHigh,
}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum OpMode {
    Controller,
    Peripheral,
}

bitflags! {
    /// Selects which fields of a [`DeviceConfig`] are to be applied.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct DevConfigMask: u32 {
        const CE_NUM = 1 << 0;
        const FREQUENCY = 1 << 1;
        const IO_MODE = 1 << 2;
        const DATA_RATE = 1 << 3;
        const CPP = 1 << 4;
        const ENDIAN = 1 << 5;
        const CE_POL = 1 << 6;
        const DQS = 1 << 7;
        const RX_DUMMY = 1 << 8;
        const TX_DUMMY = 1 << 9;
        const READ_CMD = 1 << 10;
        const WRITE_CMD = 1 << 11;
        const CMD_LEN = 1 << 12;
        const ADDR_LEN = 1 << 13;
        const MEM_BOUND = 1 << 14;
        const BREAK_TIME = 1 << 15;
    }
}

/// Per-device settings. Only the fields named by the accompanying
/// [`DevConfigMask`] are looked at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfig {
    pub ce_num: u8,
    /// Serial clock frequency in Hz.
    pub freq: u32,
    pub io_mode: IoMode,
    pub data_rate: DataRate,
    pub cpp: Cpp,
    pub endian: Endian,
    pub ce_polarity: CePolarity,
    pub dqs_enable: bool,
    /// Dummy clock cycles between address and data for reads.
    pub rx_dummy: u16,
    /// Dummy clock cycles between address and data for writes.
    pub tx_dummy: u16,
    pub read_cmd: u32,
    pub write_cmd: u32,
    /// Command length in bytes.
    pub cmd_length: u8,
    /// Address length in bytes.
    pub addr_length: u8,
    /// Memory boundary at which chip enable must be broken, 0 for none.
    pub mem_boundary: u32,
    /// Maximum time chip enable may stay asserted, 0 for no limit.
    pub time_to_break: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ce_num: 0,
            freq: 1_000_000,
            io_mode: IoMode::Single,
            data_rate: DataRate::Single,
            cpp: Cpp::Mode0,
            endian: Endian::Big,
            ce_polarity: CePolarity::ActiveLow,
            dqs_enable: false,
            rx_dummy: 0,
            tx_dummy: 0,
            read_cmd: 0,
            write_cmd: 0,
            cmd_length: 0,
            addr_length: 0,
            mem_boundary: 0,
            time_to_break: 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Data phase of a packet. The variant carries the direction.
#[derive(Debug)]
pub enum PacketData<'a> {
    /// Command and address only.
    Empty,
    Tx(&'a [u8]),
    Rx(&'a mut [u8]),
}

/// One command/address/data exchange with chip enable held throughout.
#[derive(Debug)]
pub struct Packet<'a> {
    pub cmd: u32,
    pub address: u32,
    pub data: PacketData<'a>,
}

impl<'a> Packet<'a> {
    pub fn write(cmd: u32, address: u32, data: &'a [u8]) -> Self {
        Self {
            cmd,
            address,
            data: PacketData::Tx(data),
        }
    }

    pub fn read(cmd: u32, address: u32, data: &'a mut [u8]) -> Self {
        Self {
            cmd,
            address,
            data: PacketData::Rx(data),
        }
    }

    pub fn command(cmd: u32, address: u32) -> Self {
        Self {
            cmd,
            address,
            data: PacketData::Empty,
        }
    }

    pub fn num_bytes(&self) -> usize {
        match &self.data {
            PacketData::Empty => 0,
            PacketData::Tx(d) => d.len(),
            PacketData::Rx(d) => d.len(),
        }
    }

    /// Packets without a data phase count as writes: only the command and
    /// address are shifted out.
    pub fn direction(&self) -> Direction {
        match self.data {
            PacketData::Rx(_) => Direction::Rx,
            _ => Direction::Tx,
        }
    }
}

/// A sequence of packets sharing command/address lengths and dummy cycles.
#[derive(Debug)]
pub struct Transfer<'a> {
    /// Command length in bytes, 0 if packets carry no command.
    pub cmd_length: u8,
    /// Address length in bytes, 0 if packets carry no address.
    pub addr_length: u8,
    pub rx_dummy: u16,
    pub tx_dummy: u16,
    /// Deadline applied to each packet, in milliseconds.
    pub timeout_ms: u32,
    pub packets: heapless::Vec<Packet<'a>, MAX_PACKETS>,
}

impl<'a> Transfer<'a> {
    pub fn new(cmd_length: u8, addr_length: u8, timeout_ms: u32) -> Self {
        Self {
            cmd_length,
            addr_length,
            rx_dummy: 0,
            tx_dummy: 0,
            timeout_ms,
            packets: heapless::Vec::new(),
        }
    }

    pub fn with_dummy(mut self, rx_dummy: u16, tx_dummy: u16) -> Self {
        self.rx_dummy = rx_dummy;
        self.tx_dummy = tx_dummy;
        self
    }

    /// Appends `packet`, handing it back if the transfer is full.
    pub fn push(&mut self, packet: Packet<'a>) -> Result<(), Packet<'a>> {
        self.packets.push(packet)
    }
}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum XipPermission {
    ReadWrite,
    ReadOnly,
}

/// Execute-in-place window settings for one device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct XipConfig {
    pub enable: bool,
    pub address_offset: u32,
    pub size: u32,
    pub permission: XipPermission,
}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum EventKind {
    Error = 0,
    TransferComplete = 1,
    Timeout = 2,
}

impl EventKind {
    pub const COUNT: usize = 3;
}

/// Terminal outcome of an asynchronous transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub dev: DeviceId,
    /// Number of packets that completed before the event.
    pub packets_done: usize,
    pub status: Result<(), MspiError>,
}

/// Handlers capture whatever context they need.
pub type EventHandler = &'static (dyn Fn(&Event) + Sync);
