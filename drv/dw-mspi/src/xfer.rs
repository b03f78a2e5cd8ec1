// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Packet sequencing: planning a packet, programming the controller for it,
//! waiting for it (synchronous transfers), and cleaning up afterwards.

use drv_mspi_api::{Direction, MspiError, Packet, PacketData, Transfer};
use ringbuf::*;

use crate::cleanup::FirstError;
use crate::config::{self, DwMspiConfig, TransferMode, MAX_FRAMES};
use crate::platform::{DmaBuffer, Platform, Vendor};
use crate::regs::{
    ctrlr0, dmacr, field_prep, rxftlr, spi_ctrlr0, ssienr, txftlr, Irq, Reg,
    Regs,
};
use crate::{dev_bit, Engine, Trace};

/// Where the current packet is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketPhase {
    /// No packet has been started.
    Idle,
    /// Controller programmed, command and address being queued.
    Header,
    /// Data (or dummy bytes) moving through the FIFOs.
    Data,
    /// Everything has been queued; waiting for the wire to catch up.
    Draining,
    /// Finished on the wire, not yet finalized.
    Complete,
    /// Finalized, with the packet's outcome.
    Finished(Result<(), MspiError>),
}

impl PacketPhase {
    pub fn in_flight(self) -> bool {
        matches!(self, Self::Header | Self::Data | Self::Draining)
    }
}

/// Per-transfer settings shared by all its packets.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct XferParams {
    pub cmd_length: u8,
    pub addr_length: u8,
    pub rx_dummy: u16,
    pub tx_dummy: u16,
    pub timeout_ms: u32,
}

impl XferParams {
    pub fn has_header(&self) -> bool {
        self.cmd_length != 0 || self.addr_length != 0
    }
}

/// Progress through the current packet.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Cursor {
    pub pos: usize,
    pub end: usize,
    /// log2 of the bytes per frame.
    pub frame_exp: u8,
    /// Bytes still to be shifted out to clock in the response.
    pub dummy_bytes: u32,
    /// Leading received bytes that are echoes of the header and fillers.
    pub bytes_to_discard: u32,
    /// The data phase is being moved by DMA.
    pub dma: bool,
}

impl Cursor {
    pub fn frame_bytes(&self) -> usize {
        1 << self.frame_exp
    }
}

/// Register-level shape of one packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct PacketPlan {
    pub frame_exp: u8,
    pub frames: u32,
    pub tmod: u32,
    pub imr: Irq,
    pub wait_cycles: u32,
    pub rx_threshold: u32,
    pub dummy_bytes: u32,
    pub bytes_to_discard: u32,
}

/// Largest frame size (as log2 of bytes) dividing `num_bytes`.
pub(crate) fn frame_exp(num_bytes: usize) -> u8 {
    if num_bytes % 4 == 0 {
        2
    } else if num_bytes % 2 == 0 {
        1
    } else {
        0
    }
}

pub(crate) fn plan_packet(
    config: &DwMspiConfig,
    standard_spi: bool,
    params: &XferParams,
    dir: Direction,
    num_bytes: usize,
) -> Result<PacketPlan, MspiError> {
    // Command and address go through the data register as bytes in
    // standard SPI, so the data must be bytes too.
    let frame_exp = if standard_spi && params.has_header() {
        0
    } else {
        frame_exp(num_bytes)
    };

    let frames = num_bytes >> frame_exp;
    if frames > MAX_FRAMES as usize {
        return Err(MspiError::InvalidArgument);
    }
    let frames = frames as u32;
    let rx_fifo_threshold = u32::from(config.rx_fifo_threshold);

    let plan = if dir == Direction::Tx || num_bytes == 0 {
        PacketPlan {
            frame_exp,
            frames,
            tmod: ctrlr0::TMOD_TX,
            imr: Irq::TXE,
            wait_cycles: u32::from(params.tx_dummy),
            rx_threshold: 0,
            dummy_bytes: 0,
            bytes_to_discard: 0,
        }
    } else if standard_spi && params.has_header() {
        let bytes_to_discard = u32::from(params.cmd_length)
            + u32::from(params.addr_length)
            + u32::from(params.rx_dummy) / 8;
        let dummy_bytes = bytes_to_discard + frames;
        PacketPlan {
            frame_exp,
            frames,
            tmod: ctrlr0::TMOD_TX_RX,
            imr: Irq::TXE | Irq::RXF,
            wait_cycles: 0,
            rx_threshold: (dummy_bytes - 1).min(rx_fifo_threshold),
            dummy_bytes,
            bytes_to_discard,
        }
    } else {
        PacketPlan {
            frame_exp,
            frames,
            tmod: ctrlr0::TMOD_RX,
            imr: Irq::RXF,
            wait_cycles: u32::from(params.rx_dummy),
            rx_threshold: frames.saturating_sub(1).min(rx_fifo_threshold),
            dummy_bytes: 0,
            bytes_to_discard: 0,
        }
    };
    Ok(plan)
}

/// Number of TX FIFO entries taken by the command and address.
pub(crate) fn header_entries(standard_spi: bool, params: &XferParams) -> u32 {
    let entries = |len: u8| match (len, standard_spi) {
        (0, _) => 0,
        (n, true) => u32::from(n),
        (_, false) => 1,
    };
    entries(params.cmd_length) + entries(params.addr_length)
}

/// Data frame size field for a frame of `1 << frame_exp` bytes.
fn dfs(frame_exp: u8) -> u32 {
    match frame_exp {
        2 => ctrlr0::DFS_32,
        1 => ctrlr0::DFS_16,
        _ => ctrlr0::DFS_8,
    }
}

fn dma_buffer<'b>(data: &'b mut PacketData<'_>) -> Option<DmaBuffer<'b>> {
    match data {
        PacketData::Empty => None,
        PacketData::Tx(d) => Some(DmaBuffer::Tx(d)),
        PacketData::Rx(d) => Some(DmaBuffer::Rx(d)),
    }
}

pub(crate) enum Started {
    /// Nothing to clock out.
    Skipped,
    Running,
}

/// Values for the registers that may only change while disabled.
struct FrameRegs {
    ctrlr0: u32,
    ctrlr1: u32,
    spi_ctrlr0: u32,
    baudr: u32,
    rx_sample_dly: u32,
    ser: u32,
}

fn write_frame_regs<R: Regs>(regs: &mut R, f: &FrameRegs) {
    regs.write(Reg::Ctrlr0, f.ctrlr0);
    regs.write(Reg::Ctrlr1, f.ctrlr1);
    regs.write(Reg::SpiCtrlr0, f.spi_ctrlr0);
    regs.write(Reg::Baudr, f.baudr);
    regs.write(Reg::RxSampleDly, f.rx_sample_dly);
    regs.write(Reg::Ser, f.ser);
}

impl<R: Regs, P: Platform, V: Vendor<R>> Engine<R, P, V> {
    /// Validates the per-transfer lengths and dummy counts and folds them
    /// into the shadow registers.
    pub(crate) fn apply_transfer(
        &mut self,
        xfer: &Transfer<'_>,
    ) -> Result<(), MspiError> {
        if xfer.packets.is_empty() {
            return Err(MspiError::InvalidArgument);
        }

        let mut shadow = self.shadow;
        config::apply_lengths(&mut shadow, xfer.cmd_length, xfer.addr_length)?;
        config::check_dummy(shadow.standard_spi, xfer.rx_dummy)?;
        config::check_dummy(shadow.standard_spi, xfer.tx_dummy)?;

        self.shadow = shadow;
        self.params = XferParams {
            cmd_length: xfer.cmd_length,
            addr_length: xfer.addr_length,
            rx_dummy: xfer.rx_dummy,
            tx_dummy: xfer.tx_dummy,
            timeout_ms: xfer.timeout_ms,
        };
        Ok(())
    }

    /// Programs the controller for `packet` and queues what can be queued
    /// right away. The rest happens in the FIFO pump.
    pub(crate) fn start_packet(
        &mut self,
        packet: &mut Packet<'_>,
    ) -> Result<Started, MspiError> {
        let num_bytes = packet.num_bytes();
        if num_bytes == 0 && !self.params.has_header() {
            ringbuf_entry_root!(Trace::PacketSkipped(self.packets_done));
            return Ok(Started::Skipped);
        }

        let standard_spi = self.shadow.standard_spi;
        let plan = plan_packet(
            &self.config,
            standard_spi,
            &self.params,
            packet.direction(),
            num_bytes,
        )?;
        let ser = match self.bound {
            Some(dev) => dev_bit(&dev)?,
            None => return Err(MspiError::InvalidArgument),
        };
        let dma = num_bytes > 0
            && plan.dummy_bytes == 0
            && matches!(self.config.transfer_mode, TransferMode::Dma { .. });

        ringbuf_entry_root!(Trace::PacketStart {
            frames: plan.frames,
            tmod: plan.tmod,
            dummies: plan.dummy_bytes,
        });

        self.cursor = Cursor {
            pos: 0,
            end: num_bytes,
            frame_exp: plan.frame_exp,
            dummy_bytes: plan.dummy_bytes,
            bytes_to_discard: plan.bytes_to_discard,
            dma,
        };
        self.done_queued = false;
        self.phase = PacketPhase::Header;

        if let Some(ce) = self.ce_line() {
            if self.platform.ce_set(ce, true).is_err() {
                ringbuf_entry_root!(Trace::CeFailed);
                self.phase = PacketPhase::Finished(Err(MspiError::Gpio));
                return Err(MspiError::Gpio);
            }
        }

        let frame = FrameRegs {
            ctrlr0: (self.shadow.ctrlr0 & !(ctrlr0::TMOD | ctrlr0::DFS))
                | field_prep(ctrlr0::TMOD, plan.tmod)
                | field_prep(ctrlr0::DFS, dfs(plan.frame_exp)),
            ctrlr1: plan.frames.saturating_sub(1),
            spi_ctrlr0: (self.shadow.spi_ctrlr0 & !spi_ctrlr0::WAIT_CYCLES)
                | field_prep(spi_ctrlr0::WAIT_CYCLES, plan.wait_cycles),
            baudr: self.shadow.baudr,
            rx_sample_dly: u32::from(self.config.rx_sample_delay),
            ser,
        };
        if self.xip.enabled != 0 {
            // XIP keeps the controller enabled. Disable it only for as long
            // as it takes to rewrite the frame registers, and don't let
            // anything else get in the way meanwhile.
            let regs = &mut self.regs;
            critical_section::with(|_| {
                regs.write(Reg::Ssienr, 0);
                write_frame_regs(regs, &frame);
                regs.write(Reg::Ssienr, ssienr::SSIC_EN);
            });
        } else {
            write_frame_regs(&mut self.regs, &frame);
        }

        let header = header_entries(standard_spi, &self.params);
        let depth_minus_1 = u32::from(self.config.tx_fifo_depth_minus_1);
        let start_level = if num_bytes == 0 || plan.tmod == ctrlr0::TMOD_RX {
            // Only the command and address (or the kick) are queued: go as
            // soon as all of it is in.
            header.saturating_sub(1)
        } else if plan.dummy_bytes > 0 {
            // Dummy bytes are queued in batches of at most
            // `max_queued_dummy_bytes`, so the FIFO never gets fuller.
            depth_minus_1
                .min(u32::from(self.config.max_queued_dummy_bytes) - 1)
        } else if dma {
            depth_minus_1.min((header + plan.frames).saturating_sub(1))
        } else {
            depth_minus_1
        };
        let threshold = if num_bytes == 0 {
            0
        } else {
            u32::from(self.config.tx_fifo_threshold)
        };
        self.regs.write(
            Reg::Txftlr,
            field_prep(txftlr::TXFTHR, start_level)
                | field_prep(txftlr::TFT, threshold),
        );
        self.regs
            .write(Reg::Rxftlr, field_prep(rxftlr::RFT, plan.rx_threshold));

        if let TransferMode::Dma { tx_level, rx_level } =
            self.config.transfer_mode
        {
            if dma {
                self.regs.write(Reg::Dmatdlr, u32::from(tx_level));
                self.regs.write(Reg::Dmardlr, u32::from(rx_level));
                let enable = match packet.direction() {
                    Direction::Tx => dmacr::TDMAE,
                    Direction::Rx => dmacr::RDMAE,
                };
                self.regs.write(Reg::Dmacr, enable);
            }
        }

        self.regs.write(Reg::Imr, 0);
        self.regs.write(Reg::Ssienr, ssienr::SSIC_EN);

        if self.params.cmd_length != 0 {
            self.tx_header_field(packet.cmd, self.params.cmd_length);
        }
        if self.params.addr_length != 0 {
            self.tx_header_field(packet.address, self.params.addr_length);
        }
        self.phase = PacketPhase::Data;

        let mut imr = plan.imr;
        if dma {
            imr = Irq::empty();
            let frame_bytes = self.cursor.frame_bytes();
            if let Some(buf) = dma_buffer(&mut packet.data) {
                if let Err(e) = self.vendor.dma_start(&mut self.regs, buf, frame_bytes)
                {
                    return self.finalize_packet(Err(e)).map(|()| Started::Running);
                }
            }
        } else if self.cursor.dummy_bytes > 0 {
            if self.tx_dummy_bytes().all_written {
                imr = Irq::RXF;
                self.phase = PacketPhase::Draining;
            }
        } else if let PacketData::Tx(data) = &packet.data {
            self.tx_data(data);
        }

        if plan.tmod == ctrlr0::TMOD_RX && header == 0 {
            // Receive-only transfers are started by a write to the data
            // register.
            self.regs.write(Reg::Dr, 0);
        }

        self.regs.write(Reg::Imr, imr.bits());
        Ok(Started::Running)
    }

    /// Queues a command or address. In standard SPI it goes out as
    /// individual bytes, most significant first, and counts against the
    /// dummy bytes the packet owes; otherwise the controller takes it as one
    /// FIFO entry and shifts out as many bits as `SPI_CTRLR0` says.
    fn tx_header_field(&mut self, value: u32, len: u8) {
        if !self.shadow.standard_spi {
            self.regs.write(Reg::Dr, value);
            return;
        }
        for i in (0..u32::from(len)).rev() {
            self.regs.write(Reg::Dr, (value >> (8 * i)) & 0xff);
        }
        self.cursor.dummy_bytes =
            self.cursor.dummy_bytes.saturating_sub(u32::from(len));
    }

    /// Returns the controller to idle after a packet, whatever happened to
    /// it. `outcome` is what the caller saw; an RX overflow overrides it.
    pub(crate) fn finalize_packet(
        &mut self,
        outcome: Result<(), MspiError>,
    ) -> Result<(), MspiError> {
        let risr = Irq::from_bits_truncate(self.regs.read(Reg::Risr));
        let outcome = if risr.contains(Irq::RXO) {
            ringbuf_entry_root!(Trace::Overrun(self.packets_done));
            Err(MspiError::Overrun)
        } else {
            outcome
        };
        let failed = outcome.is_err();

        if self.cursor.dma {
            if failed {
                self.vendor.dma_abort(&mut self.regs);
            }
            self.regs.write(Reg::Dmacr, 0);
        }

        if self.xip.enabled == 0 {
            self.regs.write(Reg::Ssienr, 0);
        } else if failed {
            // A packet that got stuck has to be kicked off the controller
            // without leaving XIP without it.
            let regs = &mut self.regs;
            critical_section::with(|_| {
                regs.write(Reg::Ssienr, 0);
                regs.write(Reg::Ssienr, ssienr::SSIC_EN);
            });
        }
        // Reading ICR clears the latched error interrupts.
        let _ = self.regs.read(Reg::Icr);
        self.regs.write(Reg::Ser, 0);

        let mut result = FirstError::from(outcome);
        if let Some(ce) = self.ce_line() {
            if self.platform.ce_set(ce, false).is_err() {
                ringbuf_entry_root!(Trace::CeFailed);
                result.record(Err(MspiError::Gpio));
            }
        }
        let result = result.into_result();

        ringbuf_entry_root!(Trace::PacketDone(self.packets_done, result));
        self.phase = PacketPhase::Finished(result);
        result
    }

    /// Runs the packets of `xfer` one after the other, stopping at the
    /// first failure.
    pub(crate) fn run_sync(
        &mut self,
        xfer: &mut Transfer<'_>,
    ) -> Result<(), MspiError> {
        self.packets_done = 0;
        self.async_active = false;

        for packet in xfer.packets.iter_mut() {
            let deadline =
                self.platform.now_ms() + u64::from(self.params.timeout_ms);
            if let Started::Running = self.start_packet(packet)? {
                let outcome = self.wait_packet(packet, deadline);
                self.finalize_packet(outcome)?;
            }
            self.packets_done += 1;
        }
        Ok(())
    }

    fn wait_packet(
        &mut self,
        packet: &mut Packet<'_>,
        deadline: u64,
    ) -> Result<(), MspiError> {
        while self.phase != PacketPhase::Complete {
            if self.platform.wait_for_interrupt(deadline).is_err() {
                ringbuf_entry_root!(Trace::PacketTimeout(self.packets_done));
                self.regs.write(Reg::Imr, 0);
                return Err(MspiError::TimedOut);
            }
            self.service_interrupt(packet);
        }
        Ok(())
    }
}
