// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The FIFO pump.
//!
//! Runs on every controller interrupt while a packet is in flight, either
//! directly from the interrupt or from a work item with `IMR` cleared (see
//! `FifoContext`). Only level registers and `RISR` are consulted, so both
//! contexts see the same thing.

use drv_mspi_api::{Packet, PacketData};
use ringbuf::*;

use crate::platform::{DmaStatus, FifoContext, Platform, Vendor, Work};
use crate::regs::{field_prep, rxftlr, Irq, Reg, Regs, Status};
use crate::xfer::PacketPhase;
use crate::{Engine, Trace};

/// What a pass of `tx_dummy_bytes` managed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct DummyFill {
    pub wrote: bool,
    pub all_written: bool,
}

/// How many of `owed` dummy bytes can be queued with the FIFOs at the given
/// levels.
fn dummy_room(max_queued: u8, tx_level: u32, rx_level: u32, owed: u32) -> u32 {
    let room = u32::from(max_queued).saturating_sub(tx_level);
    if room <= rx_level {
        return 0;
    }
    (room - rx_level).min(owed)
}

impl<R: Regs, P: Platform, V: Vendor<R>> Engine<R, P, V> {
    /// Moves as much of `packet` through the FIFOs as the controller will
    /// take. Returns true once the packet is done on the wire (or wasn't in
    /// flight to begin with); `IMR` is then left cleared.
    pub(crate) fn handle_fifos(
        &mut self,
        packet: &mut Packet<'_>,
        ctx: FifoContext,
    ) -> bool {
        if !self.phase.in_flight() {
            return true;
        }

        let finished = if self.cursor.dma {
            self.dma_progress()
        } else {
            match &mut packet.data {
                PacketData::Rx(buf) if self.cursor.end > 0 => {
                    self.pump_rx(buf, ctx)
                }
                PacketData::Tx(data) => self.pump_tx(data),
                _ => self.pump_tx(&[]),
            }
        };

        if finished {
            self.complete_packet();
        }
        finished
    }

    /// Synchronous interrupt service, run by the thread that started the
    /// packet once `wait_for_interrupt` returns.
    pub(crate) fn service_interrupt(&mut self, packet: &mut Packet<'_>) {
        match self.config.fifo_context {
            FifoContext::Interrupt => {
                self.handle_fifos(packet, FifoContext::Interrupt);
            }
            FifoContext::Deferred => {
                self.saved_imr = self.regs.read(Reg::Imr);
                self.regs.write(Reg::Imr, 0);
                if !self.handle_fifos(packet, FifoContext::Deferred) {
                    self.regs.write(Reg::Imr, self.saved_imr);
                }
            }
        }
        self.vendor.irq_clear(&mut self.regs);
    }

    /// Changes the interrupt mask from inside the pump. In a deferred pass
    /// the live mask is zero and is restored from `saved_imr` afterwards,
    /// so that is what gets changed.
    fn set_imr(&mut self, ctx: FifoContext, irq: Irq) {
        match ctx {
            FifoContext::Interrupt => self.regs.write(Reg::Imr, irq.bits()),
            FifoContext::Deferred => self.saved_imr = irq.bits(),
        }
    }

    fn pump_tx(&mut self, data: &[u8]) -> bool {
        if self.cursor.pos < self.cursor.end {
            self.tx_data(data);
            return false;
        }
        // The last TXE comes when the FIFO empties, before the final frame
        // has left the shift register.
        self.wait_not_busy();
        true
    }

    fn pump_rx(&mut self, buf: &mut [u8], ctx: FifoContext) -> bool {
        loop {
            if self.read_rx_fifo(buf) {
                return true;
            }
            if self.cursor.dummy_bytes == 0 {
                return false;
            }
            let fill = self.tx_dummy_bytes();
            if fill.all_written {
                self.set_imr(ctx, Irq::RXF);
                self.phase = PacketPhase::Draining;
            }
            if !fill.wrote {
                return false;
            }
        }
    }

    fn dma_progress(&mut self) -> bool {
        match self.vendor.dma_status(&mut self.regs) {
            DmaStatus::Pending => false,
            DmaStatus::Done => {
                self.wait_not_busy();
                true
            }
        }
    }

    fn wait_not_busy(&mut self) {
        while Status::from_bits_truncate(self.regs.read(Reg::Sr))
            .contains(Status::BUSY)
        {}
    }

    /// Queues frames from `data`, most significant byte first, until the
    /// TX FIFO is full or the data runs out. Once it runs out the start
    /// level and threshold drop to zero: whatever is queued goes out, and
    /// TXE fires once more when the FIFO is empty.
    pub(crate) fn tx_data(&mut self, data: &[u8]) {
        let frame_bytes = self.cursor.frame_bytes();
        let depth = self.config.tx_fifo_depth();
        let mut room = depth.saturating_sub(self.regs.read(Reg::Txflr));

        while self.cursor.pos < self.cursor.end {
            if room == 0 {
                room = depth.saturating_sub(self.regs.read(Reg::Txflr));
                if room == 0 {
                    return;
                }
            }
            let pos = self.cursor.pos;
            let Some(frame) = data.get(pos..pos + frame_bytes) else {
                break;
            };
            let word = frame.iter().fold(0u32, |w, &b| (w << 8) | u32::from(b));
            self.regs.write(Reg::Dr, word);
            self.cursor.pos += frame_bytes;
            room -= 1;
        }

        self.regs.write(Reg::Txftlr, 0);
        self.phase = PacketPhase::Draining;
    }

    /// Drains the RX FIFO into `buf`, dropping the leading bytes that echo
    /// the header. Returns true once the buffer is full.
    pub(crate) fn read_rx_fifo(&mut self, buf: &mut [u8]) -> bool {
        let frame_bytes = self.cursor.frame_bytes();

        loop {
            let level = self.regs.read(Reg::Rxflr);
            if level == 0 {
                break;
            }
            for _ in 0..level {
                let word = self.regs.read(Reg::Dr);
                if self.cursor.bytes_to_discard > 0 {
                    self.cursor.bytes_to_discard -= 1;
                    continue;
                }
                let pos = self.cursor.pos;
                let Some(dst) = buf.get_mut(pos..pos + frame_bytes) else {
                    return true;
                };
                dst.copy_from_slice(&word.to_be_bytes()[4 - frame_bytes..]);
                self.cursor.pos += frame_bytes;
                if self.cursor.pos >= self.cursor.end {
                    return true;
                }
            }
        }

        // Entries still to come, echoes included. Once fewer than the
        // threshold remain, lower it so the tail still raises RXF.
        let left = ((self.cursor.end - self.cursor.pos) >> self.cursor.frame_exp)
            as u32
            + self.cursor.bytes_to_discard;
        if left > 0 && left <= u32::from(self.config.rx_fifo_threshold) {
            self.regs
                .write(Reg::Rxftlr, field_prep(rxftlr::RFT, left - 1));
        }
        false
    }

    /// Queues as many of the zero bytes still owed as the RX FIFO can
    /// absorb responses to. Room is `max_queued_dummy_bytes` less what is
    /// already in both FIFOs; the configured maximum leaves space for a
    /// frame caught mid-shift.
    pub(crate) fn tx_dummy_bytes(&mut self) -> DummyFill {
        let rx_level = self.regs.read(Reg::Rxflr);
        let tx_level = self.regs.read(Reg::Txflr);
        let count = dummy_room(
            self.config.max_queued_dummy_bytes,
            tx_level,
            rx_level,
            self.cursor.dummy_bytes,
        );
        if count == 0 {
            return DummyFill {
                wrote: false,
                all_written: false,
            };
        }

        for _ in 0..count {
            self.regs.write(Reg::Dr, 0);
        }
        self.cursor.dummy_bytes -= count;
        ringbuf_entry_root!(Trace::DummyFill {
            queued: count,
            owed: self.cursor.dummy_bytes,
        });

        let all_written = self.cursor.dummy_bytes == 0;
        if all_written {
            // Nothing left to gate on; start now if not started yet.
            self.regs.write(Reg::Txftlr, 0);
        }
        DummyFill {
            wrote: count > 0,
            all_written,
        }
    }

    /// Marks the packet done on the wire. Asynchronous transfers finalize
    /// it from a work item; if that can't be queued the transfer timer is
    /// left to pick it up.
    fn complete_packet(&mut self) {
        self.regs.write(Reg::Imr, 0);
        self.saved_imr = 0;
        self.phase = PacketPhase::Complete;

        if !self.async_active {
            return;
        }
        match self.platform.submit_work(Work::PacketDone) {
            Ok(()) => {
                self.done_queued = true;
                self.platform.disarm_timer();
            }
            Err(_) => {
                ringbuf_entry_root!(Trace::WorkRejected(Work::PacketDone));
            }
        }
    }
}
