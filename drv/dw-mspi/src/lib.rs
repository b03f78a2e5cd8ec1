// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the DesignWare SSI controller in its multi-line SPI
//! configuration.
//!
//! The controller is shared by every device on the bus. A device binds the
//! controller by configuring it (`configure`), after which it alone may issue
//! transfers until it gives the controller back with `get_channel_status`.
//! The device configuration is staged in memory and written to the hardware
//! at the start of each packet, because the frame format registers can only
//! be changed while the controller is disabled.
//!
//! Transfers are a sequence of packets, each with optional command and
//! address phases and a data phase in one direction. Packets are moved by
//! the FIFO pump, which runs whenever the controller interrupts:
//!
//! - synchronous transfers (`transceive`) block in `Platform::
//!   wait_for_interrupt` and run the pump in the caller's context;
//! - asynchronous transfers (`transceive_async`) return once the first packet
//!   is started. The platform forwards controller interrupts to
//!   `on_interrupt`, timer expiry to `on_timer_expired`, and queued work to
//!   `run_work`; the outcome is reported through registered callbacks.
//!
//! In standard (single line) SPI the controller can't clock a command or
//! address phase on its own ahead of received data, so such reads run in
//! transmit-and-receive mode: the command and address go out as data,
//! followed by zero bytes that clock the response in, and the echoes of the
//! header bytes are dropped on the receive side. Those zero bytes must never
//! be queued faster than the RX FIFO can absorb the responses, which is what
//! `max_queued_dummy_bytes` bounds.
//!
//! Execute-in-place (XIP) can stay enabled while explicit transfers run; in
//! that case the controller is briefly disabled with interrupts locked while
//! a packet's registers are written, and is never left disabled.

#![cfg_attr(not(test), no_std)]

mod cleanup;
mod config;
mod fifo;
mod platform;
mod regs;
mod xfer;
mod xip;

pub use config::{
    DwMspiConfig, TransferMode, DEFAULT_REBIND_TIMEOUT_MS, MAX_FRAMES,
    MIN_FIFO_DEPTH,
};
pub use platform::{
    DmaBuffer, DmaStatus, Expired, FifoContext, GpioError, Lock, NoVendor,
    Platform, PmAction, PmError, QueueFull, Vendor, Wait, Work,
};
pub use regs::{Irq, Mmio, Reg, Regs, Status};
pub use xfer::PacketPhase;

/// Register field definitions, for vendor hooks and register-level glue.
pub mod fields {
    pub use crate::regs::{
        ctrlr0, ctrlr1, dmacr, field_get, field_max, field_prep, genmask,
        rxftlr, spi_ctrlr0, ssienr, txftlr, xip_ctrl, xip_write_ctrl,
    };
}

use drv_mspi_api::{
    CeLine, DevConfigMask, DeviceConfig, DeviceId, Event, EventHandler,
    EventKind, MspiError, Transfer, XipConfig,
};
use ringbuf::*;

use cleanup::FirstError;
use config::Shadow;
use xfer::{Cursor, Started, XferParams};
use xip::XipState;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Bound(u8),
    BindTimeout(u8),
    Released,
    ConfigRejected(MspiError),
    PacketStart { frames: u32, tmod: u32, dummies: u32 },
    PacketSkipped(usize),
    DummyFill { queued: u32, owed: u32 },
    Overrun(usize),
    PacketTimeout(usize),
    PacketDone(usize, Result<(), MspiError>),
    TransferDone(Result<(), MspiError>),
    XipEnabled(u8),
    XipConflict(u8),
    XipDisabled(u8),
    SuspendRefused { xip: u32 },
    Suspended,
    Resumed,
    PmPutFailed,
    CeFailed,
    WorkRejected(Work),
    SpuriousInterrupt,
}

ringbuf!(Trace, 64, Trace::None);

/// An asynchronous transfer that was turned away before it started. The
/// buffers come back with it.
#[derive(Debug)]
pub struct Rejected {
    pub error: MspiError,
    pub transfer: Transfer<'static>,
}

struct InFlight {
    dev: DeviceId,
    xfer: Transfer<'static>,
}

/// Controller state and the hardware it drives. Everything except the
/// asynchronous transfer storage lives here, so that the pump can borrow a
/// packet out of the transfer while mutating the engine.
pub(crate) struct Engine<R, P, V> {
    pub(crate) regs: R,
    pub(crate) platform: P,
    pub(crate) vendor: V,
    pub(crate) config: DwMspiConfig,
    pub(crate) bound: Option<DeviceId>,
    pub(crate) shadow: Shadow,
    pub(crate) xip: XipState,
    pub(crate) params: XferParams,
    pub(crate) cursor: Cursor,
    pub(crate) phase: PacketPhase,
    /// `IMR` as it was when a deferred FIFO pass was queued.
    pub(crate) saved_imr: u32,
    pub(crate) suspended: bool,
    pub(crate) callbacks: [Option<EventHandler>; EventKind::COUNT],
    pub(crate) packets_done: usize,
    pub(crate) async_active: bool,
    /// `Work::PacketDone` has been queued for the current packet.
    pub(crate) done_queued: bool,
}

/// Bit for `dev` in `SER` and in the XIP session mask.
pub(crate) fn dev_bit(dev: &DeviceId) -> Result<u32, MspiError> {
    1u32.checked_shl(u32::from(dev.index))
        .ok_or(MspiError::InvalidArgument)
}

impl<R: Regs, P: Platform, V: Vendor<R>> Engine<R, P, V> {
    /// Makes `dev` the owner of the shadow configuration, waiting a bounded
    /// time for the previous owner to let go.
    fn bind(&mut self, dev: &DeviceId) -> Result<(), MspiError> {
        if self.bound == Some(*dev) {
            return Ok(());
        }
        dev_bit(dev)?;

        let wait = Wait::Millis(self.config.rebind_timeout_ms);
        if self.platform.take(Lock::Config, wait).is_err() {
            ringbuf_entry!(Trace::BindTimeout(dev.index));
            return Err(MspiError::Busy);
        }
        self.bound = Some(*dev);
        // Callbacks belong to the previous owner.
        self.callbacks = [None; EventKind::COUNT];
        ringbuf_entry!(Trace::Bound(dev.index));
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound = None;
        self.platform.give(Lock::Config);
    }

    fn check_bound(&self, dev: &DeviceId) -> Result<(), MspiError> {
        if self.bound == Some(*dev) {
            Ok(())
        } else {
            Err(MspiError::InvalidArgument)
        }
    }

    fn check_resumed(&self) -> Result<(), MspiError> {
        if self.suspended {
            Err(MspiError::Suspended)
        } else {
            Ok(())
        }
    }

    /// Runs `body` holding the context lock.
    fn with_context<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, MspiError>,
    ) -> Result<T, MspiError> {
        self.platform
            .take(Lock::Context, Wait::Forever)
            .map_err(|_| MspiError::Busy)?;
        let r = body(self);
        self.platform.give(Lock::Context);
        r
    }

    pub(crate) fn ce_line(&self) -> Option<CeLine> {
        self.bound.and_then(|d| d.ce)
    }

    pub(crate) fn pm_put(&mut self) -> Result<(), MspiError> {
        self.platform.pm_put().map_err(|_| {
            ringbuf_entry!(Trace::PmPutFailed);
            MspiError::Power
        })
    }

    fn apply_device_config(
        &mut self,
        mask: DevConfigMask,
        cfg: &DeviceConfig,
    ) -> Result<(), MspiError> {
        let xip_clock = if self.config.xip {
            self.xip.clock_in_use()
        } else {
            None
        };
        let (shadow, stored) = config::stage(
            &self.config,
            self.shadow,
            self.xip.stored,
            xip_clock,
            mask,
            cfg,
        )?;
        self.shadow = shadow;
        if self.config.xip {
            self.xip.stored = stored;
        }
        Ok(())
    }

    fn resume(&mut self) {
        self.vendor.resume(&mut self.regs);
        self.suspended = false;
        ringbuf_entry!(Trace::Resumed);
    }

    fn suspend(&mut self) -> Result<(), MspiError> {
        if self.xip.enabled != 0
            || self.platform.take(Lock::Context, Wait::NoWait).is_err()
        {
            ringbuf_entry!(Trace::SuspendRefused {
                xip: self.xip.enabled
            });
            return Err(MspiError::Busy);
        }
        self.suspended = true;
        self.vendor.suspend(&mut self.regs);
        self.platform.give(Lock::Context);
        ringbuf_entry!(Trace::Suspended);
        Ok(())
    }
}

/// One DesignWare MSPI controller.
pub struct DwMspi<R, P, V = NoVendor> {
    engine: Engine<R, P, V>,
    in_flight: Option<InFlight>,
    completed: Option<Transfer<'static>>,
}

impl<R: Regs, P: Platform, V: Vendor<R>> DwMspi<R, P, V> {
    /// Brings up a controller: checks `config`, parks the chip enable lines,
    /// runs the vendor init hook and resumes the controller.
    pub fn new(
        config: DwMspiConfig,
        regs: R,
        platform: P,
        vendor: V,
    ) -> Result<Self, MspiError> {
        config.validate()?;

        let mut engine = Engine {
            regs,
            platform,
            vendor,
            config,
            bound: None,
            shadow: Shadow::new(),
            xip: XipState::new(),
            params: XferParams::default(),
            cursor: Cursor::default(),
            phase: PacketPhase::Idle,
            saved_imr: 0,
            suspended: true,
            callbacks: [None; EventKind::COUNT],
            packets_done: 0,
            async_active: false,
            done_queued: false,
        };

        for &line in config.ce_lines {
            engine
                .platform
                .ce_init(line)
                .map_err(|_| MspiError::Gpio)?;
        }
        engine.vendor.init(&mut engine.regs);
        engine.resume();

        Ok(Self {
            engine,
            in_flight: None,
            completed: None,
        })
    }

    /// Binds the controller to `dev` and applies the fields of `cfg` chosen
    /// by `mask`.
    ///
    /// Binding a device other than the current one waits up to the rebind
    /// timeout for the configuration lock and fails with `Busy` if it can't
    /// be had. If the configuration is rejected, the controller is left
    /// unbound and its previous register settings are kept.
    pub fn configure(
        &mut self,
        dev: &DeviceId,
        mask: DevConfigMask,
        cfg: &DeviceConfig,
    ) -> Result<(), MspiError> {
        let e = &mut self.engine;
        e.bind(dev)?;

        if mask.is_empty() && !e.config.sw_multi_periph {
            return Ok(());
        }

        let r = e.with_context(|e| e.apply_device_config(mask, cfg));
        if let Err(err) = r {
            ringbuf_entry!(Trace::ConfigRejected(err));
            e.unbind();
        }
        r
    }

    /// Runs every packet of `xfer` in order, blocking until the last one
    /// finishes or one of them fails.
    pub fn transceive(
        &mut self,
        dev: &DeviceId,
        xfer: &mut Transfer<'_>,
    ) -> Result<(), MspiError> {
        let e = &mut self.engine;
        e.check_bound(dev)?;
        e.platform.pm_get().map_err(|_| MspiError::Power)?;

        let mut result = FirstError::from(e.with_context(|e| {
            e.check_resumed()?;
            e.apply_transfer(xfer)?;
            e.run_sync(xfer)
        }));
        result.record(e.pm_put());
        result.into_result()
    }

    /// Starts `xfer` and returns. Once this returns `Ok`, the outcome is
    /// only reported through the registered callbacks, and the transfer
    /// (with its buffers) can be collected with `take_completed`.
    pub fn transceive_async(
        &mut self,
        dev: &DeviceId,
        xfer: Transfer<'static>,
    ) -> Result<(), Rejected> {
        let reject = |error, transfer| Rejected { error, transfer };

        let e = &mut self.engine;
        if !e.config.async_transfers {
            return Err(reject(MspiError::NotSupported, xfer));
        }
        if let Err(err) = e.check_bound(dev) {
            return Err(reject(err, xfer));
        }
        if e.platform.pm_get().is_err() {
            return Err(reject(MspiError::Power, xfer));
        }
        if e.platform.take(Lock::Context, Wait::Forever).is_err() {
            let _ = e.pm_put();
            return Err(reject(MspiError::Busy, xfer));
        }
        let setup = e.check_resumed().and_then(|()| e.apply_transfer(&xfer));
        if let Err(err) = setup {
            return Err(self.abandon_async(err, xfer));
        }

        self.engine.packets_done = 0;
        self.engine.async_active = true;
        self.in_flight = Some(InFlight { dev: *dev, xfer });

        match self.start_in_flight() {
            Ok(true) => Ok(()),
            Ok(false) => {
                // Nothing to clock out at all.
                self.finish_async(Ok(()));
                Ok(())
            }
            Err(err) => {
                self.engine.async_active = false;
                match self.in_flight.take() {
                    Some(flight) => Err(self.abandon_async(err, flight.xfer)),
                    None => Ok(()),
                }
            }
        }
    }

    /// Hands back the most recent asynchronous transfer once it has
    /// finished.
    pub fn take_completed(&mut self) -> Option<Transfer<'static>> {
        self.completed.take()
    }

    pub fn register_callback(
        &mut self,
        dev: &DeviceId,
        kind: EventKind,
        handler: EventHandler,
    ) -> Result<(), MspiError> {
        let e = &mut self.engine;
        if !e.config.async_transfers {
            return Err(MspiError::NotSupported);
        }
        e.check_bound(dev)?;
        e.callbacks[kind as usize] = Some(handler);
        Ok(())
    }

    /// Enables or disables execute-in-place for `dev`.
    pub fn xip_config(
        &mut self,
        dev: &DeviceId,
        cfg: &XipConfig,
    ) -> Result<(), MspiError> {
        let e = &mut self.engine;
        if !e.config.xip {
            return Err(MspiError::NotSupported);
        }
        if cfg.enable {
            e.check_bound(dev)?;
        }
        e.platform.pm_get().map_err(|_| MspiError::Power)?;

        let mut result = FirstError::from(e.with_context(|e| {
            e.check_resumed()?;
            if cfg.enable {
                e.xip_enable(dev, cfg)
            } else {
                e.xip_disable(dev, cfg)
            }
        }));
        result.record(e.pm_put());
        result.into_result()
    }

    /// Gives the controller back: whichever device was bound no longer is,
    /// and another may bind.
    pub fn get_channel_status(&mut self, _channel: u8) -> Result<(), MspiError> {
        let e = &mut self.engine;
        e.platform
            .take(Lock::Context, Wait::Forever)
            .map_err(|_| MspiError::Busy)?;
        e.unbind();
        e.platform.give(Lock::Context);
        ringbuf_entry!(Trace::Released);
        Ok(())
    }

    /// Power management action callback.
    pub fn pm_action(&mut self, action: PmAction) -> Result<(), MspiError> {
        match action {
            PmAction::Suspend => self.engine.suspend(),
            PmAction::Resume => {
                self.engine.resume();
                Ok(())
            }
        }
    }

    /// Controller interrupt entry point for asynchronous transfers. DMA
    /// packets leave `IMR` clear, so the DMA channel's completion interrupt
    /// has to come here too.
    pub fn on_interrupt(&mut self) {
        let e = &mut self.engine;
        match (e.config.fifo_context, self.in_flight.as_mut()) {
            (_, None) => {
                ringbuf_entry!(Trace::SpuriousInterrupt);
                e.regs.write(Reg::Imr, 0);
            }
            (FifoContext::Interrupt, Some(flight)) => {
                if let Some(packet) =
                    flight.xfer.packets.get_mut(e.packets_done)
                {
                    e.handle_fifos(packet, FifoContext::Interrupt);
                }
            }
            (FifoContext::Deferred, Some(_)) => {
                e.saved_imr = e.regs.read(Reg::Imr);
                e.regs.write(Reg::Imr, 0);
                if e.platform.submit_work(Work::Fifo).is_err() {
                    ringbuf_entry!(Trace::WorkRejected(Work::Fifo));
                    e.regs.write(Reg::Imr, e.saved_imr);
                }
            }
        }
        e.vendor.irq_clear(&mut e.regs);
    }

    /// Timer expiry entry point. Finalization may block, so the actual work
    /// is queued.
    pub fn on_timer_expired(&mut self) {
        if self.engine.platform.submit_work(Work::Timeout).is_err() {
            ringbuf_entry!(Trace::WorkRejected(Work::Timeout));
        }
    }

    /// Runs an item the driver previously queued with `Platform::
    /// submit_work`.
    pub fn run_work(&mut self, work: Work) {
        match work {
            Work::Fifo => {
                let e = &mut self.engine;
                let Some(flight) = self.in_flight.as_mut() else {
                    return;
                };
                let Some(packet) = flight.xfer.packets.get_mut(e.packets_done)
                else {
                    return;
                };
                if !e.handle_fifos(packet, FifoContext::Deferred) {
                    e.regs.write(Reg::Imr, e.saved_imr);
                }
            }
            Work::PacketDone => {
                if self.in_flight.is_some()
                    && self.engine.phase == PacketPhase::Complete
                    && self.engine.done_queued
                {
                    self.packet_done();
                }
            }
            Work::Timeout => {
                if self.in_flight.is_none() {
                    return;
                }
                match self.engine.phase {
                    // Finished as the timer fired; if the completion work
                    // didn't make it onto the queue, handle it here.
                    PacketPhase::Complete => {
                        if !self.engine.done_queued {
                            self.packet_done();
                        }
                    }
                    p if p.in_flight() => {
                        let e = &mut self.engine;
                        ringbuf_entry!(Trace::PacketTimeout(e.packets_done));
                        e.regs.write(Reg::Imr, 0);
                        let r = e.finalize_packet(Err(MspiError::TimedOut));
                        self.finish_async(r);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Number of packets completed by the current (or last) transfer.
    pub fn packets_done(&self) -> usize {
        self.engine.packets_done
    }

    pub fn phase(&self) -> PacketPhase {
        self.engine.phase
    }

    pub fn bound_device(&self) -> Option<DeviceId> {
        self.engine.bound
    }

    pub fn is_suspended(&self) -> bool {
        self.engine.suspended
    }

    /// Bitmask of device indices with XIP enabled.
    pub fn xip_enabled(&self) -> u32 {
        self.engine.xip.enabled
    }

    /// Starts the next packet of the asynchronous transfer that has
    /// something to clock out. Returns false when none are left.
    fn start_in_flight(&mut self) -> Result<bool, MspiError> {
        let e = &mut self.engine;
        let Some(flight) = self.in_flight.as_mut() else {
            return Ok(false);
        };

        while let Some(packet) = flight.xfer.packets.get_mut(e.packets_done) {
            let deadline =
                e.platform.now_ms() + u64::from(e.params.timeout_ms);
            match e.start_packet(packet)? {
                Started::Running => {
                    e.platform.arm_timer(deadline);
                    return Ok(true);
                }
                Started::Skipped => e.packets_done += 1,
            }
        }
        Ok(false)
    }

    fn packet_done(&mut self) {
        let e = &mut self.engine;
        e.platform.disarm_timer();
        if let Err(err) = e.finalize_packet(Ok(())) {
            self.finish_async(Err(err));
            return;
        }
        e.packets_done += 1;
        match self.start_in_flight() {
            Ok(true) => {}
            Ok(false) => self.finish_async(Ok(())),
            Err(err) => self.finish_async(Err(err)),
        }
    }

    fn finish_async(&mut self, result: Result<(), MspiError>) {
        let e = &mut self.engine;
        e.platform.disarm_timer();
        e.async_active = false;
        e.done_queued = false;
        ringbuf_entry!(Trace::TransferDone(result));

        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let kind = match result {
            Ok(()) => EventKind::TransferComplete,
            Err(MspiError::TimedOut) => EventKind::Timeout,
            Err(_) => EventKind::Error,
        };
        if let Some(handler) = e.callbacks[kind as usize] {
            handler(&Event {
                kind,
                dev: flight.dev,
                packets_done: e.packets_done,
                status: result,
            });
        }
        self.completed = Some(flight.xfer);

        e.platform.give(Lock::Context);
        let _ = e.pm_put();
    }

    /// Undoes the setup of an asynchronous transfer that never started.
    fn abandon_async(
        &mut self,
        error: MspiError,
        transfer: Transfer<'static>,
    ) -> Rejected {
        let e = &mut self.engine;
        e.platform.give(Lock::Context);
        let _ = e.pm_put();
        Rejected { error, transfer }
    }
}
