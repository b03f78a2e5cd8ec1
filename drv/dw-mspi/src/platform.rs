// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Services the driver needs from the surrounding kernel, and the hooks a
//! particular SoC can hang off the common controller core.

use drv_mspi_api::{CeLine, DeviceId, Direction, MspiError, XipConfig};

use crate::regs::Regs;

/// The two locks a controller is protected by.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lock {
    /// Held from the moment a device binds until it is released with
    /// `get_channel_status` (or a configuration attempt fails).
    Config,
    /// Held around every register-programming call, and for the whole
    /// lifetime of an asynchronous transfer.
    Context,
}

/// How long a lock acquisition may block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wait {
    NoWait,
    Millis(u32),
    Forever,
}

/// A wait that ran out of time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Expired;

/// Power management wouldn't hand out (or take back) a reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PmError;

/// A chip enable line couldn't be configured or driven.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GpioError;

/// The work queue didn't accept an item.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueFull;

/// Items the driver hands to the platform's work queue. Each one must
/// eventually come back through `DwMspi::run_work`, from thread context.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Work {
    /// Service the FIFOs with the interrupt mask cleared.
    Fifo,
    /// The current asynchronous packet has finished.
    PacketDone,
    /// The current asynchronous packet's timer expired.
    Timeout,
}

/// Where the FIFO pump is running.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FifoContext {
    /// Straight from the interrupt; `ISR` reflects what's enabled.
    Interrupt,
    /// From the work queue, with `IMR` zeroed for the duration. Only `RISR`
    /// is meaningful here.
    Deferred,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PmAction {
    Suspend,
    Resume,
}

/// Kernel services, implemented by the board or OS glue.
pub trait Platform {
    fn take(&mut self, lock: Lock, wait: Wait) -> Result<(), Expired>;
    fn give(&mut self, lock: Lock);

    /// Monotonic time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Unmasks the controller interrupt and blocks until it fires or
    /// `deadline` (in `now_ms` time) passes.
    fn wait_for_interrupt(&mut self, deadline: u64) -> Result<(), Expired>;

    /// Arms the one-shot transfer timer; when it fires the platform must
    /// call `DwMspi::on_timer_expired`.
    fn arm_timer(&mut self, deadline: u64);
    fn disarm_timer(&mut self);

    fn submit_work(&mut self, work: Work) -> Result<(), QueueFull>;

    /// Takes a runtime power management reference, resuming the controller
    /// if needed.
    fn pm_get(&mut self) -> Result<(), PmError>;
    fn pm_put(&mut self) -> Result<(), PmError>;

    /// Configures a chip enable line as an inactive output.
    fn ce_init(&mut self, line: CeLine) -> Result<(), GpioError>;
    fn ce_set(&mut self, line: CeLine, active: bool) -> Result<(), GpioError>;
}

/// A data phase handed to a DMA engine.
#[derive(Debug)]
pub enum DmaBuffer<'a> {
    Tx(&'a [u8]),
    Rx(&'a mut [u8]),
}

impl DmaBuffer<'_> {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Tx(_) => Direction::Tx,
            Self::Rx(_) => Direction::Rx,
        }
    }
}

/// State of a DMA data phase, as seen from the interrupt path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DmaStatus {
    Pending,
    Done,
}

/// SoC-specific extensions to the controller core. Every hook has a default
/// that does nothing, so an integration only overrides what its silicon
/// needs.
pub trait Vendor<R: Regs> {
    fn init(&mut self, _regs: &mut R) {}
    fn suspend(&mut self, _regs: &mut R) {}
    fn resume(&mut self, _regs: &mut R) {}

    /// Called at the end of every controller interrupt.
    fn irq_clear(&mut self, _regs: &mut R) {}

    fn xip_enable(
        &mut self,
        _regs: &mut R,
        _dev: &DeviceId,
        _cfg: &XipConfig,
    ) -> Result<(), MspiError> {
        Ok(())
    }

    fn xip_disable(
        &mut self,
        _regs: &mut R,
        _dev: &DeviceId,
        _cfg: &XipConfig,
    ) -> Result<(), MspiError> {
        Ok(())
    }

    /// Starts moving `buf` through the controller's DMA handshake. The
    /// buffer outlives the packet; it is not touched again until
    /// `dma_status` reports `Done` or the packet is finalized.
    fn dma_start(
        &mut self,
        _regs: &mut R,
        _buf: DmaBuffer<'_>,
        _frame_bytes: usize,
    ) -> Result<(), MspiError> {
        Err(MspiError::NotSupported)
    }

    fn dma_status(&mut self, _regs: &mut R) -> DmaStatus {
        DmaStatus::Done
    }

    /// Stops any DMA activity left over by a failed packet.
    fn dma_abort(&mut self, _regs: &mut R) {}
}

/// Plain controller core with nothing attached.
pub struct NoVendor;

impl<R: Regs> Vendor<R> for NoVendor {}
