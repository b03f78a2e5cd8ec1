// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execute-in-place sessions.
//!
//! Several devices may share one session as long as they agree on the
//! command set and framing. The first one to enable XIP takes a power
//! reference and programs the XIP registers; the last one to disable it
//! turns the controller off and gives the reference back.

use drv_mspi_api::{DeviceId, MspiError, XipConfig};
use ringbuf::*;

use crate::config::{self, XipClock, XipParams};
use crate::platform::{Platform, Vendor};
use crate::regs::{
    field_max, field_prep, ssienr, xip_ctrl, xip_write_ctrl, Reg, Regs,
};
use crate::{dev_bit, Engine, Trace};

pub(crate) struct XipState {
    /// Parameters collected by device configuration, for the next enable.
    pub stored: XipParams,
    /// Parameters the running session was programmed with.
    pub active: XipParams,
    /// One bit per device index with XIP enabled.
    pub enabled: u32,
    pub clock: XipClock,
}

impl XipState {
    pub const fn new() -> Self {
        Self {
            stored: XipParams::new(),
            active: XipParams::new(),
            enabled: 0,
            clock: XipClock {
                freq: 0,
                cpp: drv_mspi_api::Cpp::Mode0,
            },
        }
    }

    /// Clock settings device configuration must leave alone, if a session
    /// is running.
    pub fn clock_in_use(&self) -> Option<XipClock> {
        if self.enabled != 0 {
            Some(self.clock)
        } else {
            None
        }
    }
}

/// Values for `XIP_CTRL` and `XIP_WRITE_CTRL`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct XipCtrl {
    pub read: u32,
    pub write: u32,
}

fn wait_cycles(dummy: u16, field: u32) -> Result<u32, MspiError> {
    let cycles = u32::from(dummy);
    if cycles > field_max(field) {
        return Err(MspiError::InvalidArgument);
    }
    Ok(cycles)
}

pub(crate) fn xip_ctrl(p: &XipParams) -> Result<XipCtrl, MspiError> {
    // XIP needs the enhanced frame formats; standard SPI has no XIP mode.
    let Some(enc) = config::line_encoding(p.io_mode)? else {
        return Err(MspiError::InvalidArgument);
    };
    let (frf, trans_type) = (enc.frf, enc.trans_type);
    let inst = config::inst_l(p.cmd_length)?;
    let addr = config::addr_l(p.addr_length)?;

    let mut read = field_prep(xip_ctrl::FRF, frf)
        | field_prep(xip_ctrl::TRANS_TYPE, trans_type)
        | field_prep(xip_ctrl::ADDR_L, addr)
        | field_prep(xip_ctrl::INST_L, inst)
        | field_prep(
            xip_ctrl::WAIT_CYCLES,
            wait_cycles(p.rx_dummy, xip_ctrl::WAIT_CYCLES)?,
        );
    if p.cmd_length != 0 {
        read |= xip_ctrl::INST_EN;
    }

    let write = field_prep(xip_write_ctrl::FRF, frf)
        | field_prep(xip_write_ctrl::TRANS_TYPE, trans_type)
        | field_prep(xip_write_ctrl::ADDR_L, addr)
        | field_prep(xip_write_ctrl::INST_L, inst)
        | field_prep(
            xip_write_ctrl::WAIT_CYCLES,
            wait_cycles(p.tx_dummy, xip_write_ctrl::WAIT_CYCLES)?,
        );

    Ok(XipCtrl { read, write })
}

impl<R: Regs, P: Platform, V: Vendor<R>> Engine<R, P, V> {
    pub(crate) fn xip_enable(
        &mut self,
        dev: &DeviceId,
        cfg: &XipConfig,
    ) -> Result<(), MspiError> {
        let bit = dev_bit(dev)?;
        let params = self.xip.stored;
        let first = self.xip.enabled == 0;

        if !first {
            let clock = XipClock {
                freq: self.shadow.freq,
                cpp: self.shadow.cpp,
            };
            if self.xip.active.conflicts_with(&params) || clock != self.xip.clock
            {
                ringbuf_entry_root!(Trace::XipConflict(dev.index));
                return Err(MspiError::InvalidArgument);
            }
            if self.xip.enabled & bit != 0 {
                return Ok(());
            }
        }

        let ctrl = xip_ctrl(&params)?;

        if first {
            self.platform.pm_get().map_err(|_| MspiError::Power)?;
            self.regs.write(Reg::Ssienr, 0);
            self.regs.write(Reg::Ctrlr0, self.shadow.ctrlr0);
            self.regs.write(Reg::SpiCtrlr0, self.shadow.spi_ctrlr0);
            self.regs.write(Reg::Baudr, self.shadow.baudr);
            self.regs.write(Reg::XipIncrInst, params.read_cmd);
            self.regs.write(Reg::XipWrapInst, params.read_cmd);
            self.regs.write(Reg::XipCtrl, ctrl.read);
            self.regs.write(Reg::XipWriteIncrInst, params.write_cmd);
            self.regs.write(Reg::XipWriteWrapInst, params.write_cmd);
            self.regs.write(Reg::XipWriteCtrl, ctrl.write);
            self.regs.write(Reg::Ssienr, ssienr::SSIC_EN);
        }

        if let Err(e) = self.vendor.xip_enable(&mut self.regs, dev, cfg) {
            if first {
                self.regs.write(Reg::Ssienr, 0);
                let _ = self.pm_put();
            }
            return Err(e);
        }

        if first {
            self.xip.active = params;
            self.xip.clock = XipClock {
                freq: self.shadow.freq,
                cpp: self.shadow.cpp,
            };
        }
        self.xip.enabled |= bit;
        ringbuf_entry_root!(Trace::XipEnabled(dev.index));
        Ok(())
    }

    pub(crate) fn xip_disable(
        &mut self,
        dev: &DeviceId,
        cfg: &XipConfig,
    ) -> Result<(), MspiError> {
        let bit = dev_bit(dev)?;
        if self.xip.enabled & bit == 0 {
            return Ok(());
        }

        self.vendor.xip_disable(&mut self.regs, dev, cfg)?;
        self.xip.enabled &= !bit;
        ringbuf_entry_root!(Trace::XipDisabled(dev.index));

        if self.xip.enabled == 0 {
            self.regs.write(Reg::Ssienr, 0);
            self.pm_put()?;
        }
        Ok(())
    }
}
