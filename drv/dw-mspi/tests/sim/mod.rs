// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated controller with a small SPI memory on the far end, and mock
//! kernel services, for driving `DwMspi` on the host.
//!
//! The simulation only moves when the driver looks at it: every `SR` read
//! and every step of `wait_for_interrupt` shifts at most one FIFO entry.

#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use drv_dw_mspi::fields::{
    ctrlr0, ctrlr1, field_get, rxftlr, spi_ctrlr0, ssienr, txftlr,
};
use drv_dw_mspi::{
    DmaBuffer, DmaStatus, DwMspi, DwMspiConfig, Expired, GpioError, Irq,
    Lock, Platform, PmError, QueueFull, Reg, Regs, Status, Vendor, Wait, Work,
};
use drv_mspi_api::{
    CeLine, DevConfigMask, DeviceConfig, DeviceId, Direction, Event,
    EventHandler, IoMode, MspiError, XipConfig, XipPermission,
};

pub const CLOCK: u32 = 100_000_000;
pub const DEPTH: u8 = 16;
pub const MEM_SIZE: usize = 4096;
pub const OP_WRITE: u8 = 0x02;
pub const OP_READ: u8 = 0x03;
/// What the memory drives while it is still listening.
pub const FILLER: u8 = 0xee;

pub static CE: [CeLine; 2] =
    [CeLine { port: 1, pin: 4 }, CeLine { port: 1, pin: 5 }];

pub fn flash() -> DeviceId {
    DeviceId::with_ce(0, CE[0])
}

pub fn other_flash() -> DeviceId {
    DeviceId::with_ce(1, CE[1])
}

/// Initial memory contents.
pub fn pattern(addr: usize) -> u8 {
    (addr * 7 + 3) as u8
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Op {
    Read,
    Write,
}

#[derive(Clone, Debug)]
enum DevState {
    Idle,
    Header(Vec<u8>),
    Dummy { left: usize, addr: usize },
    Read(usize),
    Write(usize),
}

/// Byte-addressed memory answering `OP_READ`/`OP_WRITE` followed by an
/// address. Without a command phase it reads or writes from address 0
/// depending on the transfer mode.
pub struct MemDevice {
    pub mem: Vec<u8>,
    /// Filler bytes between address and data on standard SPI reads.
    pub read_dummy: usize,
    cmd_len: usize,
    addr_len: usize,
    default_op: Op,
    dummy: usize,
    state: DevState,
}

impl MemDevice {
    fn new() -> Self {
        Self {
            mem: (0..MEM_SIZE).map(pattern).collect(),
            read_dummy: 0,
            cmd_len: 0,
            addr_len: 0,
            default_op: Op::Read,
            dummy: 0,
            state: DevState::Idle,
        }
    }

    fn begin(&mut self, cmd_len: usize, addr_len: usize, op: Op, dummy: usize) {
        self.cmd_len = cmd_len;
        self.addr_len = addr_len;
        self.default_op = op;
        self.dummy = dummy;
        self.state = if cmd_len + addr_len == 0 {
            self.op_state(op, 0)
        } else {
            DevState::Header(Vec::new())
        };
    }

    fn op_state(&self, op: Op, addr: usize) -> DevState {
        match op {
            Op::Read if self.dummy > 0 => DevState::Dummy {
                left: self.dummy,
                addr,
            },
            Op::Read => DevState::Read(addr),
            Op::Write => DevState::Write(addr),
        }
    }

    /// One byte each way.
    fn exchange(&mut self, mosi: u8) -> u8 {
        let (next, miso) = match std::mem::replace(&mut self.state, DevState::Idle)
        {
            DevState::Idle => (DevState::Idle, 0xff),
            DevState::Header(mut bytes) => {
                bytes.push(mosi);
                if bytes.len() < self.cmd_len + self.addr_len {
                    (DevState::Header(bytes), FILLER)
                } else {
                    let op = if self.cmd_len == 0 {
                        Some(self.default_op)
                    } else {
                        match bytes[self.cmd_len - 1] {
                            OP_WRITE => Some(Op::Write),
                            OP_READ => Some(Op::Read),
                            _ => None,
                        }
                    };
                    let addr = bytes[self.cmd_len..]
                        .iter()
                        .fold(0usize, |a, &b| (a << 8) | usize::from(b))
                        % MEM_SIZE;
                    let next = match op {
                        Some(op) => self.op_state(op, addr),
                        None => DevState::Idle,
                    };
                    (next, FILLER)
                }
            }
            DevState::Dummy { left, addr } => {
                let next = if left > 1 {
                    DevState::Dummy {
                        left: left - 1,
                        addr,
                    }
                } else {
                    DevState::Read(addr)
                };
                (next, FILLER)
            }
            DevState::Read(addr) => {
                (DevState::Read((addr + 1) % MEM_SIZE), self.mem[addr])
            }
            DevState::Write(addr) => {
                self.mem[addr] = mosi;
                (DevState::Write((addr + 1) % MEM_SIZE), 0xff)
            }
        };
        self.state = next;
        miso
    }
}

/// Kernel-side state seen by the mock `Platform`.
#[derive(Default)]
pub struct OsState {
    pub config_held: bool,
    pub context_held: bool,
    pub takes: Vec<(Lock, Wait)>,
    pub pm_refs: i32,
    pub pm_gets: u32,
    pub pm_puts: u32,
    pub fail_pm_get: bool,
    pub fail_pm_put: bool,
    /// Chip enable levels by (port, pin); true is active.
    pub ce: HashMap<(u8, u8), bool>,
    pub ce_log: Vec<(CeLine, bool)>,
    pub fail_ce: bool,
    pub timer: Option<u64>,
    pub work: VecDeque<Work>,
    pub fail_submit: bool,
    pub now: u64,
}

pub struct SimHw {
    pub depth: usize,
    regs: HashMap<Reg, u32>,
    /// Every register write, in order.
    pub writes: Vec<(Reg, u32)>,
    pub dr_writes: Vec<u32>,
    /// Every byte shifted out, header included.
    pub mosi: Vec<u8>,
    tx: VecDeque<u32>,
    rx: VecDeque<u32>,
    enabled: bool,
    started: bool,
    shifting: Option<u32>,
    popped: usize,
    header_entries: usize,
    rx_header_left: usize,
    kick: bool,
    frames_left: u32,
    rxo: bool,
    /// Stops the wire: nothing shifts until cleared.
    pub stalled: bool,
    /// Latches an RX overflow as soon as the next packet starts.
    pub inject_rxo: bool,
    pub device: MemDevice,
    pub os: OsState,
}

fn width_of(code: u32) -> usize {
    match code {
        2 => 1,
        3 => 2,
        _ => 0,
    }
}

impl SimHw {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            regs: HashMap::new(),
            writes: Vec::new(),
            dr_writes: Vec::new(),
            mosi: Vec::new(),
            tx: VecDeque::new(),
            rx: VecDeque::new(),
            enabled: false,
            started: false,
            shifting: None,
            popped: 0,
            header_entries: 0,
            rx_header_left: 0,
            kick: false,
            frames_left: 0,
            rxo: false,
            stalled: false,
            inject_rxo: false,
            device: MemDevice::new(),
            os: OsState::default(),
        }
    }

    /// Last value written to `reg`.
    pub fn reg(&self, reg: Reg) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn writes_to(&self, reg: Reg) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|&(_, v)| v)
            .collect()
    }

    /// Flags an RX overflow right now.
    pub fn latch_rxo(&mut self) {
        self.rxo = true;
    }

    pub fn clear_logs(&mut self) {
        self.writes.clear();
        self.dr_writes.clear();
        self.mosi.clear();
    }

    fn tmod(&self) -> u32 {
        field_get(ctrlr0::TMOD, self.reg(Reg::Ctrlr0))
    }

    fn standard(&self) -> bool {
        field_get(ctrlr0::SPI_FRF, self.reg(Reg::Ctrlr0))
            == ctrlr0::SPI_FRF_STANDARD
    }

    fn frame_bytes(&self) -> usize {
        (field_get(ctrlr0::DFS, self.reg(Reg::Ctrlr0)) as usize + 1) / 8
    }

    fn cmd_bytes(&self) -> usize {
        width_of(field_get(spi_ctrlr0::INST_L, self.reg(Reg::SpiCtrlr0)))
    }

    fn addr_bytes(&self) -> usize {
        field_get(spi_ctrlr0::ADDR_L, self.reg(Reg::SpiCtrlr0)) as usize / 2
    }

    /// Width in bytes of the `index`th entry popped in this packet.
    fn entry_width(&self, index: usize) -> usize {
        if self.standard() || index >= self.header_entries {
            self.frame_bytes()
        } else if index == 0 && self.cmd_bytes() > 0 {
            self.cmd_bytes()
        } else {
            self.addr_bytes()
        }
    }

    fn exchange_entry(&mut self, entry: u32, width: usize) -> u32 {
        let mut resp = 0;
        for i in (0..width).rev() {
            let b = (entry >> (8 * i)) as u8;
            self.mosi.push(b);
            resp = (resp << 8) | u32::from(self.device.exchange(b));
        }
        resp
    }

    fn receive_frame(&mut self) -> u32 {
        (0..self.frame_bytes())
            .fold(0, |w, _| (w << 8) | u32::from(self.device.exchange(0)))
    }

    fn enable(&mut self) {
        self.enabled = true;
        self.started = false;
        self.shifting = None;
        self.popped = 0;

        let cmd = self.cmd_bytes();
        let addr = self.addr_bytes();
        let standard = self.standard();
        self.header_entries = if standard {
            cmd + addr
        } else {
            usize::from(cmd > 0) + usize::from(addr > 0)
        };
        let tmod = self.tmod();
        self.kick = tmod == ctrlr0::TMOD_RX && self.header_entries == 0;
        self.rx_header_left = if tmod != ctrlr0::TMOD_RX {
            0
        } else if self.kick {
            1
        } else {
            self.header_entries
        };
        self.frames_left = if tmod == ctrlr0::TMOD_RX {
            field_get(ctrlr1::NDF, self.reg(Reg::Ctrlr1)) + 1
        } else {
            0
        };
        let op = if tmod == ctrlr0::TMOD_TX {
            Op::Write
        } else {
            Op::Read
        };
        let dummy = if standard { self.device.read_dummy } else { 0 };
        self.device.begin(cmd, addr, op, dummy);
        if self.inject_rxo {
            self.rxo = true;
        }
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.started = false;
        self.shifting = None;
        self.tx.clear();
        self.rx.clear();
        self.rxo = false;
    }

    /// Moves the wire along by one step. Returns false if nothing could
    /// happen.
    pub fn shift_one(&mut self) -> bool {
        if !self.enabled || self.stalled {
            return false;
        }
        if !self.started {
            let level =
                field_get(txftlr::TXFTHR, self.reg(Reg::Txftlr)) as usize;
            if self.tx.len() > level {
                self.started = true;
            } else {
                return false;
            }
        }

        let tmod = self.tmod();
        if tmod == ctrlr0::TMOD_RX {
            if self.rx_header_left > 0 {
                let Some(entry) = self.tx.pop_front() else {
                    return false;
                };
                if !self.kick {
                    let w = self.entry_width(self.popped);
                    self.exchange_entry(entry, w);
                }
                self.popped += 1;
                self.rx_header_left -= 1;
                return true;
            }
            if self.frames_left == 0 {
                return false;
            }
            if self.rx.len() >= self.depth {
                let stretch = self.reg(Reg::SpiCtrlr0)
                    & spi_ctrlr0::CLK_STRETCH_EN
                    != 0;
                if stretch {
                    return false;
                }
                self.receive_frame();
                self.rxo = true;
            } else {
                let frame = self.receive_frame();
                self.rx.push_back(frame);
            }
            self.frames_left -= 1;
            return true;
        }

        if let Some(entry) = self.shifting.take() {
            let w = self.entry_width(self.popped);
            let resp = self.exchange_entry(entry, w);
            self.popped += 1;
            if tmod == ctrlr0::TMOD_TX_RX {
                if self.rx.len() >= self.depth {
                    self.rxo = true;
                } else {
                    self.rx.push_back(resp);
                }
            }
            return true;
        }
        match self.tx.pop_front() {
            Some(entry) => {
                self.shifting = Some(entry);
                true
            }
            None => false,
        }
    }

    fn status(&self) -> Status {
        let mut sr = Status::empty();
        let rx_busy = self.tmod() == ctrlr0::TMOD_RX
            && self.started
            && (self.rx_header_left > 0 || self.frames_left > 0);
        if self.enabled
            && (self.shifting.is_some() || !self.tx.is_empty() || rx_busy)
        {
            sr |= Status::BUSY;
        }
        if self.tx.len() < self.depth {
            sr |= Status::TFNF;
        }
        if self.tx.is_empty() {
            sr |= Status::TFE;
        }
        if !self.rx.is_empty() {
            sr |= Status::RFNE;
        }
        if self.rx.len() >= self.depth {
            sr |= Status::RFF;
        }
        sr
    }

    pub fn risr(&self) -> u32 {
        let mut irq = Irq::empty();
        if self.enabled {
            let tft = field_get(txftlr::TFT, self.reg(Reg::Txftlr)) as usize;
            let rft = field_get(rxftlr::RFT, self.reg(Reg::Rxftlr)) as usize;
            if self.tx.len() <= tft {
                irq |= Irq::TXE;
            }
            if self.rx.len() > rft {
                irq |= Irq::RXF;
            }
        }
        if self.rxo {
            irq |= Irq::RXO;
        }
        irq.bits()
    }

    pub fn irq_pending(&self) -> bool {
        self.risr() & self.reg(Reg::Imr) != 0
    }

    fn read(&mut self, reg: Reg) -> u32 {
        match reg {
            Reg::Txflr => self.tx.len() as u32,
            Reg::Rxflr => self.rx.len() as u32,
            Reg::Sr => {
                self.shift_one();
                self.status().bits()
            }
            Reg::Risr => self.risr(),
            Reg::Isr => self.risr() & self.reg(Reg::Imr),
            Reg::Icr => {
                self.rxo = false;
                0
            }
            Reg::Dr => self.rx.pop_front().unwrap_or(0),
            r => self.reg(r),
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.writes.push((reg, value));
        self.regs.insert(reg, value);
        match reg {
            Reg::Dr => {
                self.dr_writes.push(value);
                if self.tx.len() < self.depth {
                    self.tx.push_back(value);
                }
            }
            Reg::Ssienr => {
                let enable = value & ssienr::SSIC_EN != 0;
                if enable && !self.enabled {
                    self.enable();
                } else if !enable {
                    self.disable();
                }
            }
            _ => {}
        }
    }
}

/// Shared handle on the simulated world.
#[derive(Clone)]
pub struct Sim(pub Rc<RefCell<SimHw>>);

impl Sim {
    pub fn new(depth: usize) -> Self {
        Self(Rc::new(RefCell::new(SimHw::new(depth))))
    }

    pub fn hw(&self) -> RefMut<'_, SimHw> {
        self.0.borrow_mut()
    }

    pub fn mem(&self, addr: usize, len: usize) -> Vec<u8> {
        self.hw().device.mem[addr..addr + len].to_vec()
    }
}

pub struct SimRegs(Rc<RefCell<SimHw>>);

impl Regs for SimRegs {
    fn read(&self, reg: Reg) -> u32 {
        self.0.borrow_mut().read(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.0.borrow_mut().write(reg, value)
    }
}

pub struct SimPlatform(Rc<RefCell<SimHw>>);

impl Platform for SimPlatform {
    fn take(&mut self, lock: Lock, wait: Wait) -> Result<(), Expired> {
        let mut hw = self.0.borrow_mut();
        let os = &mut hw.os;
        os.takes.push((lock, wait));
        let held = match lock {
            Lock::Config => os.config_held,
            Lock::Context => os.context_held,
        };
        if held {
            // Nobody else runs while we wait.
            if let Wait::Millis(ms) = wait {
                os.now += u64::from(ms);
            }
            return Err(Expired);
        }
        match lock {
            Lock::Config => os.config_held = true,
            Lock::Context => os.context_held = true,
        }
        Ok(())
    }

    fn give(&mut self, lock: Lock) {
        let mut hw = self.0.borrow_mut();
        match lock {
            Lock::Config => hw.os.config_held = false,
            Lock::Context => hw.os.context_held = false,
        }
    }

    fn now_ms(&self) -> u64 {
        self.0.borrow().os.now
    }

    fn wait_for_interrupt(&mut self, deadline: u64) -> Result<(), Expired> {
        let mut hw = self.0.borrow_mut();
        loop {
            if hw.irq_pending() {
                return Ok(());
            }
            if hw.reg(Reg::Dmacr) != 0 && !hw.stalled {
                hw.shift_one();
                return Ok(());
            }
            if !hw.shift_one() {
                hw.os.now = hw.os.now.max(deadline);
                return Err(Expired);
            }
        }
    }

    fn arm_timer(&mut self, deadline: u64) {
        self.0.borrow_mut().os.timer = Some(deadline);
    }

    fn disarm_timer(&mut self) {
        self.0.borrow_mut().os.timer = None;
    }

    fn submit_work(&mut self, work: Work) -> Result<(), QueueFull> {
        let mut hw = self.0.borrow_mut();
        if hw.os.fail_submit {
            return Err(QueueFull);
        }
        hw.os.work.push_back(work);
        Ok(())
    }

    fn pm_get(&mut self) -> Result<(), PmError> {
        let mut hw = self.0.borrow_mut();
        if hw.os.fail_pm_get {
            return Err(PmError);
        }
        hw.os.pm_gets += 1;
        hw.os.pm_refs += 1;
        Ok(())
    }

    fn pm_put(&mut self) -> Result<(), PmError> {
        let mut hw = self.0.borrow_mut();
        if hw.os.fail_pm_put {
            return Err(PmError);
        }
        hw.os.pm_puts += 1;
        hw.os.pm_refs -= 1;
        Ok(())
    }

    fn ce_init(&mut self, line: CeLine) -> Result<(), GpioError> {
        let mut hw = self.0.borrow_mut();
        if hw.os.fail_ce {
            return Err(GpioError);
        }
        hw.os.ce.insert((line.port, line.pin), false);
        Ok(())
    }

    fn ce_set(&mut self, line: CeLine, active: bool) -> Result<(), GpioError> {
        let mut hw = self.0.borrow_mut();
        if hw.os.fail_ce {
            return Err(GpioError);
        }
        hw.os.ce.insert((line.port, line.pin), active);
        hw.os.ce_log.push((line, active));
        Ok(())
    }
}

#[derive(Default)]
pub struct VendorLog {
    pub calls: Vec<&'static str>,
    pub irq_clears: usize,
    pub fail_xip_enable: bool,
    pub fail_xip_disable: bool,
    pub fail_dma_start: bool,
    /// Direction of every DMA job started, in order.
    pub dma_jobs: Vec<Direction>,
}

enum DmaJob {
    Tx {
        data: Vec<u8>,
        pos: usize,
        frame: usize,
    },
    Rx {
        ptr: *mut u8,
        len: usize,
        pos: usize,
        frame: usize,
    },
}

/// Vendor hooks that log what they're asked to do, and a DMA engine that
/// moves data through `DR` the way a handshaking DMA channel would.
pub struct SimVendor {
    pub log: Rc<RefCell<VendorLog>>,
    depth: u32,
    dma: Option<DmaJob>,
}

impl SimVendor {
    fn pump_dma(&mut self, regs: &mut SimRegs) -> DmaStatus {
        match &mut self.dma {
            None => DmaStatus::Done,
            Some(DmaJob::Tx { data, pos, frame }) => {
                while *pos < data.len() && regs.read(Reg::Txflr) < self.depth {
                    let word = data[*pos..*pos + *frame]
                        .iter()
                        .fold(0u32, |w, &b| (w << 8) | u32::from(b));
                    regs.write(Reg::Dr, word);
                    *pos += *frame;
                }
                if *pos >= data.len() {
                    DmaStatus::Done
                } else {
                    DmaStatus::Pending
                }
            }
            Some(DmaJob::Rx {
                ptr,
                len,
                pos,
                frame,
            }) => {
                while *pos < *len && regs.read(Reg::Rxflr) > 0 {
                    let word = regs.read(Reg::Dr).to_be_bytes();
                    for (i, b) in word[4 - *frame..].iter().enumerate() {
                        // SAFETY: the packet buffer outlives the DMA job,
                        // which ends when it reports Done or is aborted,
                        // and the driver doesn't touch the buffer meanwhile.
                        unsafe { ptr.add(*pos + i).write(*b) };
                    }
                    *pos += *frame;
                }
                if *pos >= *len {
                    DmaStatus::Done
                } else {
                    DmaStatus::Pending
                }
            }
        }
    }
}

impl Vendor<SimRegs> for SimVendor {
    fn init(&mut self, _regs: &mut SimRegs) {
        self.log.borrow_mut().calls.push("init");
    }

    fn suspend(&mut self, _regs: &mut SimRegs) {
        self.log.borrow_mut().calls.push("suspend");
    }

    fn resume(&mut self, _regs: &mut SimRegs) {
        self.log.borrow_mut().calls.push("resume");
    }

    fn irq_clear(&mut self, _regs: &mut SimRegs) {
        self.log.borrow_mut().irq_clears += 1;
    }

    fn xip_enable(
        &mut self,
        _regs: &mut SimRegs,
        _dev: &DeviceId,
        _cfg: &XipConfig,
    ) -> Result<(), MspiError> {
        let mut log = self.log.borrow_mut();
        log.calls.push("xip_enable");
        if log.fail_xip_enable {
            return Err(MspiError::NotSupported);
        }
        Ok(())
    }

    fn xip_disable(
        &mut self,
        _regs: &mut SimRegs,
        _dev: &DeviceId,
        _cfg: &XipConfig,
    ) -> Result<(), MspiError> {
        let mut log = self.log.borrow_mut();
        log.calls.push("xip_disable");
        if log.fail_xip_disable {
            return Err(MspiError::NotSupported);
        }
        Ok(())
    }

    fn dma_start(
        &mut self,
        regs: &mut SimRegs,
        buf: DmaBuffer<'_>,
        frame_bytes: usize,
    ) -> Result<(), MspiError> {
        {
            let mut log = self.log.borrow_mut();
            log.calls.push("dma_start");
            log.dma_jobs.push(buf.direction());
            if log.fail_dma_start {
                return Err(MspiError::NotSupported);
            }
        }
        self.dma = Some(match buf {
            DmaBuffer::Tx(data) => DmaJob::Tx {
                data: data.to_vec(),
                pos: 0,
                frame: frame_bytes,
            },
            DmaBuffer::Rx(data) => DmaJob::Rx {
                ptr: data.as_mut_ptr(),
                len: data.len(),
                pos: 0,
                frame: frame_bytes,
            },
        });
        self.pump_dma(regs);
        Ok(())
    }

    fn dma_status(&mut self, regs: &mut SimRegs) -> DmaStatus {
        let status = self.pump_dma(regs);
        if status == DmaStatus::Done {
            self.dma = None;
        }
        status
    }

    fn dma_abort(&mut self, _regs: &mut SimRegs) {
        self.log.borrow_mut().calls.push("dma_abort");
        self.dma = None;
    }
}

pub type Controller = DwMspi<SimRegs, SimPlatform, SimVendor>;

pub struct Bench {
    pub sim: Sim,
    pub vendor: Rc<RefCell<VendorLog>>,
    pub drv: Controller,
}

/// Instance configuration used by most tests: 16-entry FIFOs, two GPIO
/// chip enables, XIP and asynchronous transfers available.
pub fn instance() -> DwMspiConfig {
    let mut config = DwMspiConfig::new(CLOCK, DEPTH);
    config.ce_lines = &CE;
    config.xip = true;
    config.async_transfers = true;
    config
}

pub fn bench_with(config: DwMspiConfig) -> Result<Bench, MspiError> {
    let sim = Sim::new(config.tx_fifo_depth() as usize);
    let vendor = Rc::new(RefCell::new(VendorLog::default()));
    let drv = DwMspi::new(
        config,
        SimRegs(sim.0.clone()),
        SimPlatform(sim.0.clone()),
        SimVendor {
            log: vendor.clone(),
            depth: config.tx_fifo_depth(),
            dma: None,
        },
    )?;
    Ok(Bench { sim, vendor, drv })
}

pub fn bench() -> Bench {
    bench_with(instance()).unwrap()
}

/// Every field a standard SPI memory needs.
pub fn full_mask() -> DevConfigMask {
    DevConfigMask::FREQUENCY
        | DevConfigMask::IO_MODE
        | DevConfigMask::CPP
        | DevConfigMask::CMD_LEN
        | DevConfigMask::ADDR_LEN
        | DevConfigMask::READ_CMD
        | DevConfigMask::WRITE_CMD
        | DevConfigMask::RX_DUMMY
        | DevConfigMask::TX_DUMMY
}

pub fn mem_config(io_mode: IoMode) -> DeviceConfig {
    DeviceConfig {
        freq: 25_000_000,
        io_mode,
        read_cmd: u32::from(OP_READ),
        write_cmd: u32::from(OP_WRITE),
        cmd_length: 1,
        addr_length: 2,
        ..DeviceConfig::default()
    }
}

pub fn xip_on() -> XipConfig {
    XipConfig {
        enable: true,
        address_offset: 0,
        size: MEM_SIZE as u32,
        permission: XipPermission::ReadOnly,
    }
}

pub fn xip_off() -> XipConfig {
    XipConfig {
        enable: false,
        ..xip_on()
    }
}

/// Stands in for the kernel while an asynchronous transfer runs: delivers
/// interrupts, runs queued work, lets the wire move and fires the timer
/// when nothing else can happen.
pub fn run_async(b: &mut Bench) {
    for _ in 0..1_000_000 {
        loop {
            let work = b.sim.hw().os.work.pop_front();
            match work {
                Some(w) => b.drv.run_work(w),
                None => break,
            }
        }
        if b.sim.hw().irq_pending() {
            b.drv.on_interrupt();
            continue;
        }
        if b.sim.hw().shift_one() {
            continue;
        }
        let timer = b.sim.hw().os.timer.take();
        if let Some(deadline) = timer {
            b.sim.hw().os.now = deadline;
            b.drv.on_timer_expired();
            continue;
        }
        return;
    }
    panic!("asynchronous transfer never settled");
}

/// Callback that records the events it sees.
pub fn recorder() -> (EventHandler, Arc<Mutex<Vec<Event>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handler: EventHandler = Box::leak(Box::new(move |e: &Event| {
        sink.lock().unwrap().push(*e);
    }));
    (handler, events)
}
