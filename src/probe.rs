//! C1 — Probe Facade.
//!
//! Everything in this module is the boundary the spec calls an "external
//! collaborator": USB discovery, the probe's proprietary wire command set,
//! and the chip identification database live behind [`ProbeFacade`], not in
//! this crate. [`RealProbe`] forwards to the real `probe-rs` crate; the rest
//! of the core (breakpoints, watchpoints, cache tracker, flash engine,
//! semihosting, session engine) is written against the trait only, so it can
//! run against [`MockProbe`] in tests without any attached hardware — this is
//! the testability the spec's design notes (§9) ask for explicitly.

use std::collections::HashMap;

/// How the probe should attach to the target at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Attach without disturbing the currently running target.
    Normal,
    /// Attach while the target may already be running unknown code
    /// ("hot-plug"): do not force a reset.
    HotPlug,
    /// Hold the target in reset while attaching.
    UnderReset,
}

/// How [`ProbeFacade::reset`] should reset the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Software reset followed by a halt, keeping debug session state.
    SoftHalt,
    /// Full hardware reset.
    Hard,
}

/// Coarse run/halt status of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Running,
    Halted,
}

/// The full register snapshot the session engine hands to `g`/`G`.
///
/// Field layout matches spec §3's "Target register snapshot": 16 GPRs
/// (r0..r15, r15 being PC), xpsr, msp, psp, the four 8-bit special
/// registers, and the FP register file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub gpr: [u32; 16],
    pub xpsr: u32,
    pub msp: u32,
    pub psp: u32,
    pub control: u8,
    pub faultmask: u8,
    pub basepri: u8,
    pub primask: u8,
    pub fpregs: [u32; 32],
    pub fpscr: u32,
}

pub type ProbeResult<T> = std::result::Result<T, String>;

/// Capability set the rest of the core needs from a connected probe+target.
///
/// This is a 1:1 translation of spec §4.1's method list. The spec's C
/// ancestor returns an integer status from each call; here that becomes
/// `ProbeResult<T>` (`Err` carrying a human-readable reason), which is what
/// an idiomatic Rust facade looks like while preserving "nonzero means
/// failure" semantics exactly.
pub trait ProbeFacade {
    fn read_debug32(&mut self, addr: u32) -> ProbeResult<u32>;
    fn write_debug32(&mut self, addr: u32, value: u32) -> ProbeResult<()>;

    fn read_mem32(&mut self, addr: u32, len: u32) -> ProbeResult<Vec<u8>>;
    fn write_mem32(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()>;
    fn write_mem8(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()>;

    fn read_all_regs(&mut self) -> ProbeResult<RegisterSnapshot>;
    fn write_all_regs(&mut self, regs: &RegisterSnapshot) -> ProbeResult<()>;
    fn read_reg(&mut self, id: u32) -> ProbeResult<u32>;
    fn write_reg(&mut self, id: u32, value: u32) -> ProbeResult<()>;

    /// Reads a register id outside the core's native register file (the FP
    /// register bank and FPSCR on spec §4.8's register index map) — split
    /// out from `read_reg` because not every Cortex-M variant backs these
    /// the same way a GPR is backed.
    fn read_unsupported_reg(&mut self, id: u32) -> ProbeResult<u32>;
    fn write_unsupported_reg(&mut self, id: u32, value: u32) -> ProbeResult<()>;

    fn halt(&mut self) -> ProbeResult<()>;
    fn step(&mut self) -> ProbeResult<()>;
    fn run(&mut self) -> ProbeResult<()>;
    fn status(&mut self) -> ProbeResult<TargetStatus>;
    fn reset(&mut self, mode: ResetMode) -> ProbeResult<()>;

    fn erase_page(&mut self, addr: u32) -> ProbeResult<()>;
    fn flashloader_start(&mut self) -> ProbeResult<()>;
    fn flashloader_write(&mut self, addr: u32, data: &[u8]) -> ProbeResult<()>;
    fn flashloader_stop(&mut self) -> ProbeResult<()>;

    fn exit_debug_mode(&mut self) -> ProbeResult<()>;
    fn close(&mut self) -> ProbeResult<()>;
    fn connect(&mut self, mode: ConnectMode) -> ProbeResult<()>;

    fn chip_id(&self) -> u32;
    fn core_id(&self) -> u32;
    fn flash_size(&self) -> u32;
    fn flash_pgsz(&self, addr: u32) -> u32;
    fn sram_size(&self) -> u32;
    fn sys_base(&self) -> u32;
    fn sys_size(&self) -> u32;
    fn erased_pattern(&self) -> u8;
}

/// [`ProbeFacade`] implementation backed by the real `probe-rs` crate.
///
/// probe-rs's own `Core`/`Session` objects already speak SWD/JTAG to real
/// hardware; this type exists purely to adapt their API shape to
/// [`ProbeFacade`]'s spec-defined method set, the same role the teacher's
/// `GdbArchitectureExt`/`GdbSessionExt` extension traits played for the
/// upstream gdbstub-based server.
pub struct RealProbe {
    session: probe_rs::Session,
    core_index: usize,
    chip_id: u32,
    flash_size: u32,
    flash_page_size: u32,
    sram_size: u32,
    sys_base: u32,
    sys_size: u32,
    erased_pattern: u8,
    /// Accumulates `vFlashWrite` data between `flashloader_start` and
    /// `flashloader_stop`. probe-rs's loader performs erase-then-program as
    /// one transaction on `commit`, so spec §4.6's per-page `erase_page`
    /// is a deliberate no-op here — the same division of labor the
    /// teacher's own gdb server target/flash.rs uses ("we collect all the
    /// write operations in the FlashLoader ... and ignore the flash_erase
    /// command, as the FlashLoader will handle everything").
    flash_loader: Option<probe_rs::flashing::FlashLoader>,
}

impl RealProbe {
    pub fn new(
        session: probe_rs::Session,
        core_index: usize,
        chip_id: u32,
        flash_size: u32,
        flash_page_size: u32,
        sram_size: u32,
        sys_base: u32,
        sys_size: u32,
        erased_pattern: u8,
    ) -> Self {
        Self {
            session,
            core_index,
            chip_id,
            flash_size,
            flash_page_size,
            sram_size,
            sys_base,
            sys_size,
            erased_pattern,
            flash_loader: None,
        }
    }

    fn core(&mut self) -> ProbeResult<probe_rs::Core<'_>> {
        self.session
            .core(self.core_index)
            .map_err(|e| e.to_string())
    }
}

impl ProbeFacade for RealProbe {
    fn read_debug32(&mut self, addr: u32) -> ProbeResult<u32> {
        use probe_rs::MemoryInterface;
        self.core()?
            .read_word_32(addr as u64)
            .map_err(|e| e.to_string())
    }

    fn write_debug32(&mut self, addr: u32, value: u32) -> ProbeResult<()> {
        use probe_rs::MemoryInterface;
        self.core()?
            .write_word_32(addr as u64, value)
            .map_err(|e| e.to_string())
    }

    fn read_mem32(&mut self, addr: u32, len: u32) -> ProbeResult<Vec<u8>> {
        use probe_rs::MemoryInterface;
        let mut buf = vec![0u8; len as usize];
        self.core()?
            .read(addr as u64, &mut buf)
            .map_err(|e| e.to_string())?;
        Ok(buf)
    }

    fn write_mem32(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()> {
        use probe_rs::MemoryInterface;
        self.core()?
            .write_8(addr as u64, buf)
            .map_err(|e| e.to_string())
    }

    fn write_mem8(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()> {
        use probe_rs::MemoryInterface;
        self.core()?
            .write_8(addr as u64, buf)
            .map_err(|e| e.to_string())
    }

    fn read_all_regs(&mut self) -> ProbeResult<RegisterSnapshot> {
        let mut core = self.core()?;
        let mut snap = RegisterSnapshot::default();
        for i in 0..16u32 {
            snap.gpr[i as usize] = core
                .read_core_reg(probe_rs::RegisterId(i as u16))
                .map_err(|e| e.to_string())?;
        }
        Ok(snap)
    }

    fn write_all_regs(&mut self, regs: &RegisterSnapshot) -> ProbeResult<()> {
        let mut core = self.core()?;
        for (i, value) in regs.gpr.iter().enumerate() {
            core.write_core_reg(probe_rs::RegisterId(i as u16), *value)
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn read_reg(&mut self, id: u32) -> ProbeResult<u32> {
        self.core()?
            .read_core_reg(probe_rs::RegisterId(id as u16))
            .map_err(|e| e.to_string())
    }

    fn write_reg(&mut self, id: u32, value: u32) -> ProbeResult<()> {
        self.core()?
            .write_core_reg(probe_rs::RegisterId(id as u16), value)
            .map_err(|e| e.to_string())
    }

    fn read_unsupported_reg(&mut self, id: u32) -> ProbeResult<u32> {
        self.core()?
            .read_core_reg(probe_rs::RegisterId(id as u16))
            .map_err(|e| e.to_string())
    }

    fn write_unsupported_reg(&mut self, id: u32, value: u32) -> ProbeResult<()> {
        self.core()?
            .write_core_reg(probe_rs::RegisterId(id as u16), value)
            .map_err(|e| e.to_string())
    }

    fn halt(&mut self) -> ProbeResult<()> {
        use std::time::Duration;
        self.core()?
            .halt(Duration::from_millis(100))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn step(&mut self) -> ProbeResult<()> {
        self.core()?.step().map(|_| ()).map_err(|e| e.to_string())
    }

    fn run(&mut self) -> ProbeResult<()> {
        self.core()?.run().map_err(|e| e.to_string())
    }

    fn status(&mut self) -> ProbeResult<TargetStatus> {
        let halted = self.core()?.core_halted().map_err(|e| e.to_string())?;
        Ok(if halted {
            TargetStatus::Halted
        } else {
            TargetStatus::Running
        })
    }

    fn reset(&mut self, mode: ResetMode) -> ProbeResult<()> {
        use std::time::Duration;
        let mut core = self.core()?;
        match mode {
            ResetMode::SoftHalt => core
                .reset_and_halt(Duration::from_millis(500))
                .map(|_| ())
                .map_err(|e| e.to_string()),
            ResetMode::Hard => core.reset().map_err(|e| e.to_string()),
        }
    }

    fn erase_page(&mut self, _addr: u32) -> ProbeResult<()> {
        // No-op: the flash loader erases each page it touches as part of
        // `commit`, driven by what `flashloader_write` stages.
        Ok(())
    }

    fn flashloader_start(&mut self) -> ProbeResult<()> {
        self.flash_loader = Some(self.session.target().flash_loader());
        Ok(())
    }

    fn flashloader_write(&mut self, addr: u32, data: &[u8]) -> ProbeResult<()> {
        let loader = self
            .flash_loader
            .as_mut()
            .ok_or("flashloader_write called before flashloader_start")?;
        loader
            .add_data(addr as u64, data)
            .map_err(|e| e.to_string())
    }

    fn flashloader_stop(&mut self) -> ProbeResult<()> {
        let mut loader = self
            .flash_loader
            .take()
            .ok_or("flashloader_stop called before flashloader_start")?;
        loader
            .commit(&mut self.session, probe_rs::flashing::DownloadOptions::default())
            .map_err(|e| e.to_string())
    }

    fn exit_debug_mode(&mut self) -> ProbeResult<()> {
        Ok(())
    }

    fn close(&mut self) -> ProbeResult<()> {
        Ok(())
    }

    fn connect(&mut self, _mode: ConnectMode) -> ProbeResult<()> {
        Ok(())
    }

    fn chip_id(&self) -> u32 {
        self.chip_id
    }

    fn core_id(&self) -> u32 {
        self.core_index as u32
    }

    fn flash_size(&self) -> u32 {
        self.flash_size
    }

    fn flash_pgsz(&self, _addr: u32) -> u32 {
        self.flash_page_size
    }

    fn sram_size(&self) -> u32 {
        self.sram_size
    }

    fn sys_base(&self) -> u32 {
        self.sys_base
    }

    fn sys_size(&self) -> u32 {
        self.sys_size
    }

    fn erased_pattern(&self) -> u8 {
        self.erased_pattern
    }
}

/// In-memory [`ProbeFacade`] used by unit and integration tests.
///
/// Debug registers (FP_CTRL, DWT_*, cache registers, ...) and RAM/flash are
/// both modeled as sparse `HashMap<u32, u32>`/flat byte buffers so tests can
/// assert on exact register writes the way the teacher's `architecture.rs`
/// tests assert on exact XML output.
pub struct MockProbe {
    pub debug_regs: HashMap<u32, u32>,
    pub memory: HashMap<u32, u8>,
    pub regs: RegisterSnapshot,
    pub status: TargetStatus,
    pub chip_id: u32,
    pub flash_base: u32,
    pub flash_size: u32,
    pub flash_page_size: u32,
    pub sram_size: u32,
    pub sys_base: u32,
    pub sys_size: u32,
    pub erased_pattern: u8,
    pub step_count: u32,
    pub run_count: u32,
    pub reset_count: u32,
}

impl Default for MockProbe {
    fn default() -> Self {
        Self {
            debug_regs: HashMap::new(),
            memory: HashMap::new(),
            regs: RegisterSnapshot::default(),
            status: TargetStatus::Halted,
            chip_id: 0x4100_0000,
            flash_base: 0x0800_0000,
            flash_size: 128 * 1024,
            flash_page_size: 0x800,
            sram_size: 20 * 1024,
            sys_base: 0x1FFF_0000,
            sys_size: 0x7000,
            erased_pattern: 0xFF,
            step_count: 0,
            run_count: 0,
            reset_count: 0,
        }
    }
}

impl MockProbe {
    pub fn mem_slice(&self, addr: u32, len: u32) -> Vec<u8> {
        (0..len)
            .map(|i| {
                *self
                    .memory
                    .get(&(addr + i))
                    .unwrap_or(&self.erased_pattern)
            })
            .collect()
    }
}

impl ProbeFacade for MockProbe {
    fn read_debug32(&mut self, addr: u32) -> ProbeResult<u32> {
        Ok(*self.debug_regs.get(&addr).unwrap_or(&0))
    }

    fn write_debug32(&mut self, addr: u32, value: u32) -> ProbeResult<()> {
        self.debug_regs.insert(addr, value);
        Ok(())
    }

    fn read_mem32(&mut self, addr: u32, len: u32) -> ProbeResult<Vec<u8>> {
        Ok(self.mem_slice(addr, len))
    }

    fn write_mem32(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()> {
        self.write_mem8(addr, buf)
    }

    fn write_mem8(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()> {
        for (i, b) in buf.iter().enumerate() {
            self.memory.insert(addr + i as u32, *b);
        }
        Ok(())
    }

    fn read_all_regs(&mut self) -> ProbeResult<RegisterSnapshot> {
        Ok(self.regs.clone())
    }

    fn write_all_regs(&mut self, regs: &RegisterSnapshot) -> ProbeResult<()> {
        self.regs = regs.clone();
        Ok(())
    }

    fn read_reg(&mut self, id: u32) -> ProbeResult<u32> {
        match id {
            0..=15 => Ok(self.regs.gpr[id as usize]),
            0x19 => Ok(self.regs.xpsr),
            0x1A => Ok(self.regs.msp),
            0x1B => Ok(self.regs.psp),
            0x1C => Ok(self.regs.control as u32),
            0x1D => Ok(self.regs.faultmask as u32),
            0x1E => Ok(self.regs.basepri as u32),
            0x1F => Ok(self.regs.primask as u32),
            0x20..=0x3F => Ok(self.regs.fpregs[(id - 0x20) as usize]),
            0x40 => Ok(self.regs.fpscr),
            other => Err(format!("no such register {other:#x}")),
        }
    }

    fn write_reg(&mut self, id: u32, value: u32) -> ProbeResult<()> {
        match id {
            0..=15 => self.regs.gpr[id as usize] = value,
            0x19 => self.regs.xpsr = value,
            0x1A => self.regs.msp = value,
            0x1B => self.regs.psp = value,
            0x1C => self.regs.control = value as u8,
            0x1D => self.regs.faultmask = value as u8,
            0x1E => self.regs.basepri = value as u8,
            0x1F => self.regs.primask = value as u8,
            0x20..=0x3F => self.regs.fpregs[(id - 0x20) as usize] = value,
            0x40 => self.regs.fpscr = value,
            other => return Err(format!("no such register {other:#x}")),
        }
        Ok(())
    }

    fn read_unsupported_reg(&mut self, id: u32) -> ProbeResult<u32> {
        self.read_reg(id)
    }

    fn write_unsupported_reg(&mut self, id: u32, value: u32) -> ProbeResult<()> {
        self.write_reg(id, value)
    }

    fn halt(&mut self) -> ProbeResult<()> {
        self.status = TargetStatus::Halted;
        Ok(())
    }

    fn step(&mut self) -> ProbeResult<()> {
        self.step_count += 1;
        self.regs.gpr[15] = self.regs.gpr[15].wrapping_add(2);
        self.status = TargetStatus::Halted;
        Ok(())
    }

    fn run(&mut self) -> ProbeResult<()> {
        self.run_count += 1;
        self.status = TargetStatus::Running;
        Ok(())
    }

    fn status(&mut self) -> ProbeResult<TargetStatus> {
        Ok(self.status)
    }

    fn reset(&mut self, _mode: ResetMode) -> ProbeResult<()> {
        self.reset_count += 1;
        self.status = TargetStatus::Halted;
        self.regs = RegisterSnapshot::default();
        Ok(())
    }

    fn erase_page(&mut self, addr: u32) -> ProbeResult<()> {
        let page_size = self.flash_page_size;
        for i in 0..page_size {
            self.memory.insert(addr + i, self.erased_pattern);
        }
        Ok(())
    }

    fn flashloader_start(&mut self) -> ProbeResult<()> {
        Ok(())
    }

    fn flashloader_write(&mut self, addr: u32, data: &[u8]) -> ProbeResult<()> {
        self.write_mem8(addr, data)
    }

    fn flashloader_stop(&mut self) -> ProbeResult<()> {
        Ok(())
    }

    fn exit_debug_mode(&mut self) -> ProbeResult<()> {
        Ok(())
    }

    fn close(&mut self) -> ProbeResult<()> {
        Ok(())
    }

    fn connect(&mut self, _mode: ConnectMode) -> ProbeResult<()> {
        Ok(())
    }

    fn chip_id(&self) -> u32 {
        self.chip_id
    }

    fn core_id(&self) -> u32 {
        0
    }

    fn flash_size(&self) -> u32 {
        self.flash_size
    }

    fn flash_pgsz(&self, _addr: u32) -> u32 {
        self.flash_page_size
    }

    fn sram_size(&self) -> u32 {
        self.sram_size
    }

    fn sys_base(&self) -> u32 {
        self.sys_base
    }

    fn sys_size(&self) -> u32 {
        self.sys_size
    }

    fn erased_pattern(&self) -> u8 {
        self.erased_pattern
    }
}
