//! C8 — Session Engine.
//!
//! Owns everything that exists for the lifetime of one accepted client
//! (spec §3 "Session state") plus the process-lifetime tables spec §3
//! assigns to C3-C6, and runs the single-threaded accept → dispatch-loop →
//! close cycle spec §5 describes. This is the "session-scoped object"
//! spec §9's design note asks for in place of the original's global
//! mutable tables: everything below lives on `Session`, nothing in a
//! process-wide static.

use std::io::Write;
use std::net::ToSocketAddrs;

use crate::breakpoints::BreakpointManager;
use crate::cache::CacheTracker;
use crate::chip::{ChipDatabase, ChipGeometry};
use crate::error::{Error, Result};
use crate::flash::{FlashGeometry, FlashStagingEngine};
use crate::handlers;
use crate::parser::query::TransferOperation;
use crate::parser::v_packet::{Action, VPacket};
use crate::parser::{parse_packet, BreakpointType, Packet, QueryPacket};
use crate::probe::{ConnectMode, ProbeFacade, ResetMode, TargetStatus};
use crate::rsp::{GdbConnection, InterruptPeek, POLL_INTERVAL};
use crate::semihosting::{self, Outcome, SemihostingHost, StdSemihostingHost};
use crate::target_desc;
use crate::watchpoints::WatchpointManager;

/// Per-connection state, spec §3's "Session state".
#[derive(Debug, Clone)]
pub struct SessionState {
    pub attached: bool,
    pub semihosting_enabled: bool,
    pub persistent: bool,
    pub critical_error: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            attached: true,
            semihosting_enabled: false,
            persistent: false,
            critical_error: false,
        }
    }
}

/// Adapts [`ChipGeometry`] (fixed, from the chip database) plus the live
/// probe's addr-dependent page size into the [`FlashGeometry`] the flash
/// staging engine's `erase` needs.
struct ProbeFlashGeometry<'a> {
    geom: &'a ChipGeometry,
    probe: &'a dyn ProbeFacade,
}

impl FlashGeometry for ProbeFlashGeometry<'_> {
    fn flash_base(&self) -> u32 {
        self.geom.flash_base
    }
    fn flash_size(&self) -> u32 {
        self.geom.flash_size
    }
    fn page_size(&self, addr: u32) -> u32 {
        self.probe.flash_pgsz(addr)
    }
    fn erased_pattern(&self) -> u8 {
        self.probe.erased_pattern()
    }
}

/// Owns the probe facade (C1), the four hardware-table managers (C3-C6),
/// the semihosting host collaborator (C7), and the session state (§3) for
/// one accepted client connection, persisting across reconnects when
/// `persistent` is set.
pub struct Session {
    probe: Box<dyn ProbeFacade>,
    semihosting_host: Box<dyn SemihostingHost>,
    connect_mode: ConnectMode,
    geom: ChipGeometry,
    breakpoints: BreakpointManager,
    watchpoints: WatchpointManager,
    cache: CacheTracker,
    flash: FlashStagingEngine,
    memory_map_xml: String,
    state: SessionState,
}

impl Session {
    /// Connects the probe, force-halts, resolves chip geometry from the
    /// chip database, and initializes C3/C4/C5 — spec §4.8's "On accept"
    /// sequence.
    pub fn connect(
        mut probe: Box<dyn ProbeFacade>,
        chip_db: &dyn ChipDatabase,
        connect_mode: ConnectMode,
        persistent: bool,
        semihosting_enabled: bool,
    ) -> Result<Self> {
        probe.connect(connect_mode).map_err(Error::Probe)?;
        probe.halt().map_err(Error::Probe)?;

        let chip_id = probe.chip_id();
        let geom = chip_db.lookup(chip_id).ok_or(Error::UnknownChip(chip_id))?;

        let breakpoints = BreakpointManager::init(&mut *probe, geom.is_cm7);
        let watchpoints = WatchpointManager::init(&mut *probe);
        let cache = CacheTracker::detect(&mut *probe);
        let memory_map_xml = target_desc::memory_map_xml(&geom);

        Ok(Self {
            probe,
            semihosting_host: Box::new(StdSemihostingHost::default()),
            connect_mode,
            geom,
            breakpoints,
            watchpoints,
            cache,
            flash: FlashStagingEngine::new(),
            memory_map_xml,
            state: SessionState {
                persistent,
                semihosting_enabled,
                ..SessionState::default()
            },
        })
    }

    /// Swaps in a different semihosting host (tests, or an embedder that
    /// wants custom file/console behavior).
    pub fn with_semihosting_host(mut self, host: Box<dyn SemihostingHost>) -> Self {
        self.semihosting_host = host;
        self
    }

    /// Re-reads hardware state that a reset destroys: breakpoints,
    /// watchpoints, cache descriptor. Spec §7: "Always resynchronize after
    /// reset — reinitialize breakpoints, watchpoints, and cache
    /// descriptor; their hardware state is lost."
    fn reinit_after_reset(&mut self) {
        self.breakpoints = BreakpointManager::init(&mut *self.probe, self.geom.is_cm7);
        self.watchpoints = WatchpointManager::init(&mut *self.probe);
        self.cache = CacheTracker::detect(&mut *self.probe);
    }

    /// Runs the accept → dispatch-loop → close cycle against `addr`. Spec
    /// §6: the listening socket only ever holds one client; closes
    /// immediately after accept. Loops for a new client if `persistent` is
    /// set (extended mode, `--multi`).
    pub fn serve(mut self, addr: impl ToSocketAddrs + Clone) -> Result<()> {
        loop {
            let mut conn = GdbConnection::listen(addr.clone())?;
            log::info!("client connected");

            match self.run_session(&mut conn) {
                Ok(()) => {}
                Err(Error::ProbeReopenFailed(reason)) => {
                    // Process-fatal per spec §7 kind 3.
                    log::error!("probe reopen failed after kill: {reason}");
                    let _ = self.probe.exit_debug_mode();
                    let _ = self.probe.close();
                    return Err(Error::ProbeReopenFailed(reason));
                }
                Err(e) => log::warn!("session ended with error: {e}"),
            }

            self.state.critical_error = false;
            if !self.state.persistent {
                return Ok(());
            }
        }
    }

    /// The command dispatch loop: reads one packet, dispatches it, writes
    /// the reply, and repeats until the client disconnects or a
    /// session-fatal condition sets `critical_error`. Exposed (rather than
    /// private) so integration tests can drive a `Session` against
    /// [`GdbConnection::tester`] the same way the teacher's own
    /// `GdbServer::tester` is driven directly in its test suite, without
    /// needing a real socket.
    pub fn run_session<R, W>(&mut self, conn: &mut GdbConnection<R, W>) -> Result<()>
    where
        R: InterruptPeek,
        W: Write,
    {
        while let Some(raw) = conn.next_packet()? {
            let reply = match parse_packet(&raw.data) {
                Ok(packet) => self.dispatch(&packet, conn)?,
                Err(e) => {
                    log::warn!(
                        "failed to parse packet {:?}: {e}",
                        String::from_utf8_lossy(&raw.data)
                    );
                    handlers::reply_empty()
                }
            };

            if let Some(body) = reply {
                conn.dispatch(body.as_bytes())?;
            }

            if self.state.critical_error {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Dispatches one parsed packet to the right subsystem. `conn` is
    /// threaded through only because `Continue`/`vCont;c` needs it to poll
    /// for a `0x03` interrupt mid-flight (spec §4.2/§5).
    fn dispatch<R, W>(
        &mut self,
        packet: &Packet,
        conn: &mut GdbConnection<R, W>,
    ) -> Result<Option<String>>
    where
        R: InterruptPeek,
        W: Write,
    {
        use Packet::*;

        Ok(match packet {
            EnableExtendedMode => {
                self.state.persistent = true;
                handlers::reply_ok()
            }
            HaltReason => handlers::halt_reason(self.state.attached),
            ReadGeneralRegister => handlers::read_general_registers(&mut *self.probe),
            WriteGeneralRegister { reg_values } => {
                handlers::write_general_registers(&mut *self.probe, reg_values)
            }
            ReadRegisterHex(id) => handlers::read_register(&mut *self.probe, *id),
            WriteRegisterHex { address, value } => {
                handlers::write_register(&mut *self.probe, *address, *value)
            }
            ReadMemory { address, length } => match u32::try_from(*address) {
                Ok(addr) => {
                    let page_size = self.probe.flash_pgsz(addr);
                    handlers::read_memory(&mut *self.probe, addr, *length, page_size)
                }
                // LLDB sends 64-bit addresses this core's target never has.
                Err(_) => handlers::reply_empty(),
            },
            WriteMemory { address, data, .. } => {
                handlers::write_memory(&mut *self.probe, &mut self.cache, *address, data)
            }
            WriteMemoryBinary { address, data } => {
                handlers::write_memory(&mut *self.probe, &mut self.cache, *address, data)
            }
            Continue => Some(self.continue_loop(conn)),
            SingleStep => Some(self.single_step()),
            InsertBreakpoint {
                breakpoint_type,
                address,
                kind,
            } => self.insert_bp_or_wp(breakpoint_type.clone(), *address, *kind),
            RemoveBreakpoint {
                breakpoint_type,
                address,
                ..
            } => self.remove_bp_or_wp(breakpoint_type.clone(), *address),
            Restart => Some(self.restart()),
            KillRequest => {
                self.kill()?;
                None
            }
            Detach => {
                self.state.attached = false;
                handlers::reply_ok()
            }
            Query(q) => self.dispatch_query(q),
            V(v) => self.dispatch_v(v, conn),
            Interrupt => {
                let _ = self.probe.halt();
                Some("S05".into())
            }
            _ => handlers::reply_empty(),
        })
    }

    fn insert_bp_or_wp(&mut self, kind: BreakpointType, addr: u32, len: u32) -> Option<String> {
        match kind {
            BreakpointType::Hardware | BreakpointType::Software => {
                handlers::insert_breakpoint(&mut self.breakpoints, &mut *self.probe, kind, addr)
            }
            _ => handlers::insert_watchpoint(&mut self.watchpoints, &mut *self.probe, kind, addr, len),
        }
    }

    fn remove_bp_or_wp(&mut self, kind: BreakpointType, addr: u32) -> Option<String> {
        match kind {
            BreakpointType::Hardware | BreakpointType::Software => {
                handlers::remove_breakpoint(&mut self.breakpoints, &mut *self.probe, kind, addr)
            }
            _ => handlers::remove_watchpoint(&mut self.watchpoints, &mut *self.probe, addr),
        }
    }

    fn dispatch_query(&mut self, q: &QueryPacket) -> Option<String> {
        match q {
            QueryPacket::ThreadId => handlers::reply_empty(),
            QueryPacket::Attached(_) => Some(if self.state.attached { "1".into() } else { "0".into() }),
            QueryPacket::Command(hex) => self.monitor_command(hex),
            QueryPacket::Supported(_) => handlers::q_supported(),
            QueryPacket::Transfer { object, operation } => match operation {
                TransferOperation::Read { offset, length, .. } => handlers::qxfer_read(
                    object,
                    *offset,
                    *length,
                    target_desc::target_description_xml(),
                    &self.memory_map_xml,
                ),
                TransferOperation::Write { .. } => handlers::reply_empty(),
            },
            QueryPacket::HostInfo => handlers::reply_empty(),
            QueryPacket::Crc { .. } => handlers::reply_empty(),
        }
    }

    /// `qRcmd,<hex>` — un-hexes to a monitor command name and maps it to
    /// probe calls, per spec §4.8 / §9 (hex payload after the first comma,
    /// never the length-prefix-of-4 bug the source's parser happens to
    /// tolerate).
    fn monitor_command(&mut self, hex_payload: &[u8]) -> Option<String> {
        let command = handlers::decode_rcmd(hex_payload)?;
        match command.as_str() {
            "resume" => match self.probe.run() {
                Ok(()) => handlers::reply_ok(),
                Err(_) => handlers::reply_error(0),
            },
            "halt" => match self.probe.halt() {
                Ok(()) => handlers::reply_ok(),
                Err(_) => handlers::reply_error(0),
            },
            "reset" | "jtag_reset" => match self.probe.reset(ResetMode::SoftHalt) {
                Ok(()) => {
                    self.reinit_after_reset();
                    handlers::reply_ok()
                }
                Err(_) => handlers::reply_error(0),
            },
            "semihosting enable" | "semihosting 1" => {
                self.state.semihosting_enabled = true;
                handlers::reply_ok()
            }
            "semihosting disable" | "semihosting 0" => {
                self.state.semihosting_enabled = false;
                handlers::reply_ok()
            }
            other => {
                log::debug!("unknown monitor command: {other:?}");
                handlers::reply_error(0)
            }
        }
    }

    fn dispatch_v<R, W>(&mut self, v: &VPacket, conn: &mut GdbConnection<R, W>) -> Option<String>
    where
        R: InterruptPeek,
        W: Write,
    {
        match v {
            VPacket::Attach => handlers::reply_empty(),
            VPacket::QueryContSupport => Some("vCont;c;s".into()),
            VPacket::Continue(action) => match action {
                Action::Continue => Some(self.continue_loop(conn)),
                Action::Step => Some(self.single_step()),
                Action::Stop => {
                    let _ = self.probe.halt();
                    Some("S05".into())
                }
                _ => handlers::reply_empty(),
            },
            VPacket::FlashErase { addr, length } => {
                let geom = ProbeFlashGeometry {
                    geom: &self.geom,
                    probe: &*self.probe,
                };
                handlers::flash_erase(&mut self.flash, &geom, *addr, *length)
            }
            VPacket::FlashWrite { addr, data } => handlers::flash_write(&mut self.flash, *addr, data),
            VPacket::FlashDone => {
                let reply = handlers::flash_done(&mut self.flash, &mut *self.probe);
                self.reinit_after_reset();
                reply
            }
            VPacket::Kill => {
                self.state.attached = false;
                handlers::reply_ok()
            }
            VPacket::Unknown(_) => handlers::reply_empty(),
        }
    }

    /// `s` — single step. A failed step is session-fatal (spec §7 kind 2):
    /// sets `critical_error` so `run_session` tears the session down right
    /// after replying.
    fn single_step(&mut self) -> String {
        self.cache.sync_before_resume(&mut *self.probe);
        match self.probe.step() {
            Ok(()) => "S05".into(),
            Err(_) => {
                self.state.critical_error = true;
                "E00".into()
            }
        }
    }

    /// `R` — restart. Soft-resets, force-halts, and resynchronizes the
    /// hardware tables lost by the reset (spec §4.8, §7).
    fn restart(&mut self) -> String {
        match self.probe.reset(ResetMode::SoftHalt) {
            Ok(()) => {
                self.reinit_after_reset();
                "OK".into()
            }
            Err(_) => "E00".into(),
        }
    }

    /// `k` — kill/detach. Closes and reopens the probe; no reply is sent
    /// either way (spec §4.8). If the reopen fails, this is process-fatal
    /// (spec §7 kind 3) and the error propagates out through `serve`.
    fn kill(&mut self) -> Result<()> {
        self.state.attached = false;
        let _ = self.probe.close();
        self.probe
            .connect(self.connect_mode)
            .map_err(Error::ProbeReopenFailed)?;
        let _ = self.probe.halt();
        Ok(())
    }

    /// The continue/semihosting state machine (spec §4.8's table):
    /// `Running` → poll every 100ms → `PolledHalt` on halt or
    /// `InterruptRequested` on a `0x03` byte. A semihosting trap loops back
    /// to `Running`; anything else reports the halt to GDB as `S05`.
    fn continue_loop<R, W>(&mut self, conn: &mut GdbConnection<R, W>) -> String
    where
        R: InterruptPeek,
        W: Write,
    {
        self.cache.sync_before_resume(&mut *self.probe);
        if self.probe.run().is_err() {
            return "E00".into();
        }

        loop {
            if conn.peek_interrupt().unwrap_or(false) {
                let _ = self.probe.halt();
                return "S05".into();
            }

            match self.probe.status() {
                Ok(TargetStatus::Running) => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Ok(TargetStatus::Halted) => {
                    let semihosting_enabled = self.state.semihosting_enabled;
                    let breakpoints = &self.breakpoints;
                    let outcome = semihosting::try_service(
                        &mut *self.probe,
                        &mut *self.semihosting_host,
                        semihosting_enabled,
                        |addr| breakpoints.contains(addr),
                    );
                    match outcome {
                        Some(Outcome::Continue) => {
                            self.cache.sync_before_resume(&mut *self.probe);
                            if self.probe.run().is_err() {
                                return "S05".into();
                            }
                        }
                        Some(Outcome::TargetExited { .. }) | None => return "S05".into(),
                    }
                }
                Err(_) => return "S05".into(),
            }
        }
    }
}
