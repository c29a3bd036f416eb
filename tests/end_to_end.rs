//! Black-box integration tests driving a full [`Session`] against the same
//! in-memory [`GdbConnection::tester`] harness the codec's own unit tests
//! use, instead of a real socket. Each test is one of the end-to-end
//! scenarios the core is meant to carry out start to finish: handshake,
//! register access, breakpoints, flash programming, semihosting, and
//! interrupting a running target.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use cortex_gdb_server::chip::{ChipDatabase, ChipGeometry};
use cortex_gdb_server::probe::{
    ConnectMode, ProbeFacade, ProbeResult, RegisterSnapshot, ResetMode, TargetStatus,
};
use cortex_gdb_server::probe::MockProbe;
use cortex_gdb_server::rsp::{escape, Checksum, GdbConnection};
use cortex_gdb_server::semihosting::{SemihostingHost, SEMIHOSTING_BKPT};
use cortex_gdb_server::session::Session;

struct TestChipDatabase;

impl ChipDatabase for TestChipDatabase {
    fn lookup(&self, _chip_id: u32) -> Option<ChipGeometry> {
        Some(ChipGeometry {
            flash_base: 0x0800_0000,
            flash_size: 128 * 1024,
            flash_page_size: 0x800,
            sram_base: 0x2000_0000,
            sram_size: 20 * 1024,
            sys_base: 0x1FFF_0000,
            sys_size: 0x7000,
            erased_pattern: 0xFF,
            is_cm7: false,
        })
    }
}

/// Shares one [`MockProbe`] between the test and the [`Session`] it's
/// wrapped in, so assertions can inspect target state (memory, registers,
/// debug registers) after the session has processed a packet exchange.
/// Optionally pins `status()` to [`TargetStatus::Halted`] regardless of
/// what `run()` did, for the continue/semihosting scenario where the
/// mock target "traps" back to halted the instant it's resumed.
#[derive(Clone)]
struct SharedProbe {
    inner: Rc<RefCell<MockProbe>>,
    pin_halted: bool,
}

impl SharedProbe {
    fn new(probe: MockProbe) -> Self {
        Self {
            inner: Rc::new(RefCell::new(probe)),
            pin_halted: false,
        }
    }

    fn trapping(probe: MockProbe) -> Self {
        Self {
            inner: Rc::new(RefCell::new(probe)),
            pin_halted: true,
        }
    }
}

impl ProbeFacade for SharedProbe {
    fn read_debug32(&mut self, addr: u32) -> ProbeResult<u32> {
        self.inner.borrow_mut().read_debug32(addr)
    }
    fn write_debug32(&mut self, addr: u32, value: u32) -> ProbeResult<()> {
        self.inner.borrow_mut().write_debug32(addr, value)
    }
    fn read_mem32(&mut self, addr: u32, len: u32) -> ProbeResult<Vec<u8>> {
        self.inner.borrow_mut().read_mem32(addr, len)
    }
    fn write_mem32(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()> {
        self.inner.borrow_mut().write_mem32(addr, buf)
    }
    fn write_mem8(&mut self, addr: u32, buf: &[u8]) -> ProbeResult<()> {
        self.inner.borrow_mut().write_mem8(addr, buf)
    }
    fn read_all_regs(&mut self) -> ProbeResult<RegisterSnapshot> {
        self.inner.borrow_mut().read_all_regs()
    }
    fn write_all_regs(&mut self, regs: &RegisterSnapshot) -> ProbeResult<()> {
        self.inner.borrow_mut().write_all_regs(regs)
    }
    fn read_reg(&mut self, id: u32) -> ProbeResult<u32> {
        self.inner.borrow_mut().read_reg(id)
    }
    fn write_reg(&mut self, id: u32, value: u32) -> ProbeResult<()> {
        self.inner.borrow_mut().write_reg(id, value)
    }
    fn read_unsupported_reg(&mut self, id: u32) -> ProbeResult<u32> {
        self.inner.borrow_mut().read_unsupported_reg(id)
    }
    fn write_unsupported_reg(&mut self, id: u32, value: u32) -> ProbeResult<()> {
        self.inner.borrow_mut().write_unsupported_reg(id, value)
    }
    fn halt(&mut self) -> ProbeResult<()> {
        self.inner.borrow_mut().halt()
    }
    fn step(&mut self) -> ProbeResult<()> {
        self.inner.borrow_mut().step()
    }
    fn run(&mut self) -> ProbeResult<()> {
        self.inner.borrow_mut().run()
    }
    fn status(&mut self) -> ProbeResult<TargetStatus> {
        if self.pin_halted {
            Ok(TargetStatus::Halted)
        } else {
            self.inner.borrow_mut().status()
        }
    }
    fn reset(&mut self, mode: ResetMode) -> ProbeResult<()> {
        self.inner.borrow_mut().reset(mode)
    }
    fn erase_page(&mut self, addr: u32) -> ProbeResult<()> {
        self.inner.borrow_mut().erase_page(addr)
    }
    fn flashloader_start(&mut self) -> ProbeResult<()> {
        self.inner.borrow_mut().flashloader_start()
    }
    fn flashloader_write(&mut self, addr: u32, data: &[u8]) -> ProbeResult<()> {
        self.inner.borrow_mut().flashloader_write(addr, data)
    }
    fn flashloader_stop(&mut self) -> ProbeResult<()> {
        self.inner.borrow_mut().flashloader_stop()
    }
    fn exit_debug_mode(&mut self) -> ProbeResult<()> {
        self.inner.borrow_mut().exit_debug_mode()
    }
    fn close(&mut self) -> ProbeResult<()> {
        self.inner.borrow_mut().close()
    }
    fn connect(&mut self, mode: ConnectMode) -> ProbeResult<()> {
        self.inner.borrow_mut().connect(mode)
    }
    fn chip_id(&self) -> u32 {
        self.inner.borrow().chip_id()
    }
    fn core_id(&self) -> u32 {
        self.inner.borrow().core_id()
    }
    fn flash_size(&self) -> u32 {
        self.inner.borrow().flash_size()
    }
    fn flash_pgsz(&self, addr: u32) -> u32 {
        self.inner.borrow().flash_pgsz(addr)
    }
    fn sram_size(&self) -> u32 {
        self.inner.borrow().sram_size()
    }
    fn sys_base(&self) -> u32 {
        self.inner.borrow().sys_base()
    }
    fn sys_size(&self) -> u32 {
        self.inner.borrow().sys_size()
    }
    fn erased_pattern(&self) -> u8 {
        self.inner.borrow().erased_pattern()
    }
}

/// Captures what the target wrote to its semihosting console/file streams,
/// shared with the test the same way [`SharedProbe`] shares target state.
#[derive(Clone, Default)]
struct CapturingHost {
    written: Rc<RefCell<Vec<u8>>>,
}

impl SemihostingHost for CapturingHost {
    fn open(&mut self, _path: &str, _mode: &str) -> Result<u32, i32> {
        Ok(3)
    }
    fn close(&mut self, _handle: u32) -> Result<(), i32> {
        Ok(())
    }
    fn write(&mut self, _handle: u32, data: &[u8]) -> Result<u32, i32> {
        self.written.borrow_mut().extend_from_slice(data);
        Ok(0)
    }
    fn read(&mut self, _handle: u32, _buf: &mut [u8]) -> Result<u32, i32> {
        Ok(0)
    }
    fn is_tty(&mut self, handle: u32) -> bool {
        handle <= 2
    }
    fn seek(&mut self, _handle: u32, _pos: u32) -> Result<(), i32> {
        Ok(())
    }
    fn file_len(&mut self, _handle: u32) -> Result<u32, i32> {
        Ok(0)
    }
    fn remove(&mut self, _path: &str) -> Result<(), i32> {
        Ok(())
    }
    fn rename(&mut self, _from: &str, _to: &str) -> Result<(), i32> {
        Ok(())
    }
    fn write_console(&mut self, _s: &str) {}
    fn read_console_char(&mut self) -> u8 {
        0
    }
    fn errno(&self) -> i32 {
        0
    }
    fn clock_centiseconds(&self) -> u32 {
        0
    }
    fn unix_time(&self) -> u32 {
        0
    }
}

/// Frames one client-to-server packet: `$<escaped payload>#<checksum>`.
fn frame(payload: &[u8]) -> Vec<u8> {
    let escaped = escape(payload);
    let checksum = Checksum::of(&escaped);
    let mut out = Vec::with_capacity(escaped.len() + 4);
    out.push(b'$');
    out.extend_from_slice(&escaped);
    out.push(b'#');
    out.extend_from_slice(&checksum.hex());
    out
}

/// Runs `session` against a scripted exchange: `packets` are framed and
/// each followed by a `+` ack for the server's reply, then the whole
/// thing is fed through one [`Session::run_session`] call. Returns every
/// byte the session wrote back (acks interleaved with `$...#cc` replies).
fn drive(session: &mut Session, packets: &[&[u8]]) -> Vec<u8> {
    let mut input = Vec::new();
    for packet in packets {
        input.extend_from_slice(&frame(packet));
        input.push(b'+');
    }
    let mut input_slice: &[u8] = &input;
    let mut conn = GdbConnection::tester(&mut input_slice);
    session.run_session(&mut conn).unwrap();
    conn.response()
}

/// Pulls out the Nth (0-indexed) `$...#cc` reply body from a response
/// stream that also contains interleaved `+`/`-` acks.
fn nth_reply(response: &[u8], n: usize) -> String {
    let mut replies = Vec::new();
    let mut i = 0;
    while i < response.len() {
        if response[i] == b'$' {
            let start = i + 1;
            let end = response[start..]
                .iter()
                .position(|&b| b == b'#')
                .map(|p| start + p)
                .unwrap();
            replies.push(String::from_utf8_lossy(&response[start..end]).into_owned());
            i = end + 3; // '#' + two checksum digits
        } else {
            i += 1;
        }
    }
    replies[n].clone()
}

#[test]
fn session_handshake_reports_supported_features() {
    let probe = SharedProbe::new(MockProbe::default());
    let mut session =
        Session::connect(Box::new(probe), &TestChipDatabase, ConnectMode::Normal, false, false)
            .unwrap();

    let response = drive(&mut session, &[b"qSupported"]);

    assert_eq!(
        nth_reply(&response, 0),
        "PacketSize=3fff;qXfer:memory-map:read+;qXfer:features:read+"
    );
}

#[test]
fn register_read_is_byteswapped_on_the_wire() {
    let mut mock = MockProbe::default();
    mock.regs.gpr[0] = 0x1234_5678;
    let probe = SharedProbe::new(mock);
    let mut session =
        Session::connect(Box::new(probe), &TestChipDatabase, ConnectMode::Normal, false, false)
            .unwrap();

    let response = drive(&mut session, &[b"p0"]);

    assert_eq!(nth_reply(&response, 0), "78563412");
}

#[test]
fn hardware_breakpoint_set_and_remove_round_trips() {
    let probe = SharedProbe::new(MockProbe::default());
    let inner = probe.inner.clone();
    let mut session =
        Session::connect(Box::new(probe), &TestChipDatabase, ConnectMode::Normal, false, false)
            .unwrap();

    let response = drive(&mut session, &[b"Z1,8000100,2", b"z1,8000100,2"]);

    assert_eq!(nth_reply(&response, 0), "OK");
    assert_eq!(nth_reply(&response, 1), "OK");
    // Comparator goes back to zero once the last matching breakpoint clears.
    assert_eq!(
        inner.borrow().debug_regs.get(&0xE000_2008).copied().unwrap_or(0),
        0
    );
}

#[test]
fn hardware_breakpoint_insert_programs_fp_comp0() {
    let probe = SharedProbe::new(MockProbe::default());
    let inner = probe.inner.clone();
    let mut session =
        Session::connect(Box::new(probe), &TestChipDatabase, ConnectMode::Normal, false, false)
            .unwrap();

    let response = drive(&mut session, &[b"Z1,8000100,2"]);
    assert_eq!(nth_reply(&response, 0), "OK");

    let value = inner.borrow().debug_regs.get(&0xE000_2008).copied().unwrap();
    assert_eq!(value & 0x1FFF_FFFC, 0x0800_0100);
    assert_eq!(value & 1, 1);
}

#[test]
fn flash_program_one_page_round_trips_through_the_staging_engine() {
    let probe = SharedProbe::new(MockProbe::default());
    let inner = probe.inner.clone();
    let mut session =
        Session::connect(Box::new(probe), &TestChipDatabase, ConnectMode::Normal, false, false)
            .unwrap();

    let mut write_packet = b"vFlashWrite:08000000:".to_vec();
    write_packet.extend(std::iter::repeat(0xAAu8).take(0x800));

    let response = drive(
        &mut session,
        &[b"vFlashErase:08000000,800", &write_packet, b"vFlashDone"],
    );

    assert_eq!(nth_reply(&response, 0), "OK");
    assert_eq!(nth_reply(&response, 1), "OK");
    assert_eq!(nth_reply(&response, 2), "OK");
    assert_eq!(inner.borrow().mem_slice(0x0800_0000, 0x800), vec![0xAA; 0x800]);
}

#[test]
fn semihosting_write_clears_r0_and_advances_pc() {
    const SEMIHOSTING_BKPT: [u8; 2] = [0xAB, 0xBE]; // 0xBEAB, little-endian
    let mut mock = MockProbe::default();
    mock.regs.gpr[15] = 0x0800_0200;
    mock.write_mem8(0x0800_0200, &SEMIHOSTING_BKPT).unwrap();
    mock.regs.gpr[0] = 0x05; // SYS_WRITE
    mock.regs.gpr[1] = 0x2000_0000; // param block
    mock.write_mem8(0x2000_0000, &1u32.to_le_bytes()).unwrap(); // handle=stdout
    mock.write_mem8(0x2000_0004, &0x2000_0100u32.to_le_bytes()).unwrap(); // buf ptr
    mock.write_mem8(0x2000_0008, &5u32.to_le_bytes()).unwrap(); // len
    mock.write_mem8(0x2000_0100, b"hello").unwrap();

    let probe = SharedProbe::trapping(mock);
    let inner = probe.inner.clone();
    let host = CapturingHost::default();
    let written = host.written.clone();

    let mut session = Session::connect(
        Box::new(probe),
        &TestChipDatabase,
        ConnectMode::Normal,
        false,
        true,
    )
    .unwrap()
    .with_semihosting_host(Box::new(host));

    let response = drive(&mut session, &[b"c"]);

    assert_eq!(nth_reply(&response, 0), "S05");
    assert_eq!(*written.borrow(), b"hello");
    assert_eq!(inner.borrow().regs.gpr[0], 0);
    assert_eq!(inner.borrow().regs.gpr[15], 0x0800_0202);
}

#[test]
fn ctrl_c_during_continue_forces_a_halt() {
    let probe = SharedProbe::new(MockProbe::default());
    let inner = probe.inner.clone();
    let mut session =
        Session::connect(Box::new(probe), &TestChipDatabase, ConnectMode::Normal, false, false)
            .unwrap();

    let mut input = frame(b"c");
    input.push(0x03); // GDB's Ctrl-C break byte, sent mid-continue
    input.push(b'+'); // ack for the eventual S05 reply

    let mut input_slice: &[u8] = &input;
    let mut conn = GdbConnection::tester(&mut input_slice);
    session.run_session(&mut conn).unwrap();
    let response = conn.response();

    assert_eq!(nth_reply(&response, 0), "S05");
    assert_eq!(inner.borrow().status, TargetStatus::Halted);
}
