//! Packet handlers — pure(ish) functions mapping one parsed [`Packet`] (plus
//! whatever piece of session state it needs) to an RSP reply body.
//!
//! Split out of [`crate::session`] in the same shape as the teacher's own
//! `handlers.rs`: small free functions returning `Option<String>`, where
//! `None` means "send no reply at all" (only `k`/kill uses that) and
//! `Some(body)` is the unescaped/unframed reply text — [`crate::rsp`]
//! handles checksum and escaping on the way out.

use crate::breakpoints::BreakpointManager;
use crate::cache::CacheTracker;
use crate::parser::BreakpointType;
use crate::probe::ProbeFacade;
use crate::rsp::{byte_to_hex, hex_to_bytes};
use crate::target_desc::slice_for_xfer;
use crate::watchpoints::{WatchKind, WatchpointManager};
use crate::{arch, flash};

/// `qSupported` reply — spec §8 scenario 1 pins this string exactly.
pub fn q_supported() -> Option<String> {
    Some("PacketSize=3fff;qXfer:memory-map:read+;qXfer:features:read+".into())
}

pub fn reply_ok() -> Option<String> {
    Some("OK".into())
}

pub fn reply_empty() -> Option<String> {
    Some(String::new())
}

pub fn reply_error(code: u8) -> Option<String> {
    Some(format!("E{:02x}", code))
}

/// `?` — halt reason. Spec §4.8: `S05` if attached, else `OK`.
pub fn halt_reason(attached: bool) -> Option<String> {
    Some(if attached { "S05".into() } else { "OK".into() })
}

/// `g` — read all 16 GPRs.
pub fn read_general_registers(probe: &mut dyn ProbeFacade) -> Option<String> {
    arch::read_all_general_registers(probe).or_else(|| Some(String::new()))
}

/// `G` — write all 16 GPRs.
pub fn write_general_registers(probe: &mut dyn ProbeFacade, values: &[u32]) -> Option<String> {
    match arch::write_all_general_registers(probe, values) {
        Some(()) => reply_ok(),
        None => reply_error(0),
    }
}

/// `p N` — read register N.
pub fn read_register(probe: &mut dyn ProbeFacade, id: u32) -> Option<String> {
    arch::read_register_hex(probe, id).or_else(|| reply_error(0))
}

/// `P N=V` — write register N.
pub fn write_register(probe: &mut dyn ProbeFacade, id: u32, value: u32) -> Option<String> {
    match arch::write_register_value(probe, id, value) {
        Some(()) => reply_ok(),
        None => reply_error(0),
    }
}

/// `m A,L` — read memory. Per spec §4.8/§8: align-expand the read to a
/// 32-bit boundary and trim back to exactly the requested range, capping
/// the *requested* length at both `page_size` and `0x1800` — the smaller
/// of the two always wins (spec §9's open question, resolved conservatively).
pub fn read_memory(probe: &mut dyn ProbeFacade, addr: u32, len: u32, page_size: u32) -> Option<String> {
    let effective_len = len.min(0x1800).min(page_size.max(1));
    if effective_len == 0 {
        return Some(String::new());
    }

    let aligned_start = addr & !0x3;
    let end = addr + effective_len;
    let aligned_end = (end + 3) & !0x3;
    let aligned_len = aligned_end - aligned_start;

    let buf = probe.read_mem32(aligned_start, aligned_len).ok()?;
    let trim_start = (addr - aligned_start) as usize;
    let trimmed = buf.get(trim_start..trim_start + effective_len as usize)?;

    Some(trimmed.iter().flat_map(|&b| byte_to_hex(b)).map(|b| b as char).collect())
}

/// `M A,L:D` — write memory. Per spec §4.8: head-align with 8-bit writes,
/// middle with 32-bit writes, tail with 8-bit writes, then mark the cache
/// tracker dirty so the next resume cleans/invalidates before running.
pub fn write_memory(
    probe: &mut dyn ProbeFacade,
    cache: &mut CacheTracker,
    addr: u32,
    data: &[u8],
) -> Option<String> {
    let len = data.len() as u32;
    if len == 0 {
        return reply_ok();
    }

    let mut offset = 0u32;

    let head_len = ((4 - (addr % 4)) % 4).min(len);
    if head_len > 0 {
        probe.write_mem8(addr, &data[..head_len as usize]).ok()?;
        offset += head_len;
    }

    let remaining = len - offset;
    let middle_len = (remaining / 4) * 4;
    if middle_len > 0 {
        probe
            .write_mem32(addr + offset, &data[offset as usize..(offset + middle_len) as usize])
            .ok()?;
        offset += middle_len;
    }

    let tail_len = len - offset;
    if tail_len > 0 {
        probe.write_mem8(addr + offset, &data[offset as usize..]).ok()?;
    }

    cache.mark_modified();
    reply_ok()
}

/// `Z1,A,K` / `z1,A,K` — hardware breakpoints. Software breakpoints (`Z0`)
/// are not implemented by this core (spec §4.3 only covers the FPB), so
/// they're reported unsupported rather than silently accepted.
pub fn insert_breakpoint(
    mgr: &mut BreakpointManager,
    probe: &mut dyn ProbeFacade,
    kind: BreakpointType,
    addr: u32,
) -> Option<String> {
    match kind {
        BreakpointType::Hardware => match mgr.insert(probe, addr) {
            Ok(()) => reply_ok(),
            Err(()) => reply_error(0),
        },
        _ => reply_error(0),
    }
}

pub fn remove_breakpoint(
    mgr: &mut BreakpointManager,
    probe: &mut dyn ProbeFacade,
    kind: BreakpointType,
    addr: u32,
) -> Option<String> {
    match kind {
        BreakpointType::Hardware => match mgr.remove(probe, addr) {
            Ok(()) => reply_ok(),
            Err(()) => reply_error(0),
        },
        _ => reply_error(0),
    }
}

fn watch_kind(kind: BreakpointType) -> Option<WatchKind> {
    match kind {
        BreakpointType::WriteWatchpoint => Some(WatchKind::Write),
        BreakpointType::ReadWatchpoint => Some(WatchKind::Read),
        BreakpointType::AccessWatchpoint => Some(WatchKind::Access),
        _ => None,
    }
}

/// `Z2/3/4,A,L` — write/read/access watchpoints.
pub fn insert_watchpoint(
    mgr: &mut WatchpointManager,
    probe: &mut dyn ProbeFacade,
    kind: BreakpointType,
    addr: u32,
    len: u32,
) -> Option<String> {
    let fun = watch_kind(kind)?;
    match mgr.add(probe, fun, addr, len) {
        Ok(()) => reply_ok(),
        Err(()) => reply_error(0),
    }
}

/// `z2/3/4,A,L` — remove a previously-inserted watchpoint.
pub fn remove_watchpoint(mgr: &mut WatchpointManager, probe: &mut dyn ProbeFacade, addr: u32) -> Option<String> {
    match mgr.remove(probe, addr) {
        Ok(()) => reply_ok(),
        Err(()) => reply_error(0),
    }
}

/// `qXfer:<obj>:read::offset,length` — serves either the static target
/// description or the per-session memory map, sliced per spec §4.8's
/// `m`/`l` chunk convention.
pub fn qxfer_read(object: &[u8], offset: u32, length: u32, target_desc_xml: &str, memory_map_xml: &str) -> Option<String> {
    let data: &[u8] = match object {
        b"features" => target_desc_xml.as_bytes(),
        b"memory-map" => memory_map_xml.as_bytes(),
        _ => return reply_empty(),
    };
    Some(slice_for_xfer(data, offset, length))
}

/// `vFlashErase:addr,length`.
pub fn flash_erase(engine: &mut flash::FlashStagingEngine, geom: &dyn flash::FlashGeometry, addr: u32, length: u32) -> Option<String> {
    match engine.erase(geom, addr, length) {
        Ok(()) => reply_ok(),
        Err(_) => reply_error(0x08),
    }
}

/// `vFlashWrite:addr:XX..`.
pub fn flash_write(engine: &mut flash::FlashStagingEngine, addr: u32, data: &[u8]) -> Option<String> {
    match engine.write(addr, data) {
        Ok(()) => reply_ok(),
        Err(_) => reply_error(0x08),
    }
}

/// `vFlashDone`.
pub fn flash_done(engine: &mut flash::FlashStagingEngine, probe: &mut dyn ProbeFacade) -> Option<String> {
    match engine.commit(probe) {
        Ok(()) => reply_ok(),
        Err(_) => reply_error(0x08),
    }
}

/// Un-hexes a `qRcmd` payload into the human-readable monitor command text,
/// per spec §9's resolved open question: "hex payload after the first
/// comma", never replicating the length-prefix-of-4 bug.
pub fn decode_rcmd(hex_payload: &[u8]) -> Option<String> {
    let bytes = hex_to_bytes(hex_payload)?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MockProbe;

    #[test]
    fn q_supported_matches_spec_scenario() {
        assert_eq!(
            q_supported().unwrap(),
            "PacketSize=3fff;qXfer:memory-map:read+;qXfer:features:read+"
        );
    }

    #[test]
    fn halt_reason_depends_on_attach_state() {
        assert_eq!(halt_reason(true).unwrap(), "S05");
        assert_eq!(halt_reason(false).unwrap(), "OK");
    }

    #[test]
    fn read_memory_caps_at_0x1800() {
        let mut probe = MockProbe::default();
        let reply = read_memory(&mut probe, 0x2000_0000, 0x4000, 0x10000).unwrap();
        assert_eq!(reply.len(), 0x1800 * 2);
    }

    #[test]
    fn read_memory_with_unaligned_address_returns_exact_length() {
        let mut probe = MockProbe::default();
        probe.write_mem8(0x2000_0001, b"abcd").unwrap();
        let reply = read_memory(&mut probe, 0x2000_0001, 4, 0x1000).unwrap();
        assert_eq!(reply.len(), 8);
        assert_eq!(hex_to_bytes(reply.as_bytes()).unwrap(), b"abcd".to_vec());
    }

    #[test]
    fn write_memory_marks_cache_modified() {
        let mut probe = MockProbe::default();
        let mut cache = CacheTracker::detect(&mut probe);
        write_memory(&mut probe, &mut cache, 0x2000_0003, &[1, 2, 3, 4, 5]).unwrap();
        assert!(probe.mem_slice(0x2000_0003, 5) == vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn software_breakpoints_are_reported_unsupported() {
        let mut probe = MockProbe::default();
        let mut mgr = BreakpointManager::init(&mut probe, false);
        assert_eq!(
            insert_breakpoint(&mut mgr, &mut probe, BreakpointType::Software, 0x0800_0100).unwrap(),
            "E00"
        );
    }

    #[test]
    fn decode_rcmd_unhexes_command_text() {
        assert_eq!(decode_rcmd(b"7265736574").unwrap(), "reset");
    }
}
