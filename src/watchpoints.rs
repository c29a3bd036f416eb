//! C4 — Watchpoint Manager.
//!
//! Allocates DWT (Data Watchpoint and Trace) comparator slots for data
//! breakpoints, per spec §4.4. ARMv7-M implementations expose exactly
//! four DWT comparators; each can watch a power-of-two-aligned address
//! range on read, write, or either.

use crate::probe::ProbeFacade;

const DEMCR: u32 = 0xE000_EDFC;
const DEMCR_TRCENA: u32 = 1 << 24;

const DWT_COMP0: u32 = 0xE000_1020;
const DWT_MASK0: u32 = 0xE000_1024;
const DWT_FUNCTION0: u32 = 0xE000_1028;
const DWT_SLOT_STRIDE: u32 = 0x10;

const NUM_SLOTS: usize = 4;

/// Watchpoint kind, matching the DWT_FUNCTION encoding spec §4.4 assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Disabled,
    Read,
    Write,
    Access,
}

impl WatchKind {
    fn function_code(self) -> u32 {
        match self {
            WatchKind::Disabled => 0,
            WatchKind::Read => 5,
            WatchKind::Write => 6,
            WatchKind::Access => 7,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    addr: u32,
    mask: u8,
    fun: WatchKind,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            addr: 0,
            mask: 0,
            fun: WatchKind::Disabled,
        }
    }
}

/// Owns the DWT comparator table for the lifetime of one session.
pub struct WatchpointManager {
    slots: [Slot; NUM_SLOTS],
}

impl WatchpointManager {
    /// Sets `DEMCR.TRCENA`, clears every DWT function register, marks all
    /// slots disabled. Must be re-run after any target reset.
    pub fn init(probe: &mut dyn ProbeFacade) -> Self {
        let demcr = probe.read_debug32(DEMCR).unwrap_or(0);
        let _ = probe.write_debug32(DEMCR, demcr | DEMCR_TRCENA);

        for slot in 0..NUM_SLOTS {
            let _ = probe.write_debug32(DWT_FUNCTION0 + slot as u32 * DWT_SLOT_STRIDE, 0);
        }

        Self {
            slots: [Slot::default(); NUM_SLOTS],
        }
    }

    /// Adds a watchpoint of kind `fun` covering `[addr, addr+len)`. `len`
    /// is rounded up to a mask (`mask = ceil(log2(len))`); rejects
    /// `len` that would need a mask ≥ 16 (i.e. `len > 65536`).
    pub fn add(
        &mut self,
        probe: &mut dyn ProbeFacade,
        fun: WatchKind,
        addr: u32,
        len: u32,
    ) -> Result<(), ()> {
        let mask = mask_for_len(len);
        if mask >= 16 {
            return Err(());
        }

        let idx = self
            .slots
            .iter()
            .position(|s| s.fun == WatchKind::Disabled)
            .ok_or(())?;

        self.slots[idx] = Slot {
            addr,
            mask: mask as u8,
            fun,
        };

        let base = idx as u32 * DWT_SLOT_STRIDE;
        probe.write_debug32(DWT_COMP0 + base, addr).map_err(|_| ())?;
        probe
            .write_debug32(DWT_MASK0 + base, mask)
            .map_err(|_| ())?;
        probe
            .write_debug32(DWT_FUNCTION0 + base, fun.function_code())
            .map_err(|_| ())?;
        // Read back once to clear the matched-event bit, as spec §4.4 requires.
        let _ = probe.read_debug32(DWT_FUNCTION0 + base);
        Ok(())
    }

    /// Removes the enabled watchpoint whose address equals `addr`.
    pub fn remove(&mut self, probe: &mut dyn ProbeFacade, addr: u32) -> Result<(), ()> {
        let idx = self
            .slots
            .iter()
            .position(|s| s.fun != WatchKind::Disabled && s.addr == addr)
            .ok_or(())?;

        self.slots[idx] = Slot::default();
        let base = idx as u32 * DWT_SLOT_STRIDE;
        probe
            .write_debug32(DWT_FUNCTION0 + base, 0)
            .map_err(|_| ())
    }
}

fn mask_for_len(len: u32) -> u32 {
    let mut mask = 0u32;
    while (1u32.checked_shl(mask).unwrap_or(u32::MAX)) < len {
        mask += 1;
    }
    mask
}
