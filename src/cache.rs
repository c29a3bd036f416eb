//! C5 — Cache Coherence Tracker.
//!
//! CM7 parts (and only CM7 parts) sit behind a Harvard I/D cache that the
//! debug unit's memory accesses do not automatically snoop. Spec §4.5:
//! detect cache presence from `CTR`, precompute set/way geometry from
//! `CLIDR`/`CCSIDR`, and — before any resume — clean D-cache by set/way
//! and invalidate I-cache if a host write happened since the last resume.

use crate::probe::ProbeFacade;

const CTR: u32 = 0xE000_ED7C;
const CLIDR: u32 = 0xE000_ED78;
const CCSIDR: u32 = 0xE000_ED80;
const CSSELR: u32 = 0xE000_ED84;
const CCR: u32 = 0xE000_ED14;
const CCR_DC: u32 = 1 << 16;
const CCR_IC: u32 = 1 << 17;
const DCCSW: u32 = 0xE000_EF6C;
const ICIALLU: u32 = 0xE000_EF50;

#[derive(Debug, Clone, Copy, Default)]
struct LevelGeometry {
    nsets: u32,
    nways: u32,
    log2_nways: u32,
    width: u32,
    line_size: u32,
}

/// Per-session cache descriptor (spec §3's "Cache descriptor").
pub struct CacheTracker {
    present: bool,
    louu: u32,
    levels: Vec<LevelGeometry>,
    /// True once a host-initiated memory write has happened since the
    /// last `sync_before_resume` call.
    cache_modified: bool,
}

impl CacheTracker {
    /// Reads `CTR`/`CLIDR`/`CCSIDR` once at connect time to decide whether
    /// this part has a maintainable cache, and if so, precompute its
    /// set/way geometry up to `louu` (levels of unification, uniprocessor).
    pub fn detect(probe: &mut dyn ProbeFacade) -> Self {
        let ctr = probe.read_debug32(CTR).unwrap_or(0);
        let present = (ctr >> 29) & 0x7 == 0b100;

        if !present {
            return Self {
                present: false,
                louu: 0,
                levels: Vec::new(),
                cache_modified: false,
            };
        }

        let clidr = probe.read_debug32(CLIDR).unwrap_or(0);
        let louu = (clidr >> 27) & 0x7;

        let mut levels = Vec::with_capacity(louu as usize);
        for level in 0..louu {
            let _ = probe.write_debug32(CSSELR, level << 1); // data/unified cache at this level
            let ccsidr = probe.read_debug32(CCSIDR).unwrap_or(0);
            let line_size_field = ccsidr & 0x7;
            let line_size = 1u32 << (line_size_field + 4);
            let nways = ((ccsidr >> 3) & 0x3FF) + 1;
            let nsets = ((ccsidr >> 13) & 0x7FFF) + 1;
            let log2_nways = (32 - (nways - 1).leading_zeros()).max(1);
            let width = 4 + (line_size_field + 4) + log2(nsets);
            levels.push(LevelGeometry {
                nsets,
                nways,
                log2_nways,
                width,
                line_size,
            });
        }

        Self {
            present,
            louu,
            levels,
            cache_modified: false,
        }
    }

    /// Records that host-initiated memory was written. Per spec §4.5 /
    /// §8, every `M`/memory-write command must flip this, and it must
    /// stay true until the next resume.
    pub fn mark_modified(&mut self) {
        if self.present {
            self.cache_modified = true;
        }
    }

    pub fn is_modified(&self) -> bool {
        self.cache_modified
    }

    /// Must run before any transition back to target execution (continue,
    /// step, semihosting resume) — spec §5's single most important
    /// ordering invariant. No-op on non-CM7 parts or if nothing was
    /// written since the last sync.
    pub fn sync_before_resume(&mut self, probe: &mut dyn ProbeFacade) {
        if !self.present || !self.cache_modified {
            return;
        }

        let ccr = probe.read_debug32(CCR).unwrap_or(0);

        if ccr & CCR_DC != 0 {
            for level in (0..self.louu as usize).rev() {
                let geom = self.levels[level];
                let mut addr = (level as u32) << 1;
                let limit = 1u32 << geom.width;
                while addr < limit {
                    for way in 0..geom.nways {
                        let value = addr | (way << (32 - geom.log2_nways));
                        let _ = probe.write_debug32(DCCSW, value);
                    }
                    addr += geom.line_size.max(1);
                }
            }
        }

        if ccr & CCR_IC != 0 {
            let _ = probe.write_debug32(ICIALLU, 0);
        }

        self.cache_modified = false;
    }
}

fn log2(mut v: u32) -> u32 {
    let mut n = 0;
    v = v.max(1);
    while v > 1 {
        v >>= 1;
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MockProbe;

    fn cm7_probe() -> MockProbe {
        let mut probe = MockProbe::default();
        probe.debug_regs.insert(CTR, 0b100 << 29);
        probe.debug_regs.insert(CLIDR, 1 << 27); // louu = 1
        probe.debug_regs.insert(CCSIDR, ((64 - 1) << 13) | ((4 - 1) << 3) | 1); // nsets=64, nways=4, line=32
        probe.debug_regs.insert(CCR, CCR_DC | CCR_IC);
        probe
    }

    #[test]
    fn non_cm7_part_is_inert() {
        let mut probe = MockProbe::default();
        let mut tracker = CacheTracker::detect(&mut probe);
        tracker.mark_modified();
        assert!(!tracker.is_modified());
        tracker.sync_before_resume(&mut probe);
        assert!(!probe.debug_regs.contains_key(&DCCSW));
    }

    #[test]
    fn cm7_sync_cleans_dcache_and_invalidates_icache() {
        let mut probe = cm7_probe();
        let mut tracker = CacheTracker::detect(&mut probe);
        tracker.mark_modified();
        assert!(tracker.is_modified());

        tracker.sync_before_resume(&mut probe);
        assert!(probe.debug_regs.contains_key(&DCCSW));
        assert!(probe.debug_regs.contains_key(&ICIALLU));
        assert!(!tracker.is_modified());
    }

    #[test]
    fn sync_is_noop_when_nothing_was_written() {
        let mut probe = cm7_probe();
        let mut tracker = CacheTracker::detect(&mut probe);
        tracker.sync_before_resume(&mut probe);
        assert!(!probe.debug_regs.contains_key(&DCCSW));
    }
}
