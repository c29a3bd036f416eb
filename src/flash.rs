//! C6 — Flash Staging Engine.
//!
//! Implements GDB's `vFlashErase`/`vFlashWrite`/`vFlashDone` trio (spec
//! §4.6): buffers non-contiguous blocks the debugger stages across many
//! packets, then commits them as one erase-then-program transaction
//! against the target's actual page geometry. Spec §9 notes a linked
//! list is unnecessary busywork; an ordered `Vec` of owned buffers is
//! the idiomatic equivalent.

use crate::probe::{ProbeFacade, ResetMode};

/// One staged erase/write region. `data` is pre-filled with the device's
/// erased pattern at insertion and overwritten in place by subsequent
/// `vFlashWrite`s that intersect it.
struct Block {
    addr: u32,
    data: Vec<u8>,
}

impl Block {
    fn len(&self) -> u32 {
        self.data.len() as u32
    }

    fn end(&self) -> u32 {
        self.addr + self.len()
    }
}

/// Geometry the engine needs from the target, kept separate from
/// [`ProbeFacade`] so it can be supplied directly in unit tests.
pub trait FlashGeometry {
    fn flash_base(&self) -> u32;
    fn flash_size(&self) -> u32;
    fn page_size(&self, addr: u32) -> u32;
    fn erased_pattern(&self) -> u8;
}

/// Owns the staged block list for the lifetime of one erase/write/done
/// transaction. Always empty outside of one.
#[derive(Default)]
pub struct FlashStagingEngine {
    blocks: Vec<Block>,
}

/// Reported failures, distinguished only so handlers can pick `E00`/`E08`.
#[derive(Debug)]
pub enum FlashError {
    OutOfBounds,
    Misaligned,
    NoMatchingBlock,
    Probe(String),
}

impl FlashStagingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `vFlashErase:addr,length` — stages a new block pre-filled with the
    /// erased pattern. A zero-length erase is a no-op (spec §8 boundary).
    pub fn erase(
        &mut self,
        geom: &dyn FlashGeometry,
        addr: u32,
        length: u32,
    ) -> Result<(), FlashError> {
        if length == 0 {
            return Ok(());
        }

        let page_size = geom.page_size(addr);
        if addr < geom.flash_base() || addr + length > geom.flash_base() + geom.flash_size() {
            return Err(FlashError::OutOfBounds);
        }
        if page_size == 0 || addr % page_size != 0 || length % page_size != 0 {
            return Err(FlashError::Misaligned);
        }

        self.blocks.push(Block {
            addr,
            data: vec![geom.erased_pattern(); length as usize],
        });
        Ok(())
    }

    /// `vFlashWrite:addr:XX..` (`data` already un-escaped by the caller,
    /// per spec §4.6). Copies the overlapping slice into every staged
    /// block that intersects `[addr, addr+len)`; at least one must
    /// intersect, or this fails. A write that only partially overlaps a
    /// block is a known GDB quirk — logged, not fatal.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let end = addr + data.len() as u32;
        let mut touched = false;

        for block in &mut self.blocks {
            let lo = addr.max(block.addr);
            let hi = end.min(block.end());
            if lo >= hi {
                continue;
            }
            touched = true;
            if lo > addr || hi < end {
                log::warn!(
                    "vFlashWrite at {:#010x},{:#x} only partially overlaps staged block at {:#010x},{:#x}",
                    addr,
                    data.len(),
                    block.addr,
                    block.len()
                );
            }
            let src_start = (lo - addr) as usize;
            let src_end = (hi - addr) as usize;
            let dst_start = (lo - block.addr) as usize;
            block.data[dst_start..dst_start + (src_end - src_start)]
                .copy_from_slice(&data[src_start..src_end]);
        }

        if touched {
            Ok(())
        } else {
            Err(FlashError::NoMatchingBlock)
        }
    }

    /// `vFlashDone` — connects, force-halts, then for every staged block:
    /// erases each page it spans (recomputing page size per address, for
    /// devices with variable page sizes), writes it through the flash
    /// loader, and issues a soft reset+halt. Blocks are always freed
    /// afterward, success or failure, per spec §4.6.
    pub fn commit(&mut self, probe: &mut dyn ProbeFacade) -> Result<(), FlashError> {
        let result = self.commit_inner(probe);
        self.blocks.clear();
        result
    }

    fn commit_inner(&mut self, probe: &mut dyn ProbeFacade) -> Result<(), FlashError> {
        probe
            .connect(crate::probe::ConnectMode::Normal)
            .map_err(FlashError::Probe)?;
        probe.halt().map_err(FlashError::Probe)?;

        for block in &self.blocks {
            let mut page_addr = block.addr - (block.addr % probe.flash_pgsz(block.addr).max(1));
            while page_addr < block.end() {
                probe.erase_page(page_addr).map_err(FlashError::Probe)?;
                page_addr += probe.flash_pgsz(page_addr).max(1);
            }

            probe.flashloader_start().map_err(FlashError::Probe)?;
            let mut offset = 0u32;
            while offset < block.len() {
                let page_size = probe.flash_pgsz(block.addr + offset).max(1);
                let chunk_len = page_size.min(block.len() - offset);
                let chunk = &block.data[offset as usize..(offset + chunk_len) as usize];
                probe
                    .flashloader_write(block.addr + offset, chunk)
                    .map_err(FlashError::Probe)?;
                offset += chunk_len;
            }
            probe.flashloader_stop().map_err(FlashError::Probe)?;
        }

        probe
            .reset(ResetMode::SoftHalt)
            .map_err(FlashError::Probe)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MockProbe;

    struct TestGeom {
        base: u32,
        size: u32,
        page: u32,
        pattern: u8,
    }

    impl FlashGeometry for TestGeom {
        fn flash_base(&self) -> u32 {
            self.base
        }
        fn flash_size(&self) -> u32 {
            self.size
        }
        fn page_size(&self, _addr: u32) -> u32 {
            self.page
        }
        fn erased_pattern(&self) -> u8 {
            self.pattern
        }
    }

    fn geom() -> TestGeom {
        TestGeom {
            base: 0x0800_0000,
            size: 128 * 1024,
            page: 0x800,
            pattern: 0xFF,
        }
    }

    #[test]
    fn zero_length_erase_is_a_noop() {
        let mut engine = FlashStagingEngine::new();
        engine.erase(&geom(), 0x0800_0000, 0).unwrap();
        assert!(engine.blocks.is_empty());
    }

    #[test]
    fn misaligned_erase_is_rejected() {
        let mut engine = FlashStagingEngine::new();
        assert!(engine.erase(&geom(), 0x0800_0010, 0x800).is_err());
    }

    #[test]
    fn write_without_prior_erase_fails() {
        let mut engine = FlashStagingEngine::new();
        assert!(engine.write(0x0800_0000, &[0xAA; 0x800]).is_err());
    }

    #[test]
    fn full_program_cycle_round_trips() {
        let mut engine = FlashStagingEngine::new();
        let geom = geom();
        engine.erase(&geom, 0x0800_0000, 0x800).unwrap();
        engine.write(0x0800_0000, &[0xAA; 0x800]).unwrap();

        let mut probe = MockProbe::default();
        engine.commit(&mut probe).unwrap();

        assert_eq!(probe.mem_slice(0x0800_0000, 0x800), vec![0xAA; 0x800]);
        assert_eq!(probe.reset_count, 1);
    }

    #[test]
    fn blocks_are_cleared_after_done_even_on_failure() {
        let mut engine = FlashStagingEngine::new();
        let geom = geom();
        engine.erase(&geom, 0x0800_0000, 0x800).unwrap();
        assert!(!engine.blocks.is_empty());

        let mut probe = MockProbe::default();
        let _ = engine.commit(&mut probe);
        assert!(engine.blocks.is_empty());
    }
}
