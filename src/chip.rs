//! Chip identification database — an **external collaborator** per spec
//! §6: maps a probe-reported `chip_id` to the memory-map geometry
//! (`flash_size`, `sram_size`, `flash_pgsz`, `sys_base`, `sys_size`) the
//! rest of the core substitutes into its memory-map XML template. A real
//! deployment supplies its own table (typically generated from vendor
//! datasheets, the way probe-rs's own `probe-rs-target` crate does); this
//! crate ships only a small built-in one, enough to exercise the rest of
//! the stack and for tests.

/// Geometry substituted into the memory-map template (spec §6: "at most
/// six integer substitutions per template").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipGeometry {
    pub flash_base: u32,
    pub flash_size: u32,
    pub flash_page_size: u32,
    pub sram_base: u32,
    pub sram_size: u32,
    pub sys_base: u32,
    pub sys_size: u32,
    pub erased_pattern: u8,
    pub is_cm7: bool,
}

/// `chip_id → geometry` lookup. Implementations may back this with a
/// static table, an embedded TOML/YAML asset, or a network call; the core
/// only depends on this trait.
pub trait ChipDatabase {
    fn lookup(&self, chip_id: u32) -> Option<ChipGeometry>;
}

/// Small built-in table covering a handful of common STM32 Cortex-M
/// families, enough for tests and for a deployment that hasn't wired up
/// its own [`ChipDatabase`] yet.
#[derive(Default)]
pub struct BuiltinChipDatabase;

impl ChipDatabase for BuiltinChipDatabase {
    fn lookup(&self, chip_id: u32) -> Option<ChipGeometry> {
        // JEP-106-derived `DBGMCU_IDCODE[11:0]` device ids, as ST documents them.
        match chip_id & 0xFFF {
            0x411 | 0x413 => Some(ChipGeometry {
                // STM32F405/415/407/417 (Cortex-M4, single-bank 16K/64K/128K pages)
                flash_base: 0x0800_0000,
                flash_size: 1024 * 1024,
                flash_page_size: 0x4000,
                sram_base: 0x2000_0000,
                sram_size: 192 * 1024,
                sys_base: 0x1FFF_0000,
                sys_size: 0x7800,
                erased_pattern: 0xFF,
                is_cm7: false,
            }),
            0x449 => Some(ChipGeometry {
                // STM32F746/756 (Cortex-M7)
                flash_base: 0x0800_0000,
                flash_size: 1024 * 1024,
                flash_page_size: 0x4000,
                sram_base: 0x2002_0000,
                sram_size: 320 * 1024,
                sys_base: 0x1FF0_0000,
                sys_size: 0xEDC0,
                erased_pattern: 0xFF,
                is_cm7: true,
            }),
            0x440 => Some(ChipGeometry {
                // STM32F030/F051 (Cortex-M0)
                flash_base: 0x0800_0000,
                flash_size: 64 * 1024,
                flash_page_size: 0x400,
                sram_base: 0x2000_0000,
                sram_size: 8 * 1024,
                sys_base: 0x1FFF_EC00,
                sys_size: 0x1000,
                erased_pattern: 0xFF,
                is_cm7: false,
            }),
            _ => None,
        }
    }
}
