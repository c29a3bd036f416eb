//! Static target-description XML and memory-map XML rendering.
//!
//! The target description (served via `qXfer:features:read`) is fixed:
//! an ARM m-profile register file with the FP bank, per spec §4.8's
//! register index map. The memory map (`qXfer:memory-map:read`) is
//! rendered once per session from the chip geometry the [`crate::chip`]
//! collaborator supplies, following the same XML shape the teacher's
//! `GdbSessionExt::gdb_memory_map` produces.

use crate::chip::ChipGeometry;
use std::fmt::Write as _;

/// Target description advertised to GDB: `org.gnu.gdb.arm.m-profile` plus
/// the FP register bank, matching spec §4.8's index map (0-15 GPRs, xpsr/
/// msp/psp/control-family, s0-s31, fpscr).
pub fn target_description_xml() -> &'static str {
    r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target version="1.0">
  <architecture>arm</architecture>
  <feature name="org.gnu.gdb.arm.m-profile">
    <reg name="r0" bitsize="32" type="int"/>
    <reg name="r1" bitsize="32" type="int"/>
    <reg name="r2" bitsize="32" type="int"/>
    <reg name="r3" bitsize="32" type="int"/>
    <reg name="r4" bitsize="32" type="int"/>
    <reg name="r5" bitsize="32" type="int"/>
    <reg name="r6" bitsize="32" type="int"/>
    <reg name="r7" bitsize="32" type="int"/>
    <reg name="r8" bitsize="32" type="int"/>
    <reg name="r9" bitsize="32" type="int"/>
    <reg name="r10" bitsize="32" type="int"/>
    <reg name="r11" bitsize="32" type="int"/>
    <reg name="r12" bitsize="32" type="int"/>
    <reg name="sp" bitsize="32" type="data_ptr"/>
    <reg name="lr" bitsize="32" type="code_ptr"/>
    <reg name="pc" bitsize="32" type="code_ptr"/>
    <reg name="xpsr" bitsize="32" regnum="25" type="int"/>
  </feature>
  <feature name="org.gnu.gdb.arm.m-system">
    <reg name="msp" bitsize="32" regnum="26" type="data_ptr"/>
    <reg name="psp" bitsize="32" regnum="27" type="data_ptr"/>
    <reg name="control" bitsize="8" regnum="28" type="int"/>
    <reg name="faultmask" bitsize="8" regnum="29" type="int"/>
    <reg name="basepri" bitsize="8" regnum="30" type="int"/>
    <reg name="primask" bitsize="8" regnum="31" type="int"/>
  </feature>
  <feature name="org.gnu.gdb.arm.vfp">
    <reg name="s0" bitsize="32" regnum="32" type="float"/>
    <reg name="s1" bitsize="32" type="float"/>
    <reg name="s2" bitsize="32" type="float"/>
    <reg name="s3" bitsize="32" type="float"/>
    <reg name="s4" bitsize="32" type="float"/>
    <reg name="s5" bitsize="32" type="float"/>
    <reg name="s6" bitsize="32" type="float"/>
    <reg name="s7" bitsize="32" type="float"/>
    <reg name="s8" bitsize="32" type="float"/>
    <reg name="s9" bitsize="32" type="float"/>
    <reg name="s10" bitsize="32" type="float"/>
    <reg name="s11" bitsize="32" type="float"/>
    <reg name="s12" bitsize="32" type="float"/>
    <reg name="s13" bitsize="32" type="float"/>
    <reg name="s14" bitsize="32" type="float"/>
    <reg name="s15" bitsize="32" type="float"/>
    <reg name="s16" bitsize="32" type="float"/>
    <reg name="s17" bitsize="32" type="float"/>
    <reg name="s18" bitsize="32" type="float"/>
    <reg name="s19" bitsize="32" type="float"/>
    <reg name="s20" bitsize="32" type="float"/>
    <reg name="s21" bitsize="32" type="float"/>
    <reg name="s22" bitsize="32" type="float"/>
    <reg name="s23" bitsize="32" type="float"/>
    <reg name="s24" bitsize="32" type="float"/>
    <reg name="s25" bitsize="32" type="float"/>
    <reg name="s26" bitsize="32" type="float"/>
    <reg name="s27" bitsize="32" type="float"/>
    <reg name="s28" bitsize="32" type="float"/>
    <reg name="s29" bitsize="32" type="float"/>
    <reg name="s30" bitsize="32" type="float"/>
    <reg name="s31" bitsize="32" type="float"/>
    <reg name="fpscr" bitsize="32" type="int" group="float"/>
  </feature>
</target>"#
}

/// Renders the memory-map XML for one chip's geometry (spec §3 "memory_map_xml").
pub fn memory_map_xml(geom: &ChipGeometry) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\"?>\n\
         <!DOCTYPE memory-map PUBLIC \"+//IDN gnu.org//DTD GDB Memory Map V1.0//EN\" \"http://sourceware.org/gdb/gdb-memory-map.dtd\">\n\
         <memory-map>\n",
    );

    let _ = write!(
        xml,
        "  <memory type=\"flash\" start=\"{:#010x}\" length=\"{:#x}\">\n    <property name=\"blocksize\">{:#x}</property>\n  </memory>\n",
        geom.flash_base, geom.flash_size, geom.flash_page_size
    );
    let _ = write!(
        xml,
        "  <memory type=\"ram\" start=\"{:#010x}\" length=\"{:#x}\"/>\n",
        geom.sram_base, geom.sram_size
    );
    let _ = write!(
        xml,
        "  <memory type=\"ram\" start=\"{:#010x}\" length=\"{:#x}\"/>\n",
        geom.sys_base, geom.sys_size
    );

    xml.push_str("</memory-map>");
    xml
}

/// Slices `data` for a `qXfer` read: `m<chunk>` for a middle read, `l<chunk>`
/// for the final (or empty) chunk — the convention spec §4.8 describes.
pub fn slice_for_xfer(data: &[u8], offset: u32, length: u32) -> String {
    let offset = offset as usize;
    let length = length as usize;
    if offset >= data.len() {
        return "l".to_string();
    }
    let end = (offset + length).min(data.len());
    let chunk = String::from_utf8_lossy(&data[offset..end]);
    if end == data.len() {
        format!("l{chunk}")
    } else {
        format!("m{chunk}")
    }
}
