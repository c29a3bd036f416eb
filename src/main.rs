//! CLI entry point. Mirrors the teacher's `bin.rs`: discover/open a probe,
//! attach to a target, then hand off to the library's session engine.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process;

use anyhow::{anyhow, Result};
use colored::*;
use structopt::StructOpt;

use probe_rs::config::TargetSelector;
use probe_rs::{DebugProbeInfo, DebugProbeSelector, Probe};

use cortex_gdb_server::chip::BuiltinChipDatabase;
use cortex_gdb_server::probe::{ConnectMode, RealProbe};

const DEFAULT_LISTEN_PORT: u16 = 4242;

/// DBGMCU_IDCODE, the register the built-in chip database's ids are drawn
/// from (ST parts only; a deployment targeting other vendors supplies its
/// own `ChipDatabase` and chip-id read instead).
const DBGMCU_IDCODE: u64 = 0xE004_2000;

#[derive(Debug, StructOpt)]
struct Opt {
    #[structopt(long = "listen-port", default_value = "4242")]
    listen_port: u16,

    #[structopt(
        long = "multi",
        help = "Stay listening for a new client after one disconnects (extended/persistent mode)."
    )]
    multi: bool,

    #[structopt(long = "no-reset", help = "Do not reset the target when attaching.")]
    no_reset: bool,

    #[structopt(long = "hot-plug", help = "Attach without disturbing a target that is already running.")]
    hot_plug: bool,

    #[structopt(
        long = "connect-under-reset",
        help = "Hold the target in reset while attaching."
    )]
    connect_under_reset: bool,

    #[structopt(long = "freq", help = "Probe interface frequency, in kHz.")]
    freq: Option<u32>,

    #[structopt(long = "semihosting", help = "Service ARM semihosting calls from the target.")]
    semihosting: bool,

    #[structopt(
        long = "serial",
        help = "Select a probe by VID:PID[:Serial]. Falls back to $STLINK_DEVICE if unset."
    )]
    serial: Option<DebugProbeSelector>,

    #[structopt(short = "v", long = "verbose")]
    verbose: bool,

    #[structopt(long = "chip", help = "Target chip name passed to probe-rs for attach.")]
    chip: Option<String>,

    #[structopt(long = "list-probes", help = "List available debug probes and exit.")]
    list_probes: bool,

    #[structopt(long = "probe-index", help = "Select probe by index from --list-probes.")]
    probe_index: Option<usize>,
}

fn main() {
    let opt = Opt::from_args();

    if opt.verbose && std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "debug");
    }
    pretty_env_logger::init();

    if let Err(e) = main_try(opt) {
        eprintln!("{}: {}", "error".red().bold(), e);
        process::exit(1);
    }
}

fn selector_from_opt(opt: &Opt) -> Option<DebugProbeSelector> {
    opt.serial.clone().or_else(|| {
        std::env::var("STLINK_DEVICE")
            .ok()
            .and_then(|s| s.parse().ok())
    })
}

fn open_probe(index: Option<usize>, selector: Option<&DebugProbeSelector>, available: &[DebugProbeInfo]) -> Result<Probe> {
    let matching: Vec<&DebugProbeInfo> = match selector {
        Some(sel) => available
            .iter()
            .filter(|p| {
                p.vendor_id == sel.vendor_id
                    && p.product_id == sel.product_id
                    && sel
                        .serial_number
                        .as_ref()
                        .map_or(true, |s| p.serial_number.as_deref() == Some(s.as_str()))
            })
            .collect(),
        None => available.iter().collect(),
    };

    let device = match index {
        Some(index) => *matching
            .get(index)
            .ok_or_else(|| anyhow!("no probe at index {index}; use --list-probes to see what's attached"))?,
        None => match matching.len() {
            1 => matching[0],
            0 => return Err(anyhow!("no matching probe found")),
            _ => return Err(anyhow!("multiple probes matched; disambiguate with --probe-index")),
        },
    };

    Probe::open(device).map_err(|e| anyhow!("{e}"))
}

fn connect_mode(opt: &Opt) -> ConnectMode {
    if opt.connect_under_reset {
        ConnectMode::UnderReset
    } else if opt.hot_plug || opt.no_reset {
        ConnectMode::HotPlug
    } else {
        ConnectMode::Normal
    }
}

fn main_try(opt: Opt) -> Result<()> {
    let available_probes = Probe::list_all();

    if opt.list_probes {
        println!("Available probes:");
        for (idx, probe) in available_probes.iter().enumerate() {
            println!("[{idx}]: {probe:?}");
        }
        return Ok(());
    }

    let selector = selector_from_opt(&opt);
    let mut probe = open_probe(opt.probe_index, selector.as_ref(), &available_probes)?;

    if let Some(freq_khz) = opt.freq {
        probe.set_speed(freq_khz)?;
    }

    let target_selector = match &opt.chip {
        Some(name) => TargetSelector::from(name.as_str()),
        None => TargetSelector::Auto,
    };

    let mode = connect_mode(&opt);
    let mut session = match mode {
        ConnectMode::UnderReset => probe.attach_under_reset(target_selector),
        _ => probe.attach(target_selector),
    }
    .map_err(|e| anyhow!("{e}"))?;

    let core_index = 0;
    let chip_id = {
        use probe_rs::MemoryInterface;
        let mut core = session.core(core_index).map_err(|e| anyhow!("{e}"))?;
        core.read_word_32(DBGMCU_IDCODE)
            .map_err(|e| anyhow!("failed to read DBGMCU_IDCODE: {e}"))?
    };

    let chip_db = BuiltinChipDatabase;
    let geom = cortex_gdb_server::chip::ChipDatabase::lookup(&chip_db, chip_id)
        .ok_or_else(|| anyhow!("no chip database entry for id {chip_id:#010x}"))?;

    let real_probe = RealProbe::new(
        session,
        core_index,
        chip_id,
        geom.flash_size,
        geom.flash_page_size,
        geom.sram_size,
        geom.sys_base,
        geom.sys_size,
        geom.erased_pattern,
    );

    let port = if opt.listen_port == 0 { DEFAULT_LISTEN_PORT } else { opt.listen_port };
    let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

    println!("Listening for GDB connections on {listen_addr}");

    cortex_gdb_server::run(
        listen_addr,
        Box::new(real_probe),
        Box::new(chip_db),
        mode,
        opt.multi,
        opt.semihosting,
    )
    .map_err(|e| anyhow!("{e}"))
}
