#![recursion_limit = "256"]

pub mod arch;
pub mod breakpoints;
pub mod cache;
pub mod chip;
pub mod error;
pub mod flash;
pub mod handlers;
pub mod parser;
pub mod probe;
pub mod rsp;
pub mod semihosting;
pub mod session;
pub mod target_desc;
pub mod watchpoints;

use std::net::ToSocketAddrs;

pub use error::{Error, Result};

/// Connects to the target and serves GDB clients at `listen_addr` until the
/// session ends (`vKill`/EOF with no `--multi`) or a process-fatal error
/// occurs (spec §5/§7). This is the crate's single entry point, the
/// equivalent of the teacher's `probe_rs_gdb_server::run`.
pub fn run(
    listen_addr: impl ToSocketAddrs + Clone,
    probe: Box<dyn probe::ProbeFacade>,
    chip_db: Box<dyn chip::ChipDatabase>,
    connect_mode: probe::ConnectMode,
    persistent: bool,
    semihosting_enabled: bool,
) -> Result<()> {
    let session = session::Session::connect(
        probe,
        chip_db.as_ref(),
        connect_mode,
        persistent,
        semihosting_enabled,
    )?;
    session.serve(listen_addr)
}
