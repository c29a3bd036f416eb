//! Crate-wide error type.
//!
//! Mirrors the shape of `probe_rs::Error`: a flat enum of named failure
//! modes built with `thiserror`, rather than a boxed `dyn Error`. Only
//! process-fatal and session-fatal conditions (spec §7, kinds 2 and 3) are
//! represented here; protocol-recoverable failures never reach this type,
//! they are encoded directly as `E00`/`E08` reply strings by the handlers.

/// Top level error type for the session engine and everything it drives.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A probe or target operation returned a nonzero status.
    #[error("probe operation failed: {0}")]
    Probe(String),

    /// The TCP socket or probe transport failed at the I/O layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet could not be framed, checksummed or parsed.
    #[error("malformed RSP packet: {0}")]
    Protocol(String),

    /// `--chip` (or the chip ID read back from the target) has no entry in
    /// the configured chip database.
    #[error("no chip database entry for chip id {0:#010x}")]
    UnknownChip(u32),

    /// The probe disappeared while being reopened after a `k` (kill) packet.
    /// Per spec §7 kind 3, this is process-fatal.
    #[error("probe reopen failed after kill: {0}")]
    ProbeReopenFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
