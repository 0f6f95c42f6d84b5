//! Command-line interface definitions for the `rbd-extstorage` binary.
//!
//! This module centralises the clap parser so both the main binary and the
//! build script can reuse it when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `rbd-extstorage` binary.
///
/// Ganeti normally invokes the provider through per-action symlinks, in
/// which case the action comes from the program name and no arguments are
/// parsed.
#[derive(Debug, Parser)]
#[command(
    name = "rbd-extstorage",
    version,
    about = "Ganeti ExtStorage provider for Ceph RBD volumes",
    after_help = concat!(
        "Volume parameters are read from VOL_CNAME, VOL_SIZE, VOL_NEW_SIZE, ",
        "VOL_SNAPSHOT_NAME, VOL_METADATA and EXTP_* variables. Host settings ",
        "come from RBD_EXTSTORAGE_* variables or rbd-extstorage.toml."
    ),
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Action to perform: create, snapshot, attach, detach, grow, remove,
    /// verify or setinfo.
    #[arg(value_name = "ACTION")]
    pub(crate) action: String,
}
