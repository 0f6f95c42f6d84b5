//! Ganeti ExtStorage provider backed by the Ceph `rbd` CLI.
//!
//! Ganeti drives external storage through one executable per lifecycle step
//! and passes volume parameters in the environment. This crate turns those
//! parameters into a [`VolumeConfig`], renders the matching `rbd`
//! invocations, and runs them through a [`CommandRunner`] seam so the action
//! logic can be exercised without a Ceph cluster.

pub mod action;
pub mod command;
pub mod config;
pub mod logging;
pub mod mapping;
pub mod params;
pub mod rbd;
pub mod runner;
pub mod test_support;

pub use action::{
    Action, ActionError, Artifact, Dispatcher, EXIT_FAILURE, EXIT_SUCCESS, qemu_uri,
};
pub use command::{RbdCommand, qualify};
pub use config::{AdapterConfig, ConfigError};
pub use mapping::{Mapping, parse_showmapped};
pub use params::{AuthCredentials, ParamError, VolumeConfig};
pub use rbd::{DEFAULT_RBD_BIN, Rbd, RbdError};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
