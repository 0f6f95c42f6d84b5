//! ExtStorage actions and their dispatch.
//!
//! Ganeti calls the provider once per lifecycle step. [`Dispatcher::run`]
//! maps an [`Action`] to its handler and returns the artifact, if any, that
//! the caller prints on stdout. Every handler is single-shot: attach and
//! detach stay idempotent by asking `rbd showmapped` for the live state
//! before mapping or unmapping anything.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::RbdCommand;
use crate::params::{AuthCredentials, ParamError, VOLUME_NEW_SIZE_VAR, VOLUME_SIZE_VAR, VolumeConfig};
use crate::rbd::{Rbd, RbdError};
use crate::runner::CommandRunner;

/// Exit status reported for a successful action.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status reported for any failure.
pub const EXIT_FAILURE: i32 = 1;

/// Lifecycle step requested by the orchestrator.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    /// Create a new image.
    Create,
    /// Snapshot an image. Not supported.
    Snapshot,
    /// Map an image to a local block device.
    Attach,
    /// Unmap an image from the host.
    Detach,
    /// Resize an image.
    Grow,
    /// Delete an image.
    Remove,
    /// Validate parameters.
    Verify,
    /// Store metadata on an image.
    SetInfo,
}

impl Action {
    /// Every action, in the order the orchestrator documents them.
    pub const ALL: [Self; 8] = [
        Self::Create,
        Self::Snapshot,
        Self::Attach,
        Self::Detach,
        Self::Grow,
        Self::Remove,
        Self::Verify,
        Self::SetInfo,
    ];

    /// Name used on the command line and for multi-call symlinks.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Snapshot => "snapshot",
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::Grow => "grow",
            Self::Remove => "remove",
            Self::Verify => "verify",
            Self::SetInfo => "setinfo",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.name() == value)
            .ok_or_else(|| ActionError::UnrecognizedAction {
                name: value.to_owned(),
            })
    }
}

/// Errors that turn an invocation into exit status 1.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Raised when the invocation parameters are unusable.
    #[error(transparent)]
    Params(#[from] ParamError),
    /// Raised when the requested action is not one of [`Action::ALL`].
    #[error("action '{name}' not supported")]
    UnrecognizedAction {
        /// Name that failed to resolve.
        name: String,
    },
    /// Raised for features that are deliberately unimplemented.
    #[error("{feature} is not supported yet")]
    UnsupportedFeature {
        /// Human-readable feature name.
        feature: &'static str,
    },
    /// Raised when an action needs a size and none was supplied.
    #[error("{action} requires the environment variable {var}")]
    MissingSize {
        /// Action that needed the size.
        action: Action,
        /// Variable that should have carried it.
        var: &'static str,
    },
    /// Raised when an `rbd` invocation fails.
    #[error("rbd command error: {0}")]
    Backend(#[from] RbdError),
}

impl ActionError {
    /// Process exit status for this error. Every failure maps to
    /// [`EXIT_FAILURE`].
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }
}

/// Output of a successful `attach`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Artifact {
    /// Local block device, empty for userspace-only volumes.
    pub device: String,
    /// Userspace access URI for the hypervisor.
    pub uri: String,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.device, self.uri)
    }
}

/// Builds the userspace access URI `kvm:rbd:<image>[:id=<id>][:conf=<path>]`.
///
/// Absent parts are left out entirely.
#[must_use]
pub fn qemu_uri(image: &str, auth: Option<&AuthCredentials>, conf: Option<&Utf8Path>) -> String {
    let mut uri = format!("kvm:rbd:{image}");
    if let Some(id) = auth.and_then(|credentials| credentials.id.as_deref()) {
        uri.push_str(":id=");
        uri.push_str(id);
    }
    if let Some(path) = conf {
        uri.push_str(":conf=");
        uri.push_str(path.as_str());
    }
    uri
}

/// Runs actions against one `rbd` binary and credential set.
#[derive(Clone, Debug)]
pub struct Dispatcher<R: CommandRunner> {
    rbd: Rbd<R>,
    ceph_conf: Option<Utf8PathBuf>,
}

impl<R: CommandRunner> Dispatcher<R> {
    /// Creates a dispatcher. `ceph_conf` only feeds the attach URI.
    #[must_use]
    pub const fn new(rbd: Rbd<R>, ceph_conf: Option<Utf8PathBuf>) -> Self {
        Self { rbd, ceph_conf }
    }

    /// Runs `action` for the volume described by `config`.
    ///
    /// Returns the artifact to print on stdout; only `attach` produces one.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] for unsupported features, missing sizes, and
    /// any failed `rbd` call. Nothing is retried.
    pub fn run(
        &self,
        action: Action,
        config: &VolumeConfig,
    ) -> Result<Option<Artifact>, ActionError> {
        debug!(%action, image = %config.qualified_name(), "dispatching");
        match action {
            Action::Create => self.create(config).map(|()| None),
            Action::Snapshot => Err(ActionError::UnsupportedFeature {
                feature: "RBD snapshot",
            }),
            Action::Attach => self.attach(config).map(Some),
            Action::Detach => self.detach(config).map(|()| None),
            Action::Grow => self.grow(config).map(|()| None),
            Action::Remove => self.remove(config).map(|()| None),
            Action::Verify => Ok(None),
            Action::SetInfo => {
                debug!(metadata = ?config.metadata, "setinfo is a no-op");
                Ok(None)
            }
        }
    }

    fn create(&self, config: &VolumeConfig) -> Result<(), ActionError> {
        let image = config.qualified_name();
        if config.reuse_data {
            info!(%image, "reusing previous data");
            return Ok(());
        }

        if let Some(origin) = &config.origin {
            warn!(%image, %origin, "cloning is not supported yet");
            return Err(ActionError::UnsupportedFeature { feature: "cloning" });
        }

        let size = config.size.as_deref().ok_or(ActionError::MissingSize {
            action: Action::Create,
            var: VOLUME_SIZE_VAR,
        })?;
        info!(%image, size, "creating volume");
        self.rbd.exec(&RbdCommand::create(config, size))?;
        Ok(())
    }

    fn attach(&self, config: &VolumeConfig) -> Result<Artifact, ActionError> {
        let image = config.qualified_name();
        let device = if config.userspace_only {
            info!(%image, "userspace-only volume, skipping kernel mapping");
            String::new()
        } else if let Some(existing) = self.rbd.device_for(&config.name, config.pool.as_deref())? {
            info!(%image, device = %existing, "image already mapped");
            existing
        } else {
            let mapped = self.rbd.exec(&RbdCommand::Map {
                image: image.clone(),
            })?;
            info!(%image, device = %mapped, "mapped image");
            mapped
        };

        let uri = qemu_uri(&image, config.auth.as_ref(), self.ceph_conf.as_deref());
        Ok(Artifact { device, uri })
    }

    fn detach(&self, config: &VolumeConfig) -> Result<(), ActionError> {
        let image = config.qualified_name();
        if config.userspace_only {
            info!(%image, "userspace-only volume, nothing to unmap");
            return Ok(());
        }

        match self.rbd.device_for(&config.name, config.pool.as_deref())? {
            Some(device) => {
                self.rbd.exec(&RbdCommand::Unmap {
                    device: device.clone(),
                })?;
                info!(%image, %device, "unmapped image");
            }
            None => info!(%image, "image not mapped"),
        }
        Ok(())
    }

    fn grow(&self, config: &VolumeConfig) -> Result<(), ActionError> {
        let image = config.qualified_name();
        let size = config.grow_size().ok_or(ActionError::MissingSize {
            action: Action::Grow,
            var: VOLUME_NEW_SIZE_VAR,
        })?;
        info!(%image, size, "resizing volume");
        self.rbd.exec(&RbdCommand::Resize {
            image,
            size: size.to_owned(),
        })?;
        Ok(())
    }

    fn remove(&self, config: &VolumeConfig) -> Result<(), ActionError> {
        let image = config.qualified_name();
        info!(%image, "deleting volume");
        self.rbd.exec(&RbdCommand::Remove { image })?;
        Ok(())
    }
}
