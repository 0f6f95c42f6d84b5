//! Adapter settings loaded via `ortho-config`.
//!
//! These are properties of the host the provider runs on (which `rbd` to
//! call, which `ceph.conf` the hypervisor should read, how to log), not of
//! the volume. Per-volume parameters come from the ExtStorage environment
//! and live in [`crate::params`].

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::logging::DEFAULT_LOG_FILTER;
use crate::rbd::DEFAULT_RBD_BIN;

/// Name of the optional configuration file.
pub const CONFIG_FILE_NAME: &str = "rbd-extstorage.toml";

/// Host-level settings derived from defaults, configuration files and
/// `RBD_EXTSTORAGE_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "RBD_EXTSTORAGE",
    discovery(
        app_name = "rbd-extstorage",
        env_var = "RBD_EXTSTORAGE_CONFIG_PATH",
        config_file_name = "rbd-extstorage.toml",
        dotfile_name = ".rbd-extstorage.toml",
        project_file_name = "rbd-extstorage.toml"
    )
)]
pub struct AdapterConfig {
    /// Path to the `rbd` executable.
    #[ortho_config(default = DEFAULT_RBD_BIN.to_owned())]
    pub rbd_bin: String,
    /// Ceph configuration file advertised in the attach URI. Left out of the
    /// URI when unset.
    pub ceph_conf: Option<String>,
    /// `tracing` filter directive for stderr logging.
    #[ortho_config(default = DEFAULT_LOG_FILTER.to_owned())]
    pub log_filter: String,
    /// Emit log lines as JSON instead of plain text.
    #[ortho_config(default = false)]
    pub log_json: bool,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl AdapterConfig {
    /// Loads configuration without parsing CLI arguments. Values merge
    /// defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("rbd-extstorage")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name both the
    /// environment variable and the configuration key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            Some(&self.rbd_bin),
            &FieldMetadata {
                description: "rbd binary",
                env_var: "RBD_EXTSTORAGE_RBD_BIN",
                toml_key: "rbd_bin",
            },
        )?;
        Self::require_field(
            Some(&self.log_filter),
            &FieldMetadata {
                description: "log filter",
                env_var: "RBD_EXTSTORAGE_LOG_FILTER",
                toml_key: "log_filter",
            },
        )?;
        if self.ceph_conf.is_some() {
            Self::require_field(
                self.ceph_conf.as_deref(),
                &FieldMetadata {
                    description: "ceph configuration path",
                    env_var: "RBD_EXTSTORAGE_CEPH_CONF",
                    toml_key: "ceph_conf",
                },
            )?;
        }
        Ok(())
    }

    /// Returns the configured `ceph.conf` path, if any.
    #[must_use]
    pub fn ceph_conf_path(&self) -> Option<Utf8PathBuf> {
        self.ceph_conf.as_deref().map(Utf8PathBuf::from)
    }

    fn require_field(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.is_none_or(|present| present.trim().is_empty()) {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
