//! Typed volume parameters extracted from the ExtStorage environment.
//!
//! Ganeti hands every provider call its parameters as environment variables.
//! [`VolumeConfig::from_vars`] is the only place that reads them; the command
//! builder and the action handlers work against the typed record.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::command::qualify;

/// Variable carrying the volume name.
pub const VOLUME_NAME_VAR: &str = "VOL_CNAME";

/// Variable carrying the volume size in megabytes.
pub const VOLUME_SIZE_VAR: &str = "VOL_SIZE";

/// Variable carrying the target size for `grow`.
pub const VOLUME_NEW_SIZE_VAR: &str = "VOL_NEW_SIZE";

/// Variable carrying the snapshot name.
pub const SNAPSHOT_NAME_VAR: &str = "VOL_SNAPSHOT_NAME";

/// Variable carrying the opaque metadata string passed to `setinfo`.
pub const METADATA_VAR: &str = "VOL_METADATA";

/// Prefix shared by all extended (provider-specific) parameters.
pub const EXTENDED_PREFIX: &str = "EXTP_";

const AUTH_PREFIX: &str = "cephx_";

const TRUTHY_VALUES: [&str; 5] = ["yes", "true", "on", "1", "set"];

/// Returns `true` when `value` is one of `yes`, `true`, `on`, `1` or `set`,
/// compared case-insensitively. Everything else, including the empty string,
/// is `false`.
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    TRUTHY_VALUES
        .iter()
        .any(|truthy| value.eq_ignore_ascii_case(truthy))
}

/// Cephx credentials forwarded to every `rbd` invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthCredentials {
    /// Client name passed as `--id`.
    pub id: Option<String>,
    /// Keyring path passed as `--keyring`.
    pub keyring: Option<Utf8PathBuf>,
    /// Raw secret file passed as `--keyfile`.
    pub keyfile: Option<Utf8PathBuf>,
}

impl AuthCredentials {
    /// Returns `true` when no credential field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id.is_none() && self.keyring.is_none() && self.keyfile.is_none()
    }

    /// Removes the `cephx_*` entries from the extended parameters and returns
    /// them as credentials, or `None` when none were supplied.
    fn take_from(extended: &mut BTreeMap<String, String>) -> Option<Self> {
        let credentials = Self {
            id: take_param(extended, &format!("{AUTH_PREFIX}id")),
            keyring: take_param(extended, &format!("{AUTH_PREFIX}keyring")).map(Utf8PathBuf::from),
            keyfile: take_param(extended, &format!("{AUTH_PREFIX}keyfile")).map(Utf8PathBuf::from),
        };
        (!credentials.is_empty()).then_some(credentials)
    }
}

/// Parameters for a single provider invocation.
///
/// Built once per process from the environment and never mutated. Only the
/// enumerated fields drive behaviour; `extra` keeps unknown extended
/// parameters so new backend options do not require extractor changes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeConfig {
    /// Image name inside the pool.
    pub name: String,
    /// Size in megabytes, required by `create`.
    pub size: Option<String>,
    /// Target size for `grow`.
    pub new_size: Option<String>,
    /// Snapshot name. Reserved: snapshots are not supported yet.
    pub snapshot_name: Option<String>,
    /// Metadata string supplied to `setinfo`.
    pub metadata: Option<String>,
    /// Pool the image lives in.
    pub pool: Option<String>,
    /// Source image for clone requests.
    pub origin: Option<String>,
    /// Skip creation and keep whatever the image already holds.
    pub reuse_data: bool,
    /// Skip kernel mapping; the hypervisor talks to RBD directly.
    pub userspace_only: bool,
    /// Value for `--image-format`.
    pub image_format: Option<String>,
    /// Value for `--image-features`.
    pub image_features: Option<String>,
    /// Value for `--stripe-unit`.
    pub stripe_unit: Option<String>,
    /// Value for `--stripe-count`.
    pub stripe_count: Option<String>,
    /// Cephx credentials, if any were supplied.
    pub auth: Option<AuthCredentials>,
    /// Unrecognised extended parameters, keyed by their lower-cased name
    /// without the `EXTP_` prefix.
    pub extra: BTreeMap<String, String>,
}

/// Errors raised while reading the invocation parameters.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParamError {
    /// Raised when the volume name is absent or blank.
    #[error("the environment variable {var} is missing", var = VOLUME_NAME_VAR)]
    MissingIdentity,
}

impl VolumeConfig {
    /// Builds a configuration from `(key, value)` pairs such as
    /// [`std::env::vars`].
    ///
    /// Extended parameters (`EXTP_*`) are matched case-insensitively after the
    /// prefix is stripped. Blank optional values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::MissingIdentity`] when `VOL_CNAME` is absent or
    /// blank.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ParamError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut name = None;
        let mut size = None;
        let mut new_size = None;
        let mut snapshot_name = None;
        let mut metadata = None;
        let mut extended = BTreeMap::new();

        for (key, value) in vars {
            let raw_key = key.as_ref();
            if let Some(param) = raw_key.strip_prefix(EXTENDED_PREFIX) {
                extended.insert(param.to_lowercase(), value.into());
                continue;
            }
            let slot = match raw_key {
                VOLUME_NAME_VAR => &mut name,
                VOLUME_SIZE_VAR => &mut size,
                VOLUME_NEW_SIZE_VAR => &mut new_size,
                SNAPSHOT_NAME_VAR => &mut snapshot_name,
                METADATA_VAR => &mut metadata,
                _ => continue,
            };
            let text: String = value.into();
            *slot = non_blank(&text);
        }

        let volume_name = name.ok_or(ParamError::MissingIdentity)?;
        let auth = AuthCredentials::take_from(&mut extended);

        Ok(Self {
            name: volume_name,
            size,
            new_size,
            snapshot_name,
            metadata,
            pool: take_param(&mut extended, "pool"),
            origin: take_param(&mut extended, "origin"),
            reuse_data: take_flag(&mut extended, "reuse_data"),
            userspace_only: take_flag(&mut extended, "userspace_only"),
            image_format: take_param(&mut extended, "image_format"),
            image_features: take_param(&mut extended, "image_features"),
            stripe_unit: take_param(&mut extended, "stripe_unit"),
            stripe_count: take_param(&mut extended, "stripe_count"),
            auth,
            extra: extended,
        })
    }

    /// Convenience constructor for a bare volume name with everything else
    /// unset.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the image spec used on the `rbd` command line (`pool/name`).
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualify(&self.name, self.pool.as_deref(), None)
    }

    /// Size requested by `grow`: `VOL_NEW_SIZE`, falling back to `VOL_SIZE`.
    #[must_use]
    pub fn grow_size(&self) -> Option<&str> {
        self.new_size.as_deref().or(self.size.as_deref())
    }
}

/// Whitespace-only values count as unset; anything else is kept verbatim.
fn non_blank(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_owned())
}

fn take_param(extended: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    extended
        .remove(key)
        .and_then(|value| non_blank(&value))
}

fn take_flag(extended: &mut BTreeMap<String, String>, key: &str) -> bool {
    extended
        .remove(key)
        .is_some_and(|value| parse_flag(&value))
}
