//! Argument vectors for the `rbd` CLI.
//!
//! Each [`RbdCommand`] renders to an exact, ordered argument list. Cephx
//! credentials come first so that every subcommand authenticates the same
//! way, followed by the subcommand and its own arguments.

use std::ffi::OsString;

use crate::params::{AuthCredentials, VolumeConfig};

/// Builds an image spec: `pool/name` when a pool is set, with `@snapshot`
/// appended when a snapshot is given.
///
/// Distinct `(name, pool)` pairs give distinct specs as long as names carry
/// no `/`; `("a/b", None)` and `("b", Some("a"))` both render `a/b`.
#[must_use]
pub fn qualify(name: &str, pool: Option<&str>, snapshot: Option<&str>) -> String {
    let mut spec = match pool {
        Some(pool_name) => format!("{pool_name}/{name}"),
        None => name.to_owned(),
    };
    if let Some(snap) = snapshot {
        spec.push('@');
        spec.push_str(snap);
    }
    spec
}

/// A single `rbd` subcommand with its arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RbdCommand {
    /// `rbd create <image> --size <size> [options]`.
    Create {
        /// Qualified image spec.
        image: String,
        /// Size in megabytes.
        size: String,
        /// `--image-format` value.
        image_format: Option<String>,
        /// `--image-features` value.
        image_features: Option<String>,
        /// `--stripe-unit` value.
        stripe_unit: Option<String>,
        /// `--stripe-count` value.
        stripe_count: Option<String>,
    },
    /// `rbd map <image>`.
    Map {
        /// Qualified image spec.
        image: String,
    },
    /// `rbd unmap <device>`.
    Unmap {
        /// Local block device path, e.g. `/dev/rbd0`.
        device: String,
    },
    /// `rbd resize <image> --size <size>`.
    Resize {
        /// Qualified image spec.
        image: String,
        /// New size in megabytes.
        size: String,
    },
    /// `rbd rm <image>`.
    Remove {
        /// Qualified image spec.
        image: String,
    },
    /// `rbd showmapped --format json`.
    ShowMapped,
}

impl RbdCommand {
    /// Builds a `create` command carrying every optional image setting from
    /// `config`.
    #[must_use]
    pub fn create(config: &VolumeConfig, size: &str) -> Self {
        Self::Create {
            image: config.qualified_name(),
            size: size.to_owned(),
            image_format: config.image_format.clone(),
            image_features: config.image_features.clone(),
            stripe_unit: config.stripe_unit.clone(),
            stripe_count: config.stripe_count.clone(),
        }
    }

    /// Name of the `rbd` subcommand, used in log lines.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Map { .. } => "map",
            Self::Unmap { .. } => "unmap",
            Self::Resize { .. } => "resize",
            Self::Remove { .. } => "rm",
            Self::ShowMapped => "showmapped",
        }
    }

    /// Renders the full argument vector, credentials first.
    #[must_use]
    pub fn to_args(&self, auth: Option<&AuthCredentials>) -> Vec<OsString> {
        let mut args = auth.map(auth_args).unwrap_or_default();
        args.push(OsString::from(self.verb()));

        match self {
            Self::Create {
                image,
                size,
                image_format,
                image_features,
                stripe_unit,
                stripe_count,
            } => {
                args.push(OsString::from(image));
                push_flag(&mut args, "--size", size);
                let optional = [
                    ("--image-format", image_format),
                    ("--image-features", image_features),
                    ("--stripe-unit", stripe_unit),
                    ("--stripe-count", stripe_count),
                ];
                for (flag, value) in optional {
                    if let Some(present) = value {
                        push_flag(&mut args, flag, present);
                    }
                }
            }
            Self::Map { image } | Self::Remove { image } => args.push(OsString::from(image)),
            Self::Unmap { device } => args.push(OsString::from(device)),
            Self::Resize { image, size } => {
                args.push(OsString::from(image));
                push_flag(&mut args, "--size", size);
            }
            Self::ShowMapped => push_flag(&mut args, "--format", "json"),
        }

        args
    }
}

fn auth_args(auth: &AuthCredentials) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(id) = &auth.id {
        push_flag(&mut args, "--id", id);
    }
    if let Some(keyring) = &auth.keyring {
        push_flag(&mut args, "--keyring", keyring);
    }
    if let Some(keyfile) = &auth.keyfile {
        push_flag(&mut args, "--keyfile", keyfile);
    }
    args
}

fn push_flag(args: &mut Vec<OsString>, flag: &str, value: impl AsRef<str>) {
    args.push(OsString::from(flag));
    args.push(OsString::from(value.as_ref()));
}
