//! Live image-to-device mappings reported by `rbd showmapped`.
//!
//! Nothing here is cached: every lookup re-reads the kernel's view through
//! the CLI. Attach and detach use [`Rbd::device_for`] as their idempotency
//! check before deciding whether to map or unmap.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::command::RbdCommand;
use crate::rbd::{Rbd, RbdError};
use crate::runner::CommandRunner;

/// Placeholder `rbd` prints in the `snap` column for plain images.
const NO_SNAPSHOT: &str = "-";

/// A kernel mapping of an image to a local block device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    /// Mapping identifier as reported by `rbd`.
    pub id: Option<String>,
    /// Pool holding the image.
    pub pool: String,
    /// Image name, without pool.
    pub name: String,
    /// Snapshot name when a snapshot rather than the image head is mapped.
    pub snap: Option<String>,
    /// Local device path, e.g. `/dev/rbd0`.
    pub device: String,
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    pool: String,
    name: String,
    #[serde(default)]
    snap: Option<String>,
    device: String,
}

/// `rbd` used to print an object keyed by mapping id; newer releases print
/// an array of entries carrying their own `id`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShowMapped {
    Keyed(BTreeMap<String, RawMapping>),
    Listed(Vec<RawMapping>),
}

impl RawMapping {
    fn into_mapping(self, key: Option<String>) -> Mapping {
        let id = key.or_else(|| {
            self.id.map(|value| match value {
                Value::String(text) => text,
                other => other.to_string(),
            })
        });
        Mapping {
            id,
            pool: self.pool,
            name: self.name,
            snap: self
                .snap
                .filter(|snap| !snap.is_empty() && snap != NO_SNAPSHOT),
            device: self.device,
        }
    }
}

/// Parses the JSON printed by `rbd showmapped --format json`.
///
/// Blank output is treated as an empty listing.
///
/// # Errors
///
/// Returns [`RbdError::Parse`] when the payload is neither the keyed nor the
/// listed form.
pub fn parse_showmapped(program: &str, json: &str) -> Result<Vec<Mapping>, RbdError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }

    let parsed: ShowMapped = serde_json::from_str(json).map_err(|err| RbdError::Parse {
        program: program.to_owned(),
        message: err.to_string(),
    })?;

    Ok(match parsed {
        ShowMapped::Keyed(entries) => entries
            .into_iter()
            .map(|(key, raw)| raw.into_mapping(Some(key)))
            .collect(),
        ShowMapped::Listed(entries) => entries
            .into_iter()
            .map(|raw| raw.into_mapping(None))
            .collect(),
    })
}

impl<R: CommandRunner> Rbd<R> {
    /// Lists current mappings, keeping only those in `pool` when one is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns [`RbdError`] when `showmapped` fails or prints invalid JSON.
    pub fn list_mappings(&self, pool: Option<&str>) -> Result<Vec<Mapping>, RbdError> {
        let stdout = self.exec(&RbdCommand::ShowMapped)?;
        let mappings = parse_showmapped(self.program(), &stdout)?;
        Ok(mappings
            .into_iter()
            .filter(|mapping| pool.is_none_or(|wanted| mapping.pool == wanted))
            .collect())
    }

    /// Returns the device `name` is mapped to, or `None` when it is not
    /// mapped. Snapshot mappings of the image are ignored.
    ///
    /// Without a `pool` the first same-named mapping in any pool wins, so a
    /// mapped `ssd/disk0` answers for a pool-less `disk0` even though `rbd`
    /// would resolve that name in its default pool. Volumes sharing a name
    /// across pools must set `EXTP_POOL`.
    ///
    /// # Errors
    ///
    /// Returns [`RbdError`] when the listing cannot be obtained.
    pub fn device_for(&self, name: &str, pool: Option<&str>) -> Result<Option<String>, RbdError> {
        let device = self
            .list_mappings(pool)?
            .into_iter()
            .find(|mapping| mapping.name == name && mapping.snap.is_none())
            .map(|mapping| mapping.device);
        debug!(image = name, ?pool, ?device, "resolved current mapping");
        Ok(device)
    }
}
