//! Snapshot naming.
//!
//! A snapshot is stored under `<version>_<revision>_etcd.backup`, where the
//! revision is written as 16 lowercase hex digits. That width covers every
//! non-negative `i64`, so names never need re-padding.
//!
//! Ordering is computed from the parsed fields rather than from the raw
//! string: revision first, then version component-wise, then the raw name.

use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub const SNAPSHOT_SUFFIX: &str = "etcd.backup";

/// Hex digits used for the revision field.
pub const REVISION_WIDTH: usize = 16;

/// Dot-separated numeric version such as `3.1.0`.
///
/// Components must not carry leading zeros so that every version has exactly
/// one spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    raw: String,
    components: Vec<u64>,
}

impl Version {
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        if raw.is_empty() {
            return Err("empty version".to_string());
        }

        let mut components = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(format!("empty component in version {raw:?}"));
            }
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("non-numeric component {part:?} in version {raw:?}"));
            }
            if part.len() > 1 && part.starts_with('0') {
                return Err(format!("leading zero in component {part:?} of version {raw:?}"));
            }
            let value = part
                .parse::<u64>()
                .map_err(|_| format!("component {part:?} of version {raw:?} overflows"))?;
            components.push(value);
        }

        Ok(Self {
            raw: raw.to_string(),
            components,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s).map_err(VaultError::InvalidInput)
    }
}

/// A parsed snapshot key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotName {
    version: Version,
    revision: i64,
    raw: String,
}

impl SnapshotName {
    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Build the name for `(version, revision)`.
pub fn encode_name(version: &str, revision: i64) -> Result<SnapshotName> {
    if revision < 0 {
        return Err(VaultError::InvalidInput(format!(
            "revision must be non-negative, got {revision}"
        )));
    }
    let version = Version::parse(version).map_err(VaultError::InvalidInput)?;
    let raw = format!(
        "{}_{:0width$x}_{}",
        version.as_str(),
        revision,
        SNAPSHOT_SUFFIX,
        width = REVISION_WIDTH
    );

    Ok(SnapshotName {
        version,
        revision,
        raw,
    })
}

/// Decode a key produced by [`encode_name`]. Anything else is rejected.
pub fn parse_name(raw: &str) -> Result<SnapshotName> {
    let malformed = |reason: String| VaultError::MalformedName {
        name: raw.to_string(),
        reason,
    };

    let stem = raw
        .strip_suffix(SNAPSHOT_SUFFIX)
        .and_then(|s| s.strip_suffix('_'))
        .ok_or_else(|| malformed(format!("missing _{SNAPSHOT_SUFFIX} suffix")))?;
    let (version, revision) = stem
        .rsplit_once('_')
        .ok_or_else(|| malformed("missing revision field".to_string()))?;

    if revision.len() != REVISION_WIDTH
        || !revision.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return Err(malformed(format!(
            "revision {revision:?} is not {REVISION_WIDTH} lowercase hex digits"
        )));
    }
    // Values above i64::MAX fail here
    let revision = i64::from_str_radix(revision, 16)
        .map_err(|_| malformed(format!("revision {revision:?} out of range")))?;
    let version = Version::parse(version).map_err(malformed)?;

    Ok(SnapshotName {
        version,
        revision,
        raw: raw.to_string(),
    })
}

impl Ord for SnapshotName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.revision
            .cmp(&other.revision)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for SnapshotName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SnapshotName {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SnapshotName {}

impl Hash for SnapshotName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for SnapshotName {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SnapshotName {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        parse_name(s)
    }
}

impl TryFrom<String> for SnapshotName {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self> {
        parse_name(&value)
    }
}

impl From<SnapshotName> for String {
    fn from(name: SnapshotName) -> Self {
        name.raw
    }
}
