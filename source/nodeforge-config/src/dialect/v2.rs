//! Spec 2.x document model.
//!
//! The legacy wire format. It tolerates duplicate files, units and users; the
//! normalizer has to run before a document in this shape can be translated to
//! 3.x. Fields here are plain values with empty-string absence, matching the
//! old wire encoding.

use semver::Version;
use serde::{Deserialize, Serialize};

use super::report::Report;
use super::RawParseError;

pub fn max_version() -> Version {
    Version::new(2, 2, 0)
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub ignition: Ignition,
    #[serde(skip_serializing_if = "Storage::is_empty")]
    pub storage: Storage,
    #[serde(skip_serializing_if = "Systemd::is_empty")]
    pub systemd: Systemd,
    #[serde(skip_serializing_if = "Passwd::is_empty")]
    pub passwd: Passwd,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ignition {
    pub version: String,
    #[serde(skip_serializing_if = "IgnitionConfig::is_empty")]
    pub config: IgnitionConfig,
    #[serde(skip_serializing_if = "Security::is_empty")]
    pub security: Security,
}

/// 2.x uses append/replace references where 3.x uses merge/replace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IgnitionConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub append: Vec<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<Reference>,
}

impl IgnitionConfig {
    pub fn is_empty(&self) -> bool {
        self.append.is_empty() && self.replace.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reference {
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Security {
    #[serde(skip_serializing_if = "Tls::is_empty")]
    pub tls: Tls,
}

impl Security {
    pub fn is_empty(&self) -> bool {
        self.tls.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tls {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub certificate_authorities: Vec<Reference>,
}

impl Tls {
    pub fn is_empty(&self) -> bool {
        self.certificate_authorities.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Storage {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
}

impl Storage {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct File {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filesystem: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<i64>,
    #[serde(skip_serializing_if = "FileContents::is_empty")]
    pub contents: FileContents,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileContents {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub compression: String,
}

impl FileContents {
    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.compression.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Systemd {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,
}

impl Systemd {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// 2.x carries both the deprecated `enable` flag and the newer `enabled`
/// tri-state; translation folds them together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Unit {
    pub name: String,
    #[serde(skip_serializing_if = "is_false")]
    pub enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "is_false")]
    pub mask: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contents: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropins: Vec<Dropin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dropin {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contents: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Passwd {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
}

impl Passwd {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
}

/// Parses a 2.x document at or below [`max_version`].
pub(crate) fn parse(raw: &[u8]) -> Result<(Config, Report), RawParseError> {
    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct VersionProbe {
        ignition: ProbeIgnition,
    }
    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct ProbeIgnition {
        version: String,
    }

    let probe: VersionProbe = serde_json::from_slice(raw).map_err(RawParseError::Json)?;
    let version =
        Version::parse(&probe.ignition.version).map_err(|_| RawParseError::UnknownVersion)?;
    if version.major != 2 || version > max_version() {
        return Err(RawParseError::UnknownVersion);
    }

    let mut config: Config = serde_json::from_slice(raw).map_err(RawParseError::Json)?;

    let mut report = Report::new();
    for file in &config.storage.files {
        if file.path.is_empty() {
            report.error("file entry with empty path");
        }
    }
    for unit in &config.systemd.units {
        if unit.name.is_empty() {
            report.error("unit entry with empty name");
        }
    }
    if report.is_fatal() {
        return Err(RawParseError::Fatal(report));
    }

    config.ignition.version = max_version().to_string();
    Ok((config, report))
}
