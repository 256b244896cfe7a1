//! Spec 3.x document model.
//!
//! This is the internal working dialect: every parsed document is normalized
//! to the highest supported 3.x minor before the rest of the pipeline touches
//! it. Within this dialect file paths, unit names and user names are unique.

use semver::Version;
use serde::{Deserialize, Serialize};

use super::report::Report;
use super::{check_unique, RawParseError};
use crate::codec::dataurl;

/// Highest 3.x minor this build understands. Compatible parsing accepts any
/// 3.x document at or below this version.
pub fn max_version() -> Version {
    Version::new(3, 5, 0)
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

/// Bootstrap merge/replace references, e.g. the pointer config a node fetches
/// its full configuration through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IgnitionConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merge: Vec<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<Resource>,
}

impl IgnitionConfig {
    pub fn is_empty(&self) -> bool {
        self.merge.is_empty() && self.replace.is_none()
    }
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
    pub certificate_authorities: Vec<Resource>,
}

impl Tls {
    pub fn is_empty(&self) -> bool {
        self.certificate_authorities.is_empty()
    }
}

/// Inline or referenced contents.
///
/// `source` is a data-URL; absent means "declared, but no bytes". An absent
/// `compression` and an explicit empty string mean the same thing to the
/// codec; the distinction only matters while merging (see the merge engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl Resource {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.compression.is_none()
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
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<i64>,
    #[serde(skip_serializing_if = "Resource::is_empty")]
    pub contents: Resource,
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Unit {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropins: Vec<Dropin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dropin {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
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

/// An empty config at the latest supported version.
pub fn new_config() -> Config {
    Config {
        ignition: Ignition {
            version: max_version().to_string(),
            ..Ignition::default()
        },
        ..Config::default()
    }
}

/// The stub config a machine boots with: a merge reference to the serving
/// endpoint for its role plus the root CA needed to trust it.
pub fn pointer_config(serving_host: &str, root_ca: &[u8]) -> Config {
    let mut config = new_config();
    config.ignition.config.merge = vec![Resource {
        source: Some(format!("https://{serving_host}/config/{{{{.Role}}}}")),
        compression: None,
    }];
    config.ignition.security.tls.certificate_authorities = vec![Resource {
        source: Some(dataurl::encode(root_ca)),
        compression: None,
    }];
    config
}

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

/// Parses any 3.x document at or below [`max_version`], normalizing the
/// version field to the maximum on success.
pub(crate) fn parse_compatible(raw: &[u8]) -> Result<(Config, Report), RawParseError> {
    let probe: VersionProbe = serde_json::from_slice(raw).map_err(RawParseError::Json)?;
    if probe.ignition.version.is_empty() {
        return Err(RawParseError::InvalidVersion);
    }
    let version =
        Version::parse(&probe.ignition.version).map_err(|_| RawParseError::InvalidVersion)?;
    if version.major != 3 || version > max_version() {
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

    // Unlike the 2.x wire format, this dialect has no tolerance for
    // duplicates; rejecting them here keeps the invariant on every path.
    check_unique("file", config.storage.files.iter().map(|f| f.path.as_str()))
        .map_err(RawParseError::Validation)?;
    check_unique("unit", config.systemd.units.iter().map(|u| u.name.as_str()))
        .map_err(RawParseError::Validation)?;
    check_unique("user", config.passwd.users.iter().map(|u| u.name.as_str()))
        .map_err(RawParseError::Validation)?;

    config.ignition.version = max_version().to_string();
    Ok((config, report))
}
