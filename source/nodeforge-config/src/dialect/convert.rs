//! Version translation between supported dialects.
//!
//! The converter is a plain value owned by the composition root; handlers get
//! a clone. The supported-version table is linear: translation between two
//! versions walks the chain one adjacent entry at a time.

use semver::Version;

use super::{check_unique, v2, v3, ParsedConfig};
use crate::error::{ConfigError, ValidationError};

#[derive(Debug, Clone)]
pub struct DialectConverter {
    versions: Vec<Version>,
}

impl Default for DialectConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl DialectConverter {
    pub fn new() -> Self {
        Self {
            versions: vec![
                Version::new(2, 2, 0),
                Version::new(3, 0, 0),
                Version::new(3, 1, 0),
                Version::new(3, 2, 0),
                Version::new(3, 3, 0),
                Version::new(3, 4, 0),
                Version::new(3, 5, 0),
            ],
        }
    }

    pub fn supported_versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn is_supported(&self, version: &Version) -> bool {
        self.versions.contains(version)
    }

    /// Supported minors in ascending order, as `major.minor` strings.
    pub fn supported_minor_versions(&self) -> Vec<String> {
        self.versions
            .iter()
            .map(|v| format!("{}.{}", v.major, v.minor))
            .collect()
    }

    /// The comma-joined form used in error messages.
    pub fn supported_list(&self) -> String {
        self.supported_minor_versions().join(",")
    }

    /// The highest supported minor at or below `requested`, within the
    /// requested major.
    pub fn nearest_supported_minor(&self, requested: &Version) -> Result<Version, ConfigError> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.major == requested.major && *v <= requested)
            .cloned()
            .ok_or_else(|| ConfigError::UnsupportedVersion {
                requested: requested.clone(),
                supported: self.supported_list(),
            })
    }

    /// Translates `config` from `from` to `to` along the version chain.
    ///
    /// The 2.2.0 -> 3.0.0 step requires a document the normalizer has already
    /// deduplicated; it fails on duplicate files, units or users.
    pub fn convert(
        &self,
        config: ParsedConfig,
        from: &Version,
        to: &Version,
    ) -> Result<ParsedConfig, ConfigError> {
        let unsupported = || ConfigError::UnsupportedConversion {
            from: from.clone(),
            to: to.clone(),
        };
        let mut at = self
            .versions
            .iter()
            .position(|v| v == from)
            .ok_or_else(unsupported)?;
        let target = self
            .versions
            .iter()
            .position(|v| v == to)
            .ok_or_else(unsupported)?;

        // The variant has to match the claimed source version.
        match (&config, from.major) {
            (ParsedConfig::V2(_), 2) | (ParsedConfig::V3(_), 3) => {}
            _ => return Err(unsupported()),
        }

        let mut current = config;
        while at != target {
            let next = if target > at { at + 1 } else { at - 1 };
            current = step(current, &self.versions[at], &self.versions[next])?;
            at = next;
        }
        Ok(current)
    }
}

fn step(config: ParsedConfig, from: &Version, to: &Version) -> Result<ParsedConfig, ConfigError> {
    match (config, from.major, to.major) {
        (ParsedConfig::V2(cfg), 2, 3) => Ok(ParsedConfig::V3(v2_to_v3(cfg)?)),
        (ParsedConfig::V3(cfg), 3, 2) => Ok(ParsedConfig::V2(v3_to_v2(cfg, to))),
        (ParsedConfig::V3(mut cfg), 3, 3) => {
            cfg.ignition.version = to.to_string();
            Ok(ParsedConfig::V3(cfg))
        }
        _ => Err(ConfigError::UnsupportedConversion {
            from: from.clone(),
            to: to.clone(),
        }),
    }
}

fn v2_to_v3(config: v2::Config) -> Result<v3::Config, ConfigError> {
    check_unique("file", config.storage.files.iter().map(|f| f.path.as_str()))?;
    check_unique("unit", config.systemd.units.iter().map(|u| u.name.as_str()))?;
    check_unique("user", config.passwd.users.iter().map(|u| u.name.as_str()))?;

    let mut files = Vec::with_capacity(config.storage.files.len());
    for file in config.storage.files {
        if !file.filesystem.is_empty() && file.filesystem != "root" {
            return Err(ValidationError::UnsupportedFilesystem {
                path: file.path,
                filesystem: file.filesystem,
            }
            .into());
        }
        files.push(v3::File {
            path: file.path,
            overwrite: None,
            mode: file.mode,
            contents: v3::Resource {
                source: Some(file.contents.source).filter(|s| !s.is_empty()),
                compression: Some(file.contents.compression).filter(|c| !c.is_empty()),
            },
        });
    }

    let units = config
        .systemd
        .units
        .into_iter()
        .map(|unit| v3::Unit {
            name: unit.name,
            enabled: unit.enabled.or(unit.enable.then_some(true)),
            mask: unit.mask.then_some(true),
            contents: Some(unit.contents).filter(|c| !c.is_empty()),
            dropins: unit
                .dropins
                .into_iter()
                .map(|dropin| v3::Dropin {
                    name: dropin.name,
                    contents: Some(dropin.contents).filter(|c| !c.is_empty()),
                })
                .collect(),
        })
        .collect();

    let users = config
        .passwd
        .users
        .into_iter()
        .map(|user| v3::User {
            name: user.name,
            ssh_authorized_keys: user.ssh_authorized_keys,
        })
        .collect();

    Ok(v3::Config {
        ignition: v3::Ignition {
            version: Version::new(3, 0, 0).to_string(),
            config: v3::IgnitionConfig {
                merge: config
                    .ignition
                    .config
                    .append
                    .into_iter()
                    .map(|r| v3::Resource {
                        source: Some(r.source),
                        compression: None,
                    })
                    .collect(),
                replace: config.ignition.config.replace.map(|r| v3::Resource {
                    source: Some(r.source),
                    compression: None,
                }),
            },
            security: v3::Security {
                tls: v3::Tls {
                    certificate_authorities: config
                        .ignition
                        .security
                        .tls
                        .certificate_authorities
                        .into_iter()
                        .map(|r| v3::Resource {
                            source: Some(r.source),
                            compression: None,
                        })
                        .collect(),
                },
            },
        },
        storage: v3::Storage { files },
        systemd: v3::Systemd { units },
        passwd: v3::Passwd { users },
    })
}

fn v3_to_v2(config: v3::Config, to: &Version) -> v2::Config {
    let files = config
        .storage
        .files
        .into_iter()
        .map(|file| v2::File {
            filesystem: "root".to_string(),
            path: file.path,
            mode: file.mode,
            contents: v2::FileContents {
                source: file.contents.source.unwrap_or_default(),
                compression: file.contents.compression.unwrap_or_default(),
            },
        })
        .collect();

    let units = config
        .systemd
        .units
        .into_iter()
        .map(|unit| v2::Unit {
            name: unit.name,
            enable: false,
            enabled: unit.enabled,
            mask: unit.mask.unwrap_or(false),
            contents: unit.contents.unwrap_or_default(),
            dropins: unit
                .dropins
                .into_iter()
                .map(|dropin| v2::Dropin {
                    name: dropin.name,
                    contents: dropin.contents.unwrap_or_default(),
                })
                .collect(),
        })
        .collect();

    let users = config
        .passwd
        .users
        .into_iter()
        .map(|user| v2::User {
            name: user.name,
            ssh_authorized_keys: user.ssh_authorized_keys,
        })
        .collect();

    v2::Config {
        ignition: v2::Ignition {
            version: to.to_string(),
            config: v2::IgnitionConfig {
                append: config
                    .ignition
                    .config
                    .merge
                    .into_iter()
                    .filter_map(|r| r.source)
                    .map(|source| v2::Reference { source })
                    .collect(),
                replace: config
                    .ignition
                    .config
                    .replace
                    .and_then(|r| r.source)
                    .map(|source| v2::Reference { source }),
            },
            security: v2::Security {
                tls: v2::Tls {
                    certificate_authorities: config
                        .ignition
                        .security
                        .tls
                        .certificate_authorities
                        .into_iter()
                        .filter_map(|r| r.source)
                        .map(|source| v2::Reference { source })
                        .collect(),
                },
            },
        },
        storage: v2::Storage { files },
        systemd: v2::Systemd { units },
        passwd: v2::Passwd { users },
    }
}
