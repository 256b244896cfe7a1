//! Tagged parsing and translation of provisioning-config dialects.
//!
//! A raw document is parsed into exactly one of two shapes; downstream code
//! dispatches on the tag and can never mix them up. The 3.x-compatible parse
//! runs first, falling back to 2.x only when the version is recognizably
//! foreign to the 3.x family.

pub mod convert;
pub mod report;
pub mod v2;
pub mod v3;

use convert::DialectConverter;
use report::Report;

use crate::codec;
use crate::error::{CodecError, ConfigError, ValidationError};
use crate::normalize;

/// One parsed document, tagged with its dialect family.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedConfig {
    V3(v3::Config),
    V2(v2::Config),
}

impl ParsedConfig {
    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        match self {
            ParsedConfig::V3(cfg) => serde_json::to_vec(cfg).map_err(ConfigError::Serialize),
            ParsedConfig::V2(cfg) => serde_json::to_vec(cfg).map_err(ConfigError::Serialize),
        }
    }
}

/// Dialect-internal parse outcomes, mapped to [`ConfigError`] once the
/// supported-version list is known.
#[derive(Debug)]
pub(crate) enum RawParseError {
    InvalidVersion,
    UnknownVersion,
    Json(serde_json::Error),
    Fatal(Report),
    Validation(ValidationError),
}

/// Rejects repeated keys. Within the 3.x dialect file paths, unit names and
/// user names are unique; the 2.x wire format tolerates duplicates until the
/// normalizer has run.
pub(crate) fn check_unique<'a, I>(kind: &'static str, names: I) -> Result<(), ValidationError>
where
    I: Iterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::DuplicateEntry {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Parses raw bytes as either dialect family.
pub fn parse_any(raw: &[u8], converter: &DialectConverter) -> Result<ParsedConfig, ConfigError> {
    match v3::parse_compatible(raw) {
        Ok((config, report)) => {
            if !report.is_empty() {
                tracing::debug!(%report, "non-fatal 3.x parse report");
            }
            Ok(ParsedConfig::V3(config))
        }
        Err(RawParseError::InvalidVersion) => Err(ConfigError::InvalidVersion {
            supported: converter.supported_list(),
        }),
        Err(RawParseError::UnknownVersion) => match v2::parse(raw) {
            Ok((config, report)) => {
                if !report.is_empty() {
                    tracing::debug!(%report, "non-fatal 2.x parse report");
                }
                Ok(ParsedConfig::V2(config))
            }
            Err(RawParseError::UnknownVersion) | Err(RawParseError::InvalidVersion) => {
                Err(ConfigError::UnknownVersion {
                    supported: converter.supported_list(),
                })
            }
            Err(RawParseError::Json(err)) => Err(ConfigError::Parse {
                dialect: "v2",
                message: err.to_string(),
                report: Report::default(),
            }),
            Err(RawParseError::Fatal(report)) => Err(ConfigError::Parse {
                dialect: "v2",
                message: "config failed validation".to_string(),
                report,
            }),
            Err(RawParseError::Validation(err)) => Err(ConfigError::Validation(err)),
        },
        Err(RawParseError::Json(err)) => Err(ConfigError::Parse {
            dialect: "v3",
            message: err.to_string(),
            report: Report::default(),
        }),
        Err(RawParseError::Fatal(report)) => Err(ConfigError::Parse {
            dialect: "v3",
            message: "config failed validation".to_string(),
            report,
        }),
        Err(RawParseError::Validation(err)) => Err(ConfigError::Validation(err)),
    }
}

/// Parses raw bytes and yields a 3.x document, translating 2.x input after
/// normalizing away the duplicates the 3.x dialect forbids.
pub fn parse_and_convert(
    raw: &[u8],
    converter: &DialectConverter,
) -> Result<v3::Config, ConfigError> {
    match parse_any(raw, converter)? {
        ParsedConfig::V3(config) => Ok(config),
        ParsedConfig::V2(config) => {
            let deduped = normalize::remove_duplicate_entries(config)?;
            let converted = converter.convert(
                ParsedConfig::V2(deduped),
                &v2::max_version(),
                &v3::max_version(),
            )?;
            match converted {
                ParsedConfig::V3(config) => Ok(config),
                ParsedConfig::V2(_) => Err(ConfigError::UnsupportedConversion {
                    from: v2::max_version(),
                    to: v3::max_version(),
                }),
            }
        }
    }
}

/// Like [`parse_and_convert`], but accepts payloads that are additionally
/// gzipped, or base64-encoded gzip.
pub fn parse_and_convert_gzipped(
    raw: &[u8],
    converter: &DialectConverter,
) -> Result<v3::Config, ConfigError> {
    match codec::decode_payload(raw) {
        Ok(decoded) => {
            tracing::debug!("config payload was decoded and gunzipped");
            parse_and_convert(&decoded, converter)
        }
        Err(CodecError::NotGzipped) => {
            tracing::debug!("config payload was not gzipped");
            parse_and_convert(raw, converter)
        }
        Err(err) => Err(err.into()),
    }
}

/// Re-serializes raw config bytes at the requested target version.
pub fn convert_raw_to_version(
    raw: &[u8],
    target: &semver::Version,
    converter: &DialectConverter,
) -> Result<Vec<u8>, ConfigError> {
    let config = parse_and_convert(raw, converter)?;
    let converted = converter.convert(ParsedConfig::V3(config), &v3::max_version(), target)?;
    converted.to_json()
}
