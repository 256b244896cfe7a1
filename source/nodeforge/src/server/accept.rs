//! Accept-header parsing and dialect-version negotiation.
//!
//! Old provisioning agents send headers like
//! `application/vnd.coreos.ignition+json; version=2.4.0, */*; q=0.1`,
//! newer ones `application/vnd.coreos.ignition+json;version=3.2.0`.
//! Anything else (curl, an empty header) is served the 2.2.0 floor so
//! existing behavior does not break.

use semver::Version;
use thiserror::Error;

use nodeforge_config::DialectConverter;

/// The provisioning-format media subtype this endpoint negotiates on.
pub const CONFIG_MEDIA_SUBTYPE: &str = "vnd.coreos.ignition+json";

#[derive(Debug, Error)]
#[error("unsupported version in Accept header: {header}")]
pub struct UnsupportedAcceptVersion {
    pub header: String,
}

#[derive(Debug, Clone, PartialEq)]
struct AcceptHeaderValue {
    mime_type: String,
    mime_subtype: String,
    version: Option<Version>,
    q: f32,
}

/// Parses an accept header, recognizing only the `version` and `q`
/// extensions; other extensions and non-MIME entries are ignored. Returns
/// `None` when nothing in the header was usable.
fn parse_accept_header(input: &str) -> Option<Vec<AcceptHeaderValue>> {
    let mut values = Vec::new();

    for raw_value in input.split(',') {
        let parts: Vec<&str> = raw_value.trim().split(';').map(str::trim).collect();

        // The first element has to be a MIME type; skip bad data.
        let Some((mime_type, mime_subtype)) = parts[0].split_once('/') else {
            continue;
        };

        let mut version = None;
        let mut q = None;
        for ext in &parts[1..] {
            let Some((key, value)) = ext.split_once('=') else {
                continue;
            };
            if key == "version" && version.is_none() {
                // Not a valid version: skip the extension, keep the entry.
                if let Ok(parsed) = Version::parse(value) {
                    version = Some(parsed);
                }
            } else if key == "q" && q.is_none() {
                if let Ok(parsed) = value.parse::<f32>() {
                    q = Some(parsed);
                }
            }
        }

        values.push(AcceptHeaderValue {
            mime_type: mime_type.to_string(),
            mime_subtype: mime_subtype.to_string(),
            version,
            q: q.unwrap_or(1.0),
        });
    }

    if values.is_empty() {
        return None;
    }

    // Descending q, stable: the order of precedence a receiver of this
    // header is expected to operate with.
    values.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal));
    Some(values)
}

/// Picks the dialect version to serve for `accept_header`.
///
/// Any 2.x request at or above the floor is normalized to 2.2.0; the result
/// is then resolved to the nearest supported minor. Headers without a usable
/// provisioning-format entry get the 2.2.0 floor.
pub fn detect_spec_version(
    converter: &DialectConverter,
    accept_header: &str,
) -> Result<Version, UnsupportedAcceptVersion> {
    let floor = Version::new(2, 2, 0);

    let Some(values) = parse_accept_header(accept_header) else {
        return Ok(floor);
    };

    for value in values {
        if value.mime_subtype != CONFIG_MEDIA_SUBTYPE {
            continue;
        }
        let Some(mut requested) = value.version else {
            continue;
        };
        if requested.major == floor.major && requested >= floor {
            requested = floor.clone();
        }
        return converter
            .nearest_supported_minor(&requested)
            .map_err(|_| UnsupportedAcceptVersion {
                header: accept_header.to_string(),
            });
    }

    Ok(floor)
}
