//! Fragment and document validation.
//!
//! Validation runs before anything is emitted or merged; a failed check never
//! yields a partial result. A completely empty document is valid so that a
//! fragment can carry only kernel arguments or extensions.

use std::collections::BTreeMap;

use crate::dialect::convert::DialectConverter;
use crate::dialect::{self, v2, v3, ParsedConfig};
use crate::error::{ConfigError, ValidationError};
use crate::fragment::{
    Fragment, KERNEL_TYPE_64K_PAGES, KERNEL_TYPE_DEFAULT, KERNEL_TYPE_REALTIME,
};

/// Extensions installable on a host, each with the packages that enable it.
pub fn supported_extensions() -> BTreeMap<&'static str, Vec<&'static str>> {
    BTreeMap::from([
        ("two-node-ha", vec!["pacemaker", "pcs", "fence-agents-all"]),
        ("wasm", vec!["crun-wasm"]),
        ("ipsec", vec!["NetworkManager-libreswan", "libreswan"]),
        ("usbguard", vec!["usbguard"]),
        ("kerberos", vec!["krb5-workstation", "libkadm5"]),
        ("kernel-devel", vec!["kernel-devel", "kernel-headers"]),
        ("sandboxed-containers", vec!["kata-containers"]),
        ("sysstat", vec!["sysstat"]),
    ])
}

/// Validates one fragment: kernel type, embedded document, extensions.
pub fn validate_fragment(
    fragment: &Fragment,
    converter: &DialectConverter,
) -> Result<(), ConfigError> {
    if let Some(kernel_type) = fragment.kernel_type.as_deref() {
        if !matches!(
            kernel_type,
            "" | KERNEL_TYPE_DEFAULT | KERNEL_TYPE_REALTIME | KERNEL_TYPE_64K_PAGES
        ) {
            return Err(ValidationError::InvalidKernelType(kernel_type.to_string()).into());
        }
    }

    if let Some(raw) = fragment.config_bytes()? {
        // Accept the same payload envelopes the merge path accepts.
        let parsed = match crate::codec::decode_payload(&raw) {
            Ok(decoded) => dialect::parse_any(&decoded, converter)?,
            Err(crate::error::CodecError::NotGzipped) => dialect::parse_any(&raw, converter)?,
            Err(err) => return Err(err.into()),
        };
        validate_parsed(&parsed)?;
        if !fragment.extensions.is_empty() {
            validate_extensions(&fragment.extensions)?;
        }
    }

    Ok(())
}

/// Dialect-dispatched document validation.
pub fn validate_parsed(config: &ParsedConfig) -> Result<(), ConfigError> {
    match config {
        ParsedConfig::V3(cfg) => validate_v3_file_modes(cfg),
        ParsedConfig::V2(cfg) => validate_v2_file_modes(cfg),
    }
}

// File modes must not carry special bits (sticky, setuid, setgid).

fn validate_v3_file_modes(config: &v3::Config) -> Result<(), ConfigError> {
    for file in &config.storage.files {
        check_mode(&file.path, file.mode)?;
    }
    Ok(())
}

fn validate_v2_file_modes(config: &v2::Config) -> Result<(), ConfigError> {
    for file in &config.storage.files {
        check_mode(&file.path, file.mode)?;
    }
    Ok(())
}

fn check_mode(path: &str, mode: Option<i64>) -> Result<(), ConfigError> {
    if let Some(mode) = mode {
        if !(0..=0o777).contains(&mode) {
            return Err(ValidationError::FileModeSpecialBits {
                path: path.to_string(),
                mode,
            }
            .into());
        }
    }
    Ok(())
}

/// Rejects any extension outside the supported table.
pub fn validate_extensions(extensions: &[String]) -> Result<(), ConfigError> {
    let supported = supported_extensions();
    let invalid: Vec<String> = extensions
        .iter()
        .filter(|ext| !supported.contains_key(ext.as_str()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::UnknownExtensions(invalid).into());
    }
    Ok(())
}

/// Resolves extensions to the packages required to enable them.
pub fn packages_for_extensions(extensions: &[String]) -> Result<Vec<String>, ConfigError> {
    validate_extensions(extensions)?;
    let supported = supported_extensions();
    Ok(extensions
        .iter()
        .flat_map(|ext| {
            supported
                .get(ext.as_str())
                .into_iter()
                .flatten()
                .map(|pkg| pkg.to_string())
        })
        .collect())
}
