//! TLS cipher surface and security-profile handling.
//!
//! The cipher list is fixed at construction: TLS 1.3 suites first, then
//! TLS 1.2 suites minus straight-SHA1 CBC suites and 3DES. HTTP/2 is never
//! offered on the TLS listener, which keeps the negotiated surface inside
//! this list.

use std::collections::HashSet;
use std::path::Path;

use miette::{miette, Context, IntoDiagnostic};
use pingora::listeners::tls::TlsSettings;
use pingora::tls::ssl::SslVersion;
use serde::Deserialize;

use crate::server::cert_watcher::ReloadingCertResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite {
    pub iana: &'static str,
    pub openssl: &'static str,
    pub tls13: bool,
}

const fn suite(iana: &'static str, openssl: &'static str, tls13: bool) -> CipherSuite {
    CipherSuite {
        iana,
        openssl,
        tls13,
    }
}

/// Every suite this server knows how to speak, in preference order.
const CIPHER_SUITES: &[CipherSuite] = &[
    suite("TLS_AES_128_GCM_SHA256", "TLS_AES_128_GCM_SHA256", true),
    suite("TLS_AES_256_GCM_SHA384", "TLS_AES_256_GCM_SHA384", true),
    suite(
        "TLS_CHACHA20_POLY1305_SHA256",
        "TLS_CHACHA20_POLY1305_SHA256",
        true,
    ),
    suite(
        "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        "ECDHE-ECDSA-AES128-GCM-SHA256",
        false,
    ),
    suite(
        "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        "ECDHE-RSA-AES128-GCM-SHA256",
        false,
    ),
    suite(
        "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        "ECDHE-ECDSA-AES256-GCM-SHA384",
        false,
    ),
    suite(
        "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        "ECDHE-RSA-AES256-GCM-SHA384",
        false,
    ),
    suite(
        "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        "ECDHE-ECDSA-CHACHA20-POLY1305",
        false,
    ),
    suite(
        "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        "ECDHE-RSA-CHACHA20-POLY1305",
        false,
    ),
    suite(
        "TLS_DHE_RSA_WITH_AES_128_GCM_SHA256",
        "DHE-RSA-AES128-GCM-SHA256",
        false,
    ),
    suite(
        "TLS_DHE_RSA_WITH_AES_256_GCM_SHA384",
        "DHE-RSA-AES256-GCM-SHA384",
        false,
    ),
    // Legacy suites, kept so old profiles still map to IANA names. The
    // serving order filters them out.
    suite(
        "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
        "ECDHE-ECDSA-AES128-SHA",
        false,
    ),
    suite(
        "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
        "ECDHE-RSA-AES128-SHA",
        false,
    ),
    suite(
        "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
        "ECDHE-ECDSA-AES256-SHA",
        false,
    ),
    suite(
        "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
        "ECDHE-RSA-AES256-SHA",
        false,
    ),
    suite("TLS_RSA_WITH_AES_128_GCM_SHA256", "AES128-GCM-SHA256", false),
    suite("TLS_RSA_WITH_AES_256_GCM_SHA384", "AES256-GCM-SHA384", false),
    suite("TLS_RSA_WITH_AES_128_CBC_SHA", "AES128-SHA", false),
    suite("TLS_RSA_WITH_AES_256_CBC_SHA", "AES256-SHA", false),
    suite("TLS_RSA_WITH_3DES_EDE_CBC_SHA", "DES-CBC3-SHA", false),
];

/// The serving order: TLS 1.3 suites first, then TLS 1.2 suites that are not
/// straight-SHA1 CBC and not 3DES.
pub fn cipher_order() -> Vec<&'static CipherSuite> {
    let allowable =
        |s: &CipherSuite| !s.iana.ends_with("CBC_SHA") && !s.iana.contains("3DES");

    let mut order: Vec<&CipherSuite> = CIPHER_SUITES.iter().filter(|s| s.tls13).collect();
    order.extend(CIPHER_SUITES.iter().filter(|s| !s.tls13 && allowable(s)));
    order
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TlsProfileType {
    Old,
    #[default]
    Intermediate,
    Modern,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MinTlsVersion {
    #[serde(rename = "VersionTLS10")]
    Tls10,
    #[serde(rename = "VersionTLS11")]
    Tls11,
    #[serde(rename = "VersionTLS12")]
    Tls12,
    #[serde(rename = "VersionTLS13")]
    Tls13,
}

impl MinTlsVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            MinTlsVersion::Tls10 => "VersionTLS10",
            MinTlsVersion::Tls11 => "VersionTLS11",
            MinTlsVersion::Tls12 => "VersionTLS12",
            MinTlsVersion::Tls13 => "VersionTLS13",
        }
    }

    fn as_ssl_version(&self) -> SslVersion {
        match self {
            MinTlsVersion::Tls10 => SslVersion::TLS1,
            MinTlsVersion::Tls11 => SslVersion::TLS1_1,
            MinTlsVersion::Tls12 => SslVersion::TLS1_2,
            MinTlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// The `tlsSecurityProfile` shape from the API-server manifest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsSecurityProfile {
    #[serde(rename = "type")]
    pub profile_type: TlsProfileType,
    pub custom: Option<TlsProfileSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TlsProfileSpec {
    pub ciphers: Vec<String>,
    #[serde(rename = "minTLSVersion")]
    pub min_tls_version: MinTlsVersion,
}

fn profile_spec(profile_type: TlsProfileType) -> TlsProfileSpec {
    let ciphers = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
    match profile_type {
        TlsProfileType::Modern => TlsProfileSpec {
            ciphers: ciphers(&[
                "TLS_AES_128_GCM_SHA256",
                "TLS_AES_256_GCM_SHA384",
                "TLS_CHACHA20_POLY1305_SHA256",
            ]),
            min_tls_version: MinTlsVersion::Tls13,
        },
        TlsProfileType::Old => TlsProfileSpec {
            ciphers: ciphers(&[
                "TLS_AES_128_GCM_SHA256",
                "TLS_AES_256_GCM_SHA384",
                "TLS_CHACHA20_POLY1305_SHA256",
                "ECDHE-ECDSA-AES128-GCM-SHA256",
                "ECDHE-RSA-AES128-GCM-SHA256",
                "ECDHE-ECDSA-AES256-GCM-SHA384",
                "ECDHE-RSA-AES256-GCM-SHA384",
                "ECDHE-ECDSA-CHACHA20-POLY1305",
                "ECDHE-RSA-CHACHA20-POLY1305",
                "DHE-RSA-AES128-GCM-SHA256",
                "DHE-RSA-AES256-GCM-SHA384",
                "ECDHE-ECDSA-AES128-SHA",
                "ECDHE-RSA-AES128-SHA",
                "ECDHE-ECDSA-AES256-SHA",
                "ECDHE-RSA-AES256-SHA",
                "AES128-GCM-SHA256",
                "AES256-GCM-SHA384",
                "AES128-SHA",
                "AES256-SHA",
                "DES-CBC3-SHA",
            ]),
            min_tls_version: MinTlsVersion::Tls10,
        },
        // Custom with no spec falls back here too.
        TlsProfileType::Intermediate | TlsProfileType::Custom => TlsProfileSpec {
            ciphers: ciphers(&[
                "TLS_AES_128_GCM_SHA256",
                "TLS_AES_256_GCM_SHA384",
                "TLS_CHACHA20_POLY1305_SHA256",
                "ECDHE-ECDSA-AES128-GCM-SHA256",
                "ECDHE-RSA-AES128-GCM-SHA256",
                "ECDHE-ECDSA-AES256-GCM-SHA384",
                "ECDHE-RSA-AES256-GCM-SHA384",
                "ECDHE-ECDSA-CHACHA20-POLY1305",
                "ECDHE-RSA-CHACHA20-POLY1305",
                "DHE-RSA-AES128-GCM-SHA256",
                "DHE-RSA-AES256-GCM-SHA384",
            ]),
            min_tls_version: MinTlsVersion::Tls12,
        },
    }
}

/// Minimum TLS version and cipher suites (IANA names) for a profile; a nil
/// profile means intermediate.
pub fn security_profile_ciphers(
    profile: Option<&TlsSecurityProfile>,
) -> (MinTlsVersion, Vec<String>) {
    let spec = match profile {
        None => profile_spec(TlsProfileType::Intermediate),
        Some(profile) => match (profile.profile_type, &profile.custom) {
            (TlsProfileType::Custom, Some(custom)) => custom.clone(),
            (profile_type, _) => profile_spec(profile_type),
        },
    };

    let ciphers = spec
        .ciphers
        .iter()
        .filter_map(|name| openssl_to_iana(name))
        .map(|name| name.to_string())
        .collect();
    (spec.min_tls_version, ciphers)
}

/// Remaps an OpenSSL suite name to its IANA name. TLS 1.3 suites already use
/// IANA names. Unknown names map to nothing.
fn openssl_to_iana(name: &str) -> Option<&'static str> {
    CIPHER_SUITES
        .iter()
        .find(|s| s.openssl == name || s.iana == name)
        .map(|s| s.iana)
}

// Manifest wrapper around the TLS profile, read once at bootstrap.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiServerManifest {
    pub spec: ApiServerSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiServerSpec {
    pub tls_security_profile: Option<TlsSecurityProfile>,
}

/// Reads the API-server manifest from disk. A missing file is not an error;
/// it just means no profile was provided at install time.
pub fn load_bootstrap_tls_profile(path: &Path) -> miette::Result<Option<TlsSecurityProfile>> {
    let raw = match std::fs::read(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(?path, "no bootstrap apiserver manifest found, using defaults");
            return Ok(None);
        }
        other => other
            .into_diagnostic()
            .wrap_err_with(|| format!("error reading apiserver manifest {path:?}"))?,
    };
    let manifest: ApiServerManifest = serde_yaml::from_slice(&raw)
        .into_diagnostic()
        .wrap_err_with(|| format!("unmarshal into apiserver manifest failed for {path:?}"))?;
    Ok(manifest.spec.tls_security_profile)
}

/// Assembles the listener TLS settings: rotation-aware certificate callback,
/// profile minimum version, and the fixed cipher order restricted to the
/// profile's suites.
pub fn build_tls_settings(
    resolver: ReloadingCertResolver,
    profile: Option<&TlsSecurityProfile>,
) -> miette::Result<TlsSettings> {
    let (min_version, profile_ciphers) = security_profile_ciphers(profile);

    let mut settings = TlsSettings::with_callbacks(Box::new(resolver))
        .map_err(|err| miette!("failed to build TLS settings: {err}"))?;
    settings
        .set_min_proto_version(Some(min_version.as_ssl_version()))
        .into_diagnostic()?;

    let allowed: HashSet<&str> = profile_ciphers.iter().map(String::as_str).collect();
    let order = cipher_order();

    let mut suites13: Vec<&str> = order
        .iter()
        .filter(|s| s.tls13 && allowed.contains(s.iana))
        .map(|s| s.openssl)
        .collect();
    if suites13.is_empty() {
        suites13 = order.iter().filter(|s| s.tls13).map(|s| s.openssl).collect();
    }
    settings
        .set_ciphersuites(&suites13.join(":"))
        .into_diagnostic()?;

    let suites12: Vec<&str> = order
        .iter()
        .filter(|s| !s.tls13 && allowed.contains(s.iana))
        .map(|s| s.openssl)
        .collect();
    if !suites12.is_empty() {
        settings
            .set_cipher_list(&suites12.join(":"))
            .into_diagnostic()?;
    }

    // No enable_h2: the TLS listener only ever offers HTTP/1.1.
    Ok(settings)
}
