use thiserror::Error;

use crate::dialect::report::Report;

/// Errors surfaced by the provisioning-config pipeline.
///
/// Parsing keeps `InvalidVersion` ("I can't parse it to find out what it is")
/// and `UnknownVersion` ("I know what it is and we don't serve it") apart so
/// that the dialect fallback logic can branch on the difference.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parsing provisioning config failed: invalid version. Supported spec versions: {supported}")]
    InvalidVersion { supported: String },

    #[error("parsing provisioning config failed: unknown version. Supported spec versions: {supported}")]
    UnknownVersion { supported: String },

    #[error("parsing provisioning config spec {dialect} failed with error: {message}\nReport: {report}")]
    Parse {
        dialect: &'static str,
        message: String,
        report: Report,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("converting config from {from} to {to} is not supported")]
    UnsupportedConversion {
        from: semver::Version,
        to: semver::Version,
    },

    #[error("unsupported version {requested}. Supported spec versions: {supported}")]
    UnsupportedVersion {
        requested: semver::Version,
        supported: String,
    },

    #[error("failed to marshal config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("could not compute build name: {0}")]
    Hash(String),

    #[error("no fragments to merge")]
    EmptyMerge,
}

/// Semantic rejections. A failed validation never yields a partial document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("kernelType={0} is invalid")]
    InvalidKernelType(String),

    #[error("invalid mode {mode:#o} for {path}, cannot exceed 0o777")]
    FileModeSpecialBits { path: String, mode: i64 },

    #[error("invalid extensions found: {0:?}")]
    UnknownExtensions(Vec<String>),

    #[error("installing the {extension} extension is not supported with kernelType: {kernel_type}")]
    ExtensionKernelConflict {
        extension: String,
        kernel_type: String,
    },

    #[error("unexpected user with name: {0}. Only the core user is supported")]
    UnexpectedUser(String),

    #[error("unsupported filesystem {filesystem:?} for {path}, only root is supported")]
    UnsupportedFilesystem { path: String, filesystem: String },

    #[error("duplicate {kind} entry {name:?} is not allowed by the target dialect")]
    DuplicateEntry { kind: &'static str, name: String },
}

/// Failures in the inline-payload decode paths.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Sentinel: the payload carries no gzip magic. Callers treat the
    /// original bytes as already-decoded configuration text.
    #[error("config is not gzipped")]
    NotGzipped,

    #[error("payload too short to classify")]
    Truncated,

    #[error("could not decode file content string: {0}")]
    DataUrl(String),

    #[error("decompression failed: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("unsupported compression type {0:?}")]
    UnsupportedCompression(String),
}
