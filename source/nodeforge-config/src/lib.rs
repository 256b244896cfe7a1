//! Merge, translation, validation, hashing and diffing of node provisioning
//! configurations.
//!
//! This crate is the pure half of the system: every operation here is a
//! function over its inputs, with no process-wide state. The serving binary
//! owns the composition (which fragments exist, which certificate to present)
//! and calls down into this crate per request.
//!
//! The pipeline, leaves first:
//!
//! - [`codec`]: data-URL, gzip and base64 payload envelopes.
//! - [`dialect`]: the 2.x/3.x document models, tagged parsing, and version
//!   translation.
//! - [`normalize`]: duplicate elimination required before a 2.x document can
//!   be translated.
//! - [`merge`]: combining ordered fragments into one effective config.
//! - [`validate`]: kernel-type, file-mode and extension checks.
//! - [`hash`]: content-addressed build naming.
//! - [`diff`]: structural change detection between two configs.

pub mod codec;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod fragment;
pub mod hash;
pub mod merge;
pub mod normalize;
pub mod validate;

pub use dialect::convert::DialectConverter;
pub use dialect::ParsedConfig;
pub use error::{CodecError, ConfigError, ValidationError};
