//! Fragment and merged-configuration value objects.
//!
//! A fragment is one user-authored or generated input to the merge: a subset
//! of provisioning document plus OS-level knobs. Fragments are value objects;
//! the merge engine consumes references and allocates a fresh result.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::v3;
use crate::error::ConfigError;

/// Label keying a fragment to the role/pool it belongs to.
pub const ROLE_LABEL: &str = "nodeforge.dev/role";

/// The base pool. Custom-pool fragments override fragments of this pool.
pub const WORKER_POOL: &str = "worker";

/// The only login user these systems carry.
pub const CORE_USER_NAME: &str = "core";

pub const KERNEL_TYPE_DEFAULT: &str = "default";
pub const KERNEL_TYPE_REALTIME: &str = "realtime";
pub const KERNEL_TYPE_64K_PAGES: &str = "64k-pages";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KernelType {
    #[default]
    Default,
    Realtime,
    HugePages64k,
}

impl KernelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelType::Default => KERNEL_TYPE_DEFAULT,
            KernelType::Realtime => KERNEL_TYPE_REALTIME,
            KernelType::HugePages64k => KERNEL_TYPE_64K_PAGES,
        }
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One named input to the merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fragment {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,
    /// Embedded provisioning document, any supported dialect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kernel_arguments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_type: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub fips: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

impl Fragment {
    /// A fragment wrapping raw provisioning-config bytes under a role label.
    pub fn from_raw_config(role: &str, name: &str, raw: &[u8]) -> Result<Self, ConfigError> {
        let config: serde_json::Value = serde_json::from_slice(raw).map_err(|err| {
            ConfigError::Parse {
                dialect: "v3",
                message: err.to_string(),
                report: crate::dialect::report::Report::default(),
            }
        })?;
        Ok(Fragment {
            name: name.to_string(),
            labels: BTreeMap::from([(ROLE_LABEL.to_string(), role.to_string())]),
            config: Some(config),
            ..Fragment::default()
        })
    }

    pub fn role(&self) -> Option<&str> {
        self.labels.get(ROLE_LABEL).map(String::as_str)
    }

    /// The embedded document as raw bytes, if any.
    ///
    /// A structured document serializes to JSON; a string value is taken
    /// verbatim, which lets a manifest embed pre-rendered (possibly gzipped
    /// and base64-wrapped) configuration text.
    pub fn config_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match &self.config {
            None => Ok(None),
            Some(serde_json::Value::String(raw)) => Ok(Some(raw.clone().into_bytes())),
            Some(value) => serde_json::to_vec(value)
                .map(Some)
                .map_err(ConfigError::Serialize),
        }
    }
}

/// Resolved image references handed in by the composition root; the merge
/// starts from these and lets fragments override them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OsImageUrlConfig {
    pub base_os_image: String,
    pub extensions_image: String,
    pub release_version: String,
}

/// The effective configuration for one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    pub os_image_url: String,
    pub extensions_image: String,
    pub kernel_arguments: Vec<String>,
    pub kernel_type: KernelType,
    pub fips: bool,
    pub extensions: Vec<String>,
    pub config: v3::Config,
}
