//! Content-addressed naming for built artifacts.
//!
//! A build name is `<build-config-name>-<hex digest>` where the digest covers
//! a canonical list of inputs. Fields that can be supplied by either the
//! build config or the OS-image-URL config are hashed once in stabilized form
//! and once with their effective value, so swapping the authoritative source
//! of a value leaves the name unchanged.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fragment::OsImageUrlConfig;

// The salt is 80 random bytes, generated by `od -vAn -N80 -tu1 < /dev/urandom`.
// It keeps these digests from colliding with other md5 uses over similar
// inputs. Do not change it.
pub(crate) const NAME_HASH_SALT: [u8; 80] = [
    16, 124, 206, 228, 139, 56, 175, 175, 79, 229, 134, 118, 157, 154, 211, 110,
    25, 93, 47, 253, 172, 106, 37, 7, 174, 13, 160, 185, 110, 17, 87, 52,
    219, 131, 12, 206, 218, 141, 116, 135, 188, 181, 192, 151, 233, 62, 126, 165,
    64, 83, 179, 119, 15, 168, 208, 197, 146, 107, 58, 227, 133, 188, 238, 26,
    33, 26, 235, 202, 32, 173, 31, 234, 41, 144, 148, 79, 6, 206, 23, 22,
];

/// Reference to one source config by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigReference {
    pub name: String,
}

/// A pool's resolved configuration: the rendered config name plus the source
/// configs that composed it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfiguration {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<ConfigReference>,
}

/// Build inputs for one pool's artifact.
///
/// The pullspec/release fields may instead be supplied by the
/// [`OsImageUrlConfig`]; resolution is "build config wins".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    pub name: String,
    pub pool: String,
    pub base_os_image_pullspec: String,
    pub base_os_extensions_image_pullspec: String,
    pub release_version: String,
    pub image_pushspec: String,
}

/// Everything that participates in a build name.
#[derive(Debug, Clone)]
pub struct BuildNameInputs<'a> {
    pub build_config: &'a BuildConfig,
    pub pool: &'a PoolConfiguration,
    pub os_image_urls: &'a OsImageUrlConfig,
}

impl BuildNameInputs<'_> {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.build_config.name.is_empty() {
            return Err(ConfigError::Hash("missing build config name".to_string()));
        }
        if self.pool.name.is_empty() {
            return Err(ConfigError::Hash("missing pool configuration".to_string()));
        }
        if self.build_config.pool != self.pool.name {
            return Err(ConfigError::Hash(format!(
                "name mismatch, pool has {:?}, build config has {:?}",
                self.pool.name, self.build_config.pool
            )));
        }
        Ok(())
    }

    /// A copy with the multisource fields cleared, so the digest does not
    /// depend on which object supplied them.
    fn stabilized_build_config(&self) -> BuildConfig {
        BuildConfig {
            base_os_image_pullspec: String::new(),
            base_os_extensions_image_pullspec: String::new(),
            release_version: String::new(),
            ..self.build_config.clone()
        }
    }

    /// Same stabilization for the OS-image-URL side: the effective values are
    /// hashed separately, so the multisource fields are cleared here as well.
    fn stabilized_os_image_urls(&self) -> OsImageUrlConfig {
        OsImageUrlConfig {
            base_os_image: String::new(),
            extensions_image: String::new(),
            release_version: String::new(),
        }
    }

    pub fn extensions_image_pullspec(&self) -> &str {
        if self.build_config.base_os_extensions_image_pullspec.is_empty() {
            &self.os_image_urls.extensions_image
        } else {
            &self.build_config.base_os_extensions_image_pullspec
        }
    }

    pub fn base_os_image_pullspec(&self) -> &str {
        if self.build_config.base_os_image_pullspec.is_empty() {
            &self.os_image_urls.base_os_image
        } else {
            &self.build_config.base_os_image_pullspec
        }
    }

    pub fn release_version(&self) -> &str {
        if self.build_config.release_version.is_empty() {
            &self.os_image_urls.release_version
        } else {
            &self.build_config.release_version
        }
    }

    /// The digest alone, lowercase hex.
    pub fn hashed_name(&self) -> Result<String, ConfigError> {
        self.validate()?;

        let mut hasher = Md5::new();
        hasher.update(NAME_HASH_SALT);

        // The inputs, in order: the pool's resolved configuration reference,
        // the stabilized build config, the stabilized OS-image-URL config,
        // then the effective value of each multisource field.
        write_canonical(&mut hasher, self.pool)?;
        write_canonical(&mut hasher, &self.stabilized_build_config())?;
        write_canonical(&mut hasher, &self.stabilized_os_image_urls())?;
        write_canonical(&mut hasher, &self.extensions_image_pullspec())?;
        write_canonical(&mut hasher, &self.base_os_image_pullspec())?;
        write_canonical(&mut hasher, &self.release_version())?;

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// `<build-config-name>-<hex digest>`, used to tag the built artifact.
    pub fn build_name(&self) -> Result<String, ConfigError> {
        Ok(format!("{}-{}", self.build_config.name, self.hashed_name()?))
    }
}

/// Canonical structured-text form: JCS, so map keys have a total
/// lexicographic order no matter how the value was built.
fn write_canonical<T: Serialize>(hasher: &mut Md5, value: &T) -> Result<(), ConfigError> {
    let data =
        serde_json_canonicalizer::to_vec(value).map_err(|err| ConfigError::Hash(err.to_string()))?;
    hasher.update(&data);
    Ok(())
}
