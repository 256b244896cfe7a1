//! The get-config collaborator: where pool configurations come from.
//!
//! The serving layer only knows this trait. The bootstrap implementation
//! renders pools from fragment manifests on disk; tests plug in a static
//! source.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;

use async_trait::async_trait;
use miette::{Context, IntoDiagnostic};
use semver::Version;

use nodeforge_config::fragment::{Fragment, OsImageUrlConfig};
use nodeforge_config::{merge, validate, DialectConverter};

/// One pool request, as resolved by the serving layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolRequest {
    pub pool: String,
    pub version: Version,
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Raw provisioning-config bytes for a pool, or `None` when the pool is
    /// unknown.
    async fn get_config(&self, request: &PoolRequest) -> miette::Result<Option<Vec<u8>>>;
}

/// Renders pools from a directory of fragment manifests (YAML or JSON, one
/// fragment per file). Fragments are matched to the requested pool by role
/// label, validated, and merged per request; nothing is cached or persisted.
pub struct BootstrapConfigSource {
    manifests_dir: PathBuf,
    defaults: OsImageUrlConfig,
    converter: DialectConverter,
}

impl BootstrapConfigSource {
    pub fn new(
        manifests_dir: PathBuf,
        defaults: OsImageUrlConfig,
        converter: DialectConverter,
    ) -> Self {
        Self {
            manifests_dir,
            defaults,
            converter,
        }
    }

    async fn load_fragments(&self) -> miette::Result<Vec<Fragment>> {
        let mut entries = tokio::fs::read_dir(&self.manifests_dir)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read manifests dir {:?}", self.manifests_dir))?;

        let mut fragments = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .into_diagnostic()
            .wrap_err("failed to list manifests dir")?
        {
            let path = entry.path();
            match path.extension().and_then(OsStr::to_str) {
                Some("yaml" | "yml" | "json") => {}
                _ => continue,
            }

            let raw = tokio::fs::read_to_string(&path)
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read manifest {path:?}"))?;
            let fragment: Fragment = serde_yaml::from_str(&raw)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to parse manifest {path:?}"))?;
            fragments.push(fragment);
        }

        Ok(fragments)
    }
}

#[async_trait]
impl ConfigSource for BootstrapConfigSource {
    async fn get_config(&self, request: &PoolRequest) -> miette::Result<Option<Vec<u8>>> {
        let fragments: Vec<Fragment> = self
            .load_fragments()
            .await?
            .into_iter()
            .filter(|f| f.role() == Some(request.pool.as_str()))
            .collect();

        if fragments.is_empty() {
            return Ok(None);
        }
        tracing::debug!(
            pool = %request.pool,
            fragments = fragments.len(),
            "rendering pool from fragments"
        );

        for fragment in &fragments {
            validate::validate_fragment(fragment, &self.converter)
                .into_diagnostic()
                .wrap_err_with(|| format!("fragment {:?} failed validation", fragment.name))?;
        }

        let merged = merge::merge_fragments(&fragments, &self.defaults, &self.converter)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to render pool {:?}", request.pool))?;

        serde_json::to_vec(&merged.config)
            .into_diagnostic()
            .map(Some)
    }
}

/// Fixed pool-to-bytes mapping, for wiring tests together.
#[derive(Default)]
pub struct StaticConfigSource {
    configs: HashMap<String, Vec<u8>>,
}

impl StaticConfigSource {
    pub fn new(configs: HashMap<String, Vec<u8>>) -> Self {
        Self { configs }
    }

    pub fn insert(&mut self, pool: impl Into<String>, raw: Vec<u8>) {
        self.configs.insert(pool.into(), raw);
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn get_config(&self, request: &PoolRequest) -> miette::Result<Option<Vec<u8>>> {
        Ok(self.configs.get(&request.pool).cloned())
    }
}
