//! Structural differences between two effective configurations.
//!
//! The outputs are consumed by collaborators that classify how disruptive a
//! change is; this module only reports what changed, sorted for determinism.

use std::collections::BTreeMap;

use crate::dialect::v3;
use crate::fragment::MergedConfig;

/// File paths that are added, removed, or structurally different between the
/// two configs.
pub fn config_file_diffs(old: &v3::Config, new: &v3::Config) -> Vec<String> {
    diff_keyed(
        old.storage.files.iter().map(|f| (f.path.as_str(), f)),
        new.storage.files.iter().map(|f| (f.path.as_str(), f)),
    )
}

/// Unit names that are added, removed, or structurally different between the
/// two configs.
pub fn config_unit_diffs(old: &v3::Config, new: &v3::Config) -> Vec<String> {
    diff_keyed(
        old.systemd.units.iter().map(|u| (u.name.as_str(), u)),
        new.systemd.units.iter().map(|u| (u.name.as_str(), u)),
    )
}

fn diff_keyed<'a, T: PartialEq + 'a>(
    old: impl Iterator<Item = (&'a str, &'a T)>,
    new: impl Iterator<Item = (&'a str, &'a T)>,
) -> Vec<String> {
    let old: BTreeMap<&str, &T> = old.collect();
    let new: BTreeMap<&str, &T> = new.collect();

    let mut diffs = Vec::new();
    for name in old.keys() {
        if !new.contains_key(name) {
            diffs.push((*name).to_string());
        }
    }
    for (name, value) in &new {
        match old.get(name) {
            None => diffs.push((*name).to_string()),
            Some(existing) if existing != value => diffs.push((*name).to_string()),
            Some(_) => {}
        }
    }
    diffs.sort();
    diffs.dedup();
    diffs
}

/// Whether the change between two merged configs needs the artifact rebuilt
/// rather than applied in place.
pub fn requires_rebuild(old: &MergedConfig, new: &MergedConfig) -> bool {
    old.os_image_url != new.os_image_url
        || old.kernel_type != new.kernel_type
        || old.extensions != new.extensions
        || old.kernel_arguments != new.kernel_arguments
}
