//! Combines an ordered set of fragments into one effective configuration.
//!
//! The sort is alphanumeric overall, but base-pool fragments always come
//! first: when a custom pool exists, its configuration is expected to
//! override the base worker configuration. This mostly matters for generated
//! fragments whose pool name is part of the fragment name and cannot be
//! modified directly.

use crate::dialect::convert::DialectConverter;
use crate::dialect::{self, v3};
use crate::error::{ConfigError, ValidationError};
use crate::fragment::{
    Fragment, KernelType, MergedConfig, OsImageUrlConfig, KERNEL_TYPE_64K_PAGES,
    KERNEL_TYPE_REALTIME, ROLE_LABEL, WORKER_POOL,
};

/// Merges `fragments` into a single [`MergedConfig`].
///
/// The first fragment's document is the base; every later non-empty fragment
/// is translated to the working dialect and merged in, later entries
/// overriding earlier ones by path/name.
pub fn merge_fragments(
    fragments: &[Fragment],
    defaults: &OsImageUrlConfig,
    converter: &DialectConverter,
) -> Result<MergedConfig, ConfigError> {
    if fragments.is_empty() {
        return Err(ConfigError::EmptyMerge);
    }
    let ordered = order_fragments(fragments);

    let mut out = match ordered[0].config_bytes()? {
        Some(raw) => dialect::parse_and_convert_gzipped(&raw, converter)?,
        None => v3::new_config(),
    };

    for fragment in &ordered[1..] {
        let Some(raw) = fragment.config_bytes()? else {
            continue;
        };
        let mut incoming = dialect::parse_and_convert_gzipped(&raw, converter)?;

        // The document merge maps contents and compression independently, so
        // an incoming file that only overrides the source would keep a stale
        // compression from an earlier merge and the node would try to inflate
        // plain bytes. Making the absent field an explicit empty string turns
        // it into an override for the duration of the merge; afterwards the
        // empty markers are folded back to absent.
        set_files_default_compression(&mut incoming);
        out = merge_config(out, incoming);
        unset_files_default_compression(&mut out);
    }

    // The provisioning agent does not overwrite files by default; this
    // pipeline always does. Scaling new nodes diverges without this.
    for file in &mut out.storage.files {
        if file.overwrite.is_none() {
            file.overwrite = Some(true);
        }
    }

    let fips = ordered.iter().any(|f| f.fips);
    let kernel_type = resolve_kernel_type(&ordered);

    let kernel_arguments: Vec<String> = ordered
        .iter()
        .flat_map(|f| f.kernel_arguments.iter().cloned())
        .collect();
    let extensions: Vec<String> = ordered
        .iter()
        .flat_map(|f| f.extensions.iter().cloned())
        .collect();

    // kernel-devel only builds against the default kernel.
    if kernel_type != KernelType::Default && extensions.iter().any(|e| e == "kernel-devel") {
        return Err(ValidationError::ExtensionKernelConflict {
            extension: "kernel-devel".to_string(),
            kernel_type: kernel_type.to_string(),
        }
        .into());
    }

    let mut os_image_url = defaults.base_os_image.clone();
    let mut extensions_image = defaults.extensions_image.clone();
    for fragment in &ordered {
        if let Some(url) = fragment.os_image_url.as_deref() {
            if !url.is_empty() {
                os_image_url = url.to_string();
            }
        }
        if let Some(url) = fragment.extensions_image_url.as_deref() {
            if !url.is_empty() {
                extensions_image = url.to_string();
            }
        }
    }

    Ok(MergedConfig {
        os_image_url,
        extensions_image,
        kernel_arguments,
        kernel_type,
        fips,
        extensions,
        config: out,
    })
}

/// Worker-labeled fragments first, then everything else; both groups stably
/// sorted by name.
fn order_fragments(fragments: &[Fragment]) -> Vec<&Fragment> {
    let (mut workers, mut others): (Vec<&Fragment>, Vec<&Fragment>) = fragments
        .iter()
        .partition(|f| f.labels.get(ROLE_LABEL).map(String::as_str) == Some(WORKER_POOL));
    workers.sort_by(|a, b| a.name.cmp(&b.name));
    others.sort_by(|a, b| a.name.cmp(&b.name));
    workers.extend(others);
    workers
}

/// The last fragment requesting a non-default kernel wins.
fn resolve_kernel_type(fragments: &[&Fragment]) -> KernelType {
    let mut kernel_type = KernelType::Default;
    for fragment in fragments {
        match fragment.kernel_type.as_deref() {
            Some(KERNEL_TYPE_REALTIME) => kernel_type = KernelType::Realtime,
            Some(KERNEL_TYPE_64K_PAGES) => kernel_type = KernelType::HugePages64k,
            _ => {}
        }
    }
    kernel_type
}

fn set_files_default_compression(config: &mut v3::Config) {
    for file in &mut config.storage.files {
        if file.contents.compression.is_none() {
            file.contents.compression = Some(String::new());
        }
    }
}

fn unset_files_default_compression(config: &mut v3::Config) {
    for file in &mut config.storage.files {
        if file.contents.compression.as_deref() == Some("") {
            file.contents.compression = None;
        }
    }
}

/// Field-level merge of two documents. Entries are keyed (files by path,
/// units by name, drop-ins by name, users by name); an unset child field
/// inherits the parent's value, scalar lists are replaced wholesale, and
/// child-only entries append in their own order.
pub fn merge_config(parent: v3::Config, child: v3::Config) -> v3::Config {
    v3::Config {
        ignition: merge_ignition(parent.ignition, child.ignition),
        storage: v3::Storage {
            files: merge_keyed(
                parent.storage.files,
                child.storage.files,
                |f| f.path.clone(),
                merge_file,
            ),
        },
        systemd: v3::Systemd {
            units: merge_keyed(
                parent.systemd.units,
                child.systemd.units,
                |u| u.name.clone(),
                merge_unit,
            ),
        },
        passwd: v3::Passwd {
            users: merge_keyed(
                parent.passwd.users,
                child.passwd.users,
                |u| u.name.clone(),
                merge_user,
            ),
        },
    }
}

fn merge_keyed<T, K, M>(parent: Vec<T>, child: Vec<T>, key: K, merge: M) -> Vec<T>
where
    K: Fn(&T) -> String,
    M: Fn(T, T) -> T,
{
    let mut pending: Vec<Option<T>> = child.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(parent.len() + pending.len());

    for entry in parent {
        let entry_key = key(&entry);
        let matched = pending.iter_mut().find_map(|slot| {
            if slot.as_ref().is_some_and(|c| key(c) == entry_key) {
                slot.take()
            } else {
                None
            }
        });
        out.push(match matched {
            Some(child_entry) => merge(entry, child_entry),
            None => entry,
        });
    }

    out.extend(pending.into_iter().flatten());
    out
}

fn merge_ignition(parent: v3::Ignition, child: v3::Ignition) -> v3::Ignition {
    v3::Ignition {
        version: if child.version.is_empty() {
            parent.version
        } else {
            child.version
        },
        config: v3::IgnitionConfig {
            merge: merge_keyed(
                parent.config.merge,
                child.config.merge,
                |r| r.source.clone().unwrap_or_default(),
                merge_resource,
            ),
            replace: match (parent.config.replace, child.config.replace) {
                (Some(p), Some(c)) => Some(merge_resource(p, c)),
                (p, c) => c.or(p),
            },
        },
        security: v3::Security {
            tls: v3::Tls {
                certificate_authorities: merge_keyed(
                    parent.security.tls.certificate_authorities,
                    child.security.tls.certificate_authorities,
                    |r| r.source.clone().unwrap_or_default(),
                    merge_resource,
                ),
            },
        },
    }
}

fn merge_resource(parent: v3::Resource, child: v3::Resource) -> v3::Resource {
    v3::Resource {
        source: child.source.or(parent.source),
        compression: child.compression.or(parent.compression),
    }
}

fn merge_file(parent: v3::File, child: v3::File) -> v3::File {
    v3::File {
        path: parent.path,
        overwrite: child.overwrite.or(parent.overwrite),
        mode: child.mode.or(parent.mode),
        contents: merge_resource(parent.contents, child.contents),
    }
}

fn merge_unit(parent: v3::Unit, child: v3::Unit) -> v3::Unit {
    v3::Unit {
        name: parent.name,
        enabled: child.enabled.or(parent.enabled),
        mask: child.mask.or(parent.mask),
        contents: child.contents.or(parent.contents),
        dropins: merge_keyed(
            parent.dropins,
            child.dropins,
            |d| d.name.clone(),
            merge_dropin,
        ),
    }
}

fn merge_dropin(parent: v3::Dropin, child: v3::Dropin) -> v3::Dropin {
    v3::Dropin {
        name: parent.name,
        contents: child.contents.or(parent.contents),
    }
}

fn merge_user(parent: v3::User, child: v3::User) -> v3::User {
    v3::User {
        name: parent.name,
        ssh_authorized_keys: if child.ssh_authorized_keys.is_empty() {
            parent.ssh_authorized_keys
        } else {
            child.ssh_authorized_keys
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;

    use super::*;
    use crate::codec::{self, dataurl};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn fragment(name: &str, role: &str, config: Option<serde_json::Value>) -> Fragment {
        Fragment {
            name: name.to_string(),
            labels: BTreeMap::from([(ROLE_LABEL.to_string(), role.to_string())]),
            config,
            ..Fragment::default()
        }
    }

    fn config_with_file(file: v3::File) -> serde_json::Value {
        serde_json::json!({
            "ignition": {"version": "3.5.0"},
            "storage": {"files": [serde_json::to_value(file).unwrap()]},
        })
    }

    #[test]
    fn later_fragment_clears_stale_compression() {
        let converter = DialectConverter::new();

        let gzipped = v3::File {
            path: "/etc/x".to_string(),
            contents: v3::Resource {
                source: Some(dataurl::encode(&gzip(b"hello"))),
                compression: Some("gzip".to_string()),
            },
            ..v3::File::default()
        };
        let plain = v3::File {
            path: "/etc/x".to_string(),
            contents: v3::Resource {
                source: Some(dataurl::encode(b"world")),
                compression: None,
            },
            ..v3::File::default()
        };

        let fragments = vec![
            fragment("00-base", "worker", Some(config_with_file(gzipped))),
            fragment("99-override", "worker", Some(config_with_file(plain))),
        ];

        let merged =
            merge_fragments(&fragments, &OsImageUrlConfig::default(), &converter).unwrap();
        let file = &merged.config.storage.files[0];
        assert_eq!(file.contents.compression, None);
        assert_eq!(
            codec::decode_file_contents(
                file.contents.source.as_deref(),
                file.contents.compression.as_deref()
            )
            .unwrap(),
            b"world"
        );
    }

    #[test]
    fn every_incoming_file_overrides_compression() {
        let converter = DialectConverter::new();

        let gzipped = v3::File {
            path: "/etc/x".to_string(),
            contents: v3::Resource {
                source: Some(dataurl::encode(&gzip(b"hello"))),
                compression: Some("gzip".to_string()),
            },
            ..v3::File::default()
        };
        let mode_only = v3::File {
            path: "/etc/x".to_string(),
            mode: Some(0o600),
            ..v3::File::default()
        };

        let fragments = vec![
            fragment("00-base", "worker", Some(config_with_file(gzipped))),
            fragment("99-mode", "worker", Some(config_with_file(mode_only))),
        ];

        let merged =
            merge_fragments(&fragments, &OsImageUrlConfig::default(), &converter).unwrap();
        let file = &merged.config.storage.files[0];
        assert_eq!(file.mode, Some(0o600));
        // The parent's source survives, but any incoming file entry resets
        // the compression field unless it sets one itself.
        assert!(file.contents.source.is_some());
        assert_eq!(file.contents.compression, None);
    }

    #[test]
    fn overwrite_defaults_to_true() {
        let converter = DialectConverter::new();
        let file = v3::File {
            path: "/etc/a".to_string(),
            contents: v3::Resource {
                source: Some(dataurl::encode(b"a")),
                compression: None,
            },
            ..v3::File::default()
        };
        let fragments = vec![fragment("00-base", "worker", Some(config_with_file(file)))];
        let merged =
            merge_fragments(&fragments, &OsImageUrlConfig::default(), &converter).unwrap();
        assert!(merged
            .config
            .storage
            .files
            .iter()
            .all(|f| f.overwrite == Some(true)));
    }

    #[test]
    fn merge_is_deterministic_for_equivalent_orderings() {
        let converter = DialectConverter::new();
        let a = fragment(
            "00-base",
            "worker",
            Some(config_with_file(v3::File {
                path: "/etc/a".to_string(),
                ..v3::File::default()
            })),
        );
        let mut b = fragment(
            "50-infra",
            "infra",
            Some(config_with_file(v3::File {
                path: "/etc/b".to_string(),
                ..v3::File::default()
            })),
        );
        b.kernel_arguments = vec!["nosmt".to_string()];

        let forward =
            merge_fragments(&[a.clone(), b.clone()], &OsImageUrlConfig::default(), &converter)
                .unwrap();
        let backward =
            merge_fragments(&[b, a], &OsImageUrlConfig::default(), &converter).unwrap();
        assert_eq!(forward, backward);
        // worker-pool fragments sort ahead of custom pools
        assert_eq!(forward.config.storage.files[0].path, "/etc/a");
    }

    #[test]
    fn kernel_args_concatenate_without_dedup() {
        let converter = DialectConverter::new();
        let mut a = fragment("00-a", "worker", None);
        a.kernel_arguments = vec!["nosmt".to_string()];
        let mut b = fragment("01-b", "worker", None);
        b.kernel_arguments = vec!["nosmt".to_string(), "quiet".to_string()];
        let merged =
            merge_fragments(&[a, b], &OsImageUrlConfig::default(), &converter).unwrap();
        assert_eq!(merged.kernel_arguments, vec!["nosmt", "nosmt", "quiet"]);
    }

    #[test]
    fn fips_is_ored_and_kernel_type_last_special_wins() {
        let converter = DialectConverter::new();
        let mut a = fragment("00-a", "worker", None);
        a.fips = true;
        a.kernel_type = Some(KERNEL_TYPE_REALTIME.to_string());
        let mut b = fragment("01-b", "worker", None);
        b.kernel_type = Some("default".to_string());
        let merged =
            merge_fragments(&[a, b], &OsImageUrlConfig::default(), &converter).unwrap();
        assert!(merged.fips);
        assert_eq!(merged.kernel_type, KernelType::Realtime);
    }

    #[test]
    fn kernel_devel_with_nondefault_kernel_fails() {
        let converter = DialectConverter::new();
        let mut a = fragment("00-a", "worker", None);
        a.kernel_type = Some(KERNEL_TYPE_REALTIME.to_string());
        a.extensions = vec!["kernel-devel".to_string()];
        let err = merge_fragments(&[a], &OsImageUrlConfig::default(), &converter).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("kernel-devel"));
        assert!(message.contains("realtime"));
    }

    #[test]
    fn kernel_devel_with_default_kernel_is_fine() {
        let converter = DialectConverter::new();
        let mut a = fragment("00-a", "worker", None);
        a.extensions = vec!["kernel-devel".to_string()];
        let mut b = fragment("01-b", "worker", None);
        b.kernel_type = Some(KERNEL_TYPE_REALTIME.to_string());

        let merged =
            merge_fragments(&[a.clone()], &OsImageUrlConfig::default(), &converter).unwrap();
        assert_eq!(merged.extensions, vec!["kernel-devel"]);

        // the realtime kernel alone is fine too
        merge_fragments(&[b], &OsImageUrlConfig::default(), &converter).unwrap();
    }

    #[test]
    fn os_image_overrides_replace_the_default() {
        let converter = DialectConverter::new();
        let defaults = OsImageUrlConfig {
            base_os_image: "quay.io/os:base".to_string(),
            extensions_image: "quay.io/os:ext".to_string(),
            release_version: "4.0.0".to_string(),
        };
        let mut a = fragment("00-a", "worker", None);
        a.os_image_url = Some("quay.io/custom:1".to_string());
        let mut b = fragment("01-b", "worker", None);
        b.os_image_url = Some("quay.io/custom:2".to_string());

        let merged = merge_fragments(&[a, b], &defaults, &converter).unwrap();
        assert_eq!(merged.os_image_url, "quay.io/custom:2");
        assert_eq!(merged.extensions_image, "quay.io/os:ext");
    }

    #[test]
    fn empty_fragment_list_is_an_error() {
        let converter = DialectConverter::new();
        assert!(matches!(
            merge_fragments(&[], &OsImageUrlConfig::default(), &converter),
            Err(ConfigError::EmptyMerge)
        ));
    }

    #[test]
    fn string_embedded_gzipped_config_merges() {
        use base64::Engine as _;

        let converter = DialectConverter::new();
        let plain = serde_json::json!({
            "ignition": {"version": "3.2.0"},
            "storage": {"files": [{"path": "/etc/from-gzip"}]},
        });
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(gzip(plain.to_string().as_bytes()));

        let fragments = vec![fragment(
            "00-wrapped",
            "worker",
            Some(serde_json::Value::String(encoded)),
        )];
        let merged =
            merge_fragments(&fragments, &OsImageUrlConfig::default(), &converter).unwrap();
        assert_eq!(merged.config.storage.files[0].path, "/etc/from-gzip");
    }

    #[test]
    fn unit_dropins_merge_by_name() {
        let parent = v3::Config {
            systemd: v3::Systemd {
                units: vec![v3::Unit {
                    name: "kubelet.service".to_string(),
                    enabled: Some(true),
                    dropins: vec![v3::Dropin {
                        name: "10-base.conf".to_string(),
                        contents: Some("[Service]".to_string()),
                    }],
                    ..v3::Unit::default()
                }],
            },
            ..v3::new_config()
        };
        let child = v3::Config {
            systemd: v3::Systemd {
                units: vec![v3::Unit {
                    name: "kubelet.service".to_string(),
                    dropins: vec![v3::Dropin {
                        name: "20-extra.conf".to_string(),
                        contents: Some("[Service]\nCPUQuota=50%".to_string()),
                    }],
                    ..v3::Unit::default()
                }],
            },
            ..v3::new_config()
        };

        let merged = merge_config(parent, child);
        let unit = &merged.systemd.units[0];
        assert_eq!(unit.enabled, Some(true));
        assert_eq!(unit.dropins.len(), 2);
    }
}
