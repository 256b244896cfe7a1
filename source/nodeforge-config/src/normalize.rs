//! Duplicate elimination for 2.x documents.
//!
//! The 2.x wire format tolerates repeated files, units and users; the 3.x
//! dialect (and the translator) does not. This pass keeps ordering intact and
//! keeps the last-declared version of a file, so the final on-disk behavior
//! does not change.
//!
//! Appends are not considered; appending is not allowed in these documents.
//! Units are the one exception: drop-ins are concatenated.

use std::collections::{HashMap, HashSet};

use crate::dialect::v2;
use crate::error::{ConfigError, ValidationError};
use crate::fragment::CORE_USER_NAME;

/// Removes the duplicate entries a 3.x translation would reject.
pub fn remove_duplicate_entries(mut config: v2::Config) -> Result<v2::Config, ConfigError> {
    config.storage.files = dedup_files(config.storage.files);
    config.systemd.units = dedup_units(config.systemd.units);
    config.passwd.users = collapse_users(config.passwd.users)?;
    Ok(config)
}

/// Walks in reverse so the last-declared entry for a path wins, then restores
/// the original relative ordering.
fn dedup_files(files: Vec<v2::File>) -> Vec<v2::File> {
    let mut seen = HashSet::new();
    let mut out: Vec<v2::File> = files
        .into_iter()
        .rev()
        .filter(|file| seen.insert(file.path.clone()))
        .collect();
    out.reverse();
    out
}

/// Keeps the last-declared entry for each unit name. Drop-ins from discarded
/// duplicates are appended to the kept entry unless it already carries a
/// drop-in of the same name.
fn dedup_units(units: Vec<v2::Unit>) -> Vec<v2::Unit> {
    let mut kept: Vec<v2::Unit> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for unit in units.into_iter().rev() {
        match index.get(&unit.name) {
            Some(&at) => {
                if unit.dropins.is_empty() {
                    continue;
                }
                tracing::debug!(unit = %unit.name, "found duplicate unit, appending dropin section");
                let existing = &mut kept[at];
                for dropin in unit.dropins {
                    if !existing.dropins.iter().any(|d| d.name == dropin.name) {
                        existing.dropins.push(dropin);
                    }
                }
            }
            None => {
                index.insert(unit.name.clone(), kept.len());
                kept.push(unit);
            }
        }
    }

    kept.reverse();
    kept
}

/// Collapses all users into the newest entry, concatenating SSH keys from the
/// older entries. Only the core user is supported; install-time configs could
/// technically have created another one, so that is an explicit error.
fn collapse_users(users: Vec<v2::User>) -> Result<Vec<v2::User>, ConfigError> {
    let mut older = users;
    let Some(mut newest) = older.pop() else {
        return Ok(Vec::new());
    };
    if newest.name != CORE_USER_NAME {
        return Err(ValidationError::UnexpectedUser(newest.name).into());
    }

    for user in older.into_iter().rev() {
        if user.name != CORE_USER_NAME {
            return Err(ValidationError::UnexpectedUser(user.name).into());
        }
        newest.ssh_authorized_keys.extend(user.ssh_authorized_keys);
    }

    newest.ssh_authorized_keys = dedup_ssh_keys(newest.ssh_authorized_keys);
    Ok(vec![newest])
}

/// First-seen order is preserved; duplicates are dropped.
fn dedup_ssh_keys(keys: Vec<String>) -> Vec<String> {
    let mut known = HashSet::new();
    keys.into_iter()
        .filter(|key| {
            let fresh = known.insert(key.clone());
            if !fresh {
                tracing::debug!(%key, "duplicate SSH public key found");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, source: &str) -> v2::File {
        v2::File {
            filesystem: "root".to_string(),
            path: path.to_string(),
            contents: v2::FileContents {
                source: source.to_string(),
                compression: String::new(),
            },
            ..v2::File::default()
        }
    }

    fn unit(name: &str, dropins: &[&str]) -> v2::Unit {
        v2::Unit {
            name: name.to_string(),
            dropins: dropins
                .iter()
                .map(|d| v2::Dropin {
                    name: d.to_string(),
                    contents: format!("[Service]\n# {d}"),
                })
                .collect(),
            ..v2::Unit::default()
        }
    }

    fn user(name: &str, keys: &[&str]) -> v2::User {
        v2::User {
            name: name.to_string(),
            ssh_authorized_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn last_declared_file_wins_and_order_is_kept() {
        let config = v2::Config {
            storage: v2::Storage {
                files: vec![
                    file("/etc/a", "data:,old"),
                    file("/etc/b", "data:,b"),
                    file("/etc/a", "data:,new"),
                ],
            },
            ..v2::Config::default()
        };
        let out = remove_duplicate_entries(config).unwrap();
        let files = &out.storage.files;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "/etc/b");
        assert_eq!(files[1].path, "/etc/a");
        assert_eq!(files[1].contents.source, "data:,new");
    }

    #[test]
    fn duplicate_unit_dropins_are_appended_once() {
        // The later declaration has no drop-ins; the earlier one carries two.
        let config = v2::Config {
            systemd: v2::Systemd {
                units: vec![unit("n.service", &["d1.conf", "d2.conf"]), unit("n.service", &[])],
            },
            ..v2::Config::default()
        };
        let out = remove_duplicate_entries(config).unwrap();
        let units = &out.systemd.units;
        assert_eq!(units.len(), 1);
        let names: Vec<&str> = units[0].dropins.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["d1.conf", "d2.conf"]);
    }

    #[test]
    fn dropin_name_collisions_keep_the_newest() {
        let mut newest = unit("n.service", &["shared.conf"]);
        newest.dropins[0].contents = "[Service]\n# newest".to_string();
        let config = v2::Config {
            systemd: v2::Systemd {
                units: vec![unit("n.service", &["shared.conf", "extra.conf"]), newest],
            },
            ..v2::Config::default()
        };
        let out = remove_duplicate_entries(config).unwrap();
        let dropins = &out.systemd.units[0].dropins;
        assert_eq!(dropins.len(), 2);
        assert_eq!(dropins[0].contents, "[Service]\n# newest");
        assert_eq!(dropins[1].name, "extra.conf");
    }

    #[test]
    fn ssh_keys_concatenate_newest_first_and_dedupe() {
        let config = v2::Config {
            passwd: v2::Passwd {
                users: vec![
                    user("core", &["key-a", "key-b"]),
                    user("core", &["key-c", "key-a"]),
                ],
            },
            ..v2::Config::default()
        };
        let out = remove_duplicate_entries(config).unwrap();
        let users = &out.passwd.users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].ssh_authorized_keys, vec!["key-c", "key-a", "key-b"]);
    }

    #[test]
    fn non_core_user_is_fatal() {
        let config = v2::Config {
            passwd: v2::Passwd {
                users: vec![user("core", &[]), user("admin", &[])],
            },
            ..v2::Config::default()
        };
        let err = remove_duplicate_entries(config).unwrap_err();
        assert!(err.to_string().contains("admin"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let config = v2::Config {
            storage: v2::Storage {
                files: vec![
                    file("/etc/a", "data:,old"),
                    file("/etc/b", "data:,b"),
                    file("/etc/a", "data:,new"),
                ],
            },
            systemd: v2::Systemd {
                units: vec![unit("n.service", &["d1.conf"]), unit("n.service", &[])],
            },
            passwd: v2::Passwd {
                users: vec![user("core", &["k1"]), user("core", &["k2", "k1"])],
            },
            ..v2::Config::default()
        };
        let once = remove_duplicate_entries(config).unwrap();
        let twice = remove_duplicate_entries(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
