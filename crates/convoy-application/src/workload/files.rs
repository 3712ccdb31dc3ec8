//! Config file mounts
//!
//! Every config path is resolved against the file store and its leaf files
//! are grouped by mount path. Each mount path becomes one ConfigMap volume
//! projecting its files by basename, plus one mount on the container.

use std::collections::BTreeMap;

use convoy_common::crd::Config;
use convoy_common::files::{FileItem, FileStore};
use convoy_common::kube_utils::config_volume_name;
use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, KeyToPath, Volume, VolumeMount};
use tracing::warn;

/// Volumes and mounts produced for a component's configs
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledConfigs {
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
}

/// Leaf items per mount path, deduplicated by store key
pub type MountAccumulator = BTreeMap<String, BTreeMap<String, FileItem>>;

/// Record a resolved tree under its mount path
pub fn resolve_mount_paths(acc: &mut MountAccumulator, mount_path: &str, items: Vec<FileItem>) {
    let entry = acc.entry(mount_path.to_string()).or_default();
    for item in items {
        entry.entry(item.key()).or_insert(item);
    }
}

/// Compile config mounts for one component
///
/// Paths that do not resolve are logged and skipped. Without a file store
/// no config volumes are produced.
pub fn compile(component: &str, configs: &[Config], store: Option<&FileStore>) -> CompiledConfigs {
    if configs.is_empty() {
        return CompiledConfigs::default();
    }
    let Some(store) = store else {
        warn!(component, "File store unavailable, skipping config mounts");
        return CompiledConfigs::default();
    };

    let mut acc = MountAccumulator::new();
    for config in configs {
        for path in &config.paths {
            match store.item_tree(path) {
                Some(items) => resolve_mount_paths(&mut acc, &config.mount_path, items),
                None => warn!(
                    component,
                    path = %path,
                    mount_path = %config.mount_path,
                    "Config path not found in file store, skipping"
                ),
            }
        }
    }

    let mut compiled = CompiledConfigs::default();
    for (mount_path, items) in acc {
        if items.is_empty() {
            continue;
        }
        let name = config_volume_name(&mount_path);
        compiled.volumes.push(Volume {
            name: name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: store.config_map_name.clone(),
                items: Some(
                    items
                        .values()
                        .map(|item| KeyToPath {
                            key: item.key(),
                            path: item.file_name().to_string(),
                            mode: None,
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        });
        compiled.volume_mounts.push(VolumeMount {
            name,
            mount_path,
            read_only: Some(true),
            ..Default::default()
        });
    }
    compiled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FileStore {
        FileStore::from_paths(
            "convoy-files",
            [
                "/nginx/nginx.conf",
                "/nginx/conf.d/app.conf",
                "/redis.conf",
            ],
        )
    }

    fn config(mount_path: &str, paths: &[&str]) -> Config {
        Config {
            mount_path: mount_path.to_string(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Story: two config entries target the same directory and overlap. The
    /// pod gets one volume for the directory with each file listed once.
    #[test]
    fn story_configs_sharing_a_mount_path_are_merged() {
        let store = store();
        let compiled = compile(
            "web",
            &[
                config("/etc/nginx", &["/nginx/"]),
                config("/etc/nginx", &["/nginx/nginx.conf"]),
            ],
            Some(&store),
        );

        assert_eq!(compiled.volumes.len(), 1);
        assert_eq!(compiled.volume_mounts.len(), 1);

        let volume = &compiled.volumes[0];
        assert_eq!(volume.name, config_volume_name("/etc/nginx"));
        let source = volume.config_map.as_ref().unwrap();
        assert_eq!(source.name, "convoy-files");
        let items = source.items.as_ref().unwrap();
        let pairs: Vec<(&str, &str)> = items
            .iter()
            .map(|i| (i.key.as_str(), i.path.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("nginx__conf.d__app.conf", "app.conf"),
                ("nginx__nginx.conf", "nginx.conf"),
            ]
        );

        let mount = &compiled.volume_mounts[0];
        assert_eq!(mount.name, volume.name);
        assert_eq!(mount.mount_path, "/etc/nginx");
    }

    #[test]
    fn each_mount_path_gets_its_own_volume() {
        let store = store();
        let compiled = compile(
            "web",
            &[
                config("/etc/nginx", &["/nginx/nginx.conf"]),
                config("/etc/redis", &["/redis.conf"]),
            ],
            Some(&store),
        );
        assert_eq!(compiled.volumes.len(), 2);
        assert_ne!(compiled.volumes[0].name, compiled.volumes[1].name);
    }

    #[test]
    fn unresolved_paths_are_skipped_without_failing() {
        let store = store();
        let compiled = compile(
            "web",
            &[
                config("/etc/missing", &["/does/not/exist"]),
                config("/etc/redis", &["/redis.conf", "/nope.conf"]),
            ],
            Some(&store),
        );
        assert_eq!(compiled.volumes.len(), 1);
        assert_eq!(compiled.volume_mounts[0].mount_path, "/etc/redis");
    }

    #[test]
    fn missing_store_yields_no_mounts() {
        let compiled = compile("web", &[config("/etc/redis", &["/redis.conf"])], None);
        assert_eq!(compiled, CompiledConfigs::default());
    }

    #[test]
    fn accumulator_dedups_by_key() {
        let mut acc = MountAccumulator::new();
        let item = FileItem {
            raw_path: "/redis.conf".to_string(),
        };
        resolve_mount_paths(&mut acc, "/etc", vec![item.clone()]);
        resolve_mount_paths(&mut acc, "/etc", vec![item]);
        assert_eq!(acc["/etc"].len(), 1);
    }
}
