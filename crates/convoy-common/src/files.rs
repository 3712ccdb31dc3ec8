//! Hierarchical file store backed by a ConfigMap
//!
//! Files live under absolute raw paths such as `/nginx/conf.d/app.conf`.
//! ConfigMap keys cannot contain `/`, so each raw path is stored under an
//! encoded key: the leading `/` is dropped and every remaining `/` becomes
//! `__` (`nginx__conf.d__app.conf`).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

/// Separator replacing `/` inside encoded keys
const KEY_SEPARATOR: &str = "__";

/// Encode a raw file path as a ConfigMap key
pub fn encode_file_path(raw: &str) -> String {
    raw.trim_start_matches('/').replace('/', KEY_SEPARATOR)
}

/// Decode a ConfigMap key back into its raw file path
pub fn decode_file_path(key: &str) -> String {
    format!("/{}", key.replace(KEY_SEPARATOR, "/"))
}

/// Last segment of a raw file path
pub fn file_name_from_raw_path(raw: &str) -> &str {
    raw.trim_end_matches('/').rsplit('/').next().unwrap_or(raw)
}

/// One file in the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileItem {
    /// Absolute path of the file inside the store
    pub raw_path: String,
}

impl FileItem {
    /// ConfigMap key holding this file
    pub fn key(&self) -> String {
        encode_file_path(&self.raw_path)
    }

    /// File name the item is projected as
    pub fn file_name(&self) -> &str {
        file_name_from_raw_path(&self.raw_path)
    }
}

/// Read-only view over the files held in one ConfigMap
#[derive(Clone, Debug, Default)]
pub struct FileStore {
    /// ConfigMap the files are projected from
    pub config_map_name: String,
    paths: Vec<String>,
}

impl FileStore {
    /// Index a ConfigMap's `data` and `binaryData` keys
    pub fn from_config_map(cm: &ConfigMap) -> Self {
        let mut paths: Vec<String> = cm
            .data
            .iter()
            .flat_map(BTreeMap::keys)
            .chain(cm.binary_data.iter().flat_map(BTreeMap::keys))
            .map(|k| decode_file_path(k))
            .collect();
        paths.sort();
        paths.dedup();
        Self {
            config_map_name: cm.metadata.name.clone().unwrap_or_default(),
            paths,
        }
    }

    /// Build a store from raw paths directly
    pub fn from_paths(
        config_map_name: impl Into<String>,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        paths.sort();
        paths.dedup();
        Self {
            config_map_name: config_map_name.into(),
            paths,
        }
    }

    /// Resolve a path to the leaf files beneath it
    ///
    /// An exact match is a single file. Otherwise the path is treated as a
    /// directory and every file nested under it is returned. `None` when
    /// nothing matches.
    pub fn item_tree(&self, path: &str) -> Option<Vec<FileItem>> {
        let normalized = format!("/{}", path.trim_start_matches('/'));
        if !normalized.ends_with('/') && self.paths.iter().any(|p| *p == normalized) {
            return Some(vec![FileItem {
                raw_path: normalized,
            }]);
        }

        let dir = if normalized.ends_with('/') {
            normalized
        } else {
            format!("{}/", normalized)
        };
        let items: Vec<FileItem> = self
            .paths
            .iter()
            .filter(|p| p.starts_with(&dir))
            .map(|p| FileItem { raw_path: p.clone() })
            .collect();

        if items.is_empty() {
            None
        } else {
            Some(items)
        }
    }
}
