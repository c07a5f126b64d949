//! Path → metadata index served alongside remote files.
//!
//! The document is JSON: `{"version": 1, "entries": {"/path": {record}}}`,
//! records in their serde form. Missing parent directories are synthesized
//! and entries without ids get fresh ones.

use crate::error::{StoreError, StoreResult};
use crate::meta::ids::{IdAllocator, SequentialIds};
use crate::meta::record::{MetadataRecord, ROOT_ID, S_IFDIR, is_directory, is_file};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const INDEX_VERSION: u32 = 1;

fn default_version() -> u32 {
    INDEX_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexData {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, MetadataRecord>,
}

impl Default for IndexData {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: BTreeMap<String, MetadataRecord>,
}

/// Collapse repeated separators and `.`/`..` components into an absolute path.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

impl Index {
    pub fn from_data(data: IndexData) -> StoreResult<Self> {
        if data.version != INDEX_VERSION {
            return Err(StoreError::InvalidInput(format!(
                "unsupported index version {}",
                data.version
            )));
        }

        let mut entries: BTreeMap<String, MetadataRecord> = data
            .entries
            .into_iter()
            .map(|(path, record)| (normalize_path(&path), record))
            .collect();

        let mut missing = Vec::new();
        for path in entries.keys() {
            let mut current = parent_of(path);
            while let Some(dir) = current {
                if !entries.contains_key(dir) {
                    missing.push(dir.to_string());
                }
                current = parent_of(dir);
            }
        }
        for dir in missing {
            entries.entry(dir).or_insert_with(|| MetadataRecord {
                mode: S_IFDIR | 0o555,
                ..MetadataRecord::default()
            });
        }
        entries.entry("/".to_string()).or_insert_with(|| MetadataRecord {
            mode: S_IFDIR | 0o555,
            ..MetadataRecord::default()
        });

        // ids start past the largest one already present so nothing collides
        let highest = entries
            .values()
            .flat_map(|r| [r.id, r.content_id])
            .max()
            .unwrap_or(ROOT_ID);
        let needed: u64 = entries
            .iter()
            .filter(|(path, _)| path.as_str() != "/")
            .map(|(_, r)| u64::from(r.id == ROOT_ID) + u64::from(r.content_id == ROOT_ID))
            .sum();
        if u64::from(highest) + needed > u64::from(u32::MAX) {
            return Err(StoreError::InvalidInput(format!(
                "index needs {needed} new ids but the largest pinned id is {highest}"
            )));
        }
        let ids = SequentialIds::starting_at(highest.wrapping_add(1));
        for (path, record) in entries.iter_mut() {
            if path == "/" {
                continue;
            }
            if record.id == ROOT_ID {
                record.id = ids.next_id();
            }
            if record.content_id == ROOT_ID {
                record.content_id = ids.next_id();
            }
        }

        debug!(entries = entries.len(), "built index");
        Ok(Self { entries })
    }

    pub fn from_json(data: &[u8]) -> StoreResult<Self> {
        let data: IndexData = serde_json::from_slice(data)
            .map_err(|e| StoreError::io(format!("failed to parse index: {e}")))?;
        Self::from_data(data)
    }

    pub fn to_data(&self) -> IndexData {
        IndexData {
            version: INDEX_VERSION,
            entries: self.entries.clone(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&MetadataRecord> {
        self.entries.get(&normalize_path(path))
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut MetadataRecord> {
        self.entries.get_mut(&normalize_path(path))
    }

    pub fn insert(&mut self, path: &str, record: MetadataRecord) -> Option<MetadataRecord> {
        self.entries.insert(normalize_path(path), record)
    }

    pub fn remove(&mut self, path: &str) -> Option<MetadataRecord> {
        self.entries.remove(&normalize_path(path))
    }

    /// Path whose content is stored under `content_id`.
    pub fn path_of(&self, content_id: u32) -> Option<&str> {
        self.files()
            .find(|(_, r)| r.content_id == content_id)
            .map(|(p, _)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataRecord)> {
        self.entries.iter().map(|(p, r)| (p.as_str(), r))
    }

    /// Regular files only.
    pub fn files(&self) -> impl Iterator<Item = (&str, &MetadataRecord)> {
        self.iter().filter(|(_, r)| is_file(r.mode))
    }

    /// Direct children of the directory at `path`.
    pub fn children(&self, path: &str) -> Vec<&str> {
        let dir = normalize_path(path);
        if !self.entries.get(&dir).is_some_and(|r| is_directory(r.mode)) {
            return Vec::new();
        }
        self.entries
            .keys()
            .filter(|p| parent_of(p) == Some(dir.as_str()))
            .map(|p| &p[p.rfind('/').map_or(0, |i| i + 1)..])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
