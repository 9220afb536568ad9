//! Directory-backed JSON record store.
//!
//! One collection is one `<name>.json` file holding records of
//! `{id, document, metadata, embedding?}`. Upserts rewrite the file through a
//! temp-file rename, making each mutation atomic per collection. This backs
//! the index registry, the structural-metadata collection, and the vector
//! store collections.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// One stored record. `document` carries a JSON payload; `metadata` is a flat
/// string map used for filtering; `embedding` is present only in vector
/// collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub document: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    records: Vec<Record>,
}

/// A single named collection, cached in memory and persisted on mutation.
pub struct JsonCollection {
    path: PathBuf,
    records: RwLock<BTreeMap<String, Record>>,
}

impl JsonCollection {
    /// Open (or create) `<dir>/<name>.json`.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.json"));

        let records = if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            let file: CollectionFile = serde_json::from_str(&content)
                .map_err(|e| Error::Registry(format!("corrupt collection {name}: {e}")))?;
            file.records.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, records: RwLock::new(records) })
    }

    pub fn upsert(&self, incoming: Vec<Record>) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        for record in incoming {
            records.insert(record.id.clone(), record);
        }
        self.persist(&records)
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    pub fn all(&self) -> Vec<Record> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect()
    }

    /// Records whose metadata map satisfies `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Record) -> bool) -> Vec<Record> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    /// Delete records by id; returns how many existed.
    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for id in ids {
            if records.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write-through with a temp-file rename so readers never observe a
    /// partially written collection.
    fn persist(&self, records: &BTreeMap<String, Record>) -> Result<()> {
        let file = CollectionFile { records: records.values().cloned().collect() };
        let serialized = serde_json::to_string(&file)
            .map_err(|e| Error::Registry(format!("serialize collection: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Whether `<dir>/<name>.json` exists.
pub fn collection_exists(dir: &Path, name: &str) -> bool {
    dir.join(format!("{name}.json")).is_file()
}

/// Remove a collection file. Returns whether it existed.
pub fn delete_collection(dir: &Path, name: &str) -> Result<bool> {
    let path = dir.join(format!("{name}.json"));
    if path.is_file() {
        std::fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Names of all collections under `dir`.
pub fn list_collections(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".json").map(|s| s.to_string())
        })
        .collect();
    names.sort();
    names
}
