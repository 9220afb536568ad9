//! Structural-metadata collection: one JSON document per analyzed file,
//! keyed `metadata_<escaped relative path>`.

use crate::collection::JsonCollection;
use crate::error::{Error, Result};
use crate::types::StructuralMetadata;
use std::collections::BTreeMap;
use std::path::Path;

pub struct MetadataStore {
    collection: JsonCollection,
}

impl MetadataStore {
    pub fn open(persist_directory: &Path, collection_name: &str) -> Result<Self> {
        Ok(Self { collection: JsonCollection::open(persist_directory, collection_name)? })
    }

    pub fn store(&self, metadata: &StructuralMetadata) -> Result<()> {
        let document = serde_json::to_string(metadata)
            .map_err(|e| Error::Registry(format!("serialize structural metadata: {e}")))?;

        let mut record_meta = BTreeMap::new();
        record_meta.insert("file_path".into(), metadata.file_path.clone());
        record_meta.insert("language".into(), metadata.language.clone());
        record_meta.insert("functions_count".into(), metadata.functions.len().to_string());
        record_meta.insert("imports_count".into(), metadata.imports.len().to_string());
        record_meta.insert("calls_count".into(), metadata.calls.len().to_string());
        record_meta.insert("classes_count".into(), metadata.classes.len().to_string());

        self.collection.upsert(vec![crate::collection::Record {
            id: doc_id(&metadata.file_path),
            document,
            metadata: record_meta,
            embedding: None,
        }])
    }

    pub fn get(&self, file_path: &str) -> Option<StructuralMetadata> {
        self.collection
            .get(&doc_id(file_path))
            .and_then(|r| serde_json::from_str(&r.document).ok())
    }

    /// Files × function names, filtered to callees containing `target` when
    /// given. Used by the CLI's metadata queries.
    pub fn search_functions(&self, name: &str) -> Vec<(String, String, usize)> {
        let needle = name.to_lowercase();
        self.collection
            .all()
            .into_iter()
            .filter_map(|r| serde_json::from_str::<StructuralMetadata>(&r.document).ok())
            .flat_map(|m| {
                let path = m.file_path.clone();
                m.functions
                    .into_iter()
                    .filter(|f| f.name.to_lowercase().contains(&needle))
                    .map(move |f| (path.clone(), f.name, f.line))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn doc_id(file_path: &str) -> String {
    format!("metadata_{}", file_path.replace(['/', '\\'], "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionInfo;

    #[test]
    fn store_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), "falconeye_metadata").unwrap();

        let mut meta = StructuralMetadata::empty("src/app.py", "python");
        meta.functions.push(FunctionInfo { name: "main".into(), line: 3, ..Default::default() });
        store.store(&meta).unwrap();

        let loaded = store.get("src/app.py").expect("metadata present");
        assert_eq!(loaded.language, "python");
        assert_eq!(loaded.functions.len(), 1);
        assert!(store.get("src/other.py").is_none());
    }

    #[test]
    fn function_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), "falconeye_metadata").unwrap();

        let mut meta = StructuralMetadata::empty("a.py", "python");
        meta.functions.push(FunctionInfo { name: "handle_login".into(), line: 10, ..Default::default() });
        store.store(&meta).unwrap();

        let hits = store.search_functions("login");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "handle_login");
    }
}
