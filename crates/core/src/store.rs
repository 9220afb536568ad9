//! Vector store gateway: project-scoped, kind-partitioned collections of
//! `{id, embedding, content, metadata}` with brute-force cosine search.
//!
//! Collections are named `<prefix>_<project_id>_<kind>`; when project
//! isolation is disabled the project segment is omitted (compat mode). A
//! collection never mixes kinds, and every embedding in a collection must
//! share one dimensionality.

use crate::collection::{self, JsonCollection, Record};
use crate::error::{Error, Result};
use crate::types::{ChunkMetadata, CodeChunk, DocumentChunk, DocumentMetadata};
use crate::llm::estimate_tokens;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Collection kinds recognized by the gateway.
pub const KIND_CODE: &str = "code";
pub const KIND_DOCUMENTS: &str = "documents";
pub const KIND_METADATA: &str = "metadata";

pub struct VectorStore {
    persist_directory: PathBuf,
    collection_prefix: String,
    project_id: Option<String>,
    project_isolation: bool,
    collections: RwLock<HashMap<String, Arc<JsonCollection>>>,
}

impl VectorStore {
    pub fn new(
        persist_directory: &Path,
        collection_prefix: &str,
        project_id: Option<String>,
        project_isolation: bool,
    ) -> Self {
        Self {
            persist_directory: persist_directory.to_path_buf(),
            collection_prefix: collection_prefix.to_string(),
            project_id,
            project_isolation,
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn collection_name(&self, kind: &str) -> String {
        match (&self.project_id, self.project_isolation) {
            (Some(project_id), true) => {
                format!("{}_{}_{}", self.collection_prefix, project_id, kind)
            }
            _ => format!("{}_{}", self.collection_prefix, kind),
        }
    }

    fn collection(&self, kind: &str) -> Result<Arc<JsonCollection>> {
        let name = self.collection_name(kind);
        {
            let cache = self.collections.read().unwrap_or_else(|e| e.into_inner());
            if let Some(coll) = cache.get(&name) {
                return Ok(Arc::clone(coll));
            }
        }
        let coll = Arc::new(JsonCollection::open(&self.persist_directory, &name)?);
        let mut cache = self.collections.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(cache.entry(name).or_insert(coll)))
    }

    /// Validate that every chunk carries an embedding of one shared
    /// dimensionality, consistent with what the collection already holds.
    fn check_dimensions<'a>(
        &self,
        coll: &JsonCollection,
        mut embeddings: impl Iterator<Item = Option<&'a Vec<f32>>>,
    ) -> Result<()> {
        let mut dim: Option<usize> = coll
            .all()
            .iter()
            .find_map(|r| r.embedding.as_ref().map(|e| e.len()));

        embeddings.try_for_each(|embedding| {
            let Some(embedding) = embedding else {
                return Err(Error::VectorStore("all chunks must carry embeddings".into()));
            };
            match dim {
                Some(d) if d != embedding.len() => Err(Error::VectorStore(format!(
                    "embedding dimensionality mismatch: expected {d}, got {}",
                    embedding.len()
                ))),
                Some(_) => Ok(()),
                None => {
                    dim = Some(embedding.len());
                    Ok(())
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Code chunks
    // -----------------------------------------------------------------------

    pub fn store_chunks(&self, chunks: &[CodeChunk], kind: &str) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let coll = self.collection(kind)?;
        self.check_dimensions(&coll, chunks.iter().map(|c| c.embedding.as_ref()))?;

        let records = chunks
            .iter()
            .map(|chunk| Record {
                id: chunk.id.to_string(),
                document: chunk.content.clone(),
                metadata: encode_chunk_metadata(&chunk.metadata),
                embedding: chunk.embedding.clone(),
            })
            .collect();
        coll.upsert(records)
    }

    /// Top-k code chunks by cosine similarity against a pre-computed query
    /// embedding. Text queries are not supported at this layer: callers embed
    /// first so every search targets the same embedding space.
    pub fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        kind: &str,
    ) -> Result<Vec<CodeChunk>> {
        let coll = self.collection(kind)?;
        let ranked = rank_by_cosine(coll.all(), query_embedding, top_k);

        Ok(ranked
            .into_iter()
            .map(|record| {
                let metadata = decode_chunk_metadata(&record.metadata);
                CodeChunk {
                    id: Uuid::parse_str(&record.id).unwrap_or_else(|_| Uuid::new_v4()),
                    token_count: estimate_tokens(&record.document),
                    content: record.document,
                    metadata,
                    embedding: record.embedding,
                }
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Document chunks
    // -----------------------------------------------------------------------

    pub fn store_document_chunks(&self, chunks: &[DocumentChunk], kind: &str) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let coll = self.collection(kind)?;
        self.check_dimensions(&coll, chunks.iter().map(|c| c.embedding.as_ref()))?;

        let records = chunks
            .iter()
            .map(|chunk| Record {
                id: chunk.id.to_string(),
                document: chunk.content.clone(),
                metadata: encode_document_metadata(chunk),
                embedding: chunk.embedding.clone(),
            })
            .collect();
        coll.upsert(records)
    }

    pub fn search_documents(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<DocumentChunk>> {
        let coll = self.collection(KIND_DOCUMENTS)?;
        let ranked = rank_by_cosine(coll.all(), query_embedding, top_k);

        Ok(ranked.into_iter().map(decode_document_chunk).collect())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn collection_exists(&self, kind: &str) -> bool {
        collection::collection_exists(&self.persist_directory, &self.collection_name(kind))
    }

    pub fn chunk_count(&self, kind: &str) -> usize {
        if !self.collection_exists(kind) {
            return 0;
        }
        self.collection(kind).map(|c| c.len()).unwrap_or(0)
    }

    pub fn delete_collection(&self, kind: &str) -> Result<()> {
        let name = self.collection_name(kind);
        self.collections.write().unwrap_or_else(|e| e.into_inner()).remove(&name);
        collection::delete_collection(&self.persist_directory, &name)?;
        Ok(())
    }

    /// Drop the code, documents, and metadata collections for this project.
    pub fn delete_project_collections(&self) -> Result<()> {
        if !self.project_isolation || self.project_id.is_none() {
            return Err(Error::InvalidInput(
                "project isolation must be enabled with a project id".into(),
            ));
        }
        for kind in [KIND_CODE, KIND_DOCUMENTS, KIND_METADATA] {
            self.delete_collection(kind)?;
        }
        Ok(())
    }

    /// Remove specific embedding ids from a collection (cleanup path).
    pub fn delete_embeddings(&self, kind: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() || !self.collection_exists(kind) {
            return Ok(0);
        }
        self.collection(kind)?.delete(ids)
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

fn rank_by_cosine(records: Vec<Record>, query: &[f32], top_k: usize) -> Vec<Record> {
    let mut scored: Vec<(f32, Record)> = records
        .into_iter()
        .filter_map(|record| {
            let embedding = record.embedding.as_ref()?;
            let score = cosine(query, embedding)?;
            Some((score, record))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored.into_iter().map(|(_, r)| r).collect()
}

fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

// ---------------------------------------------------------------------------
// Metadata encoding (flat string map; numbers stringified, lists as JSON)
// ---------------------------------------------------------------------------

fn encode_chunk_metadata(meta: &ChunkMetadata) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("file_path".into(), meta.file_path.clone());
    map.insert("language".into(), meta.language.clone());
    map.insert("start_line".into(), meta.start_line.to_string());
    map.insert("end_line".into(), meta.end_line.to_string());
    map.insert("chunk_index".into(), meta.chunk_index.to_string());
    map.insert("total_chunks".into(), meta.total_chunks.to_string());
    map.insert("has_functions".into(), meta.has_functions.to_string());
    map.insert("has_imports".into(), meta.has_imports.to_string());
    map.insert(
        "function_names".into(),
        serde_json::to_string(&meta.function_names).unwrap_or_else(|_| "[]".into()),
    );
    map
}

fn decode_chunk_metadata(map: &BTreeMap<String, String>) -> ChunkMetadata {
    let get_usize =
        |key: &str| map.get(key).and_then(|v| v.parse::<usize>().ok()).unwrap_or_default();
    ChunkMetadata {
        file_path: map.get("file_path").cloned().unwrap_or_default(),
        language: map.get("language").cloned().unwrap_or_default(),
        start_line: get_usize("start_line").max(1),
        end_line: get_usize("end_line").max(1),
        chunk_index: get_usize("chunk_index"),
        total_chunks: get_usize("total_chunks"),
        has_functions: map.get("has_functions").map(String::as_str) == Some("true"),
        has_imports: map.get("has_imports").map(String::as_str) == Some("true"),
        function_names: map
            .get("function_names")
            .and_then(|v| serde_json::from_str(v).ok())
            .unwrap_or_default(),
    }
}

fn encode_document_metadata(chunk: &DocumentChunk) -> BTreeMap<String, String> {
    let meta = &chunk.metadata;
    let mut map = BTreeMap::new();
    map.insert("file_path".into(), meta.file_path.clone());
    map.insert("document_type".into(), meta.document_type.clone());
    map.insert("title".into(), meta.title.clone().unwrap_or_default());
    map.insert(
        "sections".into(),
        serde_json::to_string(&meta.sections).unwrap_or_else(|_| "[]".into()),
    );
    map.insert(
        "keywords".into(),
        serde_json::to_string(&meta.keywords).unwrap_or_else(|_| "[]".into()),
    );
    map.insert("start_char".into(), chunk.start_char.to_string());
    map.insert("end_char".into(), chunk.end_char.to_string());
    map.insert("chunk_index".into(), chunk.chunk_index.to_string());
    map.insert("total_chunks".into(), chunk.total_chunks.to_string());
    map
}

fn decode_document_chunk(record: Record) -> DocumentChunk {
    let map = &record.metadata;
    let get_usize =
        |key: &str| map.get(key).and_then(|v| v.parse::<usize>().ok()).unwrap_or_default();
    let title = map.get("title").filter(|t| !t.is_empty()).cloned();

    DocumentChunk {
        id: Uuid::parse_str(&record.id).unwrap_or_else(|_| Uuid::new_v4()),
        metadata: DocumentMetadata {
            file_path: map.get("file_path").cloned().unwrap_or_default(),
            document_type: map.get("document_type").cloned().unwrap_or_default(),
            title,
            sections: map
                .get("sections")
                .and_then(|v| serde_json::from_str(v).ok())
                .unwrap_or_default(),
            keywords: map
                .get("keywords")
                .and_then(|v| serde_json::from_str(v).ok())
                .unwrap_or_default(),
        },
        start_char: get_usize("start_char"),
        end_char: get_usize("end_char"),
        chunk_index: get_usize("chunk_index"),
        total_chunks: get_usize("total_chunks"),
        embedding: record.embedding,
        content: record.document,
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker;
    use crate::types::DocumentMetadata;

    fn store(dir: &Path, project: &str) -> VectorStore {
        VectorStore::new(dir, "falconeye", Some(project.to_string()), true)
    }

    fn chunk(path: &str, content: &str, embedding: Vec<f32>) -> CodeChunk {
        let mut chunks = chunker::chunk_code(content, path, "python", 50, 10).unwrap();
        chunks.remove(0).with_embedding(embedding)
    }

    #[test]
    fn collection_naming_with_and_without_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let isolated = store(dir.path(), "proj");
        assert_eq!(isolated.collection_name(KIND_CODE), "falconeye_proj_code");

        let compat = VectorStore::new(dir.path(), "falconeye", None, false);
        assert_eq!(compat.collection_name(KIND_CODE), "falconeye_code");
    }

    #[test]
    fn store_rejects_missing_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let vs = store(dir.path(), "proj");
        let mut chunks = chunker::chunk_code("x = 1\n", "a.py", "python", 50, 10).unwrap();
        chunks[0].embedding = None;
        assert!(vs.store_chunks(&chunks, KIND_CODE).is_err());
    }

    #[test]
    fn store_rejects_mixed_dimensionality() {
        let dir = tempfile::tempdir().unwrap();
        let vs = store(dir.path(), "proj");
        vs.store_chunks(&[chunk("a.py", "x = 1\n", vec![1.0, 0.0])], KIND_CODE).unwrap();
        let err = vs.store_chunks(&[chunk("b.py", "y = 2\n", vec![1.0, 0.0, 0.0])], KIND_CODE);
        assert!(err.is_err());
    }

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let vs = store(dir.path(), "proj");
        vs.store_chunks(
            &[
                chunk("near.py", "x = 1\n", vec![1.0, 0.0]),
                chunk("far.py", "y = 2\n", vec![0.0, 1.0]),
                chunk("mid.py", "z = 3\n", vec![0.7, 0.7]),
            ],
            KIND_CODE,
        )
        .unwrap();

        let hits = vs.search(&[1.0, 0.0], 2, KIND_CODE).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.file_path, "near.py");
        assert_eq!(hits[1].metadata.file_path, "mid.py");
    }

    #[test]
    fn project_isolation_separates_collections() {
        let dir = tempfile::tempdir().unwrap();
        let a = store(dir.path(), "project_a");
        let b = store(dir.path(), "project_b");

        a.store_chunks(&[chunk("a_only.py", "x = 1\n", vec![1.0, 0.0])], KIND_CODE).unwrap();
        b.store_chunks(&[chunk("b_only.py", "y = 2\n", vec![1.0, 0.0])], KIND_CODE).unwrap();

        let hits = a.search(&[1.0, 0.0], 10, KIND_CODE).unwrap();
        assert!(hits.iter().all(|c| c.metadata.file_path == "a_only.py"));
        assert_eq!(a.chunk_count(KIND_CODE), 1);
    }

    #[test]
    fn document_chunk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vs = store(dir.path(), "proj");

        let meta = DocumentMetadata {
            file_path: "README.md".into(),
            document_type: "readme".into(),
            title: Some("Title".into()),
            sections: vec!["Title".into()],
            keywords: vec!["security".into()],
        };
        let chunks: Vec<DocumentChunk> = chunker::chunk_document("A readme about security.", &meta, 500)
            .unwrap()
            .into_iter()
            .map(|c| c.with_embedding(vec![0.5, 0.5]))
            .collect();
        vs.store_document_chunks(&chunks, KIND_DOCUMENTS).unwrap();

        let hits = vs.search_documents(&[0.5, 0.5], 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.document_type, "readme");
        assert_eq!(hits[0].metadata.title.as_deref(), Some("Title"));
    }

    #[test]
    fn delete_project_collections_requires_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let compat = VectorStore::new(dir.path(), "falconeye", None, false);
        assert!(compat.delete_project_collections().is_err());

        let vs = store(dir.path(), "proj");
        vs.store_chunks(&[chunk("a.py", "x = 1\n", vec![1.0])], KIND_CODE).unwrap();
        assert!(vs.collection_exists(KIND_CODE));
        vs.delete_project_collections().unwrap();
        assert!(!vs.collection_exists(KIND_CODE));
    }
}
