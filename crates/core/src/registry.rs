//! Index registry: the authoritative store of project and file metadata
//! driving smart re-indexing.
//!
//! One collection holds two document kinds, `project_<project_id>` and
//! `file_<project_id>_<md5(path)[:12]>`, each a JSON payload with `type`,
//! `project_id`, and (for files) `file_path`/`status` in the secondary
//! metadata map for filtering.

use crate::collection::{JsonCollection, Record};
use crate::error::{Error, Result};
use crate::types::{FileMetadata, FileStatus, ProjectMetadata};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Aggregate statistics for one project.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    pub total_files: usize,
    pub active_files: usize,
    pub deleted_files: usize,
    pub total_chunks: usize,
}

pub struct IndexRegistry {
    collection: JsonCollection,
}

impl IndexRegistry {
    pub fn open(persist_directory: &Path, collection_name: &str) -> Result<Self> {
        Ok(Self { collection: JsonCollection::open(persist_directory, collection_name)? })
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub fn save_project(&self, project: &ProjectMetadata) -> Result<()> {
        let document = serde_json::to_string(project)
            .map_err(|e| Error::Registry(format!("serialize project: {e}")))?;
        let mut metadata = BTreeMap::new();
        metadata.insert("type".into(), "project".into());
        metadata.insert("project_id".into(), project.project_id.clone());

        self.collection.upsert(vec![Record {
            id: project_doc_id(&project.project_id),
            document,
            metadata,
            embedding: None,
        }])
    }

    pub fn get_project(&self, project_id: &str) -> Option<ProjectMetadata> {
        self.collection
            .get(&project_doc_id(project_id))
            .and_then(|r| serde_json::from_str(&r.document).ok())
    }

    pub fn get_all_projects(&self) -> Vec<ProjectMetadata> {
        self.collection
            .filter(|r| r.metadata.get("type").map(String::as_str) == Some("project"))
            .into_iter()
            .filter_map(|r| serde_json::from_str(&r.document).ok())
            .collect()
    }

    /// Delete a project row and every file row that belongs to it.
    pub fn delete_project(&self, project_id: &str) -> Result<bool> {
        let existed = self.collection.get(&project_doc_id(project_id)).is_some();
        let mut ids = vec![project_doc_id(project_id)];
        ids.extend(self.file_record_ids(project_id));
        self.collection.delete(&ids)?;
        Ok(existed)
    }

    pub fn project_exists(&self, project_id: &str) -> bool {
        self.get_project(project_id).is_some()
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    pub fn save_file(&self, file: &FileMetadata) -> Result<()> {
        self.collection.upsert(vec![file_record(file)?])
    }

    pub fn save_files_batch(&self, files: &[FileMetadata]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let records = files.iter().map(file_record).collect::<Result<Vec<_>>>()?;
        self.collection.upsert(records)
    }

    pub fn get_file(&self, project_id: &str, file_path: &Path) -> Option<FileMetadata> {
        self.collection
            .get(&file_doc_id(project_id, file_path))
            .and_then(|r| serde_json::from_str(&r.document).ok())
    }

    pub fn get_all_files(&self, project_id: &str) -> Vec<FileMetadata> {
        self.collection
            .filter(|r| {
                r.metadata.get("type").map(String::as_str) == Some("file")
                    && r.metadata.get("project_id").map(String::as_str) == Some(project_id)
            })
            .into_iter()
            .filter_map(|r| serde_json::from_str(&r.document).ok())
            .collect()
    }

    pub fn get_files_by_status(&self, project_id: &str, status: FileStatus) -> Vec<FileMetadata> {
        self.collection
            .filter(|r| {
                r.metadata.get("type").map(String::as_str) == Some("file")
                    && r.metadata.get("project_id").map(String::as_str) == Some(project_id)
                    && r.metadata.get("status").map(String::as_str) == Some(status.as_str())
            })
            .into_iter()
            .filter_map(|r| serde_json::from_str(&r.document).ok())
            .collect()
    }

    pub fn delete_file(&self, project_id: &str, file_path: &Path) -> Result<bool> {
        Ok(self.collection.delete(&[file_doc_id(project_id, file_path)])? > 0)
    }

    pub fn delete_files_batch(&self, project_id: &str, file_paths: &[PathBuf]) -> Result<usize> {
        let ids: Vec<String> =
            file_paths.iter().map(|p| file_doc_id(project_id, p)).collect();
        self.collection.delete(&ids)
    }

    /// Flip a file's status to deleted, keeping the row for a later cleanup.
    pub fn mark_file_deleted(&self, project_id: &str, file_path: &Path) -> Result<bool> {
        let Some(mut file) = self.get_file(project_id, file_path) else {
            return Ok(false);
        };
        file.status = FileStatus::Deleted;
        file.last_scanned = Utc::now();
        self.save_file(&file)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Documents
    //
    // Documentation files get their own row kind so re-index diffing can
    // skip unchanged docs without polluting the source-file path set.
    // -----------------------------------------------------------------------

    pub fn save_document(&self, doc: &FileMetadata) -> Result<()> {
        let document = serde_json::to_string(doc)
            .map_err(|e| Error::Registry(format!("serialize document metadata: {e}")))?;
        let mut metadata = BTreeMap::new();
        metadata.insert("type".into(), "document".into());
        metadata.insert("project_id".into(), doc.project_id.clone());
        metadata.insert("file_path".into(), doc.file_path.to_string_lossy().into_owned());
        metadata.insert("status".into(), doc.status.as_str().to_string());

        self.collection.upsert(vec![Record {
            id: document_doc_id(&doc.project_id, &doc.file_path),
            document,
            metadata,
            embedding: None,
        }])
    }

    pub fn get_document(&self, project_id: &str, file_path: &Path) -> Option<FileMetadata> {
        self.collection
            .get(&document_doc_id(project_id, file_path))
            .and_then(|r| serde_json::from_str(&r.document).ok())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn file_paths(&self, project_id: &str) -> HashSet<PathBuf> {
        self.collection
            .filter(|r| {
                r.metadata.get("type").map(String::as_str) == Some("file")
                    && r.metadata.get("project_id").map(String::as_str) == Some(project_id)
            })
            .into_iter()
            .filter_map(|r| r.metadata.get("file_path").map(PathBuf::from))
            .collect()
    }

    pub fn files_metadata_map(&self, project_id: &str) -> HashMap<PathBuf, FileMetadata> {
        self.get_all_files(project_id)
            .into_iter()
            .map(|f| (f.file_path.clone(), f))
            .collect()
    }

    pub fn project_stats(&self, project_id: &str) -> RegistryStats {
        let files = self.get_all_files(project_id);
        RegistryStats {
            total_files: files.len(),
            active_files: files.iter().filter(|f| f.status == FileStatus::Active).count(),
            deleted_files: files.iter().filter(|f| f.status == FileStatus::Deleted).count(),
            total_chunks: files.iter().map(|f| f.chunk_count).sum(),
        }
    }

    // -----------------------------------------------------------------------
    // Bulk
    // -----------------------------------------------------------------------

    /// Remove all file rows for a project, keeping the project row.
    pub fn clear_project_files(&self, project_id: &str) -> Result<usize> {
        let ids = self.file_record_ids(project_id);
        self.collection.delete(&ids)
    }

    /// Ids of all per-file rows (source files and documents) for a project.
    fn file_record_ids(&self, project_id: &str) -> Vec<String> {
        self.collection
            .filter(|r| {
                matches!(r.metadata.get("type").map(String::as_str), Some("file") | Some("document"))
                    && r.metadata.get("project_id").map(String::as_str) == Some(project_id)
            })
            .into_iter()
            .map(|r| r.id)
            .collect()
    }
}

fn project_doc_id(project_id: &str) -> String {
    format!("project_{project_id}")
}

fn document_doc_id(project_id: &str, file_path: &Path) -> String {
    let digest = md5::compute(file_path.to_string_lossy().as_bytes());
    let hex = format!("{digest:x}");
    format!("doc_{project_id}_{}", &hex[..12])
}

fn file_doc_id(project_id: &str, file_path: &Path) -> String {
    let digest = md5::compute(file_path.to_string_lossy().as_bytes());
    let hex = format!("{digest:x}");
    format!("file_{project_id}_{}", &hex[..12])
}

fn file_record(file: &FileMetadata) -> Result<Record> {
    let document = serde_json::to_string(file)
        .map_err(|e| Error::Registry(format!("serialize file metadata: {e}")))?;
    let mut metadata = BTreeMap::new();
    metadata.insert("type".into(), "file".into());
    metadata.insert("project_id".into(), file.project_id.clone());
    metadata.insert("file_path".into(), file.file_path.to_string_lossy().into_owned());
    metadata.insert("status".into(), file.status.as_str().to_string());

    Ok(Record { id: file_doc_id(&file.project_id, &file.file_path), document, metadata, embedding: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectType;

    fn sample_project(id: &str) -> ProjectMetadata {
        let now = Utc::now();
        ProjectMetadata {
            project_id: id.to_string(),
            project_name: id.to_string(),
            project_root: PathBuf::from("/tmp/proj"),
            project_type: ProjectType::NonGit,
            git_remote_url: None,
            last_indexed_commit: None,
            last_full_scan: now,
            total_files: 0,
            total_chunks: 0,
            languages: vec!["python".into()],
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_file(project_id: &str, path: &str, chunks: usize) -> FileMetadata {
        let now = Utc::now();
        FileMetadata {
            project_id: project_id.to_string(),
            file_path: PathBuf::from(path),
            relative_path: PathBuf::from(path).file_name().map(PathBuf::from).unwrap(),
            language: "python".into(),
            file_checksum: "sha256:abc".into(),
            file_size: 10,
            file_mtime: 1000.0,
            git_commit_hash: None,
            git_file_hash: None,
            indexed_at: now,
            chunk_count: chunks,
            embedding_ids: Vec::new(),
            status: FileStatus::Active,
            last_scanned: now,
        }
    }

    fn registry() -> (tempfile::TempDir, IndexRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let reg = IndexRegistry::open(dir.path(), "index_registry").unwrap();
        (dir, reg)
    }

    #[test]
    fn project_roundtrip_and_exists() {
        let (_dir, reg) = registry();
        assert!(!reg.project_exists("p"));
        reg.save_project(&sample_project("p")).unwrap();
        assert!(reg.project_exists("p"));
        assert_eq!(reg.get_project("p").unwrap().project_id, "p");
        assert_eq!(reg.get_all_projects().len(), 1);
    }

    #[test]
    fn file_roundtrip_and_status_queries() {
        let (_dir, reg) = registry();
        reg.save_files_batch(&[
            sample_file("p", "/tmp/proj/a.py", 2),
            sample_file("p", "/tmp/proj/b.py", 3),
        ])
        .unwrap();

        assert_eq!(reg.get_all_files("p").len(), 2);
        assert!(reg.get_file("p", Path::new("/tmp/proj/a.py")).is_some());
        assert!(reg.get_file("q", Path::new("/tmp/proj/a.py")).is_none());

        reg.mark_file_deleted("p", Path::new("/tmp/proj/a.py")).unwrap();
        let deleted = reg.get_files_by_status("p", FileStatus::Deleted);
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].file_path.ends_with("a.py"));

        let stats = reg.project_stats("p");
        assert_eq!(
            stats,
            RegistryStats { total_files: 2, active_files: 1, deleted_files: 1, total_chunks: 5 }
        );
    }

    #[test]
    fn delete_project_cascades_to_files() {
        let (_dir, reg) = registry();
        reg.save_project(&sample_project("p")).unwrap();
        reg.save_file(&sample_file("p", "/tmp/proj/a.py", 1)).unwrap();
        reg.save_file(&sample_file("other", "/tmp/other/x.py", 1)).unwrap();

        assert!(reg.delete_project("p").unwrap());
        assert!(reg.get_project("p").is_none());
        assert!(reg.get_all_files("p").is_empty());
        // Other projects untouched
        assert_eq!(reg.get_all_files("other").len(), 1);
    }

    #[test]
    fn clear_files_keeps_project_row() {
        let (_dir, reg) = registry();
        reg.save_project(&sample_project("p")).unwrap();
        reg.save_file(&sample_file("p", "/tmp/proj/a.py", 1)).unwrap();

        assert_eq!(reg.clear_project_files("p").unwrap(), 1);
        assert!(reg.get_all_files("p").is_empty());
        assert!(reg.project_exists("p"));
    }

    #[test]
    fn metadata_map_is_keyed_by_absolute_path() {
        let (_dir, reg) = registry();
        reg.save_file(&sample_file("p", "/tmp/proj/a.py", 1)).unwrap();
        let map = reg.files_metadata_map("p");
        assert!(map.contains_key(Path::new("/tmp/proj/a.py")));
        assert_eq!(reg.file_paths("p").len(), 1);
    }
}
