//! Indexing orchestrator: identify → detect → diff → process → persist.
//!
//! Each run identifies the project, detects the primary language, diffs the
//! current tree against the registry, and pushes only changed and new files
//! through the AST → chunk → embed → store pipeline. Individual file
//! failures are isolated; vector-store and registry failures abort the run
//! because they would leave the counters wrong.

use crate::ast;
use crate::checksum;
use crate::chunker;
use crate::config::FalconEyeConfig;
use crate::context::ContextAssembler;
use crate::discovery;
use crate::error::{Error, Result};
use crate::language;
use crate::llm::LlmGateway;
use crate::metadata_store::MetadataStore;
use crate::project::{self, ProjectIdentity};
use crate::registry::IndexRegistry;
use crate::store::{VectorStore, KIND_CODE, KIND_DOCUMENTS};
use crate::types::{
    relative_display, CancelToken, Codebase, CodeFile, FileMetadata, FileStatus, ProjectMetadata,
    ProjectType, StructuralMetadata,
};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Command and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IndexCommand {
    pub codebase_path: PathBuf,
    pub language: Option<String>,
    pub excluded_patterns: Vec<String>,
    /// Lines per code chunk.
    pub chunk_size: usize,
    /// Overlap lines between adjacent chunks; must be < `chunk_size`.
    pub chunk_overlap: usize,
    pub include_documents: bool,
    /// Characters per document chunk.
    pub doc_chunk_size: usize,
    /// Explicit project id override (monorepos).
    pub project_id: Option<String>,
    pub force_reindex: bool,
}

impl IndexCommand {
    pub fn new(codebase_path: PathBuf, config: &FalconEyeConfig) -> Self {
        let mut excluded = config.file_discovery.default_exclusions.clone();
        excluded.sort();
        excluded.dedup();
        Self {
            codebase_path,
            language: None,
            excluded_patterns: excluded,
            chunk_size: config.chunking.default_size,
            chunk_overlap: config.chunking.default_overlap,
            include_documents: true,
            doc_chunk_size: 1000,
            project_id: None,
            force_reindex: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexReport {
    pub project_id: String,
    pub project_name: String,
    pub language: String,
    pub first_time: bool,
    pub files_total: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    pub documents_processed: usize,
    pub chunks_embedded: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CleanupReport {
    pub files_removed: usize,
    pub embeddings_removed: usize,
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

pub struct Indexer {
    registry: Arc<IndexRegistry>,
    metadata_store: Arc<MetadataStore>,
    llm: Arc<dyn LlmGateway>,
    config: FalconEyeConfig,
}

impl Indexer {
    pub fn new(
        registry: Arc<IndexRegistry>,
        metadata_store: Arc<MetadataStore>,
        llm: Arc<dyn LlmGateway>,
        config: FalconEyeConfig,
    ) -> Self {
        Self { registry, metadata_store, llm, config }
    }

    /// Project-scoped vector store handle.
    pub fn vector_store_for(&self, project_id: &str) -> Arc<VectorStore> {
        Arc::new(VectorStore::new(
            &self.config.vector_store.persist_directory,
            &self.config.vector_store.collection_prefix,
            Some(project_id.to_string()),
            true,
        ))
    }

    /// Context assembler wired against one project's collections.
    pub fn assembler_for(&self, project_id: &str) -> ContextAssembler {
        ContextAssembler::new(
            self.vector_store_for(project_id),
            Arc::clone(&self.metadata_store),
            Arc::clone(&self.llm),
        )
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// Run one indexing pass over a codebase.
    pub async fn index(&self, command: &IndexCommand, cancel: &CancelToken) -> Result<IndexReport> {
        if !command.codebase_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "not a directory: {}",
                command.codebase_path.display()
            )));
        }

        let root = command
            .codebase_path
            .canonicalize()
            .unwrap_or_else(|_| command.codebase_path.clone());

        // Step 1: identity.
        let identity = project::identify_project(&root, command.project_id.as_deref());
        let ProjectIdentity { project_id, project_name, project_type, remote_url } = identity;
        info!(project = project_id.as_str(), root = %root.display(), "Indexing codebase");

        // Step 2: language.
        let lang = language::detect_language(&root, command.language.as_deref())?;
        if !self.config.languages.enabled.iter().any(|l| l == &lang) {
            return Err(Error::LanguageDetection(format!(
                "detected language {lang} is not enabled in configuration"
            )));
        }

        // Step 3: prior state.
        let existing_project = self.registry.get_project(&project_id);
        let first_time = existing_project.is_none();

        // Step 4: current files.
        let files = discovery::discover_source_files(&root, &lang, &command.excluded_patterns);
        info!(project = project_id.as_str(), language = lang.as_str(), files = files.len(), "Discovered source files");

        // Step 5: plan.
        let cached = self.registry.files_metadata_map(&project_id);
        let (to_process, skipped) = if command.force_reindex || first_time {
            (files.clone(), 0usize)
        } else {
            let (changed, unchanged) = checksum::filter_changed_files(&files, &cached, false);
            let current_set: HashSet<PathBuf> = files.iter().cloned().collect();
            let cached_set: HashSet<PathBuf> = cached.keys().cloned().collect();
            let new = checksum::identify_new_files(&current_set, &cached_set);

            let mut plan: Vec<PathBuf> = changed;
            for path in new {
                if !plan.contains(&path) {
                    plan.push(path);
                }
            }
            plan.sort();
            (plan, unchanged.len())
        };
        info!(
            project = project_id.as_str(),
            to_process = to_process.len(),
            skipped,
            force = command.force_reindex,
            first_time,
            "Re-index plan"
        );

        let vector_store = self.vector_store_for(&project_id);
        let commit = match project_type {
            ProjectType::Git => project::current_commit(&root),
            ProjectType::NonGit => None,
        };

        // Step 6: process files.
        let mut codebase = Codebase::new(root.clone(), lang.clone(), command.excluded_patterns.clone());
        let mut processed: Vec<FileMetadata> = Vec::new();
        let mut failed = 0usize;
        let mut cancelled = false;

        for path in &to_process {
            if cancel.is_cancelled() {
                cancelled = true;
                warn!(project = project_id.as_str(), "Indexing cancelled");
                break;
            }
            match self
                .process_file(path, &root, &lang, command, &project_id, commit.clone(), &vector_store, cached.get(path), &mut codebase)
                .await?
            {
                Some(meta) => processed.push(meta),
                None => failed += 1,
            }
        }

        // Step 7: documents.
        let mut documents_processed = 0usize;
        if command.include_documents && !cancelled {
            let docs = discovery::discover_documents(&root, &command.excluded_patterns);
            info!(project = project_id.as_str(), documents = docs.len(), "Discovered documentation files");
            for doc_path in &docs {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                if self
                    .process_document(doc_path, &root, command, &project_id, &vector_store)
                    .await?
                {
                    documents_processed += 1;
                }
            }
        }

        // Step 8: deletions.
        let mut files_deleted = 0usize;
        if !first_time && !command.force_reindex && !cancelled {
            let current_set: HashSet<PathBuf> = files.iter().cloned().collect();
            let cached_set: HashSet<PathBuf> = cached.keys().cloned().collect();
            for deleted in checksum::identify_deleted_files(&current_set, &cached_set) {
                if cached.get(&deleted).map(|m| m.status) == Some(FileStatus::Deleted) {
                    continue;
                }
                if self.registry.mark_file_deleted(&project_id, &deleted)? {
                    files_deleted += 1;
                    info!(
                        project = project_id.as_str(),
                        file = %deleted.display(),
                        "Marked file deleted (embeddings retained until cleanup)"
                    );
                }
            }
        }

        // Step 9: project metadata.
        let now = Utc::now();
        let created_at = existing_project.as_ref().map(|p| p.created_at).unwrap_or(now);
        let project_metadata = ProjectMetadata {
            project_id: project_id.clone(),
            project_name: project_name.clone(),
            project_root: root.clone(),
            project_type,
            git_remote_url: remote_url,
            last_indexed_commit: commit,
            last_full_scan: now,
            total_files: files.len(),
            total_chunks: processed.iter().map(|f| f.chunk_count).sum(),
            languages: vec![lang.clone()],
            created_at,
            updated_at: now,
        };
        self.registry.save_project(&project_metadata)?;

        let report = IndexReport {
            project_id,
            project_name,
            language: lang,
            first_time,
            files_total: files.len(),
            files_processed: processed.len(),
            files_skipped: skipped,
            files_failed: failed,
            files_deleted,
            documents_processed,
            chunks_embedded: processed.iter().map(|f| f.chunk_count).sum(),
            cancelled,
        };
        info!(
            project = report.project_id.as_str(),
            processed = report.files_processed,
            skipped = report.files_skipped,
            failed = report.files_failed,
            deleted = report.files_deleted,
            documents = report.documents_processed,
            chunks = report.chunks_embedded,
            "Indexing complete"
        );
        Ok(report)
    }

    /// Process one source file. `Ok(None)` means a per-file failure that was
    /// logged and skipped; `Err` means a cross-cutting store/registry failure.
    #[allow(clippy::too_many_arguments)]
    async fn process_file(
        &self,
        path: &Path,
        root: &Path,
        lang: &str,
        command: &IndexCommand,
        project_id: &str,
        commit: Option<String>,
        vector_store: &VectorStore,
        cached: Option<&FileMetadata>,
        codebase: &mut Codebase,
    ) -> Result<Option<FileMetadata>> {
        let relative = relative_display(root, path);

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(project = project_id, file = relative.as_str(), error = %e, "Skipping unreadable file");
                return Ok(None);
            }
        };

        codebase.add_file(CodeFile::new(
            path.to_path_buf(),
            relative.clone(),
            content.clone(),
            lang.to_string(),
        ));

        // Structural metadata and chunk/embed may complete in either order,
        // but both land before the file's registry row is written.
        let structural = ast::analyze_file(&relative, &content, lang);
        self.metadata_store.store(&structural)?;

        let mut chunks = match chunker::chunk_code(
            &content,
            &relative,
            lang,
            command.chunk_size,
            command.chunk_overlap,
        ) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(project = project_id, file = relative.as_str(), error = %e, "Chunking failed");
                return Ok(None);
            }
        };
        enrich_chunks(&mut chunks, &structural);

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = match self.llm.embed_batch(&texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                warn!(project = project_id, file = relative.as_str(), error = %e, "Embedding failed, file skipped");
                return Ok(None);
            }
        };
        if embeddings.len() != chunks.len() {
            warn!(project = project_id, file = relative.as_str(), "Embedding count mismatch, file skipped");
            return Ok(None);
        }

        let chunks: Vec<_> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| chunk.with_embedding(embedding))
            .collect();

        // Supersede the previous generation of this file's chunks.
        if let Some(prior) = cached {
            vector_store.delete_embeddings(KIND_CODE, &prior.embedding_ids)?;
        }
        vector_store.store_chunks(&chunks, KIND_CODE)?;

        let mut file_meta = match checksum::snapshot(
            path,
            Path::new(&relative),
            project_id,
            lang,
            commit,
        ) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(project = project_id, file = relative.as_str(), error = %e, "Snapshot failed");
                return Ok(None);
            }
        };
        file_meta.chunk_count = chunks.len();
        file_meta.embedding_ids = chunks.iter().map(|c| c.id.to_string()).collect();
        if file_meta.git_commit_hash.is_some() {
            file_meta.git_file_hash =
                git2::Oid::hash_object(git2::ObjectType::Blob, content.as_bytes())
                    .ok()
                    .map(|oid| oid.to_string());
        }

        self.registry.save_file(&file_meta)?;
        info!(
            project = project_id,
            file = relative.as_str(),
            chunks = file_meta.chunk_count,
            "Processed file"
        );
        Ok(Some(file_meta))
    }

    /// Process one documentation file. `Ok(false)` when skipped, including
    /// the case where the doc is unchanged since its last indexing.
    async fn process_document(
        &self,
        path: &Path,
        root: &Path,
        command: &IndexCommand,
        project_id: &str,
        vector_store: &VectorStore,
    ) -> Result<bool> {
        let relative = relative_display(root, path);

        let cached = self.registry.get_document(project_id, path);
        if !command.force_reindex && !checksum::has_changed_quick(path, cached.as_ref()) {
            return Ok(false);
        }

        let Ok(content) = std::fs::read_to_string(path) else {
            // Binary or non-UTF-8: silently not a document.
            return Ok(false);
        };
        if content.trim().is_empty() {
            return Ok(false);
        }

        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let doc_type = discovery::classify_document(filename, &relative);
        let metadata = crate::types::DocumentMetadata::extract(&relative, &content, doc_type);

        let chunks = match chunker::chunk_document(&content, &metadata, command.doc_chunk_size) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(file = relative.as_str(), error = %e, "Document chunking failed");
                return Ok(false);
            }
        };
        if chunks.is_empty() {
            return Ok(false);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = match self.llm.embed_batch(&texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                warn!(file = relative.as_str(), error = %e, "Document embedding failed, skipped");
                return Ok(false);
            }
        };
        if embeddings.len() != chunks.len() {
            return Ok(false);
        }

        let chunks: Vec<_> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| chunk.with_embedding(embedding))
            .collect();

        // Supersede the previous generation of this document's chunks.
        if let Some(prior) = &cached {
            vector_store.delete_embeddings(KIND_DOCUMENTS, &prior.embedding_ids)?;
        }
        vector_store.store_document_chunks(&chunks, KIND_DOCUMENTS)?;

        let mut doc_meta = match checksum::snapshot(path, Path::new(&relative), project_id, doc_type, None)
        {
            Ok(meta) => meta,
            Err(e) => {
                warn!(file = relative.as_str(), error = %e, "Document snapshot failed");
                return Ok(true);
            }
        };
        doc_meta.chunk_count = chunks.len();
        doc_meta.embedding_ids = chunks.iter().map(|c| c.id.to_string()).collect();
        self.registry.save_document(&doc_meta)?;

        info!(file = relative.as_str(), doc_type, chunks = chunks.len(), "Processed document");
        Ok(true)
    }

    /// Physically remove deleted-file rows and their embeddings.
    pub fn cleanup_project(&self, project_id: &str) -> Result<CleanupReport> {
        let vector_store = self.vector_store_for(project_id);
        let deleted = self.registry.get_files_by_status(project_id, FileStatus::Deleted);

        let mut embeddings_removed = 0usize;
        let mut files_removed = 0usize;
        for file in &deleted {
            embeddings_removed += vector_store.delete_embeddings(KIND_CODE, &file.embedding_ids)?;
            if self.registry.delete_file(project_id, &file.file_path)? {
                files_removed += 1;
            }
        }

        info!(project = project_id, files_removed, embeddings_removed, "Cleanup complete");
        Ok(CleanupReport { files_removed, embeddings_removed })
    }

    /// Delete a project: registry rows and all vector collections.
    pub fn delete_project(&self, project_id: &str) -> Result<bool> {
        let vector_store = self.vector_store_for(project_id);
        vector_store.delete_project_collections()?;
        self.registry.delete_project(project_id)
    }
}

/// Mark chunks whose line span contains function definitions or imports,
/// carrying the overlapping function names.
fn enrich_chunks(chunks: &mut [crate::types::CodeChunk], structural: &StructuralMetadata) {
    for chunk in chunks {
        let start = chunk.metadata.start_line;
        let end = chunk.metadata.end_line;
        let names: Vec<String> = structural
            .functions
            .iter()
            .filter(|f| f.line >= start && f.line <= end)
            .map(|f| f.name.clone())
            .collect();
        chunk.metadata.has_functions = !names.is_empty();
        chunk.metadata.has_imports =
            structural.imports.iter().any(|i| i.line >= start && i.line <= end);
        chunk.metadata.function_names = names;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionInfo;

    #[test]
    fn chunk_enrichment_marks_overlapping_functions() {
        let content: String = (1..=60).map(|i| format!("line {i}\n")).collect();
        let mut chunks = chunker::chunk_code(&content, "a.py", "python", 50, 10).unwrap();

        let mut structural = StructuralMetadata::empty("a.py", "python");
        structural.functions.push(FunctionInfo { name: "early".into(), line: 5, ..Default::default() });
        structural.functions.push(FunctionInfo { name: "late".into(), line: 55, ..Default::default() });

        enrich_chunks(&mut chunks, &structural);
        assert!(chunks[0].metadata.has_functions);
        assert_eq!(chunks[0].metadata.function_names, vec!["early"]);
        assert!(chunks[1].metadata.function_names.contains(&"late".to_string()));
    }
}
