//! Domain model: codebases, chunks, structural metadata, findings, and the
//! registry value objects used for smart re-indexing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Codebase
// ---------------------------------------------------------------------------

/// A source file read into memory for one indexing run.
#[derive(Debug, Clone)]
pub struct CodeFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub content: String,
    pub language: String,
    pub size_bytes: usize,
    pub line_count: usize,
}

impl CodeFile {
    pub fn new(path: PathBuf, relative_path: String, content: String, language: String) -> Self {
        let size_bytes = content.len();
        let line_count = content.lines().count();
        Self { path, relative_path, content, language, size_bytes, line_count }
    }
}

/// The set of files picked up by a single indexing run. Owned by the run.
#[derive(Debug)]
pub struct Codebase {
    pub root_path: PathBuf,
    pub language: String,
    pub files: Vec<CodeFile>,
    pub excluded_patterns: Vec<String>,
}

impl Codebase {
    pub fn new(root_path: PathBuf, language: String, excluded_patterns: Vec<String>) -> Self {
        Self { root_path, language, files: Vec::new(), excluded_patterns }
    }

    pub fn add_file(&mut self, file: CodeFile) {
        self.files.push(file);
    }

    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    pub fn total_lines(&self) -> usize {
        self.files.iter().map(|f| f.line_count).sum()
    }
}

// ---------------------------------------------------------------------------
// Code chunks
// ---------------------------------------------------------------------------

/// File-relative identity of a code chunk. Lines are 1-based inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub has_functions: bool,
    #[serde(default)]
    pub has_imports: bool,
    #[serde(default)]
    pub function_names: Vec<String>,
}

/// A line-bounded slice of a source file, the unit of embedding and retrieval.
#[derive(Debug, Clone)]
pub struct CodeChunk {
    pub id: Uuid,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub token_count: usize,
    pub embedding: Option<Vec<f32>>,
}

impl CodeChunk {
    pub fn new(content: String, metadata: ChunkMetadata, token_count: usize) -> Self {
        Self { id: Uuid::new_v4(), content, metadata, token_count, embedding: None }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub file_path: String,
    /// readme, contributing, security_policy, changelog, license, api_doc,
    /// architecture, design_doc, guide, or documentation.
    pub document_type: String,
    pub title: Option<String>,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl DocumentMetadata {
    /// Extract title (first heading), section headings, and keyword tokens
    /// from document content.
    pub fn extract(file_path: &str, content: &str, document_type: &str) -> Self {
        let mut title = None;
        let mut sections = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                let heading = trimmed.trim_start_matches('#').trim().to_string();
                if title.is_none() {
                    title = Some(heading.clone());
                }
                sections.push(heading);
            }
        }

        const KEYWORD_INDICATORS: [&str; 8] = [
            "security",
            "authentication",
            "authorization",
            "api",
            "architecture",
            "design",
            "implementation",
            "configuration",
        ];
        let content_lower = content.to_lowercase();
        let keywords = KEYWORD_INDICATORS
            .iter()
            .filter(|k| content_lower.contains(*k))
            .map(|k| k.to_string())
            .collect();

        Self {
            file_path: file_path.to_string(),
            document_type: document_type.to_string(),
            title,
            sections,
            keywords,
        }
    }
}

/// A character-bounded slice of a documentation file. Offsets are half-open
/// byte offsets clamped to UTF-8 boundaries.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn new(
        content: String,
        metadata: DocumentMetadata,
        start_char: usize,
        end_char: usize,
        chunk_index: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            metadata,
            start_char,
            end_char,
            chunk_index,
            total_chunks: 0,
            embedding: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

// ---------------------------------------------------------------------------
// Structural metadata (AST)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub line: usize,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub decorators: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportInfo {
    pub statement: String,
    pub line: usize,
    pub module: String,
    #[serde(default)]
    pub imported_names: Vec<String>,
    #[serde(default)]
    pub is_relative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInfo {
    pub function: String,
    pub line: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub line: usize,
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFlowNode {
    /// if, while, for, try, switch.
    pub node_type: String,
    pub line: usize,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFlowInfo {
    pub variable: String,
    pub defined_at: usize,
    #[serde(default)]
    pub used_at: Vec<usize>,
    #[serde(default)]
    pub flows_to: Vec<String>,
}

/// Per-file structural summary extracted by the AST stage. All line numbers
/// are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralMetadata {
    pub file_path: String,
    pub language: String,
    #[serde(default)]
    pub functions: Vec<FunctionInfo>,
    #[serde(default)]
    pub imports: Vec<ImportInfo>,
    #[serde(default)]
    pub calls: Vec<CallInfo>,
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub control_flow: Vec<ControlFlowNode>,
    #[serde(default)]
    pub data_flows: Vec<DataFlowInfo>,
}

impl StructuralMetadata {
    pub fn empty(file_path: &str, language: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            language: language.to_string(),
            functions: Vec::new(),
            imports: Vec::new(),
            calls: Vec::new(),
            classes: Vec::new(),
            dependencies: Vec::new(),
            control_flow: Vec::new(),
            data_flows: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Security findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            "info" => Severity::Info,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Bucket a numeric confidence score from the model.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Confidence::High
        } else if score >= 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// One potential security issue reported by the model, normalized and
/// (where possible) anchored to source lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub id: Uuid,
    pub issue: String,
    pub reasoning: String,
    pub mitigation: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub file_path: String,
    pub code_snippet: String,
    pub line_start: Option<usize>,
    pub line_end: Option<usize>,
    pub cwe_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Aggregate result of analyzing one file or path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityReview {
    pub id: Uuid,
    pub target_path: String,
    pub language: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_analyzed: usize,
    pub findings: Vec<SecurityFinding>,
}

impl SecurityReview {
    pub fn start(target_path: &str, language: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_path: target_path.to_string(),
            language: language.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            files_analyzed: 0,
            findings: Vec::new(),
        }
    }

    pub fn add_finding(&mut self, finding: SecurityFinding) {
        self.findings.push(finding);
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

// ---------------------------------------------------------------------------
// Registry value objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectType {
    #[serde(rename = "git")]
    Git,
    #[serde(rename = "non-git")]
    NonGit,
}

/// Project-level registry row, created on first indexing and rewritten at the
/// end of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_id: String,
    pub project_name: String,
    pub project_root: PathBuf,
    pub project_type: ProjectType,
    pub git_remote_url: Option<String>,
    pub last_indexed_commit: Option<String>,
    pub last_full_scan: DateTime<Utc>,
    pub total_files: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub languages: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Deleted,
    Modified,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::Deleted => "deleted",
            FileStatus::Modified => "modified",
        }
    }
}

/// Per-file registry row used for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub project_id: String,
    pub file_path: PathBuf,
    pub relative_path: PathBuf,
    pub language: String,
    /// `"sha256:" + hex` over the file content.
    pub file_checksum: String,
    pub file_size: u64,
    /// Unix seconds with sub-second precision.
    pub file_mtime: f64,
    pub git_commit_hash: Option<String>,
    pub git_file_hash: Option<String>,
    pub indexed_at: DateTime<Utc>,
    pub chunk_count: usize,
    #[serde(default)]
    pub embedding_ids: Vec<String>,
    pub status: FileStatus,
    pub last_scanned: DateTime<Utc>,
}

impl FileMetadata {
    /// Quick check whether the file may have changed. Stat-only; a match on
    /// both mtime and size means definitely unchanged.
    pub fn has_changed(&self, current_mtime: f64, current_size: u64) -> bool {
        self.file_mtime != current_mtime || self.file_size != current_size
    }
}

/// Seconds since the Unix epoch for a filesystem mtime.
pub fn mtime_seconds(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag checked between files and before LLM calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Convert an absolute path to a `/`-separated path relative to `root`.
pub fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_buckets() {
        assert_eq!(Confidence::from_score(0.9), Confidence::High);
        assert_eq!(Confidence::from_score(0.8), Confidence::High);
        assert_eq!(Confidence::from_score(0.7), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.5), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.49), Confidence::Low);
    }

    #[test]
    fn severity_parse_defaults_to_medium() {
        assert_eq!(Severity::parse("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse("bogus"), Severity::Medium);
    }

    #[test]
    fn document_metadata_extraction() {
        let content = "# FalconEYE\n\nSome text about security.\n\n## Configuration\n\nMore.\n";
        let meta = DocumentMetadata::extract("README.md", content, "readme");
        assert_eq!(meta.title.as_deref(), Some("FalconEYE"));
        assert_eq!(meta.sections, vec!["FalconEYE", "Configuration"]);
        assert!(meta.keywords.contains(&"security".to_string()));
        assert!(meta.keywords.contains(&"configuration".to_string()));
    }

    #[test]
    fn review_lifecycle() {
        let mut review = SecurityReview::start("src/main.py", "python");
        assert!(review.completed_at.is_none());
        review.complete();
        assert!(review.completed_at.is_some());
    }
}
