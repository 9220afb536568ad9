//! FalconEYE core — content-addressed code indexing, retrieval-augmented
//! context assembly, and AI-driven security review.
//!
//! The pipeline: identify the project, diff the tree against the index
//! registry, chunk and embed only what changed into project-scoped vector
//! collections, then assemble retrieval-augmented contexts and normalize the
//! model's findings. All semantic judgments come from the model; the core
//! performs no rule-based detection.

pub mod ast;
pub mod checksum;
pub mod chunker;
pub mod collection;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod findings;
pub mod indexer;
pub mod language;
pub mod llm;
pub mod metadata_store;
pub mod plugins;
pub mod project;
pub mod registry;
pub mod resilience;
pub mod review;
pub mod store;
pub mod types;

pub use config::FalconEyeConfig;
pub use context::{ContextAssembler, PromptContext};
pub use error::{Error, Result};
pub use indexer::{CleanupReport, IndexCommand, IndexReport, Indexer};
pub use llm::{HttpLlmGateway, LlmGateway};
pub use metadata_store::MetadataStore;
pub use plugins::{LanguagePlugin, PluginRegistry};
pub use registry::{IndexRegistry, RegistryStats};
pub use resilience::{CircuitBreaker, ResilientGateway};
pub use review::{ReviewCodebaseCommand, ReviewCommand, Reviewer};
pub use store::VectorStore;
pub use types::{
    CancelToken, CodeChunk, DocumentChunk, FileMetadata, FileStatus, ProjectMetadata,
    SecurityFinding, SecurityReview, Severity,
};
