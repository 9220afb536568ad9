//! Shared fixtures for integration tests: a deterministic in-memory LLM
//! gateway and temp-directory wiring for the indexing pipeline.
#![allow(dead_code)]

use async_trait::async_trait;
use falconeye_core::error::Result;
use falconeye_core::llm::LlmGateway;
use falconeye_core::{FalconEyeConfig, IndexRegistry, Indexer, MetadataStore};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const EMBED_DIM: usize = 8;

/// Deterministic gateway: embeddings are a byte histogram of the text, chat
/// responses are canned. Counts embedded texts so tests can assert that an
/// unchanged re-index writes zero new embeddings.
pub struct MockGateway {
    pub embedded_texts: AtomicUsize,
    pub analysis_response: Mutex<String>,
    pub validation_response: Mutex<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            embedded_texts: AtomicUsize::new(0),
            analysis_response: Mutex::new(r#"{"reviews": []}"#.to_string()),
            validation_response: Mutex::new(r#"{"reviews": []}"#.to_string()),
        }
    }

    pub fn with_analysis(response: &str) -> Self {
        let gateway = Self::new();
        *gateway.analysis_response.lock().unwrap() = response.to_string();
        gateway
    }

    pub fn embed_count(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBED_DIM];
        for (i, b) in text.bytes().enumerate() {
            v[(b as usize + i) % EMBED_DIM] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
        v.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl LlmGateway for MockGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedded_texts.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    async fn analyze_code_security(&self, _context: &str, _system_prompt: &str) -> Result<String> {
        Ok(self.analysis_response.lock().unwrap().clone())
    }

    async fn validate_findings(
        &self,
        _code: &str,
        _findings_json: &str,
        _context: &str,
    ) -> Result<String> {
        Ok(self.validation_response.lock().unwrap().clone())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Config with every persist directory under `data_root`.
pub fn test_config(data_root: &Path) -> FalconEyeConfig {
    let mut config = FalconEyeConfig::default();
    config.vector_store.persist_directory = data_root.join("vectorstore");
    config.metadata.persist_directory = data_root.join("metadata");
    config.index_registry.persist_directory = data_root.join("registry");
    config
}

/// Indexer wired against temp-dir stores and the given gateway.
pub fn test_indexer(data_root: &Path, gateway: Arc<MockGateway>) -> Indexer {
    let config = test_config(data_root);
    let registry = Arc::new(
        IndexRegistry::open(
            &config.index_registry.persist_directory,
            &config.index_registry.collection_name,
        )
        .unwrap(),
    );
    let metadata_store = Arc::new(
        MetadataStore::open(&config.metadata.persist_directory, &config.metadata.collection_name)
            .unwrap(),
    );
    Indexer::new(registry, metadata_store, gateway, config)
}
