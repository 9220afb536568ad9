//! Layered configuration: built-in defaults, TOML files, and `FALCONEYE_*`
//! environment overrides.
//!
//! Files are merged in order (`~/.falconeye/config.toml`, `./falconeye.toml`,
//! `./.falconeye.toml`, then an explicit `--config` path), later sources
//! overriding earlier ones. Environment variables override everything; nested
//! keys are joined by underscores (`FALCONEYE_LLM_BASE_URL` → `llm.base_url`)
//! and values are parsed as bool, int, float, comma list, or string in that
//! order.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Config groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmModelConfig {
    /// Model used for security analysis chat completions.
    pub analysis: String,
    /// Model used for embedding generation.
    pub embedding: String,
}

impl Default for LlmModelConfig {
    fn default() -> Self {
        Self { analysis: "qwen3-coder:30b".into(), embedding: "embeddinggemma:300m".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: f64,
    pub max_delay: f64,
    pub exponential_base: f64,
    /// Jitter fraction added on top of the computed delay (0.1 = up to +10%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: 1.0,
            max_delay: 30.0,
            exponential_base: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Seconds to wait in the open state before probing with half-open calls.
    pub timeout: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 2, timeout: 60.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: LlmModelConfig,
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: LlmModelConfig::default(),
            base_url: "http://localhost:11434".into(),
            timeout: 120,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub provider: String,
    pub persist_directory: PathBuf,
    pub collection_prefix: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            persist_directory: PathBuf::from("./falconeye_data/vectorstore"),
            collection_prefix: "falconeye".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub provider: String,
    pub persist_directory: PathBuf,
    pub collection_name: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            persist_directory: PathBuf::from("./falconeye_data/metadata"),
            collection_name: "falconeye_metadata".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexRegistryConfig {
    pub persist_directory: PathBuf,
    pub collection_name: String,
}

impl Default for IndexRegistryConfig {
    fn default() -> Self {
        Self {
            persist_directory: PathBuf::from("./falconeye_data/registry"),
            collection_name: "index_registry".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Lines per code chunk.
    pub default_size: usize,
    /// Lines of overlap between adjacent code chunks.
    pub default_overlap: usize,
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { default_size: 50, default_overlap: 10, max_chunk_size: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Similar chunks retrieved for review context.
    pub top_k_context: usize,
    /// Run the second-pass validation over initial findings.
    pub validate_findings: bool,
    pub batch_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { top_k_context: 5, validate_findings: false, batch_size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub enabled: Vec<String>,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            enabled: [
                "python",
                "javascript",
                "typescript",
                "go",
                "rust",
                "c",
                "cpp",
                "java",
                "dart",
                "php",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDiscoveryConfig {
    /// Substring patterns applied to both relative and absolute paths.
    pub default_exclusions: Vec<String>,
}

impl Default for FileDiscoveryConfig {
    fn default() -> Self {
        Self {
            default_exclusions: [
                "*/node_modules/*",
                "*/venv/*",
                "*/virtualenv/*",
                "*/.git/*",
                "*/dist/*",
                "*/build/*",
                "*/__pycache__/*",
                "*/target/*",
                "*.min.js",
                "*.pyc",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FalconEyeConfig {
    pub llm: LlmConfig,
    pub vector_store: VectorStoreConfig,
    pub metadata: MetadataConfig,
    pub index_registry: IndexRegistryConfig,
    pub chunking: ChunkingConfig,
    pub analysis: AnalysisConfig,
    pub languages: LanguagesConfig,
    pub file_discovery: FileDiscoveryConfig,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

const ENV_PREFIX: &str = "FALCONEYE_";

impl FalconEyeConfig {
    /// Load configuration from default file locations, an optional explicit
    /// path, and environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut table = default_table()?;

        let mut paths: Vec<PathBuf> = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".falconeye").join("config.toml"));
        }
        paths.push(PathBuf::from("./falconeye.toml"));
        paths.push(PathBuf::from("./.falconeye.toml"));

        for path in &paths {
            if path.is_file() {
                merge_table(&mut table, load_toml(path)?);
            }
        }

        if let Some(path) = explicit_path {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            merge_table(&mut table, load_toml(path)?);
        }

        apply_env_overrides(&mut table, std::env::vars());

        let config: FalconEyeConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.default_size == 0 {
            return Err(Error::Config("chunking.default_size must be positive".into()));
        }
        if self.chunking.default_overlap >= self.chunking.default_size {
            return Err(Error::Config(format!(
                "chunking.default_overlap ({}) must be less than chunking.default_size ({})",
                self.chunking.default_overlap, self.chunking.default_size
            )));
        }
        if self.analysis.top_k_context == 0 {
            return Err(Error::Config("analysis.top_k_context must be positive".into()));
        }
        Ok(())
    }

    /// Render the current configuration as TOML (used by `config init/show`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

fn default_table() -> Result<toml::Table> {
    let value =
        toml::Value::try_from(FalconEyeConfig::default()).map_err(|e| Error::Config(e.to_string()))?;
    match value {
        toml::Value::Table(t) => Ok(t),
        _ => Err(Error::Config("default configuration is not a table".into())),
    }
}

fn load_toml(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)?;
    content
        .parse::<toml::Table>()
        .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))
}

/// Recursively merge `override_table` into `base`, table-on-table.
fn merge_table(base: &mut toml::Table, override_table: toml::Table) {
    for (key, value) in override_table {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_table(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `FALCONEYE_*` overrides onto an already fully-populated table.
///
/// Key resolution is greedy longest-prefix against existing table keys, so
/// `FALCONEYE_LLM_BASE_URL` resolves to `llm.base_url` rather than creating a
/// stray `llm.base.url` entry.
fn apply_env_overrides(table: &mut toml::Table, vars: impl Iterator<Item = (String, String)>) {
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else { continue };
        let parts: Vec<String> = rest.to_lowercase().split('_').map(|s| s.to_string()).collect();
        if parts.is_empty() {
            continue;
        }
        set_env_value(table, &parts, parse_env_value(&value));
    }
}

fn set_env_value(table: &mut toml::Table, parts: &[String], value: toml::Value) {
    // Longest join of leading parts that names an existing sub-table wins;
    // the remainder becomes the leaf key (or recurses further down).
    for split in (1..=parts.len()).rev() {
        let candidate = parts[..split].join("_");
        if split == parts.len() {
            if table.contains_key(&candidate) && !table[&candidate].is_table() {
                table.insert(candidate, value);
                return;
            }
            continue;
        }
        if let Some(toml::Value::Table(inner)) = table.get_mut(&candidate) {
            set_env_value(inner, &parts[split..], value);
            return;
        }
    }
    // No existing key matched; insert the full joined key at this level.
    table.insert(parts.join("_"), value);
}

/// Parse an environment value as bool, int, float, comma list, or string.
fn parse_env_value(value: &str) -> toml::Value {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => return toml::Value::Boolean(true),
        "false" | "no" | "0" => return toml::Value::Boolean(false),
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return toml::Value::Float(f);
    }
    if value.contains(',') {
        return toml::Value::Array(
            value.split(',').map(|s| toml::Value::String(s.trim().to_string())).collect(),
        );
    }
    toml::Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        FalconEyeConfig::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn overlap_must_be_less_than_size() {
        let mut config = FalconEyeConfig::default();
        config.chunking.default_overlap = config.chunking.default_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_nested_key() {
        let mut table = default_table().unwrap();
        apply_env_overrides(
            &mut table,
            vec![
                ("FALCONEYE_LLM_BASE_URL".to_string(), "http://remote:11434".to_string()),
                ("FALCONEYE_ANALYSIS_TOP_K_CONTEXT".to_string(), "8".to_string()),
                ("FALCONEYE_LLM_RETRY_MAX_RETRIES".to_string(), "5".to_string()),
            ]
            .into_iter(),
        );
        let config: FalconEyeConfig = toml::Value::Table(table).try_into().unwrap();
        assert_eq!(config.llm.base_url, "http://remote:11434");
        assert_eq!(config.analysis.top_k_context, 8);
        assert_eq!(config.llm.retry.max_retries, 5);
    }

    #[test]
    fn env_value_parsing_order() {
        assert_eq!(parse_env_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_env_value("0"), toml::Value::Boolean(false));
        assert_eq!(parse_env_value("42"), toml::Value::Integer(42));
        assert_eq!(parse_env_value("0.5"), toml::Value::Float(0.5));
        assert_eq!(
            parse_env_value("a, b"),
            toml::Value::Array(vec![
                toml::Value::String("a".into()),
                toml::Value::String("b".into())
            ])
        );
        assert_eq!(parse_env_value("plain"), toml::Value::String("plain".into()));
    }

    #[test]
    fn file_merge_overrides_defaults() {
        let mut base = default_table().unwrap();
        let overlay: toml::Table =
            "[chunking]\ndefault_size = 40\ndefault_overlap = 15\n".parse().unwrap();
        merge_table(&mut base, overlay);
        let config: FalconEyeConfig = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.chunking.default_size, 40);
        assert_eq!(config.chunking.default_overlap, 15);
        // Untouched groups keep defaults
        assert_eq!(config.llm.provider, "ollama");
    }
}
