//! Context assembly: combine the target code, its structural metadata, and
//! semantically related code and documentation into one prompt-ready object.

use crate::llm::LlmGateway;
use crate::metadata_store::MetadataStore;
use crate::store::{VectorStore, KIND_CODE};
use crate::types::StructuralMetadata;
use std::sync::Arc;
use tracing::warn;

/// Everything the model needs to reason about one file.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub file_path: String,
    pub code_snippet: String,
    pub language: String,
    pub structural_metadata: Option<StructuralMetadata>,
    pub related_code: Option<String>,
    pub related_docs: Option<String>,
    pub original_file: Option<String>,
    pub analysis_type: String,
}

impl PromptContext {
    /// Render the full context for the model, with the code line-numbered so
    /// findings can reference exact lines.
    pub fn render(&self) -> String {
        let mut parts = vec![
            format!("FILE: {}", self.file_path),
            format!("LANGUAGE: {}", self.language),
            format!("ANALYSIS TYPE: {}", self.analysis_type),
            String::new(),
            "CODE (with line numbers):".to_string(),
            number_lines(&self.code_snippet),
        ];

        if let Some(original) = &self.original_file {
            parts.push(String::new());
            parts.push("ORIGINAL FILE (before changes):".to_string());
            parts.push(original.clone());
        }

        if let Some(meta) = &self.structural_metadata {
            parts.push(String::new());
            parts.push("STRUCTURAL CONTEXT:".to_string());
            parts.push(format!("- Functions: {}", meta.functions.len()));
            parts.push(format!("- Classes: {}", meta.classes.len()));
            parts.push(format!("- Imports: {}", meta.imports.len()));
            parts.push(format!("- Calls: {}", meta.calls.len()));

            if !meta.control_flow.is_empty() {
                parts.push(String::new());
                parts.push("CONTROL FLOW INFORMATION:".to_string());
                for node in &meta.control_flow {
                    match &node.condition {
                        Some(cond) => {
                            parts.push(format!("- {} at line {}: {}", node.node_type, node.line, cond))
                        }
                        None => parts.push(format!("- {} at line {}", node.node_type, node.line)),
                    }
                }
            }

            if !meta.data_flows.is_empty() {
                parts.push(String::new());
                parts.push("DATA FLOW INFORMATION:".to_string());
                for flow in &meta.data_flows {
                    parts.push(format!(
                        "- {} defined at line {}, used at {:?}",
                        flow.variable, flow.defined_at, flow.used_at
                    ));
                }
            }
        }

        if let Some(related) = &self.related_code {
            parts.push(String::new());
            parts.push("RELATED CODE (from semantic search):".to_string());
            parts.push(related.clone());
        }

        if let Some(docs) = &self.related_docs {
            parts.push(String::new());
            parts.push("RELATED DOCUMENTATION (from semantic search):".to_string());
            parts.push(docs.clone());
        }

        parts.join("\n")
    }
}

/// Prefix each line with a 1-based `%4d | ` gutter.
fn number_lines(code: &str) -> String {
    code.lines()
        .enumerate()
        .map(|(i, line)| format!("{:4} | {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

pub struct ContextAssembler {
    vector_store: Arc<VectorStore>,
    metadata_store: Arc<MetadataStore>,
    llm: Arc<dyn LlmGateway>,
}

impl ContextAssembler {
    pub fn new(
        vector_store: Arc<VectorStore>,
        metadata_store: Arc<MetadataStore>,
        llm: Arc<dyn LlmGateway>,
    ) -> Self {
        Self { vector_store, metadata_store, llm }
    }

    /// Assemble context for a target file. Retrieval or metadata failures
    /// degrade to empty sections; this never fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn assemble(
        &self,
        file_path: &str,
        code: &str,
        language: &str,
        top_k_similar: usize,
        top_k_docs: usize,
        original_file: Option<String>,
        analysis_type: &str,
    ) -> PromptContext {
        let structural_metadata = self.metadata_store.get(file_path);

        // Embed the target once; both searches share the vector so they hit
        // the same embedding space.
        let query_embedding = match self.llm.embed(code).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(file = file_path, error = %e, "Could not embed target for retrieval");
                None
            }
        };

        let related_code = match &query_embedding {
            Some(embedding) => self.related_code(embedding, file_path, top_k_similar),
            None => None,
        };
        let related_docs = match &query_embedding {
            Some(embedding) => self.related_docs(embedding, top_k_docs),
            None => None,
        };

        PromptContext {
            file_path: file_path.to_string(),
            code_snippet: code.to_string(),
            language: language.to_string(),
            structural_metadata,
            related_code,
            related_docs,
            original_file,
            analysis_type: analysis_type.to_string(),
        }
    }

    /// Top-k related code chunks, excluding the target file itself. Extra
    /// results are fetched up front so the exclusion cannot starve the list.
    fn related_code(&self, embedding: &[f32], current_file: &str, top_k: usize) -> Option<String> {
        let chunks = match self.vector_store.search(embedding, top_k + 5, KIND_CODE) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(file = current_file, error = %e, "Related-code retrieval failed");
                return None;
            }
        };

        let related: Vec<String> = chunks
            .into_iter()
            .filter(|chunk| chunk.metadata.file_path != current_file)
            .take(top_k)
            .enumerate()
            .map(|(i, chunk)| {
                format!("[Related Code {}] From {}:\n{}\n", i + 1, chunk.metadata.file_path, chunk.content)
            })
            .collect();

        if related.is_empty() {
            None
        } else {
            Some(related.join("\n"))
        }
    }

    fn related_docs(&self, embedding: &[f32], top_k: usize) -> Option<String> {
        let chunks = match self.vector_store.search_documents(embedding, top_k) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "Documentation retrieval failed");
                return None;
            }
        };

        let docs: Vec<String> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let doc_type = title_case(&chunk.metadata.document_type);
                format!(
                    "[Documentation {}] {} - {}:\n{}\n",
                    i + 1,
                    doc_type,
                    chunk.metadata.file_path,
                    chunk.content
                )
            })
            .collect();

        if docs.is_empty() {
            None
        } else {
            Some(docs.join("\n"))
        }
    }
}

/// `security_policy` → `Security Policy`.
fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_numbering_format() {
        let numbered = number_lines("a\nb");
        assert_eq!(numbered, "   1 | a\n   2 | b");
    }

    #[test]
    fn title_casing() {
        assert_eq!(title_case("security_policy"), "Security Policy");
        assert_eq!(title_case("readme"), "Readme");
    }

    #[test]
    fn render_includes_all_sections() {
        let mut meta = StructuralMetadata::empty("a.py", "python");
        meta.control_flow.push(crate::types::ControlFlowNode {
            node_type: "if".into(),
            line: 2,
            condition: Some("x > 0".into()),
        });

        let context = PromptContext {
            file_path: "a.py".into(),
            code_snippet: "x = 1\nif x > 0:\n    pass".into(),
            language: "python".into(),
            structural_metadata: Some(meta),
            related_code: Some("[Related Code 1] From b.py:\ny = 2\n".into()),
            related_docs: None,
            original_file: None,
            analysis_type: "review".into(),
        };

        let rendered = context.render();
        assert!(rendered.contains("FILE: a.py"));
        assert!(rendered.contains("   1 | x = 1"));
        assert!(rendered.contains("STRUCTURAL CONTEXT:"));
        assert!(rendered.contains("CONTROL FLOW INFORMATION:"));
        assert!(rendered.contains("- if at line 2: x > 0"));
        assert!(rendered.contains("RELATED CODE"));
        assert!(!rendered.contains("RELATED DOCUMENTATION"));
    }
}
