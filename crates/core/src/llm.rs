//! LLM gateway: the capability surface the core depends on, plus an
//! Ollama-style HTTP adapter.
//!
//! The embedding dimensionality D is fixed per model; every vector a gateway
//! returns for one model has the same length, which is what keeps vector
//! collections internally consistent.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Approximate token count used for chunk budgeting (bytes/4 heuristic).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Behavioral contract of the model service. All methods are blocking from
/// the caller's perspective; implementations may suspend on I/O.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Chat-style security analysis over an assembled context. Returns the
    /// raw textual response for the finding parser to decode.
    async fn analyze_code_security(&self, context: &str, system_prompt: &str) -> Result<String>;

    /// Second-pass validation of serialized findings against the context.
    async fn validate_findings(
        &self,
        code: &str,
        findings_json: &str,
        context: &str,
    ) -> Result<String>;

    /// Approximate tokenizer for budgeting.
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    async fn health_check(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Ollama-style HTTP adapter
// ---------------------------------------------------------------------------

pub struct HttpLlmGateway {
    client: reqwest::Client,
    base_url: String,
    analysis_model: String,
    embedding_model: String,
}

impl HttpLlmGateway {
    pub fn new(
        base_url: &str,
        analysis_model: &str,
        embedding_model: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            analysis_model: analysis_model.to_string(),
            embedding_model: embedding_model.to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{url}: {e}")))?;

        let response = response
            .error_for_status()
            .map_err(|e| Error::Transport(format!("{url}: {e}")))?;

        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("{url}: invalid JSON response: {e}")))
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.analysis_model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "stream": false,
        });
        let value = self.post_json("/api/chat", body).await?;
        value
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport("chat response missing message content".into()))
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Transport("embedding response was empty".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": self.embedding_model, "input": texts });
        let value = self.post_json("/api/embed", body).await?;

        let embeddings = value
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Transport("embedding response missing embeddings".into()))?;

        let vectors: Vec<Vec<f32>> = embeddings
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|vals| {
                        vals.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect()
                    })
                    .ok_or_else(|| Error::Transport("embedding row is not an array".into()))
            })
            .collect::<Result<_>>()?;

        if vectors.len() != texts.len() {
            return Err(Error::Transport(format!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    async fn analyze_code_security(&self, context: &str, system_prompt: &str) -> Result<String> {
        self.chat(system_prompt, context).await
    }

    async fn validate_findings(
        &self,
        code: &str,
        findings_json: &str,
        context: &str,
    ) -> Result<String> {
        let user = format!(
            "Re-evaluate these candidate security findings against the code and \
             context. Remove false positives and return the surviving findings as \
             JSON {{\"reviews\": [...]}} in the same shape.\n\nCODE:\n{code}\n\n\
             FINDINGS:\n{findings_json}\n\nCONTEXT:\n{context}"
        );
        self.chat(
            "You are a security review validator. Respond with JSON only.",
            &user,
        )
        .await
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
