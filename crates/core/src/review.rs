//! Review orchestrator: assemble context, run the model, parse findings,
//! optionally validate them with a second pass. Covers single files and
//! whole-codebase sweeps.

use crate::context::ContextAssembler;
use crate::discovery;
use crate::error::{Error, Result};
use crate::findings;
use crate::llm::LlmGateway;
use crate::types::{CancelToken, SecurityFinding, SecurityReview};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ReviewCommand {
    pub file_path: PathBuf,
    pub language: String,
    pub system_prompt: String,
    pub validate_findings: bool,
    pub top_k_context: usize,
}

#[derive(Debug, Clone)]
pub struct ReviewCodebaseCommand {
    pub codebase_path: PathBuf,
    pub language: String,
    pub system_prompt: String,
    pub excluded_patterns: Vec<String>,
    pub validate_findings: bool,
    pub top_k_context: usize,
}

pub struct Reviewer {
    assembler: ContextAssembler,
    llm: Arc<dyn LlmGateway>,
}

impl Reviewer {
    pub fn new(assembler: ContextAssembler, llm: Arc<dyn LlmGateway>) -> Self {
        Self { assembler, llm }
    }

    /// Review a single file and return the completed `SecurityReview`.
    pub async fn review_file(
        &self,
        command: &ReviewCommand,
        cancel: &CancelToken,
    ) -> Result<SecurityReview> {
        let path_display = command.file_path.display().to_string();
        let mut review = SecurityReview::start(&path_display, &command.language);
        info!(file = path_display.as_str(), language = command.language.as_str(), "Starting file review");

        let findings = self
            .analyze_one(
                &command.file_path,
                &command.language,
                &command.system_prompt,
                command.validate_findings,
                command.top_k_context,
                cancel,
            )
            .await?;
        for finding in findings {
            review.add_finding(finding);
        }

        review.files_analyzed = 1;
        review.complete();
        info!(
            file = path_display.as_str(),
            findings = review.findings.len(),
            validated = command.validate_findings,
            "File review completed"
        );
        Ok(review)
    }

    /// Review every source file of the codebase's language, aggregating all
    /// findings into one review. Per-file model failures are logged and
    /// skipped so one bad response cannot sink the sweep.
    pub async fn review_codebase(
        &self,
        command: &ReviewCodebaseCommand,
        cancel: &CancelToken,
    ) -> Result<SecurityReview> {
        if !command.codebase_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "not a directory: {}",
                command.codebase_path.display()
            )));
        }

        let files = discovery::discover_source_files(
            &command.codebase_path,
            &command.language,
            &command.excluded_patterns,
        );
        let mut review =
            SecurityReview::start(&command.codebase_path.display().to_string(), &command.language);
        info!(
            root = %command.codebase_path.display(),
            language = command.language.as_str(),
            files = files.len(),
            "Starting codebase review"
        );

        for path in &files {
            if cancel.is_cancelled() {
                warn!(root = %command.codebase_path.display(), "Codebase review cancelled");
                break;
            }
            match self
                .analyze_one(
                    path,
                    &command.language,
                    &command.system_prompt,
                    command.validate_findings,
                    command.top_k_context,
                    cancel,
                )
                .await
            {
                Ok(findings) => {
                    review.files_analyzed += 1;
                    for finding in findings {
                        review.add_finding(finding);
                    }
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping file in codebase review");
                }
            }
        }

        review.complete();
        info!(
            root = %command.codebase_path.display(),
            files_analyzed = review.files_analyzed,
            findings = review.findings.len(),
            "Codebase review completed"
        );
        Ok(review)
    }

    /// Analyze one file: assemble context, run the model, parse and locate
    /// findings, and optionally run the validation pass.
    async fn analyze_one(
        &self,
        file_path: &Path,
        language: &str,
        system_prompt: &str,
        validate: bool,
        top_k_context: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<SecurityFinding>> {
        let path_display = file_path.display().to_string();
        let content = std::fs::read_to_string(file_path)
            .map_err(|e| Error::InvalidInput(format!("cannot read {path_display}: {e}")))?;

        let context = self
            .assembler
            .assemble(&path_display, &content, language, top_k_context, 3, None, "review")
            .await;
        let rendered = context.render();

        if cancel.is_cancelled() {
            return Err(Error::Analysis("review cancelled".into()));
        }

        let raw = self
            .llm
            .analyze_code_security(&rendered, system_prompt)
            .await
            .map_err(|e| Error::Analysis(format!("model analysis failed: {e}")))?;

        let parsed = findings::parse_findings(&raw, &path_display);
        let mut located = findings::locate_findings(parsed, file_path);

        if validate && !located.is_empty() && !cancel.is_cancelled() {
            info!(file = path_display.as_str(), candidates = located.len(), "Validating findings");
            let findings_json = serde_json::to_string(
                &located
                    .iter()
                    .map(|f| {
                        json!({
                            "issue": f.issue,
                            "reasoning": f.reasoning,
                            "code_snippet": f.code_snippet,
                            "severity": f.severity.as_str(),
                        })
                    })
                    .collect::<Vec<_>>(),
            )
            .map_err(|e| Error::Analysis(e.to_string()))?;

            let validated_raw = self
                .llm
                .validate_findings(&content, &findings_json, &rendered)
                .await
                .map_err(|e| Error::Analysis(format!("validation failed: {e}")))?;

            located = findings::locate_findings(
                findings::parse_findings(&validated_raw, &path_display),
                file_path,
            );
        }

        Ok(located)
    }
}
