//! FalconEYE CLI — thin shell over the `falconeye-core` library.
//!
//! Wires configuration into the indexing and review pipelines and prints
//! JSON summaries. Report rendering beyond that lives elsewhere.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use falconeye_core::{
    CancelToken, FalconEyeConfig, HttpLlmGateway, IndexCommand, IndexRegistry, Indexer,
    LlmGateway, MetadataStore, PluginRegistry, ResilientGateway, ReviewCodebaseCommand,
    ReviewCommand, Reviewer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// AI-powered security review with smart re-indexing and project isolation.
#[derive(Parser)]
#[command(name = "falconeye", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a configuration file (falconeye.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a codebase for retrieval-augmented analysis
    Index {
        /// Codebase root directory
        path: PathBuf,

        /// Primary language (auto-detected when omitted)
        #[arg(long)]
        language: Option<String>,

        /// Explicit project id override (monorepos)
        #[arg(long)]
        project_id: Option<String>,

        /// Re-index every file regardless of change detection
        #[arg(long)]
        force: bool,

        /// Additional exclusion pattern (repeatable)
        #[arg(long = "exclude", value_name = "PATTERN")]
        excludes: Vec<String>,

        /// Skip documentation files
        #[arg(long)]
        no_documents: bool,
    },
    /// Review a file (or every source file under a directory)
    Review {
        /// File or directory to review
        file: PathBuf,

        /// Language (detected from the extension when omitted)
        #[arg(long)]
        language: Option<String>,

        /// Project id whose index provides retrieval context
        #[arg(long)]
        project_id: Option<String>,

        /// Run the second-pass validation over initial findings
        #[arg(long)]
        validate: bool,

        /// Number of related code chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,

        /// File containing the system prompt (built-in default when omitted)
        #[arg(long)]
        system_prompt: Option<PathBuf>,
    },
    /// Inspect and manage indexed projects
    Projects {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Check connectivity to the model service
    Doctor,
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// List all indexed projects
    List,
    /// Show registry statistics for a project
    Stats { project_id: String },
    /// Delete a project's registry rows and vector collections
    Delete { project_id: String },
    /// Physically remove deleted-file rows and their embeddings
    Cleanup { project_id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default falconeye.toml to the current directory
    Init,
    /// Print the effective configuration
    Show,
}

fn build_gateway(config: &FalconEyeConfig) -> Result<Arc<dyn LlmGateway>> {
    let http = HttpLlmGateway::new(
        &config.llm.base_url,
        &config.llm.model.analysis,
        &config.llm.model.embedding,
        config.llm.timeout,
    )?;
    Ok(Arc::new(ResilientGateway::new(
        http,
        config.llm.retry.clone(),
        config.llm.circuit_breaker.clone(),
    )))
}

fn build_indexer(config: &FalconEyeConfig) -> Result<Indexer> {
    let registry = Arc::new(IndexRegistry::open(
        &config.index_registry.persist_directory,
        &config.index_registry.collection_name,
    )?);
    let metadata_store = Arc::new(MetadataStore::open(
        &config.metadata.persist_directory,
        &config.metadata.collection_name,
    )?);
    let llm = build_gateway(config)?;
    Ok(Indexer::new(registry, metadata_store, llm, config.clone()))
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current file and stopping");
            handle.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("falconeye=info".parse().expect("valid directive")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = FalconEyeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Index { path, language, project_id, force, excludes, no_documents } => {
            let indexer = build_indexer(&config)?;
            let mut command = IndexCommand::new(path, &config);
            command.language = language;
            command.project_id = project_id;
            command.force_reindex = force;
            command.include_documents = !no_documents;
            command.excluded_patterns.extend(excludes);

            let report = indexer.index(&command, &cancel_on_ctrl_c()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Review { file, language, project_id, validate, top_k, system_prompt } => {
            let target = file
                .canonicalize()
                .with_context(|| format!("path not found: {}", file.display()))?;
            let language = match language {
                Some(language) => language,
                None => falconeye_core::language::detect_language(&target, None)?,
            };
            let system_prompt = match system_prompt {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read system prompt {}", path.display()))?,
                None => PluginRegistry::with_builtins().system_prompt_for(&language),
            };

            let indexer = build_indexer(&config)?;
            // Context retrieval needs the project the target belongs to.
            let project_id = match project_id {
                Some(id) => falconeye_core::project::sanitize_project_id(&id),
                None => {
                    let base = if target.is_dir() {
                        target.as_path()
                    } else {
                        target.parent().unwrap_or(&target)
                    };
                    falconeye_core::project::identify_project(base, None).project_id
                }
            };

            let reviewer =
                Reviewer::new(indexer.assembler_for(&project_id), build_gateway(&config)?);
            let validate = validate || config.analysis.validate_findings;
            let top_k = top_k.unwrap_or(config.analysis.top_k_context);

            let review = if target.is_dir() {
                let command = ReviewCodebaseCommand {
                    codebase_path: target,
                    language,
                    system_prompt,
                    excluded_patterns: config.file_discovery.default_exclusions.clone(),
                    validate_findings: validate,
                    top_k_context: top_k,
                };
                reviewer.review_codebase(&command, &cancel_on_ctrl_c()).await?
            } else {
                let command = ReviewCommand {
                    file_path: target,
                    language,
                    system_prompt,
                    validate_findings: validate,
                    top_k_context: top_k,
                };
                reviewer.review_file(&command, &cancel_on_ctrl_c()).await?
            };
            println!("{}", serde_json::to_string_pretty(&review)?);
        }
        Commands::Projects { action } => {
            let indexer = build_indexer(&config)?;
            match action {
                ProjectAction::List => {
                    let projects = indexer.registry().get_all_projects();
                    println!("{}", serde_json::to_string_pretty(&projects)?);
                }
                ProjectAction::Stats { project_id } => {
                    let stats = indexer.registry().project_stats(&project_id);
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                ProjectAction::Delete { project_id } => {
                    let existed = indexer.delete_project(&project_id)?;
                    if existed {
                        info!(project = project_id.as_str(), "Project deleted");
                    } else {
                        warn!(project = project_id.as_str(), "Project not found");
                    }
                }
                ProjectAction::Cleanup { project_id } => {
                    let report = indexer.cleanup_project(&project_id)?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
        Commands::Doctor => {
            let gateway = build_gateway(&config)?;
            let healthy = gateway.health_check().await;
            println!(
                "{}",
                serde_json::json!({
                    "llm_base_url": config.llm.base_url,
                    "healthy": healthy,
                })
            );
            if !healthy {
                std::process::exit(1);
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Init => {
                let path = PathBuf::from("falconeye.toml");
                if path.exists() {
                    anyhow::bail!("falconeye.toml already exists");
                }
                std::fs::write(&path, FalconEyeConfig::default().to_toml()?)?;
                info!(path = %path.display(), "Wrote default configuration");
            }
            ConfigAction::Show => {
                println!("{}", config.to_toml()?);
            }
        },
    }

    Ok(())
}
