use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use docqa_core::{
    chunk_documents, extract_documents, CharacterNgramEmbedder, ChatModel, DocQaSession, Embedder,
    ExtractiveChatModel, GeminiEmbedder, GeminiTaskType, GroqChatModel, LopdfExtractor, ModelId,
    PipelineConfig, Query, QueryResponse, RawDocument, RetryingChatModel,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with pipeline settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the number of chunks retrieved per question.
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Use the local n-gram embedder and an extractive model instead of hosted services.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    /// Extra attempts for rate-limited or timed-out completions.
    #[arg(long, global = true, default_value = "0")]
    retries: u32,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true, global = true)]
    groq_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, global = true)]
    google_api_key: Option<String>,
}

#[derive(Args)]
struct DocumentArgs {
    /// PDF file to load; repeat for several.
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Folder searched recursively for PDFs.
    #[arg(long)]
    folder: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Load documents and answer a single query.
    Ask {
        #[command(flatten)]
        documents: DocumentArgs,
        /// llama3, llama3.1 or llama3.3
        #[arg(long, default_value = "llama3")]
        model: ModelId,
        #[arg(long)]
        query: String,
    },
    /// Load documents, then answer queries read from stdin.
    Chat {
        #[command(flatten)]
        documents: DocumentArgs,
        #[arg(long, default_value = "llama3")]
        model: ModelId,
    },
    /// Print extraction and chunking statistics without calling any service.
    Chunks {
        #[command(flatten)]
        documents: DocumentArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        offline = cli.offline,
        "docqa boot"
    );

    match &cli.command {
        Command::Ask {
            documents,
            model,
            query,
        } => {
            let session = build_session(&cli, config)?;
            load_into(&session, documents).await?;

            let response = session.ask(&Query::new(query.as_str(), *model)).await?;
            print_response(&response);
        }
        Command::Chat { documents, model } => {
            let session = build_session(&cli, config)?;
            load_into(&session, documents).await?;
            chat_loop(&session, *model).await?;
        }
        Command::Chunks { documents } => {
            let raw = read_documents(documents).await?;
            let report = extract_documents(&LopdfExtractor, raw);
            for skipped in &report.skipped {
                println!("skipped {}: {}", skipped.document_id, skipped.reason);
            }

            let chunks = chunk_documents(&report.documents, config.chunking());
            let total_chars: usize = chunks.iter().map(|chunk| chunk.text.chars().count()).sum();
            println!("documents: {}", report.documents.len());
            println!("chunks: {}", chunks.len());
            if !chunks.is_empty() {
                println!("mean chunk chars: {}", total_chars / chunks.len());
            }
            for document in &report.documents {
                let count = chunks
                    .iter()
                    .filter(|chunk| chunk.document_id == document.document_id)
                    .count();
                println!(
                    "  {} pages={} chunks={}",
                    document.document_id,
                    document.pages.len(),
                    count
                );
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
        config.validate()?;
    }

    Ok(config)
}

fn build_session(cli: &Cli, config: PipelineConfig) -> anyhow::Result<DocQaSession> {
    if cli.offline {
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::default());
        return Ok(DocQaSession::new(
            config,
            embedder.clone(),
            Arc::new(ExtractiveChatModel::default()),
            embedder,
        )?);
    }

    let groq_key = cli
        .groq_api_key
        .as_deref()
        .context("GROQ_API_KEY is not set (use --offline for a dry run)")?;
    let google_key = cli
        .google_api_key
        .as_deref()
        .context("GOOGLE_API_KEY is not set (use --offline for a dry run)")?;

    let groq = GroqChatModel::new(groq_key)?.with_params(config.generation);
    let chat_model: Arc<dyn ChatModel> = if cli.retries > 0 {
        Arc::new(RetryingChatModel::new(
            groq,
            cli.retries + 1,
            Duration::from_millis(500),
        ))
    } else {
        Arc::new(groq)
    };

    let embedder = Arc::new(GeminiEmbedder::new(google_key)?);
    let encoder = Arc::new(
        GeminiEmbedder::new(google_key)?.with_task_type(GeminiTaskType::SemanticSimilarity),
    );

    Ok(DocQaSession::new(config, embedder, chat_model, encoder)?)
}

fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

fn document_paths(args: &DocumentArgs) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = args.files.clone();
    if let Some(folder) = &args.folder {
        paths.extend(discover_pdf_files(folder));
    }

    if paths.is_empty() {
        bail!("no documents given; pass --file or --folder");
    }
    Ok(paths)
}

async fn read_documents(args: &DocumentArgs) -> anyhow::Result<Vec<RawDocument>> {
    let mut documents = Vec::new();
    for path in document_paths(args)? {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let document_id = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        documents.push(RawDocument::new(document_id, bytes));
    }
    Ok(documents)
}

async fn load_into(session: &DocQaSession, args: &DocumentArgs) -> anyhow::Result<()> {
    let documents = read_documents(args).await?;
    let report = session.ingest(documents).await?;

    for skipped in &report.skipped {
        warn!(document_id = %skipped.document_id, reason = %skipped.reason, "skipped document");
        println!("skipped {}: {}", skipped.document_id, skipped.reason);
    }
    match session.index().await {
        Some(index) if !index.is_empty() => {
            info!(
                built_at = %index.built_at().to_rfc3339(),
                metric = ?index.metric(),
                dimensions = index.dimensions(),
                model = index.embedding_model(),
                "index ready"
            );
            println!(
                "indexed {} chunks from {} documents at {}",
                report.indexed,
                report.documents,
                index.built_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        _ => println!("no readable text found; every query will fail"),
    }
    Ok(())
}

async fn chat_loop(session: &DocQaSession, initial_model: ModelId) -> anyhow::Result<()> {
    let mut model = initial_model;
    let mut history: BTreeMap<ModelId, Vec<(String, String)>> = BTreeMap::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "model {}; commands: :model <id>, :history, :clear, :quit",
        model.display_name()
    );
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(head, rest)| (head, rest.trim())) {
            (":quit", _) | (":exit", _) => break,
            (":clear", _) => {
                session.clear().await;
                history.clear();
                println!("index cleared; restart with new documents to keep asking");
            }
            (":history", _) => {
                for (question, answer) in history.get(&model).into_iter().flatten() {
                    println!("> {question}\n{answer}\n");
                }
            }
            (":model", name) => match name.parse::<ModelId>() {
                Ok(next) => {
                    model = next;
                    println!("switched to {}", model.display_name());
                }
                Err(error) => println!("{error}"),
            },
            _ => match session.ask(&Query::new(line, model)).await {
                Ok(response) => {
                    print_response(&response);
                    history
                        .entry(model)
                        .or_default()
                        .push((line.to_string(), response.text().to_string()));
                }
                Err(error) => println!("error: {error}"),
            },
        }
    }

    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.text());

    match response {
        QueryResponse::Answer { sources, .. } => {
            for source in sources {
                println!(
                    "  [{:.4}] {} section {}",
                    source.score, source.chunk.document_id, source.chunk.sequence_index
                );
            }
        }
        QueryResponse::Summary {
            evaluation,
            truncation,
            ..
        } => {
            if let Some(warning) = truncation {
                println!("warning: {warning}");
            }
            println!(
                "ROUGE-1 F: {:.4} (precision {:.4}, recall {:.4})",
                evaluation.lexical_overlap_score,
                evaluation.lexical_precision,
                evaluation.lexical_recall
            );
            println!(
                "semantic similarity: {:.4}",
                evaluation.semantic_similarity_score
            );
            for note in &evaluation.warnings {
                println!("  note: {note}");
            }
        }
    }

    println!("response time: {:.2} s", response.elapsed().as_secs_f64());
}
