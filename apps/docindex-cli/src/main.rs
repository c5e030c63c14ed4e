mod files;
mod logging;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use docindex_core::config::Settings;
use docindex_core::types::{MetadataFilter, RetrievalHit};
use docindex_rag::{
    orchestrator_from_settings, Answer, AnswerMode, AnswerStream, IngestOptions, IngestOutcome,
    QueryOptions, QueryResponse, RagOrchestrator, StreamEvent,
};

#[derive(Parser)]
#[command(
    name = "docindex",
    version,
    about = "Index text documents and answer questions over them"
)]
struct Cli {
    /// Base configuration file; `config.<RUST_ENV>.toml` next to it is layered on top.
    #[arg(long, global = true, env = "DOCINDEX_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a `.txt` file or every `.txt` file under a directory.
    Ingest {
        path: PathBuf,
        /// Document id for a single file (defaults to the file stem).
        #[arg(long)]
        id: Option<String>,
        /// Drop the document's existing chunks first.
        #[arg(long)]
        replace: bool,
    },
    /// Ask a question answered from the indexed documents.
    Query {
        text: String,
        #[arg(long)]
        document: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Wait for the full answer instead of streaming it.
        #[arg(long)]
        sync: bool,
    },
    /// Remove every chunk of a document.
    Delete { id: String },
    /// Show the index configuration and stored chunk counts.
    Status {
        #[arg(long)]
        document: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    logging::init(&settings.logging.level);

    let base_dir = match cli.config.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let rag = orchestrator_from_settings(&settings, &base_dir)
        .await
        .context("building the RAG pipeline")?;

    match cli.command {
        Command::Ingest { path, id, replace } => ingest(&rag, &path, id, replace).await,
        Command::Query { text, document, top_k, temperature, sync } => {
            let options = QueryOptions {
                document_id: document,
                top_k,
                temperature,
                max_tokens: None,
                mode: if sync { AnswerMode::Sync } else { AnswerMode::Stream },
            };
            query(&rag, &text, options).await
        }
        Command::Delete { id } => {
            let summary = rag.delete_document(&id).await.with_context(|| format!("deleting {id}"))?;
            println!("🗑️  Removed {} chunks of '{id}'", summary.deleted);
            Ok(())
        }
        Command::Status { document } => status(&rag, document.as_deref()).await,
    }
}

async fn ingest(
    rag: &RagOrchestrator,
    path: &Path,
    id: Option<String>,
    replace: bool,
) -> anyhow::Result<()> {
    let files = files::text_files(path);
    if files.is_empty() {
        bail!("no .txt files found under {}", path.display());
    }
    if id.is_some() && files.len() > 1 {
        bail!("--id only applies when ingesting a single file");
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}",
            )?
            .progress_chars("#>-"),
    );

    let mut chunks = 0;
    for file in &files {
        let document_id = id.clone().unwrap_or_else(|| files::document_id(file));
        pb.set_message(document_id.clone());
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let options = IngestOptions { replace_existing: replace, ..IngestOptions::default() };
        match rag.ingest_document(&document_id, &text, options).await {
            Ok(IngestOutcome::Indexed { vectors_stored, .. }) => chunks += vectors_stored,
            Ok(IngestOutcome::Disabled { reason }) => {
                pb.abandon_with_message("RAG disabled");
                bail!("nothing indexed: {reason}");
            }
            Err(e) => {
                pb.abandon();
                return Err(e).with_context(|| format!("ingesting {}", file.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    println!("✅ Indexed {} files ({chunks} chunks)", files.len());
    Ok(())
}

async fn query(rag: &RagOrchestrator, text: &str, options: QueryOptions) -> anyhow::Result<()> {
    match rag.answer_query(text, options).await {
        QueryResponse::Complete(answer) => {
            println!("{answer}");
            if let Answer::Generated { sources, .. } = &answer {
                print_sources(sources);
            }
        }
        QueryResponse::Stream(stream) => print_stream(stream).await?,
    }
    Ok(())
}

async fn print_stream(mut stream: AnswerStream) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut sources = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Sources(hits) => sources = hits,
            StreamEvent::Token(token) => {
                write!(stdout, "{token}")?;
                stdout.flush()?;
            }
            other => writeln!(stdout, "{other}")?,
        }
    }
    if !sources.is_empty() {
        writeln!(stdout)?;
        print_sources(&sources);
    }
    Ok(())
}

fn print_sources(sources: &[RetrievalHit]) {
    println!("\nSources:");
    for (i, hit) in sources.iter().enumerate() {
        println!("  [{}] {} #{} (score {:.3})", i + 1, hit.document_id, hit.chunk_index, hit.score);
    }
}

async fn status(rag: &RagOrchestrator, document: Option<&str>) -> anyhow::Result<()> {
    let Some(index) = rag.index() else {
        warn!("no vector index configured");
        println!("RAG disabled: no vector index configured");
        return Ok(());
    };
    let spec = index.spec();
    let total = index.count(None).await.context("counting chunks")?;
    let report = serde_json::json!({
        "index": spec.name,
        "dimension": spec.dimension,
        "metric": spec.metric.as_str(),
        "retrieval_enabled": rag.retrieval_enabled(),
        "chunks": total,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(document) = document {
        let filter = MetadataFilter::document(document);
        let count = index.count(Some(&filter)).await.context("counting chunks")?;
        println!("'{document}': {count} chunks");
    }
    Ok(())
}
