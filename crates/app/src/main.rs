mod jobs;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_buddy_core::{
    AnswerService, CharacterNgramEmbedder, DisabledModel, DocumentStore, EmbeddingService,
    GeminiClient, GenerativeModel, InMemoryJobQueue, IngestionJob, IngestionOptions,
    IngestionPipeline, RetrievalOptions, DEFAULT_ANSWER_MODELS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_GEMINI_ENDPOINT,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::jobs::JobTracker;
use crate::server::{run_server, AppState};

#[derive(Parser)]
#[command(name = "pdf-buddy", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding one folder per processed document.
    #[arg(long, env = "PDF_BUDDY_STORAGE_DIR", default_value = "storage", global = true)]
    storage_dir: PathBuf,

    /// Gemini API key. Without it answers come from text search only.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    gemini_api_key: Option<String>,

    /// Gemini REST base URL
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_ENDPOINT, global = true)]
    gemini_base_url: String,

    /// Answer models, tried in order.
    #[arg(
        long,
        env = "PDF_BUDDY_MODELS",
        value_delimiter = ',',
        default_values_t = DEFAULT_ANSWER_MODELS.map(String::from),
        global = true
    )]
    models: Vec<String>,

    /// Embedding model
    #[arg(long, env = "PDF_BUDDY_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL, global = true)]
    embedding_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the ingestion worker.
    Serve {
        #[arg(long, env = "PDF_BUDDY_BIND", default_value = "0.0.0.0:3001")]
        bind: String,
        /// Where uploaded files are written before ingestion.
        #[arg(long, env = "PDF_BUDDY_UPLOAD_DIR", default_value = "uploads")]
        upload_dir: PathBuf,
    },
    /// Ingest one PDF synchronously.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Ask a question about a stored document.
    Ask {
        #[arg(long)]
        message: String,
        /// Document id; defaults to the newest document.
        #[arg(long)]
        pdf_id: Option<String>,
    },
    /// Substring search across stored documents.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        pdf_id: Option<String>,
    },
}

struct Services {
    embedder: Arc<dyn EmbeddingService>,
    generator: Arc<dyn GenerativeModel>,
}

fn build_services(cli: &Cli) -> anyhow::Result<Services> {
    match cli.gemini_api_key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => {
            let client = Arc::new(
                GeminiClient::new(&cli.gemini_base_url, key, cli.embedding_model.clone())
                    .context("invalid Gemini configuration")?,
            );
            Ok(Services {
                embedder: client.clone(),
                generator: client,
            })
        }
        None => {
            warn!("GEMINI_API_KEY not set; using local embeddings and text-search answers");
            Ok(Services {
                embedder: Arc::new(CharacterNgramEmbedder::default()),
                generator: Arc::new(DisabledModel),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        storage = %cli.storage_dir.display(),
        "pdf-buddy boot"
    );

    let services = build_services(&cli)?;
    let store = DocumentStore::new(&cli.storage_dir);
    let answers = Arc::new(AnswerService::new(
        store.clone(),
        services.generator,
        RetrievalOptions {
            answer_models: cli.models.clone(),
            ..RetrievalOptions::default()
        },
    ));

    match cli.command {
        Command::Serve { bind, upload_dir } => {
            tokio::fs::create_dir_all(&cli.storage_dir)
                .await
                .with_context(|| format!("creating {}", cli.storage_dir.display()))?;
            tokio::fs::create_dir_all(&upload_dir)
                .await
                .with_context(|| format!("creating {}", upload_dir.display()))?;

            let pipeline = Arc::new(IngestionPipeline::new(
                store.clone(),
                services.embedder,
                IngestionOptions::default(),
            ));
            let queue = Arc::new(InMemoryJobQueue::start(pipeline));
            let jobs = Arc::new(JobTracker::default());
            jobs.attach(queue.as_ref());

            let state = AppState {
                store,
                answers,
                queue: Arc::clone(&queue),
                jobs,
                upload_dir,
            };
            let served = run_server(&bind, state).await;

            info!(pending = queue.pending(), "draining ingestion queue");
            queue.shutdown().await;
            served?;
        }
        Command::Ingest { file } => {
            let filename = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", file.display()))?;
            let pipeline =
                IngestionPipeline::new(store, services.embedder, IngestionOptions::default());
            let stored = pipeline.run(&IngestionJob::new(filename, file)).await?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        Command::Ask { message, pdf_id } => {
            let answer = answers.answer(&message, pdf_id.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Command::Search { query, pdf_id } => {
            let results = answers.search(&query, pdf_id.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}
