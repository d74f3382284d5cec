mod error;
mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_chat_core::config::{
    DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OPENAI_BASE_URL,
};
use pdf_chat_core::{
    CharacterNgramEmbedder, ChatService, CompletionProvider, Embedder, IngestionOptions,
    IngestionReport, LopdfExtractor, OpenAiChat, OpenAiConfig, OpenAiEmbedder, Query,
    RetrievalConfig, ServiceConfig, DEFAULT_NGRAM_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "pdf_chat_server=info,pdf_chat_core=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "pdf-chat", version, about = "Answer questions grounded in a folder of PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Folder scanned recursively for PDF files
    #[arg(long, env = "PDF_FOLDER", default_value = "pdf", global = true)]
    pdf_folder: PathBuf,

    /// Directory holding the vector index and the processed-document ledger
    #[arg(long, env = "INDEX_DIR", default_value = "tmp/index", global = true)]
    index_dir: PathBuf,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL, global = true)]
    openai_base_url: String,

    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL, global = true)]
    chat_model: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL, global = true)]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS, global = true)]
    embedding_dimensions: usize,

    /// Where chunk and question vectors come from
    #[arg(long, env = "EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProvider::OpenAi, global = true)]
    embedding_provider: EmbeddingProvider,

    /// Passages handed to the model per question
    #[arg(long, env = "TOP_K", default_value_t = 5, global = true)]
    top_k: usize,

    /// Passages scoring below this cosine similarity are ignored
    #[arg(long, env = "MIN_SIMILARITY", default_value_t = 0.35, global = true)]
    min_similarity: f32,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30, global = true)]
    request_timeout_secs: u64,

    /// Socket address the HTTP API listens on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8001", global = true)]
    bind_addr: String,

    #[arg(long, env = "CHUNK_MAX_CHARS", default_value_t = 1200, global = true)]
    chunk_max_chars: usize,

    #[arg(long, env = "CHUNK_OVERLAP_CHARS", default_value_t = 120, global = true)]
    chunk_overlap_chars: usize,

    #[arg(long, env = "MIN_CHUNK_CHARS", default_value_t = 20, global = true)]
    min_chunk_chars: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest new PDFs, then serve the HTTP API.
    Serve,
    /// Ingest new PDFs and exit.
    Ingest,
    /// Ingest new PDFs and answer a single question.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EmbeddingProvider {
    /// OpenAI-compatible embeddings endpoint
    #[value(name = "openai")]
    OpenAi,
    /// Offline character-trigram vectors
    Local,
}

impl Cli {
    fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.openai_base_url.clone(),
            api_key: self.openai_api_key.clone(),
            chat_model: self.chat_model.clone(),
            embedding_model: self.embedding_model.clone(),
            embedding_dimensions: self.embedding_dimensions,
            timeout: Duration::from_secs(self.request_timeout_secs),
            ..OpenAiConfig::default()
        }
    }

    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            pdf_folder: self.pdf_folder.clone(),
            index_dir: self.index_dir.clone(),
            ingestion: IngestionOptions {
                chunk_max_chars: self.chunk_max_chars,
                chunk_overlap_chars: self.chunk_overlap_chars,
                min_chunk_chars: self.min_chunk_chars,
            },
            retrieval: RetrievalConfig {
                top_k: self.top_k,
                min_similarity: self.min_similarity,
            },
        }
    }
}

async fn build_service(cli: &Cli) -> anyhow::Result<ChatService> {
    let openai = cli.openai_config();
    if openai.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set, upstream requests will be unauthenticated");
    }

    let embedder: Arc<dyn Embedder> = match cli.embedding_provider {
        EmbeddingProvider::OpenAi => Arc::new(OpenAiEmbedder::new(&openai)?),
        EmbeddingProvider::Local => Arc::new(CharacterNgramEmbedder::new(DEFAULT_NGRAM_DIMENSIONS)),
    };
    let completion: Arc<dyn CompletionProvider> = Arc::new(OpenAiChat::new(&openai)?);

    info!(
        embedding_model = embedder.model_id(),
        dimensions = embedder.dimensions(),
        chat_model = completion.model(),
        "providers configured"
    );

    let service = ChatService::open(
        &cli.service_config(),
        embedder,
        completion,
        Arc::new(LopdfExtractor),
    )
    .await
    .context("opening document store and vector index")?;
    Ok(service)
}

fn log_report(report: &IngestionReport) {
    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }
    info!(
        indexed = report.indexed_count(),
        already_processed = report.already_processed.len(),
        replaced = report.replaced.len(),
        removed = report.removed.len(),
        skipped = report.skipped_files.len(),
        chunks = report.chunks_written,
        "ingestion finished"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "unable to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat boot"
    );

    let service = build_service(&cli).await?;
    let report = service.ingest().await.context("ingesting pdf folder")?;
    log_report(&report);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let bind = cli.bind_addr;
            let service = Arc::new(service);
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            info!(addr = %bind, "listening");

            axum::serve(listener, server::router(Arc::clone(&service)))
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            service.shutdown().await?;
        }
        Command::Ingest => {
            println!(
                "indexed={} already_processed={} replaced={} removed={} skipped={} chunks={}",
                report.indexed_count(),
                report.already_processed.len(),
                report.replaced.len(),
                report.removed.len(),
                report.skipped_files.len(),
                report.chunks_written
            );
            service.shutdown().await?;
        }
        Command::Ask { question, top_k } => {
            let answer = service
                .chat(&Query {
                    text: question,
                    session_id: None,
                    top_k,
                })
                .await?;
            println!("{}", answer.answer);
            println!("grounded: {}", answer.grounded);
            for source in &answer.sources {
                println!("  source={source}");
            }
            service.shutdown().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_apply_to_subcommands() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from([
            "pdf-chat",
            "serve",
            "--bind-addr",
            "127.0.0.1:9000",
            "--embedding-provider",
            "local",
            "--top-k",
            "3",
        ])?;

        assert_eq!(cli.embedding_provider, EmbeddingProvider::Local);
        assert_eq!(cli.service_config().retrieval.top_k, 3);
        assert_eq!(cli.bind_addr, "127.0.0.1:9000");
        assert!(matches!(cli.command, Some(Command::Serve)));
        Ok(())
    }

    #[test]
    fn ask_requires_a_question() {
        assert!(Cli::try_parse_from(["pdf-chat", "ask"]).is_err());
    }
}
