use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use docqa_core::{
    ensure_ingested, rebuild, ChatCompletionModel, ChunkingConfig, Embedder, FastEmbedder,
    IngestOutcome, LanguageModel, LocalStore, LopdfExtractor, OpenAiEmbedder, PipelineConfig,
    QdrantStore, QueryResponder, VectorStore, DEFAULT_TEMPERATURE, GROQ_BASE_URL,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "docqa", version, about = "Ask questions about a PDF")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// PDF to ingest
    #[arg(long, env = "PDF_PATH", default_value = "docs/document.pdf")]
    pdf_path: PathBuf,

    /// Directory for images extracted from the PDF
    #[arg(long, env = "IMAGE_OUTPUT_DIR", default_value = "extracted_images")]
    image_dir: PathBuf,

    /// JSON file caching the parsed pages
    #[arg(long, env = "PAGES_DATA_FILE", default_value = "extracted_pages_data.json")]
    cache_file: PathBuf,

    /// Qdrant base URL; when unset a local store under --store-path is used
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Directory for the local vector store
    #[arg(long, env = "QDRANT_LOCAL_PATH", default_value = "qdrant_data")]
    store_path: PathBuf,

    /// Vector collection name
    #[arg(long, env = "QDRANT_COLLECTION_NAME", default_value = "pdf_rag_collection")]
    collection: String,

    /// Embedding model identifier
    #[arg(long, env = "EMBEDDING_MODEL_NAME", default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,

    /// OpenAI-compatible embeddings base URL; when unset the model runs locally
    #[arg(long, env = "EMBEDDING_API_URL")]
    embedding_url: Option<String>,

    /// Download cache for locally run embedding models
    #[arg(long, env = "FASTEMBED_CACHE_DIR", default_value = ".fastembed_cache")]
    embedding_cache_dir: PathBuf,

    /// Embeddings API key
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Maximum chunk size in characters
    #[arg(long, env = "CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    #[arg(long, env = "CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    /// Payload key holding the chunk text
    #[arg(long, env = "CONTENT_KEY_IN_PAYLOAD", default_value = "page_content")]
    content_key: String,

    /// Number of chunks retrieved per question
    #[arg(long, env = "RETRIEVAL_TOP_K", default_value = "4")]
    top_k: usize,

    /// OpenAI-compatible chat completions base URL
    #[arg(long, env = "LLM_API_URL", default_value = GROQ_BASE_URL)]
    llm_url: String,

    /// Chat model name
    #[arg(long, env = "GROQ_MODEL_NAME", default_value = "gemma2-9b-it")]
    llm_model: String,

    /// Sampling temperature for the chat model
    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Chat model API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, chunk and embed the PDF unless the collection is already populated.
    Ingest {
        /// Drop and rebuild the collection even if it is populated.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Answer a single question.
    Ask {
        /// Question about the document
        #[arg(long)]
        question: String,
    },
    /// Read questions from stdin until `exit`.
    Chat,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        Ok(PipelineConfig {
            pdf_path: self.pdf_path.clone(),
            image_output_dir: self.image_dir.clone(),
            cache_path: self.cache_file.clone(),
            collection_name: self.collection.clone(),
            embedding_model: self.embedding_model.clone(),
            content_key: self.content_key.clone(),
            chunking: ChunkingConfig::new(self.chunk_size, self.chunk_overlap)?,
            top_k: self.top_k,
        })
    }

    fn vector_store(&self) -> anyhow::Result<Box<dyn VectorStore>> {
        match &self.qdrant_url {
            Some(url) => {
                info!(url = %url, "using qdrant server");
                Ok(Box::new(QdrantStore::new(url, self.qdrant_api_key.clone())?))
            }
            None => {
                info!(path = %self.store_path.display(), "using local vector store");
                Ok(Box::new(LocalStore::open(&self.store_path)?))
            }
        }
    }

    async fn embedder(&self, config: &PipelineConfig) -> anyhow::Result<Box<dyn Embedder>> {
        match &self.embedding_url {
            Some(url) => {
                info!(model = %config.embedding_model, url = %url, "initializing embedding model");
                Ok(Box::new(OpenAiEmbedder::new(
                    url,
                    config.embedding_model.clone(),
                    self.embedding_api_key.clone(),
                    REQUEST_TIMEOUT,
                )?))
            }
            None => {
                info!(model = %config.embedding_model, "loading local embedding model");
                let model_name = config.embedding_model.clone();
                let cache_dir = self.embedding_cache_dir.clone();
                let embedder = tokio::task::spawn_blocking(move || FastEmbedder::new(&model_name, cache_dir))
                    .await
                    .context("embedding model loader panicked")??;
                Ok(Box::new(embedder))
            }
        }
    }

    fn language_model(&self) -> anyhow::Result<ChatCompletionModel> {
        let api_key = self
            .llm_api_key
            .clone()
            .context("GROQ_API_KEY is not set; put it in the environment or a .env file")?;
        let model = ChatCompletionModel::new(&self.llm_url, &self.llm_model, api_key, REQUEST_TIMEOUT)?
            .with_temperature(self.temperature);
        info!(model = model.model(), "language model initialized");
        Ok(model)
    }
}

async fn prepare(
    config: &PipelineConfig,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    force: bool,
) -> anyhow::Result<()> {
    let extractor = LopdfExtractor;
    if force {
        let report = rebuild(config, store, embedder, &extractor).await?;
        println!("{} chunks ingested into '{}'", report.ingested, report.collection);
        return Ok(());
    }

    match ensure_ingested(config, store, embedder, &extractor).await? {
        IngestOutcome::AlreadyIngested => {
            println!("Collection '{}' already exists. Skipping ingestion.", config.collection_name);
        }
        IngestOutcome::Ingested(report) => {
            println!("{} chunks ingested into '{}'", report.ingested, report.collection);
        }
    }
    Ok(())
}

async fn chat<L: LanguageModel>(
    responder: &QueryResponder<'_, dyn VectorStore, dyn Embedder, L>,
) -> anyhow::Result<()> {
    println!("You can now ask questions about the document.");
    println!("Type 'exit' to quit.");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"\nYour question: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match responder.answer(question).await {
            Ok(answer) => println!("\n--- Answer ---\n{answer}"),
            Err(error) => {
                warn!(%error, "query failed");
                println!("An error occurred while processing the query: {error}");
                println!("Please check your configuration and API key.");
            }
        }
    }

    println!("Exiting.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docqa boot"
    );

    let config = cli.pipeline_config()?;
    let store = cli.vector_store()?;
    let embedder = cli.embedder(&config).await?;

    let command = cli.command.as_ref().unwrap_or(&Command::Chat);
    let force = matches!(command, Command::Ingest { force: true });
    prepare(&config, store.as_ref(), embedder.as_ref(), force).await?;

    match command {
        Command::Ingest { .. } => {}
        Command::Ask { question } => {
            let model = cli.language_model()?;
            let responder = QueryResponder::new(
                store.as_ref(),
                embedder.as_ref(),
                &model,
                config.collection_name.as_str(),
                config.content_key.as_str(),
                config.top_k,
            );
            let answer = responder.answer(question).await?;
            println!("{answer}");
        }
        Command::Chat => {
            let model = cli.language_model()?;
            let responder = QueryResponder::new(
                store.as_ref(),
                embedder.as_ref(),
                &model,
                config.collection_name.as_str(),
                config.content_key.as_str(),
                config.top_k,
            );
            chat(&responder).await?;
        }
    }

    Ok(())
}
