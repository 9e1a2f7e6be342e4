pub mod backends;
pub mod cache;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod stores;
pub mod traits;

pub use backends::{LayoutTableBackend, LopdfTextBackend};
pub use cache::{load_pages, save_pages};
pub use chunking::{chunk_pages, split_text, ChunkingConfig};
pub use embeddings::{resolve_local_model, Embedder, FastEmbedder, OpenAiEmbedder};
pub use error::{IngestError, ModelError, StoreError};
pub use extractor::{
    extract_page_records, extract_with_backends, render_markdown_table, EmbeddedImage,
    LopdfExtractor, PdfExtractor, Table, TableBackend, TableRow, TextBackend,
};
pub use ingest::{ingest, is_ingested, IngestReport};
pub use llm::{ChatCompletionModel, LanguageModel, Prompt, DEFAULT_TEMPERATURE, GROQ_BASE_URL};
pub use models::{
    BoundingBox, Chunk, CollectionInfo, Distance, ImageDescriptor, PageMetadata, PageRecord,
    PipelineConfig, ScoredPoint, VectorPoint, NOT_AVAILABLE,
};
pub use orchestrator::{build_prompt, format_context, QueryResponder};
pub use pipeline::{ensure_ingested, prepare_pages, rebuild, IngestOutcome};
pub use stores::{LocalStore, QdrantStore};
pub use traits::VectorStore;
