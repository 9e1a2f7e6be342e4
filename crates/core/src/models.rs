use crate::chunking::ChunkingConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Sentinel used for image paths and bounding boxes that could not be determined.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub filename: String,
    pub path: String,
    pub bbox: String,
    pub page_num: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub page: u32,
    pub source: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageDescriptor>,
    /// `None` when the page was extracted without error.
    #[serde(default)]
    pub parsing_error: Option<String>,
}

/// One extracted PDF page: fused text plus the structured pieces it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_content: String,
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: PageMetadata,
}

/// Axis-aligned rectangle in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect({:.2}, {:.2}, {:.2}, {:.2})",
            self.x0, self.y0, self.x1, self.y1
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Distance {
    Cosine,
}

impl Distance {
    pub fn as_qdrant(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub vector_size: Option<usize>,
}

/// Everything the ingestion pipeline needs, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pdf_path: PathBuf,
    pub image_output_dir: PathBuf,
    pub cache_path: PathBuf,
    pub collection_name: String,
    pub embedding_model: String,
    pub content_key: String,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pdf_path: PathBuf::from("docs/document.pdf"),
            image_output_dir: PathBuf::from("extracted_images"),
            cache_path: PathBuf::from("extracted_pages_data.json"),
            collection_name: "pdf_rag_collection".to_string(),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            content_key: "page_content".to_string(),
            chunking: ChunkingConfig::default(),
            top_k: 4,
        }
    }
}
