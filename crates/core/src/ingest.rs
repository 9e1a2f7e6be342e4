use crate::embeddings::Embedder;
use crate::models::{Chunk, Distance, VectorPoint};
use crate::traits::VectorStore;
use crate::{IngestError, StoreError};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

/// Text embedded once to discover the model's output dimension.
const DIMENSION_PROBE: &str = "test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub collection: String,
    pub dimension: usize,
    pub ingested: usize,
}

/// True when `collection` exists and holds at least one vector.
pub async fn is_ingested<S>(store: &S, collection: &str) -> Result<bool, StoreError>
where
    S: VectorStore + ?Sized,
{
    if !store.collection_exists(collection).await? {
        return Ok(false);
    }
    let info = store.collection_info(collection).await?;
    Ok(info.points_count > 0)
}

/// Drops and recreates `collection`, then embeds and writes every chunk in one batch.
pub async fn ingest<S, E>(
    store: &S,
    collection: &str,
    chunks: &[Chunk],
    embedder: &E,
    content_key: &str,
) -> Result<IngestReport, IngestError>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    if store.collection_exists(collection).await? {
        info!(collection, "collection already exists, deleting it for a clean ingestion");
        store
            .delete_collection(collection)
            .await
            .map_err(|source| {
                error!(collection, error = %source, "could not delete stale collection");
                IngestError::StaleCollection {
                    collection: collection.to_string(),
                    source,
                }
            })?;
    }

    let dimension = embedder.embed(DIMENSION_PROBE).await?.len();
    store
        .create_collection(collection, dimension, Distance::Cosine)
        .await?;
    info!(collection, dimension, model = embedder.model_name(), "collection created");

    let mut points = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        points.push(VectorPoint {
            id: Uuid::new_v4().to_string(),
            vector: embedder.embed(&chunk.text).await?,
            payload: chunk_payload(chunk, content_key)?,
        });
    }

    if points.is_empty() {
        info!(collection, "no chunks to ingest");
    } else {
        info!(collection, chunks = points.len(), "writing chunks");
        store.upsert(collection, points).await?;
    }

    Ok(IngestReport {
        collection: collection.to_string(),
        dimension,
        ingested: chunks.len(),
    })
}

fn chunk_payload(
    chunk: &Chunk,
    content_key: &str,
) -> Result<serde_json::Map<String, Value>, IngestError> {
    let mut payload = match serde_json::to_value(&chunk.metadata)? {
        Value::Object(map) => map,
        other => {
            return Err(IngestError::InvalidArgument(format!(
                "chunk metadata must serialize to an object, got {other}"
            )))
        }
    };
    payload.insert(content_key.to_string(), Value::String(chunk.text.clone()));
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::TrigramEmbedder;
    use crate::error::ModelError;
    use crate::models::{CollectionInfo, PageMetadata, ScoredPoint};
    use crate::stores::LocalStore;
    use async_trait::async_trait;

    const COLLECTION: &str = "pdf_rag_collection";

    fn chunk(page: u32, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: PageMetadata {
                page,
                source: "docs/weo.pdf".to_string(),
                tables: Vec::new(),
                images: Vec::new(),
                parsing_error: None,
            },
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::EmptyResponse("failing".to_string()))
        }
    }

    /// Reports an existing collection that cannot be deleted.
    struct LockedStore;

    #[async_trait]
    impl VectorStore for LockedStore {
        async fn collection_exists(&self, _name: &str) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn collection_info(&self, _name: &str) -> Result<CollectionInfo, StoreError> {
            Ok(CollectionInfo::default())
        }

        async fn delete_collection(&self, _name: &str) -> Result<(), StoreError> {
            Err(StoreError::Request("storage folder is locked".to_string()))
        }

        async fn create_collection(
            &self,
            _name: &str,
            _dimension: usize,
            _distance: Distance,
        ) -> Result<(), StoreError> {
            panic!("must not create after a failed delete");
        }

        async fn upsert(&self, _name: &str, _points: Vec<VectorPoint>) -> Result<(), StoreError> {
            panic!("must not write after a failed delete");
        }

        async fn search(
            &self,
            _name: &str,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<ScoredPoint>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn fresh_collection_is_not_ingested_until_ingest() {
        let store = LocalStore::in_memory();
        let embedder = TrigramEmbedder { dimensions: 16 };

        assert!(!is_ingested(&store, COLLECTION).await.unwrap());
        assert!(!is_ingested(&store, COLLECTION).await.unwrap());

        let chunks = vec![chunk(1, "Global growth is steady"), chunk(2, "Inflation declines")];
        let report = ingest(&store, COLLECTION, &chunks, &embedder, "page_content")
            .await
            .unwrap();

        assert_eq!(report.ingested, 2);
        assert_eq!(report.dimension, 16);
        assert!(is_ingested(&store, COLLECTION).await.unwrap());
        assert!(is_ingested(&store, COLLECTION).await.unwrap());
    }

    #[tokio::test]
    async fn payload_carries_metadata_and_text() {
        let store = LocalStore::in_memory();
        let embedder = TrigramEmbedder { dimensions: 16 };
        let chunks = vec![chunk(3, "Commodity prices")];

        ingest(&store, COLLECTION, &chunks, &embedder, "text_body")
            .await
            .unwrap();

        let query = embedder.vector("Commodity prices");
        let hits = store.search(COLLECTION, &query, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["text_body"], "Commodity prices");
        assert_eq!(hits[0].payload["page"], 3);
        assert_eq!(hits[0].payload["source"], "docs/weo.pdf");
        assert!(hits[0].payload["parsing_error"].is_null());
        assert!(Uuid::parse_str(&hits[0].id).is_ok());
    }

    #[tokio::test]
    async fn zero_chunks_is_not_an_error() {
        let store = LocalStore::in_memory();
        let embedder = TrigramEmbedder { dimensions: 8 };

        let report = ingest(&store, COLLECTION, &[], &embedder, "page_content")
            .await
            .unwrap();

        assert_eq!(report.ingested, 0);
        assert_eq!(store.collection_info(COLLECTION).await.unwrap().points_count, 0);
        assert!(!is_ingested(&store, COLLECTION).await.unwrap());
    }

    #[tokio::test]
    async fn existing_collection_is_recreated_with_new_dimension() {
        let store = LocalStore::in_memory();
        let chunks = vec![chunk(1, "first run")];

        ingest(&store, COLLECTION, &chunks, &TrigramEmbedder { dimensions: 8 }, "page_content")
            .await
            .unwrap();
        ingest(&store, COLLECTION, &chunks, &TrigramEmbedder { dimensions: 24 }, "page_content")
            .await
            .unwrap();

        let info = store.collection_info(COLLECTION).await.unwrap();
        assert_eq!(info.vector_size, Some(24));
        assert_eq!(info.points_count, 1);
    }

    #[tokio::test]
    async fn failed_delete_aborts_ingestion() {
        let embedder = TrigramEmbedder::default();
        let result = ingest(&LockedStore, COLLECTION, &[chunk(1, "x")], &embedder, "page_content").await;

        assert!(matches!(result, Err(IngestError::StaleCollection { .. })));
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let store = LocalStore::in_memory();
        let result = ingest(&store, COLLECTION, &[chunk(1, "x")], &FailingEmbedder, "page_content").await;

        assert!(matches!(result, Err(IngestError::Model(_))));
        assert!(!is_ingested(&store, COLLECTION).await.unwrap());
    }
}
