use crate::cache::{load_pages, save_pages};
use crate::chunking::chunk_pages;
use crate::embeddings::Embedder;
use crate::extractor::{extract_page_records, PdfExtractor};
use crate::ingest::{ingest, is_ingested, IngestReport};
use crate::models::{PageRecord, PipelineConfig};
use crate::traits::VectorStore;
use crate::IngestError;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    AlreadyIngested,
    Ingested(IngestReport),
}

/// Loads cached pages, or extracts them from the PDF and caches the result.
pub fn prepare_pages(
    config: &PipelineConfig,
    extractor: &dyn PdfExtractor,
) -> Result<Vec<PageRecord>, IngestError> {
    if let Some(pages) = load_pages(&config.cache_path) {
        return Ok(pages);
    }

    let pages = extract_page_records(extractor, &config.pdf_path, &config.image_output_dir);
    if pages.is_empty() {
        return Err(IngestError::NoPages(config.pdf_path.display().to_string()));
    }

    if let Err(error) = save_pages(&pages, &config.cache_path) {
        warn!(path = %config.cache_path.display(), %error, "could not save pages data");
    }
    Ok(pages)
}

/// Skips all work when the collection is already populated; otherwise rebuilds it.
pub async fn ensure_ingested<S, E>(
    config: &PipelineConfig,
    store: &S,
    embedder: &E,
    extractor: &dyn PdfExtractor,
) -> Result<IngestOutcome, IngestError>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    if is_ingested(store, &config.collection_name).await? {
        info!(collection = %config.collection_name, "collection already populated, skipping ingestion");
        return Ok(IngestOutcome::AlreadyIngested);
    }

    rebuild(config, store, embedder, extractor)
        .await
        .map(IngestOutcome::Ingested)
}

/// Extracts (or loads), chunks and ingests without consulting the gate.
pub async fn rebuild<S, E>(
    config: &PipelineConfig,
    store: &S,
    embedder: &E,
    extractor: &dyn PdfExtractor,
) -> Result<IngestReport, IngestError>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    config.chunking.validate()?;
    info!(pdf = %config.pdf_path.display(), "starting ingestion pipeline");

    let pages = prepare_pages(config, extractor)?;
    let chunks = chunk_pages(&pages, config.chunking);
    if chunks.is_empty() {
        return Err(IngestError::NoChunks);
    }
    info!(pages = pages.len(), chunks = chunks.len(), "created chunks");

    let report = ingest(
        store,
        &config.collection_name,
        &chunks,
        embedder,
        &config.content_key,
    )
    .await?;
    info!(
        collection = %report.collection,
        ingested = report.ingested,
        dimension = report.dimension,
        "ingestion complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::testing::TrigramEmbedder;
    use crate::models::PageMetadata;
    use crate::stores::LocalStore;
    use std::cell::Cell;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Counts calls and returns fixed pages.
    struct CountingExtractor {
        calls: Cell<usize>,
        pages: Vec<PageRecord>,
    }

    impl PdfExtractor for CountingExtractor {
        fn extract_pages(&self, _pdf: &Path, _images: &Path) -> Result<Vec<PageRecord>, IngestError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.pages.clone())
        }
    }

    fn record(page: u32, content: &str) -> PageRecord {
        PageRecord {
            page_content: content.to_string(),
            metadata: PageMetadata {
                page,
                source: "docs/weo.pdf".to_string(),
                tables: Vec::new(),
                images: Vec::new(),
                parsing_error: None,
            },
        }
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            pdf_path: dir.path().join("weo.pdf"),
            image_output_dir: dir.path().join("images"),
            cache_path: dir.path().join("pages.json"),
            chunking: ChunkingConfig::new(50, 10).unwrap(),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn second_run_skips_extraction_and_embedding() {
        let dir = tempdir().unwrap();
        let config = config(&dir);
        let store = LocalStore::in_memory();
        let embedder = TrigramEmbedder::default();
        let extractor = CountingExtractor {
            calls: Cell::new(0),
            pages: vec![record(1, "World trade volumes recover."), record(2, "Risks tilt to the downside.")],
        };

        let first = ensure_ingested(&config, &store, &embedder, &extractor).await.unwrap();
        let second = ensure_ingested(&config, &store, &embedder, &extractor).await.unwrap();

        assert!(matches!(first, IngestOutcome::Ingested(ref report) if report.ingested == 2));
        assert_eq!(second, IngestOutcome::AlreadyIngested);
        assert_eq!(extractor.calls.get(), 1);
        assert_eq!(load_pages(&config.cache_path).map(|pages| pages.len()), Some(2));
    }

    #[tokio::test]
    async fn cached_pages_skip_the_extractor() {
        let dir = tempdir().unwrap();
        let config = config(&dir);
        save_pages(&[record(1, "cached page")], &config.cache_path).unwrap();
        let extractor = CountingExtractor {
            calls: Cell::new(0),
            pages: Vec::new(),
        };

        let report = rebuild(&config, &LocalStore::in_memory(), &TrigramEmbedder::default(), &extractor)
            .await
            .unwrap();

        assert_eq!(report.ingested, 1);
        assert_eq!(extractor.calls.get(), 0);
    }

    #[tokio::test]
    async fn nothing_extracted_is_an_error() {
        let dir = tempdir().unwrap();
        let config = config(&dir);
        let extractor = CountingExtractor {
            calls: Cell::new(0),
            pages: Vec::new(),
        };

        let result = ensure_ingested(
            &config,
            &LocalStore::in_memory(),
            &TrigramEmbedder::default(),
            &extractor,
        )
        .await;

        assert!(matches!(result, Err(IngestError::NoPages(_))));
        assert!(!config.cache_path.exists());
    }

    #[tokio::test]
    async fn blank_pages_produce_no_chunks_error() {
        let dir = tempdir().unwrap();
        let config = config(&dir);
        let extractor = CountingExtractor {
            calls: Cell::new(0),
            pages: vec![record(1, "   ")],
        };

        let result = ensure_ingested(
            &config,
            &LocalStore::in_memory(),
            &TrigramEmbedder::default(),
            &extractor,
        )
        .await;

        assert!(matches!(result, Err(IngestError::NoChunks)));
    }
}
