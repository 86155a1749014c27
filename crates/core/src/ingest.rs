use crate::chunking::{chunk_text, ChunkingConfig};
use crate::embeddings::generate_chunk_embeddings;
use crate::extractor::{extract_pdf_text, ExtractedText, LopdfExtractor, PdfExtractor};
use crate::models::{
    Document, ErrorRecord, IngestionJob, IngestionOptions, IngestionStage, StoredDocument,
};
use crate::store::{document_id, sanitize_filename, DocumentStore};
use crate::traits::EmbeddingService;
use crate::IngestError;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Turns one uploaded PDF into a stored document.
///
/// Extraction problems degrade to fallback or placeholder text and
/// embedding problems shrink the embedding list; only an unreadable
/// source or a storage failure fails the job, in which case an error
/// record is written next to the documents.
pub struct IngestionPipeline {
    store: DocumentStore,
    extractor: Arc<dyn PdfExtractor + Send + Sync>,
    embedder: Arc<dyn EmbeddingService>,
    options: IngestionOptions,
}

impl IngestionPipeline {
    pub fn new(
        store: DocumentStore,
        embedder: Arc<dyn EmbeddingService>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            store,
            extractor: Arc::new(LopdfExtractor),
            embedder,
            options,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor + Send + Sync>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub async fn run(&self, job: &IngestionJob) -> Result<StoredDocument, IngestError> {
        log_stage(job, IngestionStage::Received);

        match self.process(job).await {
            Ok(stored) => {
                log_stage(job, IngestionStage::Complete);
                Ok(stored)
            }
            Err(failure) => {
                error!(job_id = %job.job_id, file = %job.filename, stage = %IngestionStage::Failed, error = %failure, "ingestion failed");
                let record = ErrorRecord {
                    job_id: job.job_id.clone(),
                    file_name: job.filename.clone(),
                    error: failure.to_string(),
                    failed_at: Utc::now(),
                };
                let saved = self
                    .store
                    .blocking(move |store| store.save_error_record(&record))
                    .await;
                if let Err(store_error) = saved {
                    warn!(job_id = %job.job_id, error = %store_error, "could not write error record");
                }
                Err(failure)
            }
        }
    }

    async fn process(&self, job: &IngestionJob) -> Result<StoredDocument, IngestError> {
        let bytes = tokio::fs::read(&job.path)
            .await
            .map_err(|source| IngestError::SourceUnreadable {
                path: job.path.clone(),
                source,
            })?;

        log_stage(job, IngestionStage::Extracting);
        let (bytes, extracted) = self.extract(job, bytes).await?;

        log_stage(job, IngestionStage::Chunking);
        let chunks = chunk_text(&extracted.text, ChunkingConfig::from(&self.options));

        log_stage(job, IngestionStage::Embedding);
        let chunk_embeddings =
            generate_chunk_embeddings(self.embedder.as_ref(), &chunks, &self.options).await;

        log_stage(job, IngestionStage::Persisting);
        let saved_at = Utc::now();
        let document = Document {
            id: document_id(&job.filename, &job.job_id, saved_at),
            job_id: job.job_id.clone(),
            file_name: sanitize_filename(&job.filename),
            original_name: job.filename.clone(),
            size_bytes: bytes.len() as u64,
            saved_at,
            extracted_text: extracted.text,
            extraction_succeeded: extracted.succeeded,
            chunks,
            chunk_embeddings,
        };
        let stored = self
            .store
            .blocking(move |store| store.save_document(&document, &bytes))
            .await?;

        info!(
            job_id = %job.job_id,
            document = %stored.id,
            text_length = stored.metadata.text_length,
            chunks = stored.metadata.chunks_count,
            embeddings = stored.metadata.embeddings_generated,
            extraction_success = stored.metadata.extraction_success,
            "document stored"
        );
        Ok(stored)
    }

    async fn extract(
        &self,
        job: &IngestionJob,
        bytes: Vec<u8>,
    ) -> Result<(Vec<u8>, ExtractedText), IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let name = job.filename.clone();
        let (bytes, result) = tokio::task::spawn_blocking(move || {
            let result = extract_pdf_text(extractor.as_ref(), &bytes, &name);
            (bytes, result)
        })
        .await
        .map_err(|join_error| IngestError::Task(join_error.to_string()))?;

        let extracted = match result {
            Ok(extracted) => extracted,
            Err(failure) => {
                warn!(job_id = %job.job_id, file = %job.filename, error = %failure, "no text recovered, storing placeholder");
                ExtractedText {
                    text: placeholder_text(&job.filename, &failure),
                    succeeded: false,
                }
            }
        };
        Ok((bytes, extracted))
    }
}

fn placeholder_text(filename: &str, failure: &IngestError) -> String {
    format!(
        "[Text extraction failed for {filename}]\nThe file was stored, but its text could not be read ({failure})."
    )
}

fn log_stage(job: &IngestionJob, stage: IngestionStage) {
    info!(job_id = %job.job_id, file = %job.filename, stage = %stage, "ingestion stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::tests::{fast_options, CountingEmbedder};
    use crate::extractor::tests::{garbage_with_text, sample_pdf};
    use crate::store::{ERROR_DIR_PREFIX, ERROR_FILE};
    use std::fs;
    use tempfile::tempdir;

    fn pipeline(root: &std::path::Path, embedder: CountingEmbedder) -> IngestionPipeline {
        IngestionPipeline::new(DocumentStore::new(root), Arc::new(embedder), fast_options())
    }

    fn error_records(root: &std::path::Path) -> Vec<std::path::PathBuf> {
        fs::read_dir(root)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| {
                        entry
                            .file_name()
                            .to_string_lossy()
                            .starts_with(ERROR_DIR_PREFIX)
                    })
                    .map(|entry| entry.path().join(ERROR_FILE))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn missing_source_is_fatal_and_recorded() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let pipeline = pipeline(storage.path(), CountingEmbedder::default());
        let job = IngestionJob::new("ghost.pdf", storage.path().join("does-not-exist.pdf"));

        let result = pipeline.run(&job).await;

        assert!(matches!(result, Err(IngestError::SourceUnreadable { .. })));
        assert!(pipeline.store().list_documents()?.is_empty());

        let records = error_records(storage.path());
        assert_eq!(records.len(), 1);
        let record: ErrorRecord = serde_json::from_str(&fs::read_to_string(&records[0])?)?;
        assert_eq!(record.job_id, job.job_id);
        assert!(record.error.contains("does-not-exist.pdf"));
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_pdf_still_produces_a_document() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let uploads = tempdir()?;
        let source = uploads.path().join("broken.pdf");
        fs::write(&source, b"definitely not a pdf")?;

        let pipeline = pipeline(storage.path(), CountingEmbedder::default());
        let stored = pipeline.run(&IngestionJob::new("broken.pdf", &source)).await?;

        assert!(!stored.metadata.extraction_success);
        assert!(stored.metadata.text_length > 0);
        assert!(stored.metadata.chunks_count >= 1);
        let text = pipeline.store().read_text(&stored.id, None)?;
        assert!(text.contains("broken.pdf"));
        assert!(error_records(storage.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn raw_fallback_text_is_kept() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let uploads = tempdir()?;
        let source = uploads.path().join("scan.pdf");
        fs::write(&source, garbage_with_text())?;

        let pipeline = pipeline(storage.path(), CountingEmbedder::default());
        let stored = pipeline.run(&IngestionJob::new("scan.pdf", &source)).await?;

        assert!(!stored.metadata.extraction_success);
        let text = pipeline.store().read_text(&stored.id, None)?;
        assert!(text.contains("refund policy"));
        Ok(())
    }

    #[tokio::test]
    async fn valid_pdf_round_trips_through_storage() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let uploads = tempdir()?;
        let source = uploads.path().join("Guide Book.pdf");
        let bytes = sample_pdf(&["Welcome to the guide", "Chapter two"]);
        fs::write(&source, &bytes)?;

        let pipeline = pipeline(storage.path(), CountingEmbedder::default());
        let job = IngestionJob::new("Guide Book.pdf", &source);
        let stored = pipeline.run(&job).await?;

        assert!(stored.metadata.extraction_success);
        assert!(stored.id.starts_with("Guide_Book_"));
        assert!(stored.id.contains(&job.job_id));
        assert_eq!(stored.metadata.file_size, bytes.len() as u64);
        assert_eq!(
            fs::read(storage.path().join(&stored.id).join("original.pdf"))?,
            bytes
        );
        assert_eq!(pipeline.store().list_documents()?, vec![stored]);
        Ok(())
    }

    #[tokio::test]
    async fn error_prefixed_upload_is_listed_and_fetchable() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let uploads = tempdir()?;
        let source = uploads.path().join("error_log.pdf");
        fs::write(&source, sample_pdf(&["Overnight batch errors"]))?;

        let pipeline = pipeline(storage.path(), CountingEmbedder::default());
        let stored = pipeline.run(&IngestionJob::new("error_log.pdf", &source)).await?;

        assert!(stored.id.starts_with("error_log_"));
        assert_eq!(pipeline.store().list_documents()?, vec![stored.clone()]);
        assert_eq!(pipeline.store().get_document(&stored.id)?, stored);
        assert!(stored.metadata.extraction_success);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_outage_does_not_fail_ingestion() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let uploads = tempdir()?;
        let source = uploads.path().join("scan.pdf");
        fs::write(&source, garbage_with_text())?;

        let embedder = CountingEmbedder {
            fail_all: true,
            ..CountingEmbedder::default()
        };
        let pipeline = pipeline(storage.path(), embedder);
        let stored = pipeline.run(&IngestionJob::new("scan.pdf", &source)).await?;

        assert_eq!(stored.metadata.embeddings_generated, 0);
        assert!(!pipeline
            .store()
            .list_files(&stored.id)?
            .contains(&"chunks_with_embeddings.json".to_string()));
        Ok(())
    }
}
