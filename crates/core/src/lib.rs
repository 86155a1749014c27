pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod queue;
pub mod retrieval;
pub mod services;
pub mod store;
pub mod traits;

pub use chunking::{chunk_text, page_ref, page_ref_near, ChunkingConfig};
pub use embeddings::{
    generate_chunk_embeddings, CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, QueueError, ServiceError, StoreError};
pub use extractor::{extract_pdf_text, fallback_text, ExtractedText, LopdfExtractor, PageText, PdfExtractor};
pub use ingest::IngestionPipeline;
pub use models::{
    AnswerSource, ChatAnswer, Chunk, ChunkEmbedding, Document, DocumentMetadata, DocumentRef,
    ErrorRecord, IngestionJob, IngestionOptions, IngestionStage, MatchKind, RetrievalOptions,
    SearchResult, StoredDocument, DEFAULT_ANSWER_MODELS,
};
pub use queue::{CompletionHandler, FailureHandler, InMemoryJobQueue, JobProcessor, JobQueue};
pub use retrieval::{try_in_order, AnswerService};
pub use services::{DisabledModel, GeminiClient, DEFAULT_EMBEDDING_MODEL, DEFAULT_GEMINI_ENDPOINT};
pub use store::{document_id, sanitize_filename, DocumentStore};
pub use traits::{EmbeddingService, GenerativeModel};
