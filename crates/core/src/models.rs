use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ANSWER_MODELS: [&str; 3] = ["gemini-1.5-flash", "gemini-1.5-pro", "gemini-pro"];

/// A contiguous window of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: usize,
    /// Character offset of the window start in the extracted text.
    pub offset: usize,
    pub text: String,
    pub page_ref: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEmbedding {
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    pub page_ref: Option<u32>,
}

/// Contents of `metadata.json` in a document directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub job_id: String,
    pub file_name: String,
    pub original_name: String,
    pub saved_at: DateTime<Utc>,
    pub file_size: u64,
    pub text_length: usize,
    pub chunks_count: usize,
    pub embeddings_generated: usize,
    pub extraction_success: bool,
    pub storage_path: String,
}

/// Metadata paired with the directory name it was loaded from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
}

/// A fully ingested PDF before it is written to disk.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub job_id: String,
    pub file_name: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
    pub extracted_text: String,
    pub extraction_succeeded: bool,
    pub chunks: Vec<Chunk>,
    pub chunk_embeddings: Vec<ChunkEmbedding>,
}

/// Written to `error_<job>_<millis>/error.json` when a job cannot be ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub job_id: String,
    pub file_name: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub job_id: String,
    pub filename: String,
    pub path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn new(filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            filename: filename.into(),
            path: path.into(),
            uploaded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    Received,
    Extracting,
    Chunking,
    Embedding,
    Persisting,
    Complete,
    Failed,
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestionStage::Received => "received",
            IngestionStage::Extracting => "extracting",
            IngestionStage::Chunking => "chunking",
            IngestionStage::Embedding => "embedding",
            IngestionStage::Persisting => "persisting",
            IngestionStage::Complete => "complete",
            IngestionStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    TextSearch,
    Filename,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub document_id: String,
    pub document_name: String,
    pub score: u8,
    pub context_snippet: String,
    pub page_ref: Option<u32>,
    pub match_kind: MatchKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnswerSource {
    #[serde(rename = "AI Analysis")]
    AiAnalysis,
    #[serde(rename = "Text Search")]
    TextSearch,
    #[serde(rename = "No Match Found")]
    NoMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnswer {
    pub message: String,
    pub pdf_name: Option<String>,
    pub pdf_id: Option<String>,
    pub source: AnswerSource,
    pub has_answer: bool,
    #[serde(rename = "hasPDFs")]
    pub has_pdfs: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_pdfs: Vec<DocumentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatAnswer {
    pub(crate) fn unanswered(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pdf_name: None,
            pdf_id: None,
            source: AnswerSource::NoMatch,
            has_answer: false,
            has_pdfs: true,
            available_pdfs: Vec::new(),
            model: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_window_chars: usize,
    pub chunk_overlap_chars: usize,
    pub max_chunks: usize,
    pub max_embedded_chunks: usize,
    pub min_embed_chars: usize,
    pub embed_delay: Duration,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_window_chars: 1_000,
            chunk_overlap_chars: 200,
            max_chunks: 50,
            max_embedded_chunks: 10,
            min_embed_chars: 20,
            embed_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub answer_models: Vec<String>,
    pub answer_context_chars: usize,
    pub search_prefix_chars: usize,
    pub context_radius_chars: usize,
    pub min_readable_chars: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            answer_models: DEFAULT_ANSWER_MODELS
                .iter()
                .map(|model| model.to_string())
                .collect(),
            answer_context_chars: 4_000,
            search_prefix_chars: 5_000,
            context_radius_chars: 150,
            min_readable_chars: 50,
        }
    }
}
