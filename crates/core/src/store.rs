use crate::error::StoreError;
use crate::models::{Document, DocumentMetadata, ErrorRecord, StoredDocument};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub const ORIGINAL_FILE: &str = "original.pdf";
pub const TEXT_FILE: &str = "extracted_text.txt";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const EMBEDDINGS_FILE: &str = "chunks_with_embeddings.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const ERROR_FILE: &str = "error.json";
pub const ERROR_DIR_PREFIX: &str = "error_";

/// One directory per document under `root`, keyed by document id.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs `operation` against a clone of this store on the blocking pool.
    pub async fn blocking<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce(&DocumentStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || operation(&store))
            .await
            .map_err(|join_error| StoreError::Task(join_error.to_string()))?
    }

    /// Writes every file of `document`, `metadata.json` last.
    pub fn save_document(
        &self,
        document: &Document,
        original: &[u8],
    ) -> Result<StoredDocument, StoreError> {
        let dir = self.root.join(&document.id);
        fs::create_dir_all(&dir)?;

        fs::write(dir.join(ORIGINAL_FILE), original)?;
        fs::write(dir.join(TEXT_FILE), &document.extracted_text)?;
        write_json(&dir.join(CHUNKS_FILE), &document.chunks)?;
        if !document.chunk_embeddings.is_empty() {
            write_json(&dir.join(EMBEDDINGS_FILE), &document.chunk_embeddings)?;
        }

        let metadata = DocumentMetadata {
            job_id: document.job_id.clone(),
            file_name: document.file_name.clone(),
            original_name: document.original_name.clone(),
            saved_at: document.saved_at,
            file_size: document.size_bytes,
            text_length: document.extracted_text.chars().count(),
            chunks_count: document.chunks.len(),
            embeddings_generated: document.chunk_embeddings.len(),
            extraction_success: document.extraction_succeeded,
            storage_path: dir.to_string_lossy().to_string(),
        };
        write_json(&dir.join(METADATA_FILE), &metadata)?;

        Ok(StoredDocument {
            id: document.id.clone(),
            metadata,
        })
    }

    pub fn save_error_record(&self, record: &ErrorRecord) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(format!(
            "{ERROR_DIR_PREFIX}{}_{}",
            sanitize_filename(&record.job_id),
            record.failed_at.timestamp_millis()
        ));
        fs::create_dir_all(&dir)?;
        let path = dir.join(ERROR_FILE);
        write_json(&path, record)?;
        Ok(path)
    }

    /// All documents with readable metadata, newest first.
    pub fn list_documents(&self) -> Result<Vec<StoredDocument>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str() else {
                continue;
            };
            if is_error_record(entry.path()) {
                continue;
            }

            match read_metadata(entry.path()) {
                Ok(Some(metadata)) => documents.push(StoredDocument {
                    id: id.to_string(),
                    metadata,
                }),
                Ok(None) => {}
                Err(error) => warn!(document = id, %error, "skipping unreadable metadata"),
            }
        }

        documents.sort_by(|left, right| right.metadata.saved_at.cmp(&left.metadata.saved_at));
        Ok(documents)
    }

    pub fn get_document(&self, id: &str) -> Result<StoredDocument, StoreError> {
        let dir = self.document_dir(id)?;
        read_metadata(&dir)?
            .map(|metadata| StoredDocument {
                id: id.to_string(),
                metadata,
            })
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Extracted text, cut to `max_chars` characters when given.
    pub fn read_text(&self, id: &str, max_chars: Option<usize>) -> Result<String, StoreError> {
        let path = self.document_dir(id)?.join(TEXT_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(error) => return Err(error.into()),
        };

        Ok(match max_chars {
            Some(limit) => truncate_chars(&text, limit).to_string(),
            None => text,
        })
    }

    pub fn list_files(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.document_dir(id)?;
        let mut files = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect::<Vec<_>>();
        files.sort_unstable();
        Ok(files)
    }

    fn document_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty() && !id.contains(['/', '\\']) && id != "." && id != "..";
        let dir = self.root.join(id);
        if valid && dir.is_dir() && !is_error_record(&dir) {
            Ok(dir)
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }
}

/// Error records are told apart from documents by their `error.json`,
/// never by directory name.
fn is_error_record(dir: &Path) -> bool {
    dir.join(ERROR_FILE).is_file()
}

fn read_metadata(dir: &Path) -> Result<Option<DocumentMetadata>, StoreError> {
    match fs::read_to_string(dir.join(METADATA_FILE)) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let encoded = serde_json::to_vec_pretty(value)?;
    fs::write(path, encoded)?;
    Ok(())
}

/// Replaces everything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('.').to_string();
    if sanitized.is_empty() {
        "document".to_string()
    } else {
        sanitized
    }
}

/// `<sanitized stem>_<job id>_<millis>`; doubles as the directory name.
pub fn document_id(original_name: &str, job_id: &str, saved_at: DateTime<Utc>) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(original_name);
    format!(
        "{}_{}_{}",
        sanitize_filename(stem),
        sanitize_filename(job_id),
        saved_at.timestamp_millis()
    )
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkEmbedding};
    use chrono::TimeZone;
    use tempfile::tempdir;

    pub(crate) fn sample_document(name: &str, text: &str, saved_at: DateTime<Utc>) -> Document {
        let job_id = format!("job-{}", saved_at.timestamp());
        Document {
            id: document_id(name, &job_id, saved_at),
            job_id,
            file_name: sanitize_filename(name),
            original_name: name.to_string(),
            size_bytes: 42,
            saved_at,
            extracted_text: text.to_string(),
            extraction_succeeded: true,
            chunks: vec![Chunk {
                index: 0,
                offset: 0,
                text: text.to_string(),
                page_ref: None,
            }],
            chunk_embeddings: Vec::new(),
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().unwrap_or_default()
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("My Report (v2).pdf"), "My_Report__v2_.pdf");
        assert_eq!(sanitize_filename("../../etc"), "_.._etc");
        assert_eq!(sanitize_filename("..."), "document");
    }

    #[test]
    fn document_id_embeds_job_and_timestamp() {
        let id = document_id("Annual Report.pdf", "job-7", at(1_700_000_000));
        assert_eq!(id, "Annual_Report_job-7_1700000000000");
    }

    #[test]
    fn save_writes_expected_layout() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path());
        let mut document = sample_document("manual.pdf", "[Page 1]\nbody", at(10));
        document.chunk_embeddings.push(ChunkEmbedding {
            chunk_index: 0,
            text: "[Page 1]\nbody".to_string(),
            embedding: vec![0.5, 0.5],
            page_ref: Some(1),
        });

        let stored = store.save_document(&document, b"%PDF-bytes")?;

        assert_eq!(
            store.list_files(&stored.id)?,
            vec![
                CHUNKS_FILE.to_string(),
                EMBEDDINGS_FILE.to_string(),
                TEXT_FILE.to_string(),
                METADATA_FILE.to_string(),
                ORIGINAL_FILE.to_string(),
            ]
        );
        assert_eq!(fs::read(dir.path().join(&stored.id).join(ORIGINAL_FILE))?, b"%PDF-bytes");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(&stored.id).join(METADATA_FILE))?)?;
        for field in [
            "jobId",
            "fileName",
            "originalName",
            "savedAt",
            "fileSize",
            "textLength",
            "chunksCount",
            "embeddingsGenerated",
            "extractionSuccess",
            "storagePath",
        ] {
            assert!(raw.get(field).is_some(), "missing {field}");
        }
        assert_eq!(raw["embeddingsGenerated"], 1);
        Ok(())
    }

    #[test]
    fn embeddings_file_is_optional() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path());
        let stored = store.save_document(&sample_document("a.pdf", "text", at(1)), b"x")?;
        assert!(!store.list_files(&stored.id)?.contains(&EMBEDDINGS_FILE.to_string()));
        Ok(())
    }

    #[test]
    fn listing_is_newest_first_and_skips_error_records() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path());
        store.save_document(&sample_document("old.pdf", "old", at(100)), b"x")?;
        store.save_document(&sample_document("new.pdf", "new", at(200)), b"x")?;
        store.save_error_record(&ErrorRecord {
            job_id: "job-9".to_string(),
            file_name: "bad.pdf".to_string(),
            error: "missing".to_string(),
            failed_at: at(300),
        })?;
        fs::create_dir(dir.path().join("incomplete"))?;

        let names: Vec<_> = store
            .list_documents()?
            .into_iter()
            .map(|document| document.metadata.original_name)
            .collect();
        assert_eq!(names, vec!["new.pdf", "old.pdf"]);
        Ok(())
    }

    #[test]
    fn error_prefixed_names_stay_visible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path());
        let stored = store.save_document(&sample_document("error_log.pdf", "log", at(10)), b"x")?;
        let record = store.save_error_record(&ErrorRecord {
            job_id: "job-1".to_string(),
            file_name: "gone.pdf".to_string(),
            error: "missing".to_string(),
            failed_at: at(20),
        })?;
        assert!(stored.id.starts_with(ERROR_DIR_PREFIX));

        let listed: Vec<_> = store.list_documents()?.into_iter().map(|document| document.id).collect();
        assert_eq!(listed, vec![stored.id.clone()]);
        assert_eq!(store.get_document(&stored.id)?, stored);

        let record_id = record
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        assert!(matches!(store.get_document(&record_id), Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn blocking_reads_run_off_the_runtime() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path());
        store.save_document(&sample_document("a.pdf", "alpha", at(1)), b"x")?;
        let documents = store.blocking(|store| store.list_documents()).await?;
        assert_eq!(documents.len(), 1);
        Ok(())
    }

    #[test]
    fn missing_root_lists_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path().join("absent"));
        assert!(store.list_documents()?.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_or_unsafe_ids_are_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path());
        for id in ["nope", "..", "../x", ""] {
            assert!(matches!(store.get_document(id), Err(StoreError::NotFound(_))));
        }
        Ok(())
    }

    #[test]
    fn read_text_truncates_on_characters() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DocumentStore::new(dir.path());
        let stored = store.save_document(&sample_document("u.pdf", "ééééé", at(5)), b"x")?;
        assert_eq!(store.read_text(&stored.id, Some(3))?, "ééé");
        assert_eq!(store.read_text(&stored.id, None)?, "ééééé");
        Ok(())
    }
}
