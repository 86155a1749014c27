//! HTTP API for uploading PDFs and asking questions about them.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Queue one PDF (multipart field `pdf`, at most 10 MB) |
//! | `GET`  | `/api/pdfs` | All documents, newest first |
//! | `GET`  | `/api/pdfs/{id}` | Metadata, text preview and stored files |
//! | `GET`  | `/api/chat?message=&pdfId=` | Answer a question about a document |
//! | `GET`  | `/api/search?q=&pdfId=` | Ranked substring matches |
//! | `GET`  | `/api/recent` | Five newest documents |
//! | `GET`  | `/api/jobs/{id}` | Status of an upload job |
//! | `GET`  | `/api/health` | Liveness probe |
//!
//! Errors use `{ "error": { "code": "...", "message": "..." } }`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use pdf_buddy_core::{
    sanitize_filename, AnswerService, ChatAnswer, DocumentMetadata, DocumentStore,
    InMemoryJobQueue, IngestionJob, JobQueue, SearchResult, ServiceError, StoreError,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::jobs::{JobRecord, JobTracker};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const PREVIEW_CHARS: usize = 1_000;
const RECENT_LIMIT: usize = 5;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub answers: Arc<AnswerService>,
    pub queue: Arc<InMemoryJobQueue>,
    pub jobs: Arc<JobTracker>,
    pub upload_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/api/pdfs", get(handle_list))
        .route("/api/pdfs/{id}", get(handle_get))
        .route("/api/chat", get(handle_chat))
        .route("/api/search", get(handle_search))
        .route("/api/recent", get(handle_recent))
        .route("/api/jobs/{id}", get(handle_job))
        .route("/api/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves until Ctrl-C.
pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = bind, "PDF Buddy listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to listen for shutdown signal");
            }
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => not_found(format!("document not found: {id}")),
            other => internal(other.to_string()),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Store(store) => store.into(),
            other => internal(other.to_string()),
        }
    }
}

// ============ POST /api/upload ============

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub job_id: String,
    pub status: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| bad_request(format!("invalid upload: {error}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if field.name().is_some_and(|name| name != "pdf") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|error| {
            bad_request(format!(
                "upload exceeds {} MB or could not be read: {error}",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            ))
        })?;
        upload = Some((filename, content_type, bytes));
        break;
    }

    let (filename, content_type, bytes) =
        upload.ok_or_else(|| bad_request("no PDF file in field 'pdf'"))?;

    if !is_pdf(&filename, content_type.as_deref()) {
        return Err(bad_request("only PDF files are allowed"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(bad_request(format!(
            "file is larger than {} MB",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|error| internal(format!("upload directory unavailable: {error}")))?;
    let mut job = IngestionJob::new(filename.clone(), PathBuf::new());
    job.path = upload_path(&state.upload_dir, &job, Utc::now().timestamp_millis());
    tokio::fs::write(&job.path, &bytes)
        .await
        .map_err(|error| internal(format!("failed to save upload: {error}")))?;

    let job_id = job.job_id.clone();
    state.jobs.queued(&job);
    if let Err(error) = state.queue.enqueue(job.clone()) {
        state.jobs.fail(&job, &error.to_string());
        return Err(internal(error.to_string()));
    }

    Ok(Json(UploadResponse {
        success: true,
        filename,
        job_id,
        status: "queued".to_string(),
    }))
}

/// `<millis>-<job id>-<sanitized name>`, unique per job.
fn upload_path(upload_dir: &std::path::Path, job: &IngestionJob, millis: i64) -> PathBuf {
    upload_dir.join(format!(
        "{millis}-{}-{}",
        job.job_id,
        sanitize_filename(&job.filename)
    ))
}

/// Both the declared content type and the extension must say PDF.
fn is_pdf(filename: &str, content_type: Option<&str>) -> bool {
    content_type == Some("application/pdf")
        && std::path::Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

// ============ GET /api/pdfs ============

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub saved_at: DateTime<Utc>,
    pub text_length: usize,
    pub chunks: usize,
    pub embeddings: usize,
    pub extraction_success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentList {
    pub pdfs: Vec<DocumentSummary>,
    pub total: usize,
}

async fn handle_list(State(state): State<AppState>) -> Result<Json<DocumentList>, AppError> {
    let pdfs = state
        .store
        .blocking(|store| store.list_documents())
        .await?
        .into_iter()
        .map(|document| {
            let metadata = document.metadata;
            DocumentSummary {
                id: document.id,
                name: metadata.original_name,
                size: metadata.file_size,
                saved_at: metadata.saved_at,
                text_length: metadata.text_length,
                chunks: metadata.chunks_count,
                embeddings: metadata.embeddings_generated,
                extraction_success: metadata.extraction_success,
            }
        })
        .collect::<Vec<_>>();

    Ok(Json(DocumentList {
        total: pdfs.len(),
        pdfs,
    }))
}

// ============ GET /api/pdfs/{id} ============

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentDetail {
    pub id: String,
    pub metadata: DocumentMetadata,
    pub preview: String,
    pub files: Vec<String>,
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetail>, AppError> {
    let detail = state
        .store
        .blocking(move |store| {
            let document = store.get_document(&id)?;
            let preview = match store.read_text(&id, Some(PREVIEW_CHARS)) {
                Ok(text) => text,
                Err(StoreError::NotFound(_)) => String::new(),
                Err(error) => return Err(error),
            };
            let files = store.list_files(&id)?;
            Ok(DocumentDetail {
                id: document.id,
                metadata: document.metadata,
                preview,
                files,
            })
        })
        .await?;
    Ok(Json(detail))
}

// ============ GET /api/chat ============

#[derive(Debug, Deserialize)]
struct ChatParams {
    message: Option<String>,
    #[serde(rename = "pdfId")]
    pdf_id: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Result<Json<ChatAnswer>, AppError> {
    let message = required(params.message, "message")?;
    let pdf_id = optional(params.pdf_id);
    let answer = state.answers.answer(&message, pdf_id.as_deref()).await?;
    Ok(Json(answer))
}

// ============ GET /api/search ============

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    #[serde(rename = "pdfId")]
    pdf_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: usize,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = required(params.q, "q")?;
    let pdf_id = optional(params.pdf_id);
    let results = state.answers.search(&query, pdf_id.as_deref()).await?;
    Ok(Json(SearchResponse {
        query,
        total: results.len(),
        results,
    }))
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| bad_request(format!("query parameter '{name}' is required")))
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// ============ GET /api/recent ============

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentDocument {
    pub id: String,
    pub name: String,
    pub size: String,
    pub saved_at: DateTime<Utc>,
}

async fn handle_recent(
    State(state): State<AppState>,
) -> Result<Json<Vec<RecentDocument>>, AppError> {
    let recent = state
        .store
        .blocking(|store| store.list_documents())
        .await?
        .into_iter()
        .take(RECENT_LIMIT)
        .map(|document| RecentDocument {
            id: document.id,
            name: document.metadata.original_name,
            size: human_size(document.metadata.file_size),
            saved_at: document.metadata.saved_at,
        })
        .collect();
    Ok(Json(recent))
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

// ============ GET /api/jobs/{id} ============

async fn handle_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    state
        .jobs
        .get(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("job not found: {id}")))
}

// ============ GET /api/health ============

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub queued: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        queued: state.queue.pending(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use pdf_buddy_core::{
        AnswerSource, CharacterNgramEmbedder, DisabledModel, IngestionOptions, IngestionPipeline,
        RetrievalOptions,
    };
    use serde::de::DeserializeOwned;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "pdfbuddyboundary";

    struct Harness {
        _storage: TempDir,
        _uploads: TempDir,
        state: AppState,
    }

    fn harness() -> Harness {
        let storage = TempDir::new().expect("storage dir");
        let uploads = TempDir::new().expect("upload dir");
        let store = DocumentStore::new(storage.path());
        let options = IngestionOptions {
            embed_delay: Duration::ZERO,
            ..IngestionOptions::default()
        };
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            Arc::new(CharacterNgramEmbedder::default()),
            options,
        ));
        let queue = Arc::new(InMemoryJobQueue::start(pipeline));
        let jobs = Arc::new(JobTracker::default());
        jobs.attach(queue.as_ref());
        let answers = Arc::new(AnswerService::new(
            store.clone(),
            Arc::new(DisabledModel),
            RetrievalOptions::default(),
        ));

        Harness {
            state: AppState {
                store,
                answers,
                queue,
                jobs,
                upload_dir: uploads.path().to_path_buf(),
            },
            _storage: storage,
            _uploads: uploads,
        }
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router(state.clone())
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        (status, body.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(state: &AppState, uri: &str) -> (StatusCode, T) {
        let request = Request::get(uri).body(Body::empty()).expect("request");
        let (status, body) = send(state, request).await;
        (status, serde_json::from_slice(&body).expect("json body"))
    }

    fn multipart_request(filename: &str, content_type: &str, contents: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"pdf\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let harness = harness();
        let (status, body): (_, HealthResponse) = get_json(&harness.state, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn chat_requires_message() {
        let harness = harness();
        let (status, body): (_, serde_json::Value) = get_json(&harness.state, "/api/chat").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn chat_without_documents_has_no_answer() {
        let harness = harness();
        let (status, body): (_, serde_json::Value) =
            get_json(&harness.state, "/api/chat?message=hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hasPDFs"], false);
        assert_eq!(body["hasAnswer"], false);
        assert_eq!(body["source"], "No Match Found");
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let harness = harness();
        let (status, body): (_, serde_json::Value) =
            get_json(&harness.state, "/api/pdfs/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn non_pdf_upload_is_rejected() {
        let harness = harness();
        let (status, _) = send(
            &harness.state,
            multipart_request("notes.txt", "text/plain", b"hello"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pdf_content_type_with_other_extension_is_rejected() {
        let harness = harness();
        let (status, _) = send(
            &harness.state,
            multipart_request("notes.exe", "application/pdf", b"%PDF-1.4"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn pdf_detection_needs_type_and_extension() {
        assert!(is_pdf("Report.PDF", Some("application/pdf")));
        assert!(!is_pdf("report.pdf", Some("text/plain")));
        assert!(!is_pdf("report.pdf", None));
        assert!(!is_pdf("notes.exe", Some("application/pdf")));
    }

    #[test]
    fn same_name_uploads_get_distinct_paths() {
        let dir = std::path::Path::new("/uploads");
        let first = IngestionJob::new("report.pdf", PathBuf::new());
        let second = IngestionJob::new("report.pdf", PathBuf::new());

        let first_path = upload_path(dir, &first, 1_700_000_000_000);
        let second_path = upload_path(dir, &second, 1_700_000_000_000);

        assert_ne!(first_path, second_path);
        assert!(first_path.to_string_lossy().contains(&first.job_id));
        assert!(first_path.to_string_lossy().ends_with("-report.pdf"));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let harness = harness();
        let contents = vec![b'a'; MAX_UPLOAD_BYTES + 1];
        let (status, _) = send(
            &harness.state,
            multipart_request("big.pdf", "application/pdf", &contents),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn uploaded_pdf_is_ingested_and_searchable() {
        let harness = harness();
        let mut contents = b"%PDF-1.4\n".to_vec();
        for _ in 0..6 {
            contents.extend_from_slice(
                b"Warranty claims are handled by the support team within ten business days\n",
            );
        }

        let (status, body) = send(
            &harness.state,
            multipart_request("Warranty Terms.pdf", "application/pdf", &contents),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let upload: UploadResponse = serde_json::from_slice(&body).expect("upload json");
        assert!(upload.success);
        assert_eq!(upload.status, "queued");

        harness.state.queue.shutdown().await;

        let (_, job): (_, serde_json::Value) =
            get_json(&harness.state, &format!("/api/jobs/{}", upload.job_id)).await;
        assert_eq!(job["status"], "completed");

        let (_, list): (_, DocumentList) = get_json(&harness.state, "/api/pdfs").await;
        assert_eq!(list.total, 1);
        assert_eq!(list.pdfs[0].name, "Warranty Terms.pdf");
        assert!(!list.pdfs[0].extraction_success);

        let (_, detail): (_, DocumentDetail) =
            get_json(&harness.state, &format!("/api/pdfs/{}", list.pdfs[0].id)).await;
        assert!(detail.files.contains(&"metadata.json".to_string()));
        assert!(detail.preview.chars().count() <= PREVIEW_CHARS);

        let (_, search): (_, SearchResponse) =
            get_json(&harness.state, "/api/search?q=warranty%20claims").await;
        assert_eq!(search.results[0].score, 100);

        let (_, answer): (_, ChatAnswer) =
            get_json(&harness.state, "/api/chat?message=warranty%20claims").await;
        assert_eq!(answer.source, AnswerSource::TextSearch);
        assert!(answer.has_answer);

        let (_, recent): (_, Vec<RecentDocument>) = get_json(&harness.state, "/api/recent").await;
        assert_eq!(recent.len(), 1);
        assert!(recent[0].size.ends_with(" B"));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
