use crate::traits::{EmbeddingService, GenerativeModel};
use crate::ServiceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

const BACKEND: &str = "gemini";

/// Client for the Gemini `generateContent` and `embedContent` endpoints.
pub struct GeminiClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    embedding_model: String,
}

impl GeminiClient {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let endpoint = if endpoint.ends_with('/') {
            Url::parse(endpoint)?
        } else {
            Url::parse(&format!("{endpoint}/"))?
        };

        Ok(Self {
            client: Client::new(),
            endpoint,
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(self.endpoint.join(path)?)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {}", truncate(&text, 200)),
            });
        }

        Ok(text)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ServiceError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        let raw = self
            .post(&format!("models/{model}:generateContent"), body)
            .await?;
        parse_generated_text(&raw, model)
    }
}

#[async_trait]
impl EmbeddingService for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let model = &self.embedding_model;
        let body = json!({
            "model": format!("models/{model}"),
            "content": { "parts": [{ "text": text }] },
        });
        let raw = self
            .post(&format!("models/{model}:embedContent"), body)
            .await?;
        parse_embedding(&raw, model)
    }
}

/// Answer model used when no API key is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledModel;

#[async_trait]
impl GenerativeModel for DisabledModel {
    async fn generate(&self, model: &str, _prompt: &str) -> Result<String, ServiceError> {
        Err(ServiceError::NotConfigured(format!(
            "no API key configured for {model}"
        )))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

fn parse_generated_text(raw: &str, model: &str) -> Result<String, ServiceError> {
    let payload: GenerateResponse =
        serde_json::from_str(raw).map_err(|error| ServiceError::BackendResponse {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })?;

    let text = payload
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(ServiceError::EmptyResponse(model.to_string()));
    }
    Ok(text.trim().to_string())
}

fn parse_embedding(raw: &str, model: &str) -> Result<Vec<f32>, ServiceError> {
    let payload: EmbedResponse =
        serde_json::from_str(raw).map_err(|error| ServiceError::BackendResponse {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })?;

    match payload.embedding {
        Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
        _ => Err(ServiceError::EmptyResponse(model.to_string())),
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    crate::store::truncate_chars(text, limit)
}
