use crate::ServiceError;
use async_trait::async_trait;

/// Maps a piece of text to a vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

/// Produces free text from a prompt with a named model.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ServiceError>;
}
