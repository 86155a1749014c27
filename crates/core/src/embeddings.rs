use crate::chunking::page_ref;
use crate::models::{Chunk, ChunkEmbedding, IngestionOptions};
use crate::traits::EmbeddingService;
use crate::ServiceError;
use async_trait::async_trait;
use tracing::{debug, warn};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Offline embedder used when no embedding API is configured.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingService for CharacterNgramEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self.embed_text(text))
    }
}

/// Embeds the leading chunks of a document one call at a time.
///
/// Only the first `max_embedded_chunks` chunks are considered. Chunks
/// shorter than `min_embed_chars` are skipped without a call, failed calls
/// are logged and skipped, and `embed_delay` is slept after every call.
/// An empty result is a valid outcome.
pub async fn generate_chunk_embeddings<E: EmbeddingService + ?Sized>(
    embedder: &E,
    chunks: &[Chunk],
    options: &IngestionOptions,
) -> Vec<ChunkEmbedding> {
    let mut embedded = Vec::new();

    for chunk in chunks.iter().take(options.max_embedded_chunks) {
        if chunk.text.trim().chars().count() < options.min_embed_chars {
            debug!(chunk = chunk.index, "chunk too short to embed");
            continue;
        }

        match embedder.embed(&chunk.text).await {
            Ok(embedding) => embedded.push(ChunkEmbedding {
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                embedding,
                page_ref: page_ref(&chunk.text),
            }),
            Err(error) => warn!(chunk = chunk.index, %error, "embedding failed, skipping chunk"),
        }

        if !options.embed_delay.is_zero() {
            tokio::time::sleep(options.embed_delay).await;
        }
    }

    embedded
}
