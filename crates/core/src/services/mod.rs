pub mod gemini;

pub use gemini::{DisabledModel, GeminiClient, DEFAULT_EMBEDDING_MODEL, DEFAULT_GEMINI_ENDPOINT};
