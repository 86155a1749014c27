use crate::models::{Chunk, IngestionOptions};
use once_cell::sync::Lazy;
use regex::Regex;

static PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[Page (\d+)\]").expect("page marker pattern is valid"));

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub window_chars: usize,
    pub overlap_chars: usize,
    pub max_chunks: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            window_chars: value.chunk_window_chars,
            overlap_chars: value.chunk_overlap_chars,
            max_chunks: value.max_chunks,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

/// Splits `text` into overlapping character windows.
///
/// Text no longer than one window becomes a single trimmed chunk. Longer
/// text is walked in steps of `window - overlap` until the final window
/// reaches the end of the text or `max_chunks` windows were emitted.
/// Windows that are blank after trimming are skipped.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let window = config.window_chars.max(1);
    let step = window.saturating_sub(config.overlap_chars).max(1);

    if chars.len() <= window {
        let trimmed = text.trim();
        if trimmed.is_empty() || config.max_chunks == 0 {
            return Vec::new();
        }
        return vec![make_chunk(0, 0, trimmed)];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() && chunks.len() < config.max_chunks {
        let end = (start + window).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(make_chunk(chunks.len(), start, trimmed));
        }
        if end == chars.len() {
            break;
        }
        start = start.saturating_add(step);
    }

    chunks
}

fn make_chunk(index: usize, offset: usize, text: &str) -> Chunk {
    Chunk {
        index,
        offset,
        text: text.to_string(),
        page_ref: page_ref(text),
    }
}

/// First `[Page N]` marker in `text`.
pub fn page_ref(text: &str) -> Option<u32> {
    PAGE_MARKER
        .captures(text)
        .and_then(|capture| capture.get(1))
        .and_then(|number| number.as_str().parse().ok())
}

/// Page marker governing byte position `at`: the last marker starting at or
/// before `at`, otherwise the first marker after it.
pub fn page_ref_near(text: &str, at: usize) -> Option<u32> {
    let mut following = None;
    let mut preceding = None;

    for capture in PAGE_MARKER.captures_iter(text) {
        let (Some(whole), Some(number)) = (capture.get(0), capture.get(1)) else {
            continue;
        };
        let Ok(page) = number.as_str().parse::<u32>() else {
            continue;
        };
        if whole.start() <= at {
            preceding = Some(page);
        } else if following.is_none() {
            following = Some(page);
        }
    }

    preceding.or(following)
}
