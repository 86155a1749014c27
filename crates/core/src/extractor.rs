use crate::error::IngestError;
use lopdf::Document;
use tracing::{debug, warn};

const FALLBACK_SCAN_BYTES: usize = 10_000;
const FALLBACK_MAX_LINES: usize = 50;
const FALLBACK_MIN_CHARS: usize = 100;
const FALLBACK_MARKER: &str = "[Fallback extraction - text may be incomplete]";
const STRUCTURAL_TOKENS: [&str; 2] = ["%PDF", "xref"];

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    /// `None` when the page could not be decoded.
    pub text: Option<String>,
}

/// Result of turning a PDF into page-tagged text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// False when the text came from the raw-byte fallback.
    pub succeeded: bool,
}

pub trait PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let pages = document
            .get_pages()
            .into_keys()
            .map(|page_no| match document.extract_text(&[page_no]) {
                Ok(text) => PageText {
                    number: page_no,
                    text: Some(text),
                },
                Err(error) => {
                    debug!(page = page_no, %error, "page text extraction failed");
                    PageText {
                        number: page_no,
                        text: None,
                    }
                }
            })
            .collect();

        Ok(pages)
    }
}

/// Joins pages into `[Page n]`-tagged text separated by blank lines.
pub fn render_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| match &page.text {
            Some(text) => format!("[Page {}]\n{}", page.number, text.trim()),
            None => format!("[Page {}] - Extraction failed", page.number),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

/// Extracts page-tagged text from a PDF, dropping to a raw-byte scan when
/// the PDF cannot be parsed or yields no text at all.
pub fn extract_pdf_text<E: PdfExtractor + ?Sized>(
    extractor: &E,
    bytes: &[u8],
    display_name: &str,
) -> Result<ExtractedText, IngestError> {
    let parse_error = match extractor.extract_pages(bytes) {
        Ok(pages) => {
            let text = render_pages(&pages);
            if !text.is_empty() {
                return Ok(ExtractedText {
                    text,
                    succeeded: true,
                });
            }
            format!("pdf had no readable pages: {display_name}")
        }
        Err(IngestError::PdfParse(details)) => details,
        Err(error) => return Err(error),
    };

    warn!(file = display_name, error = %parse_error, "pdf parsing failed, scanning raw bytes");

    match fallback_text(bytes) {
        Some(text) => Ok(ExtractedText {
            text,
            succeeded: false,
        }),
        None => Err(IngestError::PdfParse(format!(
            "{parse_error}; raw byte scan found no usable text"
        ))),
    }
}

/// Degraded recovery: readable lines from the head of the raw buffer.
pub fn fallback_text(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(FALLBACK_SCAN_BYTES)];
    let raw = String::from_utf8_lossy(head);

    let lines = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !STRUCTURAL_TOKENS.iter().any(|token| line.contains(token)))
        .take(FALLBACK_MAX_LINES)
        .collect::<Vec<_>>();

    let body = lines.join("\n");
    if body.chars().count() > FALLBACK_MIN_CHARS {
        Some(format!("{FALLBACK_MARKER}\n{body}"))
    } else {
        None
    }
}
