use crate::chunking::page_ref_near;
use crate::models::{
    AnswerSource, ChatAnswer, DocumentRef, MatchKind, RetrievalOptions, SearchResult,
    StoredDocument,
};
use crate::store::{truncate_chars, DocumentStore};
use crate::traits::GenerativeModel;
use crate::{ServiceError, StoreError};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONTENT_MATCH_SCORE: u8 = 100;
const FILENAME_MATCH_SCORE: u8 = 80;

/// Tries `attempt` with each candidate in order and returns the first
/// success together with the candidate that produced it. When every
/// candidate fails, all failures are reported in one error.
pub async fn try_in_order<T, F, Fut>(
    candidates: &[String],
    mut attempt: F,
) -> Result<(String, T), ServiceError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut failures = Vec::new();
    for candidate in candidates {
        match attempt(candidate.clone()).await {
            Ok(value) => return Ok((candidate.clone(), value)),
            Err(error) => {
                debug!(candidate = %candidate, %error, "candidate failed");
                failures.push(format!("{candidate}: {error}"));
            }
        }
    }
    Err(ServiceError::AllCandidatesFailed(failures))
}

/// Answers questions about stored documents, preferring the generative
/// model and falling back to substring search.
pub struct AnswerService {
    store: DocumentStore,
    generator: Arc<dyn GenerativeModel>,
    options: RetrievalOptions,
}

impl AnswerService {
    pub fn new(
        store: DocumentStore,
        generator: Arc<dyn GenerativeModel>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            generator,
            options,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub async fn answer(
        &self,
        query: &str,
        pdf_id: Option<&str>,
    ) -> Result<ChatAnswer, ServiceError> {
        let documents = self.store.blocking(|store| store.list_documents()).await?;
        if documents.is_empty() {
            return Ok(ChatAnswer {
                has_pdfs: false,
                ..ChatAnswer::unanswered(
                    "No PDFs have been uploaded yet. Upload a PDF to start asking questions.",
                )
            });
        }

        let target = match pdf_id {
            Some(id) => match documents.iter().find(|document| document.id == id) {
                Some(document) => document,
                None => return Ok(missing_document_answer(id, &documents)),
            },
            None => &documents[0],
        };
        let name = target.metadata.original_name.clone();

        let target_id = target.id.clone();
        let text = match self
            .store
            .blocking(move |store| store.read_text(&target_id, None))
            .await
        {
            Ok(text) => text,
            Err(StoreError::NotFound(_)) => String::new(),
            Err(error) => return Err(error.into()),
        };
        if text.trim().chars().count() < self.options.min_readable_chars {
            return Ok(ChatAnswer {
                pdf_name: Some(name.clone()),
                pdf_id: Some(target.id.clone()),
                ..ChatAnswer::unanswered(format!(
                    "\"{name}\" does not contain readable text, so I can't answer questions about it."
                ))
            });
        }

        let content = truncate_chars(&text, self.options.answer_context_chars);
        let prompt = build_prompt(&name, content, query);
        let generator = &self.generator;
        let prompt = prompt.as_str();
        let generated = try_in_order(&self.options.answer_models, |model| async move {
            generator.generate(&model, prompt).await
        })
        .await;

        match generated {
            Ok((model, message)) => {
                info!(document = %target.id, model = %model, "answered with generative model");
                Ok(ChatAnswer {
                    message,
                    pdf_name: Some(name),
                    pdf_id: Some(target.id.clone()),
                    source: AnswerSource::AiAnalysis,
                    has_answer: true,
                    has_pdfs: true,
                    available_pdfs: Vec::new(),
                    model: Some(model),
                })
            }
            Err(error) => {
                warn!(document = %target.id, %error, "generative answer failed, using text search");
                self.answer_from_search(query, target).await
            }
        }
    }

    async fn answer_from_search(
        &self,
        query: &str,
        target: &StoredDocument,
    ) -> Result<ChatAnswer, ServiceError> {
        let name = &target.metadata.original_name;
        let best = self.search(query, Some(&target.id)).await?.into_iter().next();

        let answer = match best {
            Some(result) => {
                let page = result
                    .page_ref
                    .map(|page| format!(" (page {page})"))
                    .unwrap_or_default();
                ChatAnswer {
                    message: format!(
                        "Found relevant content in \"{name}\"{page}:\n\n...{}...",
                        result.context_snippet
                    ),
                    source: AnswerSource::TextSearch,
                    has_answer: true,
                    ..ChatAnswer::unanswered(String::new())
                }
            }
            None => ChatAnswer::unanswered(format!(
                "I couldn't find information about \"{query}\" in \"{name}\"."
            )),
        };

        Ok(ChatAnswer {
            pdf_name: Some(name.clone()),
            pdf_id: Some(target.id.clone()),
            ..answer
        })
    }

    /// Case-insensitive substring search over document text and names,
    /// highest score first. Runs on the blocking pool.
    pub async fn search(
        &self,
        query: &str,
        pdf_id: Option<&str>,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let query = query.to_string();
        let pdf_id = pdf_id.map(str::to_string);
        let options = self.options.clone();
        self.store
            .blocking(move |store| search_documents(store, &options, &query, pdf_id.as_deref()))
            .await
    }
}

fn search_documents(
    store: &DocumentStore,
    options: &RetrievalOptions,
    query: &str,
    pdf_id: Option<&str>,
) -> Result<Vec<SearchResult>, StoreError> {
    let needle = fold(query.trim());
    if needle.is_empty() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    for document in store.list_documents()? {
        if pdf_id.is_some_and(|id| id != document.id) {
            continue;
        }

        let text = match store.read_text(&document.id, Some(options.search_prefix_chars)) {
            Ok(text) => text,
            Err(StoreError::NotFound(_)) => String::new(),
            Err(error) => return Err(error),
        };
        let chars: Vec<char> = text.chars().collect();
        let name = &document.metadata.original_name;

        if let Some(position) = find_folded(&fold_chars(&chars), &needle) {
            let radius = options.context_radius_chars;
            let start = position.saturating_sub(radius);
            let end = (position + needle.len() + radius).min(chars.len());
            let before: String = chars[start..position].iter().collect();
            let after: String = chars[position..end].iter().collect();
            let context = format!("{before}{after}");

            results.push(SearchResult {
                document_id: document.id.clone(),
                document_name: name.clone(),
                score: CONTENT_MATCH_SCORE,
                page_ref: page_ref_near(&context, before.len()),
                context_snippet: context.trim().to_string(),
                match_kind: MatchKind::TextSearch,
            });
        }

        if find_folded(&fold(name), &needle).is_some() {
            let opening: String = chars.iter().take(options.context_radius_chars * 2).collect();
            results.push(SearchResult {
                document_id: document.id.clone(),
                document_name: name.clone(),
                score: FILENAME_MATCH_SCORE,
                page_ref: None,
                context_snippet: opening.trim().to_string(),
                match_kind: MatchKind::Filename,
            });
        }
    }

    results.sort_by(|left, right| right.score.cmp(&left.score));
    Ok(results)
}

fn missing_document_answer(id: &str, documents: &[StoredDocument]) -> ChatAnswer {
    let available = documents
        .iter()
        .map(|document| DocumentRef {
            id: document.id.clone(),
            name: document.metadata.original_name.clone(),
        })
        .collect::<Vec<_>>();
    let listing = available
        .iter()
        .map(|document| format!("- {} ({})", document.name, document.id))
        .collect::<Vec<_>>()
        .join("\n");

    ChatAnswer {
        available_pdfs: available,
        ..ChatAnswer::unanswered(format!(
            "Document \"{id}\" was not found. Available documents:\n{listing}"
        ))
    }
}

fn build_prompt(name: &str, content: &str, query: &str) -> String {
    format!(
        "You are answering questions about the PDF document \"{name}\".\n\
         Answer strictly from the document content below. If the content does not \
         contain the answer, say so explicitly instead of guessing. Keep the [Page N] \
         markers when you cite where information comes from.\n\n\
         Document content:\n{content}\n\n\
         Question: {query}\n\n\
         Answer:"
    )
}

fn fold_char(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

fn fold(text: &str) -> Vec<char> {
    text.chars().map(fold_char).collect()
}

fn fold_chars(chars: &[char]) -> Vec<char> {
    chars.iter().copied().map(fold_char).collect()
}

fn find_folded(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
