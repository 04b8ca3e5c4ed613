//! Context assembly: ranked results → bounded prompt text.
//!
//! Both formatters are pure functions of their input. They never re-sort;
//! ordering is the retriever's job. An empty result list always yields an
//! empty string, which callers read as "no context available".

use crate::models::SearchResult;

/// Body budget, in characters, for context injected into chat prompts.
pub const SEARCH_CONTEXT_CHARS: usize = 200;
/// Body budget, in characters, for the generic LLM context formatter.
pub const LLM_CONTEXT_CHARS: usize = 300;

const ELLIPSIS: &str = "...";
const LLM_CONTEXT_HEADER: &str = "Relevant documentation:\n\n";

/// Format results for the synthetic system turn of a chat request.
///
/// ```rust
/// use docs_assistant_core::context::assemble_search_context;
///
/// assert_eq!(assemble_search_context(&[]), "");
/// ```
pub fn assemble_search_context(results: &[SearchResult]) -> String {
    assemble(results, SEARCH_CONTEXT_CHARS)
}

/// Format results as a standalone documentation digest for an LLM prompt.
pub fn format_context_for_llm(results: &[SearchResult]) -> String {
    let body = assemble(results, LLM_CONTEXT_CHARS);
    if body.is_empty() {
        return body;
    }
    format!("{}{}", LLM_CONTEXT_HEADER, body)
}

/// Render one labeled block per result, 1-based, joined by a blank line.
pub fn assemble(results: &[SearchResult], budget: usize) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "Document {}: {}\n{}",
                i + 1,
                r.document.title,
                truncate_chars(&r.document.body, budget)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut `text` to at most `max_chars` characters, appending `...` if cut.
///
/// Counts Unicode scalar values, so a multi-byte character is never split.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], ELLIPSIS),
        None => text.to_string(),
    }
}
