//! Answer composition: prompt assembly, generation, extractive fallback,
//! and source citation extraction.

use crate::config::{PromptsConfig, RetrievalConfig};
use crate::generation::GenerationBackend;
use crate::models::{Message, SearchHit, SourceCitation};

/// Produce the answer text for a question given the ranked evidence and
/// recent conversation turns. Falls back to an extractive summary when the
/// generation backend is disabled or fails.
pub async fn compose(
    generation: &dyn GenerationBackend,
    prompts: &PromptsConfig,
    cfg: &RetrievalConfig,
    question: &str,
    evidence: &[SearchHit],
    history: &[Message],
) -> String {
    if generation.is_enabled() {
        let prompt = build_prompt(prompts, cfg, question, evidence, history);
        match generation.complete(&prompt, Some(&prompts.system)).await {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => {
                tracing::warn!("generation returned empty answer, using extractive fallback");
            }
            Err(e) => {
                tracing::warn!(error = %e, "generation failed, using extractive fallback");
            }
        }
    }

    fallback_answer(question, evidence, cfg.fallback_snippet_chars)
}

/// Fill the single-turn or multi-turn template depending on whether the
/// session has prior turns.
pub fn build_prompt(
    prompts: &PromptsConfig,
    cfg: &RetrievalConfig,
    question: &str,
    evidence: &[SearchHit],
    history: &[Message],
) -> String {
    let results = format_evidence(evidence, cfg.prompt_evidence_limit, cfg.prompt_snippet_chars);

    if history.is_empty() {
        prompts
            .single_turn
            .replace("{question}", question)
            .replace("{search_results}", &results)
    } else {
        prompts
            .multi_turn
            .replace("{conversation_history}", &format_history(history))
            .replace("{current_question}", question)
            .replace("{search_results}", &results)
    }
}

/// Numbered evidence block for prompts. Graph hits render their entity
/// snippet without a file label.
fn format_evidence(evidence: &[SearchHit], limit: usize, snippet_chars: usize) -> String {
    if evidence.is_empty() {
        return "(no relevant excerpts were found)".to_string();
    }

    evidence
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, hit)| {
            let snippet = truncate_chars(&hit.snippet(), snippet_chars);
            match hit.file_name() {
                Some(name) => format!("[{}] {} (page {}): {}", i + 1, name, hit.page_number(), snippet),
                None => format!("[{}] {}", i + 1, snippet),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Role-labeled transcript of the recent turns, oldest first.
fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extractive answer used when no generation backend is available. Always
/// non-empty, even with no evidence.
pub fn fallback_answer(question: &str, evidence: &[SearchHit], snippet_chars: usize) -> String {
    if evidence.is_empty() {
        return format!(
            "No relevant content was found for \"{}\". Try rephrasing the question \
             or checking that the relevant documents have been ingested.",
            question
        );
    }

    let mut out = String::from("The most relevant passages found for this question:\n\n");
    for (i, hit) in evidence.iter().take(3).enumerate() {
        let snippet = truncate_chars(&hit.snippet(), snippet_chars);
        match hit.file_name() {
            Some(name) => {
                out.push_str(&format!(
                    "{}. {} (page {}): {}\n",
                    i + 1,
                    name,
                    hit.page_number(),
                    snippet
                ));
            }
            None => {
                out.push_str(&format!("{}. {}\n", i + 1, snippet));
            }
        }
    }
    out.push_str("\nAnswer generation is not configured, so only the raw passages are shown.");
    out
}

/// Group the evidence into per-file citations with sorted, distinct page
/// numbers. File order follows first appearance in the evidence. Graph
/// hits carry no file name and are excluded.
pub fn extract_sources(evidence: &[SearchHit]) -> Vec<SourceCitation> {
    let mut order: Vec<String> = Vec::new();
    let mut by_file: std::collections::HashMap<String, (String, Vec<i64>)> =
        std::collections::HashMap::new();

    for hit in evidence {
        let Some(file_name) = hit.file_name() else {
            continue;
        };
        let file_id = hit.file_id().to_string();
        let entry = by_file.entry(file_id.clone()).or_insert_with(|| {
            order.push(file_id);
            (file_name.to_string(), Vec::new())
        });
        entry.1.push(hit.page_number());
    }

    order
        .into_iter()
        .map(|file_id| {
            let (file_name, mut pages) = by_file.remove(&file_id).unwrap_or_default();
            pages.sort_unstable();
            pages.dedup();
            SourceCitation {
                page_count: pages.len(),
                file_id,
                file_name,
                pages,
            }
        })
        .collect()
}

/// Truncate on a character boundary, appending an ellipsis when trimmed.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
