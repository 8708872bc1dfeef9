//! Query expansion.
//!
//! Produces an ordered, deduplicated list of 1–5 query variants with the
//! original always first. Prefers LLM-assisted paraphrasing when a
//! generation backend is available and falls back to lexical expansion
//! (tokens and adjacent-token bigrams) when it is not, errors, or returns
//! nothing. This step never fails the overall request: the worst case is
//! the single-element list holding the raw query.

use crate::config::PromptsConfig;
use crate::generation::GenerationBackend;

/// Expand `query` into at most `max_variants` search variants.
pub async fn expand_query(
    query: &str,
    generation: &dyn GenerationBackend,
    prompts: &PromptsConfig,
    max_variants: usize,
) -> Vec<String> {
    if generation.is_enabled() {
        let prompt = prompts.expansion.replace("{query}", query);
        match generation.complete(&prompt, None).await {
            Ok(response) => {
                let variants = parse_expansion_response(query, &response, max_variants);
                if variants.len() > 1 {
                    return variants;
                }
                tracing::debug!("LLM expansion returned nothing usable, falling back");
            }
            Err(e) => {
                tracing::warn!(error = %e, "LLM query expansion failed, falling back");
            }
        }
    }

    lexical_expansion(query, max_variants)
}

/// Parse an LLM expansion response line-by-line into variants.
///
/// The original query is always first; blank lines and duplicates are
/// dropped; the list is capped at `max_variants`.
fn parse_expansion_response(query: &str, response: &str, max_variants: usize) -> Vec<String> {
    let candidates = response.lines().map(|l| l.trim().to_string());
    dedup_and_cap(query, candidates, max_variants)
}

/// Lexical fallback: the original query, each token longer than one
/// character, and adjacent-token bigrams.
pub fn lexical_expansion(query: &str, max_variants: usize) -> Vec<String> {
    let tokens: Vec<&str> = query.split_whitespace().collect();

    let mut candidates: Vec<String> = Vec::new();
    for token in &tokens {
        if token.chars().count() > 1 {
            candidates.push(token.to_string());
        }
    }
    for pair in tokens.windows(2) {
        if pair[0].chars().count() > 1 && pair[1].chars().count() > 1 {
            candidates.push(format!("{} {}", pair[0], pair[1]));
        }
    }

    dedup_and_cap(query, candidates.into_iter(), max_variants)
}

fn dedup_and_cap(
    query: &str,
    candidates: impl Iterator<Item = String>,
    max_variants: usize,
) -> Vec<String> {
    let mut variants: Vec<String> = vec![query.to_string()];

    for candidate in candidates {
        if variants.len() >= max_variants {
            break;
        }
        if candidate.is_empty() || variants.iter().any(|v| v == &candidate) {
            continue;
        }
        variants.push(candidate);
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::DisabledGeneration;
    use anyhow::Result;
    use async_trait::async_trait;

    struct CannedGeneration(String);

    #[async_trait]
    impl GenerationBackend for CannedGeneration {
        async fn complete(&self, _prompt: &str, _system: Option<&str>) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingGeneration;

    #[async_trait]
    impl GenerationBackend for FailingGeneration {
        async fn complete(&self, _prompt: &str, _system: Option<&str>) -> Result<String> {
            anyhow::bail!("backend down")
        }
    }

    #[test]
    fn lexical_original_always_first() {
        let variants = lexical_expansion("kubernetes deployment strategy", 5);
        assert_eq!(variants[0], "kubernetes deployment strategy");
        assert!(variants.contains(&"kubernetes".to_string()));
        assert!(variants.contains(&"kubernetes deployment".to_string()));
    }

    #[test]
    fn lexical_caps_at_limit() {
        let variants = lexical_expansion("one two three four five six seven", 5);
        assert_eq!(variants.len(), 5);
    }

    #[test]
    fn lexical_single_token_yields_only_original() {
        let variants = lexical_expansion("rust", 5);
        assert_eq!(variants, vec!["rust".to_string()]);
    }

    #[test]
    fn lexical_skips_single_char_tokens() {
        let variants = lexical_expansion("a bigger query", 5);
        assert!(!variants.contains(&"a".to_string()));
        assert!(variants.contains(&"bigger query".to_string()));
    }

    #[test]
    fn lexical_deduplicates() {
        let variants = lexical_expansion("cache cache", 5);
        let unique: std::collections::HashSet<_> = variants.iter().collect();
        assert_eq!(unique.len(), variants.len());
    }

    #[tokio::test]
    async fn llm_expansion_parses_lines() {
        let backend = CannedGeneration("variant one\n\n  variant two  \nvariant one".to_string());
        let variants =
            expand_query("original", &backend, &PromptsConfig::default(), 5).await;
        assert_eq!(
            variants,
            vec![
                "original".to_string(),
                "variant one".to_string(),
                "variant two".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_lexical() {
        let variants = expand_query(
            "kubernetes deployment",
            &FailingGeneration,
            &PromptsConfig::default(),
            5,
        )
        .await;
        assert_eq!(variants[0], "kubernetes deployment");
        assert!(variants.len() > 1);
    }

    #[tokio::test]
    async fn disabled_backend_uses_lexical() {
        let variants = expand_query(
            "error budget policy",
            &DisabledGeneration,
            &PromptsConfig::default(),
            5,
        )
        .await;
        assert_eq!(variants[0], "error budget policy");
        assert!(variants.contains(&"error budget".to_string()));
    }

    #[tokio::test]
    async fn empty_llm_response_falls_back() {
        let backend = CannedGeneration(String::new());
        let variants = expand_query("test query", &backend, &PromptsConfig::default(), 5).await;
        assert_eq!(variants[0], "test query");
        assert!(variants.len() > 1);
    }
}
