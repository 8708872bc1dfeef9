//! Retrieval fan-out coordinator.
//!
//! Dispatches the query variants to the three retrieval backends (vector,
//! keyword, graph) concurrently, joins on all of them, and concatenates
//! their hits in backend order. Each backend call is independently
//! timeboxed; a timeout or error degrades that backend to an empty list
//! and is recorded in the report, never aborting the other two. This is a
//! fan-out/fan-in join, not a race: all completed results are used.

use anyhow::Result;
use std::time::Duration;

use crate::embedding::EmbeddingBackend;
use crate::models::SearchHit;
use crate::stores::{ContentStore, GraphStore, VectorIndex};

/// Fixed relevance score for graph-backend hits.
const GRAPH_HIT_SCORE: f64 = 0.8;

/// Outcome of one backend call, kept so callers can distinguish "found
/// nothing" from "backend broken" without the distinction ever failing
/// the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Backend responded; holds the hit count (possibly zero).
    Ok(usize),
    /// Backend errored or timed out and was degraded to an empty list.
    Degraded(String),
}

/// Combined fan-out result: all hits in backend order, plus the per-backend
/// statuses for logging and auditing.
#[derive(Debug)]
pub struct RetrievalReport {
    pub hits: Vec<SearchHit>,
    pub vector: BackendStatus,
    pub keyword: BackendStatus,
    pub graph: BackendStatus,
}

/// Parameters shared by all three backends for one request.
pub struct RetrievalRequest<'a> {
    pub raw_query: &'a str,
    pub variants: &'a [String],
    pub user_id: &'a str,
    pub file_ids: Option<&'a [String]>,
    /// Per-backend hit cap (per variant for the keyword backend).
    pub per_backend_limit: i64,
    pub backend_timeout: Duration,
}

/// Run the three backends concurrently and collect everything that
/// arrived within the timebox.
pub async fn fan_out(
    content: &dyn ContentStore,
    vectors: &dyn VectorIndex,
    graph: &dyn GraphStore,
    embedding: &dyn EmbeddingBackend,
    req: &RetrievalRequest<'_>,
) -> RetrievalReport {
    let (vector_res, keyword_res, graph_res) = tokio::join!(
        run_backend(
            "vector",
            req.backend_timeout,
            vector_search(content, vectors, embedding, req),
        ),
        run_backend(
            "keyword",
            req.backend_timeout,
            keyword_search(content, req),
        ),
        run_backend("graph", req.backend_timeout, graph_search(graph, req)),
    );

    let (vector_hits, vector_status) = vector_res;
    let (keyword_hits, keyword_status) = keyword_res;
    let (graph_hits, graph_status) = graph_res;

    let mut hits = Vec::with_capacity(vector_hits.len() + keyword_hits.len() + graph_hits.len());
    hits.extend(vector_hits);
    hits.extend(keyword_hits);
    hits.extend(graph_hits);

    RetrievalReport {
        hits,
        vector: vector_status,
        keyword: keyword_status,
        graph: graph_status,
    }
}

/// Timebox one backend future and fold errors/timeouts into degradation.
async fn run_backend(
    name: &str,
    timebox: Duration,
    fut: impl std::future::Future<Output = Result<Vec<SearchHit>>>,
) -> (Vec<SearchHit>, BackendStatus) {
    match tokio::time::timeout(timebox, fut).await {
        Ok(Ok(hits)) => {
            let status = BackendStatus::Ok(hits.len());
            (hits, status)
        }
        Ok(Err(e)) => {
            tracing::warn!(backend = name, error = %e, "retrieval backend failed, degrading to empty");
            (Vec::new(), BackendStatus::Degraded(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(backend = name, "retrieval backend timed out, degrading to empty");
            (Vec::new(), BackendStatus::Degraded("timed out".to_string()))
        }
    }
}

// ============ Vector backend ============

/// Embed the raw query and look up nearest neighbors, joining neighbor ids
/// back against the content store. A disabled embedding capability yields
/// an empty result set, not an error.
async fn vector_search(
    content: &dyn ContentStore,
    vectors: &dyn VectorIndex,
    embedding: &dyn EmbeddingBackend,
    req: &RetrievalRequest<'_>,
) -> Result<Vec<SearchHit>> {
    if !embedding.is_enabled() {
        return Ok(Vec::new());
    }

    let query_vec = embedding.embed(req.raw_query).await?;
    let neighbors = vectors
        .search(&query_vec, req.per_backend_limit, req.file_ids)
        .await?;

    if neighbors.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = neighbors.iter().map(|(id, _)| id.clone()).collect();
    let records = content.find_by_ids(&ids).await?;

    // Preserve neighbor score order; drop ids without a content record.
    let by_id: std::collections::HashMap<&str, &crate::models::ContentRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();

    Ok(neighbors
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|record| SearchHit::Vector {
                content: (*record).clone(),
                score: *score,
            })
        })
        .collect())
}

// ============ Keyword backend ============

/// Substring match for each query variant, scored by exact-match and
/// token-overlap counts normalized by content length.
async fn keyword_search(
    content: &dyn ContentStore,
    req: &RetrievalRequest<'_>,
) -> Result<Vec<SearchHit>> {
    let mut hits = Vec::new();

    for variant in req.variants {
        let records = content
            .search_by_user_and_text(req.user_id, variant, req.file_ids, req.per_backend_limit)
            .await?;

        for record in records {
            let score = keyword_score(variant, &record.text);
            hits.push(SearchHit::Keyword {
                content: record,
                matched_query: variant.clone(),
                score,
            });
        }
    }

    Ok(hits)
}

/// Relevance score for a keyword match: exact occurrences weighted 2.0
/// plus token-overlap count weighted 0.5, normalized by content length
/// and clamped to [0, 1].
pub fn keyword_score(query: &str, content: &str) -> f64 {
    if content.is_empty() || query.is_empty() {
        return 0.0;
    }

    let content_lower = content.to_lowercase();
    let query_lower = query.to_lowercase();

    let exact_matches = content_lower.matches(&query_lower).count() as f64;
    let partial_matches = query_lower
        .split_whitespace()
        .filter(|word| content_lower.contains(word))
        .count() as f64;

    let score = exact_matches * 2.0 + partial_matches * 0.5;

    let max_score = content_lower.chars().count() as f64 / 10.0;
    if max_score > 0.0 {
        (score / max_score).min(1.0)
    } else {
        0.0
    }
}

// ============ Graph backend ============

/// Entities whose name or value contains the raw query, each carrying the
/// fixed graph relevance score.
async fn graph_search(
    graph: &dyn GraphStore,
    req: &RetrievalRequest<'_>,
) -> Result<Vec<SearchHit>> {
    let entities = graph
        .find_entities(req.user_id, req.raw_query, req.per_backend_limit)
        .await?;

    Ok(entities
        .into_iter()
        .map(|entity| SearchHit::Graph {
            entity,
            score: GRAPH_HIT_SCORE,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_score_zero_for_empty_content() {
        assert_eq!(keyword_score("query", ""), 0.0);
    }

    #[test]
    fn keyword_score_zero_for_empty_query() {
        assert_eq!(keyword_score("", "some content"), 0.0);
    }

    #[test]
    fn keyword_score_in_unit_interval() {
        let score = keyword_score("rust", "rust rust rust");
        assert!((0.0..=1.0).contains(&score), "score {}", score);
    }

    #[test]
    fn keyword_score_clamps_dense_matches() {
        // Short content full of matches saturates at 1.0
        assert_eq!(keyword_score("ab", "ab ab"), 1.0);
    }

    #[test]
    fn exact_match_outscores_partial_overlap() {
        let content = "the quick brown fox jumps over the lazy dog and then rests a while";
        let exact = keyword_score("quick brown", content);
        let partial = keyword_score("quick rests", content);
        assert!(exact > partial, "exact {} partial {}", exact, partial);
    }

    #[test]
    fn keyword_score_case_insensitive() {
        let a = keyword_score("Rust", "learning rust programming takes some patience");
        let b = keyword_score("rust", "learning rust programming takes some patience");
        assert!((a - b).abs() < 1e-9);
    }
}
