//! Graph-based context enrichment.
//!
//! After ranking, the evidence set is enriched with the entities extracted
//! from the same file pages and their one-hop relations, producing a small
//! context graph that travels with the answer. Enrichment is best-effort:
//! any storage failure degrades to an empty graph and the request proceeds.

use std::collections::HashSet;

use anyhow::Result;

use crate::models::{ContextGraph, Entity, SearchHit};
use crate::stores::GraphStore;

/// Result of enrichment: the direct entities resolved from the evidence
/// pages plus the assembled graph (direct entities, one-hop neighbors, and
/// the relations between them).
#[derive(Debug, Default)]
pub struct GraphContext {
    pub entities: Vec<Entity>,
    pub graph: ContextGraph,
}

/// Enrich the ranked evidence with entity context. Never fails the
/// request: errors are logged and an empty context returned.
pub async fn enrich(graph: &dyn GraphStore, evidence: &[SearchHit]) -> GraphContext {
    match build_context(graph, evidence).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(error = %e, "graph enrichment failed, continuing without context graph");
            GraphContext::default()
        }
    }
}

async fn build_context(graph: &dyn GraphStore, evidence: &[SearchHit]) -> Result<GraphContext> {
    // Distinct (file, page) locations covered by the evidence. Graph hits
    // already carry their entity, so only content-backed hits contribute.
    let mut pages: Vec<(String, i64)> = Vec::new();
    let mut seen_pages: HashSet<(String, i64)> = HashSet::new();
    let mut direct: Vec<Entity> = Vec::new();
    let mut direct_ids: HashSet<String> = HashSet::new();

    for hit in evidence {
        match hit {
            SearchHit::Vector { content, .. } | SearchHit::Keyword { content, .. } => {
                let key = (content.file_id.clone(), content.page_number);
                if seen_pages.insert(key.clone()) {
                    pages.push(key);
                }
            }
            SearchHit::Graph { entity, .. } => {
                if direct_ids.insert(entity.id.clone()) {
                    direct.push(entity.clone());
                }
            }
        }
    }

    for entity in graph.entities_for_pages(&pages).await? {
        if direct_ids.insert(entity.id.clone()) {
            direct.push(entity);
        }
    }

    if direct.is_empty() {
        return Ok(GraphContext::default());
    }

    // One-hop expansion: relations touching the direct set, plus the
    // opposite endpoints not already resolved.
    let ids: Vec<String> = direct.iter().map(|e| e.id.clone()).collect();
    let relations = graph.find_relations(&ids).await?;

    let mut neighbor_ids: Vec<String> = Vec::new();
    let mut seen_neighbors: HashSet<&str> = HashSet::new();
    for rel in &relations {
        for endpoint in [&rel.source_entity_id, &rel.target_entity_id] {
            if !direct_ids.contains(endpoint.as_str()) && seen_neighbors.insert(endpoint) {
                neighbor_ids.push(endpoint.clone());
            }
        }
    }

    let neighbors = graph.entities_by_ids(&neighbor_ids).await?;

    let mut nodes = direct.clone();
    nodes.extend(neighbors);

    let context_graph = ContextGraph {
        node_count: nodes.len(),
        edge_count: relations.len(),
        nodes,
        edges: relations,
    };

    Ok(GraphContext {
        entities: direct,
        graph: context_graph,
    })
}
