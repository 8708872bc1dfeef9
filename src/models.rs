//! Core data models used throughout ragdock.
//!
//! These types represent the sessions, messages, retrieved evidence, and
//! graph context that flow through the retrieval and answer pipeline.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a chat session. Sessions are soft-deleted: a delete
/// flips the status, rows are never physically erased by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Deleted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "deleted" => Some(SessionStatus::Deleted),
            _ => None,
        }
    }
}

/// One conversation, owned by a user.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub status: SessionStatus,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

/// Speaker of a message turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// One turn in a session. Append-only: created once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    /// File scope the turn was asked against, if any.
    pub related_file_ids: Option<Vec<String>>,
    /// Raw evidence snapshot kept for auditing, if any.
    pub search_results: Option<serde_json::Value>,
    /// Citations extracted for an assistant turn, if any.
    pub sources: Option<Vec<SourceCitation>>,
    pub latency_ms: Option<i64>,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// A row from the content store: one extracted block of a file's page.
#[derive(Debug, Clone, Serialize)]
pub struct ContentRecord {
    pub id: String,
    pub file_id: String,
    pub file_name: String,
    /// `text`, `image`, or `table`.
    pub content_type: String,
    pub page_number: i64,
    pub text: String,
}

/// A named/typed object extracted from document content, scoped to a file
/// and page.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: String,
    pub file_id: String,
    pub page_number: i64,
    pub name: String,
    pub entity_type: String,
    pub value: String,
}

/// A directed edge between two entities.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRelation {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation_type: String,
}

/// Which retrieval backend produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Vector,
    Keyword,
    Graph,
}

impl HitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitSource::Vector => "vector",
            HitSource::Keyword => "keyword",
            HitSource::Graph => "graph",
        }
    }
}

/// Stable identity used to deduplicate hits across backends.
///
/// Vector and keyword hits share an identity when they point at the same
/// content record. Graph hits have no content record and are keyed by the
/// entity's own id, so they survive deduplication in their own right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HitKey {
    Content(String),
    Entity(String),
}

/// A single piece of retrieved evidence, tagged by the backend that
/// produced it. Each variant carries only the fields valid for it;
/// the accessors below project the common ranking-relevant view.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "search_type", rename_all = "lowercase")]
pub enum SearchHit {
    Vector {
        content: ContentRecord,
        score: f64,
    },
    Keyword {
        content: ContentRecord,
        matched_query: String,
        score: f64,
    },
    Graph {
        entity: Entity,
        score: f64,
    },
}

impl SearchHit {
    pub fn key(&self) -> HitKey {
        match self {
            SearchHit::Vector { content, .. } | SearchHit::Keyword { content, .. } => {
                HitKey::Content(content.id.clone())
            }
            SearchHit::Graph { entity, .. } => HitKey::Entity(entity.id.clone()),
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            SearchHit::Vector { score, .. }
            | SearchHit::Keyword { score, .. }
            | SearchHit::Graph { score, .. } => *score,
        }
    }

    pub fn source(&self) -> HitSource {
        match self {
            SearchHit::Vector { .. } => HitSource::Vector,
            SearchHit::Keyword { .. } => HitSource::Keyword,
            SearchHit::Graph { .. } => HitSource::Graph,
        }
    }

    pub fn file_id(&self) -> &str {
        match self {
            SearchHit::Vector { content, .. } | SearchHit::Keyword { content, .. } => {
                &content.file_id
            }
            SearchHit::Graph { entity, .. } => &entity.file_id,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            SearchHit::Vector { content, .. } | SearchHit::Keyword { content, .. } => {
                Some(&content.file_name)
            }
            SearchHit::Graph { .. } => None,
        }
    }

    pub fn page_number(&self) -> i64 {
        match self {
            SearchHit::Vector { content, .. } | SearchHit::Keyword { content, .. } => {
                content.page_number
            }
            SearchHit::Graph { entity, .. } => entity.page_number,
        }
    }

    /// Text shown in prompts and fallback answers.
    pub fn snippet(&self) -> String {
        match self {
            SearchHit::Vector { content, .. } | SearchHit::Keyword { content, .. } => {
                content.text.clone()
            }
            SearchHit::Graph { entity, .. } => {
                if entity.value.is_empty() {
                    entity.name.clone()
                } else {
                    format!("{}: {}", entity.name, entity.value)
                }
            }
        }
    }
}

/// Bounded subgraph of entities and relations assembled for one answer.
/// Built fresh per request, never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextGraph {
    pub nodes: Vec<Entity>,
    pub edges: Vec<EntityRelation>,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Per-file summary of which pages contributed to an answer. Round-trips
/// through the message store, hence the `Deserialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCitation {
    pub file_id: String,
    pub file_name: String,
    /// Sorted, distinct page numbers.
    pub pages: Vec<i64>,
    pub page_count: usize,
}

/// A generated, grounded answer with its citations and graph summary.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<SourceCitation>,
    pub context_graph: ContextGraph,
    pub entity_count: usize,
}
