//! Streaming event protocol for incremental answer delivery.
//!
//! Events are serialized as tagged JSON objects and delivered over
//! server-sent events. The answer body is split into fixed-size character
//! chunks so clients can render progressively; concatenating the `content`
//! events in order reconstructs the full answer exactly.

use serde::Serialize;

use crate::models::{ContextGraph, SourceCitation};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every stream.
    Start { session_id: String },
    /// Pipeline stage transitions, in order.
    Progress { stage: Stage },
    /// One chunk of the answer body.
    Content { text: String },
    /// Citations and graph context, sent after the last content chunk.
    Sources {
        sources: Vec<SourceCitation>,
        context_graph: ContextGraph,
        entity_count: usize,
    },
    /// Terminal success event.
    Done { latency_ms: i64 },
    /// Terminal failure event.
    Error { code: String, message: String },
}

/// Pipeline stages reported as progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Expanding,
    Retrieving,
    Ranking,
    Enriching,
    Generating,
}

/// Split text into chunks of at most `chunk_chars` characters, never
/// splitting inside a multi-byte character.
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    if text.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars)
        .map(|c| c.iter().collect())
        .collect()
}
