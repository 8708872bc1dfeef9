//! # Ragdock
//!
//! A retrieval-augmented question answering service over ingested documents.
//!
//! Ragdock answers questions against a SQLite corpus of extracted document
//! content, embeddings, and entity graphs. Each question is expanded into
//! query variants, fanned out concurrently to three retrieval backends
//! (vector, keyword, graph), deduplicated and ranked, enriched with entity
//! context, and answered with per-file source citations. Answers stream
//! incrementally over server-sent events or return whole over JSON.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────┐
//!  question ────▶ │  expand  │──▶ query variants
//!                 └────┬─────┘
//!                      ▼
//!        ┌──────────────────────────┐
//!        │    retrieval fan-out     │
//!        │  vector │ keyword │ graph│
//!        └────┬─────────┬───────┬───┘
//!             ▼         ▼       ▼
//!           ┌────────────────────┐      ┌──────────┐
//!           │   dedup + rank     │─────▶│ graphrag │
//!           └─────────┬──────────┘      └────┬─────┘
//!                     ▼                      │
//!              ┌────────────┐                │
//!              │   answer   │◀───────────────┘
//!              │ + sources  │
//!              └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`expand`] | Query expansion into search variants |
//! | [`retrieval`] | Concurrent three-backend fan-out |
//! | [`rank`] | Cross-backend deduplication and ranking |
//! | [`graphrag`] | Entity context enrichment |
//! | [`answer`] | Prompt assembly, generation, citations |
//! | [`stream`] | Streaming event protocol |
//! | [`orchestrator`] | The ask pipeline |
//! | [`session`] | Chat sessions and history |
//! | [`stores`] | Content, vector, and graph storage |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Chat completion provider abstraction |
//! | [`server`] | HTTP API server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod expand;
pub mod generation;
pub mod graphrag;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod rank;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod stores;
pub mod stream;
