//! End-to-end pipeline tests against a real SQLite database.
//!
//! Seeds a temporary database with files, content, vectors, and entities,
//! then drives the ask pipeline through the `AskService` with controllable
//! embedding and generation backends.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use ragdock::config::{Config, PromptsConfig, RetrievalConfig};
use ragdock::embedding::{vec_to_blob, DisabledEmbedding, EmbeddingBackend};
use ragdock::error::ServiceError;
use ragdock::generation::{DisabledGeneration, GenerationBackend};
use ragdock::models::{Entity, EntityRelation, HitKey, HitSource};
use ragdock::orchestrator::{AskRequest, AskService};
use ragdock::session::{SessionStore, SqliteSessionStore};
use ragdock::stores::{GraphStore, SqliteContentStore, SqliteGraphStore, SqliteVectorIndex};
use ragdock::stream::StreamEvent;
use ragdock::{db, migrate};

// ============ Test backends ============

/// Embeds every text as the same fixed vector, so seeded rows with that
/// vector score 1.0 and orthogonal rows score 0.0.
struct FixedEmbedding;

#[async_trait]
impl EmbeddingBackend for FixedEmbedding {
    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

/// Always fails, simulating an unreachable embedding provider.
struct BrokenEmbedding;

#[async_trait]
impl EmbeddingBackend for BrokenEmbedding {
    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("connection refused")
    }
}

/// Always fails, simulating an offline graph database.
struct BrokenGraphStore;

#[async_trait]
impl GraphStore for BrokenGraphStore {
    async fn find_entities(
        &self,
        _user_id: &str,
        _substring: &str,
        _limit: i64,
    ) -> Result<Vec<Entity>> {
        bail!("graph database offline")
    }

    async fn entities_for_pages(&self, _pages: &[(String, i64)]) -> Result<Vec<Entity>> {
        bail!("graph database offline")
    }

    async fn find_relations(&self, _entity_ids: &[String]) -> Result<Vec<EntityRelation>> {
        bail!("graph database offline")
    }

    async fn entities_by_ids(&self, _ids: &[String]) -> Result<Vec<Entity>> {
        bail!("graph database offline")
    }
}

/// Returns a canned response and records every prompt it receives.
struct RecordingGeneration {
    response: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingGeneration {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl GenerationBackend for RecordingGeneration {
    async fn complete(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.response.clone())
    }
}

// ============ Harness ============

struct Harness {
    _tmp: TempDir,
    pool: SqlitePool,
    service: Arc<AskService>,
}

async fn setup(
    retrieval: RetrievalConfig,
    embedding: Arc<dyn EmbeddingBackend>,
    generation: Arc<dyn GenerationBackend>,
) -> Harness {
    setup_with_graph(retrieval, embedding, generation, None).await
}

async fn setup_with_graph(
    retrieval: RetrievalConfig,
    embedding: Arc<dyn EmbeddingBackend>,
    generation: Arc<dyn GenerationBackend>,
    graph: Option<Arc<dyn GraphStore>>,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("test.sqlite"));

    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();

    let graph = graph.unwrap_or_else(|| Arc::new(SqliteGraphStore::new(pool.clone())));
    let service = Arc::new(AskService::new(
        retrieval,
        PromptsConfig::default(),
        Arc::new(SqliteSessionStore::new(pool.clone())),
        Arc::new(SqliteContentStore::new(pool.clone())),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        graph,
        embedding,
        generation,
    ));

    Harness {
        _tmp: tmp,
        pool,
        service,
    }
}

async fn seed_file(pool: &SqlitePool, id: &str, user_id: &str, name: &str) {
    sqlx::query("INSERT INTO files (id, user_id, name) VALUES (?, ?, ?)")
        .bind(id)
        .bind(user_id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
}

async fn seed_content(pool: &SqlitePool, id: &str, file_id: &str, page: i64, text: &str) {
    sqlx::query(
        "INSERT INTO document_contents (id, file_id, content_type, page_number, content_text) \
         VALUES (?, ?, 'text', ?, ?)",
    )
    .bind(id)
    .bind(file_id)
    .bind(page)
    .bind(text)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_vector(pool: &SqlitePool, content_id: &str, file_id: &str, vector: &[f32]) {
    sqlx::query(
        "INSERT INTO content_vectors (content_id, file_id, embedding) VALUES (?, ?, ?)",
    )
    .bind(content_id)
    .bind(file_id)
    .bind(vec_to_blob(vector))
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_entity(pool: &SqlitePool, id: &str, file_id: &str, page: i64, name: &str, value: &str) {
    sqlx::query(
        "INSERT INTO entities (id, file_id, page_number, name, entity_type, value) \
         VALUES (?, ?, ?, 'term', ?, ?)",
    )
    .bind(id)
    .bind(file_id)
    .bind(page)
    .bind(name)
    .bind(value)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_relation(pool: &SqlitePool, id: &str, source: &str, target: &str) {
    sqlx::query(
        "INSERT INTO entity_relations (id, source_entity_id, target_entity_id, relation_type) \
         VALUES (?, ?, ?, 'related_to')",
    )
    .bind(id)
    .bind(source)
    .bind(target)
    .execute(pool)
    .await
    .unwrap();
}

fn ask_request(session_id: &str, user_id: &str, query: &str) -> AskRequest {
    AskRequest {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        query: query.to_string(),
        file_ids: None,
    }
}

// ============ Validation and authorization ============

#[tokio::test]
async fn empty_query_is_rejected() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let err = h
        .service
        .ask(&ask_request(&session.id, "alice", "   "))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn foreign_session_is_rejected_without_side_effects() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let err = h
        .service
        .ask(&ask_request(&session.id, "mallory", "secret documents"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Unauthorized));

    // Nothing was appended to the session and nothing was logged.
    let (messages, total) = h.service.sessions().history(&session.id, 1, 50).await.unwrap();
    assert!(messages.is_empty());
    assert_eq!(total, 0);

    let logged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_history")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(logged, 0);
}

#[tokio::test]
async fn deleted_session_is_rejected() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    assert!(h
        .service
        .sessions()
        .delete_session(&session.id, "alice")
        .await
        .unwrap());

    let err = h
        .service
        .ask(&ask_request(&session.id, "alice", "anything"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized));
}

// ============ Retrieval and answering ============

#[tokio::test]
async fn keyword_retrieval_with_fallback_answer() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    seed_file(&h.pool, "f1", "alice", "handbook.pdf").await;
    seed_content(
        &h.pool,
        "c1",
        "f1",
        1,
        "The deployment process requires approval from two reviewers.",
    )
    .await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "deployment"))
        .await
        .unwrap();

    // The extractive fallback quotes the matching passage.
    assert!(response.answer.content.contains("deployment process"));
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].source(), HitSource::Keyword);
    assert_eq!(response.query_variants[0], "deployment");

    // Both turns were persisted, newest holding sources and latency.
    let (messages, total) = h.service.sessions().history(&session.id, 1, 50).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(messages[0].content, "deployment");
    assert!(messages[1].latency_ms.is_some());
    assert!(messages[1].sources.is_some());
}

#[tokio::test]
async fn no_evidence_still_yields_answer() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "nonexistent topic"))
        .await
        .unwrap();

    assert!(!response.answer.content.trim().is_empty());
    assert!(response.results.is_empty());
    assert!(response.answer.sources.is_empty());
}

#[tokio::test]
async fn broken_embedding_degrades_to_keyword_results() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(BrokenEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    seed_file(&h.pool, "f1", "alice", "notes.md").await;
    seed_content(&h.pool, "c1", "f1", 1, "Retries use exponential backoff.").await;
    seed_vector(&h.pool, "c1", "f1", &[1.0, 0.0, 0.0]).await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "backoff"))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|hit| hit.source() == HitSource::Keyword));
}

#[tokio::test]
async fn broken_graph_backend_degrades_to_keyword_results() {
    let h = setup_with_graph(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
        Some(Arc::new(BrokenGraphStore)),
    )
    .await;

    seed_file(&h.pool, "f1", "alice", "runbook.md").await;
    seed_content(&h.pool, "c1", "f1", 1, "Failover steps for the primary region.").await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "failover"))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|hit| hit.source() == HitSource::Keyword));
    // Enrichment degrades to an empty graph instead of failing the request.
    assert_eq!(response.answer.context_graph.node_count, 0);
    assert_eq!(response.answer.entity_count, 0);
}

#[tokio::test]
async fn vector_and_keyword_hits_for_same_content_are_merged() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(FixedEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    seed_file(&h.pool, "f1", "alice", "guide.pdf").await;
    seed_content(
        &h.pool,
        "c1",
        "f1",
        2,
        "Indexing rebuilds run nightly and can be triggered manually from the console.",
    )
    .await;
    // Identical to the query embedding, so the vector hit scores 1.0.
    seed_vector(&h.pool, "c1", "f1", &[1.0, 0.0, 0.0]).await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "indexing"))
        .await
        .unwrap();

    let c1_hits: Vec<_> = response
        .results
        .iter()
        .filter(|hit| hit.key() == HitKey::Content("c1".to_string()))
        .collect();
    assert_eq!(c1_hits.len(), 1, "duplicate content must collapse to one hit");
    // The perfect vector score beats the keyword score.
    assert_eq!(c1_hits[0].source(), HitSource::Vector);
    assert!((c1_hits[0].score() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn merged_results_are_capped() {
    let retrieval = RetrievalConfig {
        merged_limit: 5,
        per_backend_limit: 50,
        ..RetrievalConfig::default()
    };
    let h = setup(retrieval, Arc::new(DisabledEmbedding), Arc::new(DisabledGeneration)).await;

    seed_file(&h.pool, "f1", "alice", "big.pdf").await;
    for i in 0..30 {
        seed_content(
            &h.pool,
            &format!("c{}", i),
            "f1",
            i,
            &format!("Chapter {} covers migration steps in detail.", i),
        )
        .await;
    }

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "migration"))
        .await
        .unwrap();

    assert_eq!(response.results.len(), 5);
}

#[tokio::test]
async fn sources_grouped_per_file_with_sorted_pages() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    seed_file(&h.pool, "fa", "alice", "report.pdf").await;
    seed_file(&h.pool, "fb", "alice", "summary.md").await;
    seed_content(&h.pool, "ca3", "fa", 3, "Quota limits appear in the appendix.").await;
    seed_content(&h.pool, "ca1", "fa", 1, "Quota policy overview and definitions.").await;
    seed_content(&h.pool, "cb2", "fb", 2, "Quota enforcement happens at the gateway.").await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "quota"))
        .await
        .unwrap();

    assert_eq!(response.answer.sources.len(), 2);
    let report = response
        .answer
        .sources
        .iter()
        .find(|s| s.file_id == "fa")
        .unwrap();
    assert_eq!(report.pages, vec![1, 3]);
    assert_eq!(report.page_count, 2);
    let summary = response
        .answer
        .sources
        .iter()
        .find(|s| s.file_id == "fb")
        .unwrap();
    assert_eq!(summary.pages, vec![2]);
}

#[tokio::test]
async fn other_users_content_is_invisible() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    seed_file(&h.pool, "f1", "bob", "private.pdf").await;
    seed_content(&h.pool, "c1", "f1", 1, "Confidential payroll information.").await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "payroll"))
        .await
        .unwrap();

    assert!(response.results.is_empty());
}

// ============ Graph enrichment ============

#[tokio::test]
async fn graph_entities_enrich_the_answer() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    seed_file(&h.pool, "f1", "alice", "contract.pdf").await;
    seed_content(&h.pool, "c1", "f1", 4, "The renewal clause covers both parties.").await;
    seed_entity(&h.pool, "e1", "f1", 4, "renewal clause", "automatic yearly renewal").await;
    seed_entity(&h.pool, "e2", "f1", 9, "termination clause", "30 day notice").await;
    seed_relation(&h.pool, "r1", "e1", "e2").await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let response = h
        .service
        .ask(&ask_request(&session.id, "alice", "renewal"))
        .await
        .unwrap();

    // e1 arrives twice: as a graph hit and via page (f1, 4). e2 arrives as
    // the one-hop neighbor through r1.
    assert!(response.answer.entity_count >= 1);
    let graph = &response.answer.context_graph;
    assert_eq!(graph.node_count, 2);
    assert_eq!(graph.edge_count, 1);
    assert!(graph.nodes.iter().any(|n| n.id == "e1"));
    assert!(graph.nodes.iter().any(|n| n.id == "e2"));

    // The graph hit itself survives dedup alongside the content hit.
    assert!(response
        .results
        .iter()
        .any(|hit| hit.key() == HitKey::Entity("e1".to_string())));
}

// ============ Generation and history ============

#[tokio::test]
async fn generated_answer_uses_multi_turn_prompt_on_followup() {
    let generation = Arc::new(RecordingGeneration::new("The limit is 100 requests."));
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        generation.clone(),
    )
    .await;

    seed_file(&h.pool, "f1", "alice", "api.md").await;
    seed_content(&h.pool, "c1", "f1", 1, "Rate limit is 100 requests per minute.").await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();

    let first = h
        .service
        .ask(&ask_request(&session.id, "alice", "what is the rate limit?"))
        .await
        .unwrap();
    assert_eq!(first.answer.content, "The limit is 100 requests.");

    h.service
        .ask(&ask_request(&session.id, "alice", "and per hour?"))
        .await
        .unwrap();

    // The follow-up prompt carries the prior turns but not itself as history.
    let prompt = generation.last_prompt();
    assert!(prompt.contains("user: what is the rate limit?"));
    assert!(prompt.contains("assistant: The limit is 100 requests."));
    assert!(prompt.contains("Current question: and per hour?"));
}

// ============ Streaming ============

#[tokio::test]
async fn stream_reconstructs_the_answer() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    seed_file(&h.pool, "f1", "alice", "faq.md").await;
    seed_content(&h.pool, "c1", "f1", 1, "Billing cycles start on the first of the month.").await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let mut rx = h
        .service
        .ask_stream(ask_request(&session.id, "alice", "billing"));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));

    let mut content = String::new();
    let mut saw_sources = false;
    for event in &events {
        match event {
            StreamEvent::Content { text } => content.push_str(text),
            StreamEvent::Sources { sources, .. } => {
                saw_sources = true;
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].file_id, "f1");
            }
            _ => {}
        }
    }
    assert!(saw_sources);
    assert!(content.contains("Billing cycles"));

    // Streaming persists the same way the plain endpoint does.
    let (messages, total) = h.service.sessions().history(&session.id, 1, 50).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(messages[1].content, content);
}

#[tokio::test]
async fn stream_omits_sources_event_without_citations() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    // Empty corpus: no evidence, so no citations to attribute.
    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let mut rx = h
        .service
        .ask_stream(ask_request(&session.id, "alice", "anything at all"));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, StreamEvent::Sources { .. })),
        "sources event must be suppressed when the citation list is empty"
    );
    // The fallback answer still streams.
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Content { .. })));
}

#[tokio::test]
async fn stream_reports_unauthorized_as_error_event() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;

    let session = h.service.sessions().create_session("alice", None).await.unwrap();
    let mut rx = h
        .service
        .ask_stream(ask_request(&session.id, "mallory", "anything"));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
    match events.last() {
        Some(StreamEvent::Error { code, .. }) => assert_eq!(code, "unauthorized"),
        other => panic!("expected terminal error event, got {:?}", other),
    }
}

// ============ Session management ============

#[tokio::test]
async fn session_lifecycle() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;
    let sessions = h.service.sessions();

    let unnamed = sessions.create_session("alice", None).await.unwrap();
    assert!(unnamed.name.starts_with("Chat "));

    let named = sessions.create_session("alice", Some("Contract review")).await.unwrap();
    assert_eq!(named.name, "Contract review");

    let listed = sessions.list_sessions("alice").await.unwrap();
    assert_eq!(listed.len(), 2);

    assert!(sessions
        .rename_session(&named.id, "alice", "Q3 contracts")
        .await
        .unwrap());
    // Renames are owner-only.
    assert!(!sessions
        .rename_session(&named.id, "mallory", "hijacked")
        .await
        .unwrap());

    assert!(sessions.delete_session(&unnamed.id, "alice").await.unwrap());
    let listed = sessions.list_sessions("alice").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Q3 contracts");

    // Deleting twice reports not found.
    assert!(!sessions.delete_session(&unnamed.id, "alice").await.unwrap());
}

#[tokio::test]
async fn history_pagination_is_chronological() {
    let h = setup(
        RetrievalConfig::default(),
        Arc::new(DisabledEmbedding),
        Arc::new(DisabledGeneration),
    )
    .await;
    let sessions = h.service.sessions();
    let session = sessions.create_session("alice", None).await.unwrap();

    for i in 0..5 {
        sessions
            .append_message(
                &session.id,
                ragdock::models::MessageRole::User,
                ragdock::session::NewMessage {
                    content: format!("turn {}", i),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let (page1, total) = sessions.history(&session.id, 1, 2).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(page1[0].content, "turn 0");
    assert_eq!(page1[1].content, "turn 1");

    let (page3, _) = sessions.history(&session.id, 3, 2).await.unwrap();
    assert_eq!(page3.len(), 1);
    assert_eq!(page3[0].content, "turn 4");
}
