//! The ask pipeline: session validation, query expansion, retrieval
//! fan-out, ranking, graph enrichment, answer composition, and persistence.
//!
//! All collaborators sit behind trait objects so tests can substitute
//! in-memory or canned implementations. The pipeline fails a request only
//! for invalid input, an inaccessible session, or a broken system — every
//! retrieval or generation fault degrades to a smaller or extractive
//! answer instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::answer;
use crate::config::{PromptsConfig, RetrievalConfig};
use crate::embedding::EmbeddingBackend;
use crate::error::{ServiceError, ServiceResult};
use crate::expand;
use crate::generation::GenerationBackend;
use crate::graphrag;
use crate::models::{Answer, Message, MessageRole, SearchHit, Session};
use crate::rank;
use crate::retrieval::{self, RetrievalRequest};
use crate::session::{NewMessage, SessionStore};
use crate::stores::{ContentStore, GraphStore, VectorIndex};
use crate::stream::{chunk_text, Stage, StreamEvent};

/// One question against a session.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub session_id: String,
    pub user_id: String,
    pub query: String,
    /// Optional file scope; `None` searches everything the user owns.
    pub file_ids: Option<Vec<String>>,
}

/// Full pipeline result for the non-streaming endpoint.
#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: Answer,
    /// Ranked evidence the answer was built from.
    pub results: Vec<SearchHit>,
    /// Query variants used for retrieval, original first.
    pub query_variants: Vec<String>,
    pub latency_ms: i64,
}

pub struct AskService {
    retrieval: RetrievalConfig,
    prompts: PromptsConfig,
    sessions: Arc<dyn SessionStore>,
    content: Arc<dyn ContentStore>,
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    embedding: Arc<dyn EmbeddingBackend>,
    generation: Arc<dyn GenerationBackend>,
}

impl AskService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retrieval: RetrievalConfig,
        prompts: PromptsConfig,
        sessions: Arc<dyn SessionStore>,
        content: Arc<dyn ContentStore>,
        vectors: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        embedding: Arc<dyn EmbeddingBackend>,
        generation: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            retrieval,
            prompts,
            sessions,
            content,
            vectors,
            graph,
            embedding,
            generation,
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Answer one question. Validates the request and session, then runs
    /// the full pipeline and persists both turns.
    pub async fn ask(&self, req: &AskRequest) -> ServiceResult<AskResponse> {
        self.validate(req).await?;
        self.run_pipeline(req, None).await
    }

    /// Answer one question as a stream of events. The returned receiver
    /// yields `Start`, `Progress`, `Content` chunks, `Sources`, and a
    /// terminal `Done` or `Error`. Dropping the receiver cancels delivery.
    pub fn ask_stream(self: &Arc<Self>, req: AskRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(32);
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let start_ok = tx
                .send(StreamEvent::Start {
                    session_id: req.session_id.clone(),
                })
                .await
                .is_ok();
            if !start_ok {
                return;
            }

            let outcome = match service.validate(&req).await {
                Ok(_) => service.run_pipeline(&req, Some(&tx)).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(response) => {
                    for text in chunk_text(
                        &response.answer.content,
                        service.retrieval.stream_chunk_chars,
                    ) {
                        if tx.send(StreamEvent::Content { text }).await.is_err() {
                            return;
                        }
                    }
                    // No citations, no sources event. Graph-only context is
                    // suppressed with it: the event exists to attribute the
                    // answer to files, and there is nothing to attribute.
                    if !response.answer.sources.is_empty() {
                        let _ = tx
                            .send(StreamEvent::Sources {
                                sources: response.answer.sources,
                                context_graph: response.answer.context_graph,
                                entity_count: response.answer.entity_count,
                            })
                            .await;
                    }
                    let _ = tx
                        .send(StreamEvent::Done {
                            latency_ms: response.latency_ms,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            code: e.code().to_string(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });

        rx
    }

    /// Reject malformed input before any backend call, then check session
    /// ownership. No retrieval happens for a foreign or deleted session.
    async fn validate(&self, req: &AskRequest) -> ServiceResult<Session> {
        if req.query.trim().is_empty() {
            return Err(ServiceError::InvalidInput("query must not be empty".into()));
        }
        if req.user_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "user_id must not be empty".into(),
            ));
        }
        if req.session_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "session_id must not be empty".into(),
            ));
        }

        match self
            .sessions
            .validate_session(&req.session_id, &req.user_id)
            .await?
        {
            Some(session) => Ok(session),
            None => Err(ServiceError::Unauthorized),
        }
    }

    async fn run_pipeline(
        &self,
        req: &AskRequest,
        progress: Option<&mpsc::Sender<StreamEvent>>,
    ) -> ServiceResult<AskResponse> {
        let started = Instant::now();
        let query = req.query.trim();

        // History is read before the user turn is appended so the current
        // question never appears in its own conversation context.
        let history = self.load_history(&req.session_id).await;
        self.append_turn(
            &req.session_id,
            MessageRole::User,
            NewMessage {
                content: query.to_string(),
                related_file_ids: req.file_ids.clone(),
                ..NewMessage::default()
            },
        )
        .await;

        report_stage(progress, Stage::Expanding).await;
        let variants = expand::expand_query(
            query,
            self.generation.as_ref(),
            &self.prompts,
            self.retrieval.max_query_variants,
        )
        .await;

        report_stage(progress, Stage::Retrieving).await;
        let report = retrieval::fan_out(
            self.content.as_ref(),
            self.vectors.as_ref(),
            self.graph.as_ref(),
            self.embedding.as_ref(),
            &RetrievalRequest {
                raw_query: query,
                variants: &variants,
                user_id: &req.user_id,
                file_ids: req.file_ids.as_deref(),
                per_backend_limit: self.retrieval.per_backend_limit,
                backend_timeout: Duration::from_millis(self.retrieval.backend_timeout_ms),
            },
        )
        .await;
        tracing::debug!(
            vector = ?report.vector,
            keyword = ?report.keyword,
            graph = ?report.graph,
            "retrieval fan-out complete"
        );

        report_stage(progress, Stage::Ranking).await;
        let evidence = rank::dedup_and_rank(report.hits, self.retrieval.merged_limit);

        report_stage(progress, Stage::Enriching).await;
        let context = graphrag::enrich(self.graph.as_ref(), &evidence).await;

        report_stage(progress, Stage::Generating).await;
        let content = answer::compose(
            self.generation.as_ref(),
            &self.prompts,
            &self.retrieval,
            query,
            &evidence,
            &history,
        )
        .await;

        let sources = answer::extract_sources(&evidence);
        let latency_ms = started.elapsed().as_millis() as i64;

        let answer = Answer {
            content,
            sources,
            context_graph: context.graph,
            entity_count: context.entities.len(),
        };

        self.persist_outcome(req, query, &answer, &evidence, latency_ms)
            .await;

        Ok(AskResponse {
            answer,
            results: evidence,
            query_variants: variants,
            latency_ms,
        })
    }

    async fn load_history(&self, session_id: &str) -> Vec<Message> {
        match self
            .sessions
            .recent_turns(session_id, self.retrieval.history_turns)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load conversation history, proceeding without it");
                Vec::new()
            }
        }
    }

    /// Persistence is best-effort: the caller already has the answer, so a
    /// write failure is logged, not surfaced.
    async fn append_turn(&self, session_id: &str, role: MessageRole, message: NewMessage) {
        if let Err(e) = self.sessions.append_message(session_id, role, message).await {
            tracing::warn!(error = %e, role = role.as_str(), "failed to persist message turn");
        }
    }

    async fn persist_outcome(
        &self,
        req: &AskRequest,
        query: &str,
        answer: &Answer,
        evidence: &[SearchHit],
        latency_ms: i64,
    ) {
        let snapshot = serde_json::to_value(evidence).ok();
        self.append_turn(
            &req.session_id,
            MessageRole::Assistant,
            NewMessage {
                content: answer.content.clone(),
                related_file_ids: req.file_ids.clone(),
                search_results: snapshot,
                sources: Some(answer.sources.clone()),
                latency_ms: Some(latency_ms),
            },
        )
        .await;

        if let Err(e) = self
            .sessions
            .log_search(
                &req.user_id,
                query,
                "multi_modal",
                req.file_ids.as_deref(),
                evidence.len(),
                latency_ms,
            )
            .await
        {
            tracing::warn!(error = %e, "failed to log search");
        }
    }
}

async fn report_stage(progress: Option<&mpsc::Sender<StreamEvent>>, stage: Stage) {
    if let Some(tx) = progress {
        // Consumer lag or cancellation is detected later at content delivery.
        let _ = tx.send(StreamEvent::Progress { stage }).await;
    }
}
