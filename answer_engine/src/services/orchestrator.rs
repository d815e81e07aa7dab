//! Orchestrator
//!
//! Coordinates one request through classify → SQL attempt → vector attempt →
//! assemble → generate → persist, with fallback edges from the SQL path back
//! to the vector path. SQL failures are typed outcomes the state machine
//! inspects, never thrown errors. All capabilities are injected at
//! construction in the composition root; nothing reaches through globals.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use courtside_config::Settings;
use courtside_observability::{DomainEvent, EventCategory, StageTimer};

use crate::errors::ApiError;
use crate::models::{
    ChatRequest, ChatResponse, Conversation, ConversationStatus, QueryClassification, QueryIntent,
    RetrievalHit, RoutingLabel, SourceAttribution, SqlFailure, SqlOutcome, UNAVAILABLE_ANSWER,
};
use crate::services::classifier::QueryClassifier;
use crate::services::conversation_store::{ConversationReader, ConversationWriter};
use crate::services::embedding::EmbeddingClient;
use crate::services::generation::{GenerationClient, GenerationParams};
use crate::services::prompt::{self, PromptInputs};
use crate::services::sql_generator::{self, SqlGenerator};
use crate::services::stats_store::SqlExecutor;
use crate::services::vector_index::VectorIndex;

const SERVICE: &str = "answer-engine";

pub struct Orchestrator {
    settings: Arc<Settings>,
    classifier: QueryClassifier,
    embedder: Arc<dyn EmbeddingClient>,
    generator: Arc<dyn GenerationClient>,
    index: Arc<VectorIndex>,
    stats: Arc<dyn SqlExecutor>,
    sql_generator: SqlGenerator,
    reader: Arc<dyn ConversationReader>,
    writer: Arc<dyn ConversationWriter>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        embedder: Arc<dyn EmbeddingClient>,
        generator: Arc<dyn GenerationClient>,
        index: Arc<VectorIndex>,
        stats: Arc<dyn SqlExecutor>,
        reader: Arc<dyn ConversationReader>,
        writer: Arc<dyn ConversationWriter>,
    ) -> Self {
        let sql_generator = SqlGenerator::new(Arc::clone(&generator));
        Self {
            settings,
            classifier: QueryClassifier::new(),
            embedder,
            generator,
            index,
            stats,
            sql_generator,
            reader,
            writer,
        }
    }

    /// Run one chat request to completion. Input bounds are already checked
    /// by the facade; the enclosing deadline is applied by the handler.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, ApiError> {
        let started = Instant::now();

        // Resolve the conversation up front so a bad id fails before any
        // provider call.
        let conversation = match &request.conversation_id {
            Some(id) => match self.reader.fetch(id).await? {
                Some(c) if c.status != ConversationStatus::Deleted => Some(c),
                _ => return Err(ApiError::ConversationNotFound(id.clone())),
            },
            None => None,
        };

        let history = match &conversation {
            Some(c) => self
                .reader
                .history(&c.id, self.settings.conversation_history_turns)
                .await
                .unwrap_or_else(|e| {
                    warn!(conversation_id = %c.id, error = %e, "history fetch failed");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        // CLASSIFY, with one pronoun-resolution retry: an Unknown follow-up
        // is reclassified with the previous user turn prepended.
        let mut classification = self.classifier.classify(&request.query);
        if classification.intent == QueryIntent::Unknown {
            if let Some(last) = history.last() {
                let merged = format!("{} {}", last.query, request.query);
                let retried = self.classifier.classify(&merged);
                if retried.intent != QueryIntent::Unknown {
                    classification = retried;
                }
            }
        }
        let intent = match classification.intent {
            QueryIntent::Unknown => QueryIntent::Contextual,
            other => other,
        };

        DomainEvent::new(SERVICE, EventCategory::Classification, "query_classified")
            .metadata(serde_json::json!({
                "intent": classification.intent,
                "confidence": classification.confidence,
                "reason": classification.reason,
            }))
            .emit();

        // SQL_ATTEMPT
        let sql_outcome = if matches!(intent, QueryIntent::SqlOnly | QueryIntent::Hybrid) {
            Some(self.run_sql_path(&request.query, &classification).await)
        } else {
            None
        };
        let sql_failed = sql_outcome.as_ref().map(SqlOutcome::failed).unwrap_or(false);
        let sql_grounded = sql_outcome
            .as_ref()
            .and_then(SqlOutcome::grounded)
            .is_some();

        // VECTOR_ATTEMPT, entered directly or as the fallback edge.
        let need_vector = matches!(intent, QueryIntent::Contextual | QueryIntent::Hybrid)
            || (intent == QueryIntent::SqlOnly && sql_failed);
        let hits = if need_vector {
            self.run_vector_path(&request, sql_grounded).await?
        } else {
            Vec::new()
        };

        // Effective routing reflects what actually grounded the answer.
        let routing = match (sql_grounded, !hits.is_empty()) {
            (true, true) => RoutingLabel::Hybrid,
            (true, false) => RoutingLabel::SqlOnly,
            (false, true) => RoutingLabel::VectorOnly,
            (false, false) => RoutingLabel::Unknown,
        };

        // Nothing grounded: answer with the sentinel. A successful response.
        let answer = if routing == RoutingLabel::Unknown {
            info!("no grounded material survived retrieval; returning sentinel");
            UNAVAILABLE_ANSWER.to_string()
        } else {
            // ASSEMBLE + GENERATE
            let sql_block = sql_outcome.as_ref().and_then(|outcome| match outcome {
                SqlOutcome::Completed(execution) => Some(sql_generator::format_result(execution)),
                SqlOutcome::Failed { .. } => None,
            });
            let prompt = prompt::assemble(
                routing,
                &PromptInputs {
                    app_name: &self.settings.app_name,
                    question: &request.query,
                    history: &history,
                    sql_results: sql_block.as_deref(),
                    hits: &hits,
                },
            );

            let timer = StageTimer::start(SERVICE, EventCategory::Generation, "answer_generated");
            match self
                .generator
                .generate(
                    &prompt,
                    GenerationParams {
                        temperature: self.settings.chat_temperature,
                        max_tokens: self.settings.generation_max_tokens,
                    },
                )
                .await
            {
                Ok(answer) => {
                    timer.success();
                    answer
                }
                Err(e) => {
                    timer.failure("upstream_unavailable");
                    return Err(ApiError::UpstreamUnavailable(e.to_string()));
                }
            }
        };

        let sources: Vec<SourceAttribution> = hits
            .iter()
            .map(|hit| SourceAttribution {
                source: hit.chunk.source.to_string(),
                score: hit.score,
            })
            .collect();

        // PERSIST; failures downgrade to a warning on the response.
        let processing_time_ms = started.elapsed().as_millis() as u64;
        let (conversation_id, turn_number, persistence_warning) = self
            .persist(conversation, &request.query, &answer, &sources, processing_time_ms)
            .await;

        DomainEvent::new(SERVICE, EventCategory::Api, "request_completed")
            .duration_ms(processing_time_ms)
            .metadata(serde_json::json!({
                "routing": routing.to_string(),
                "sources": sources.len(),
                "turn_number": turn_number,
            }))
            .emit();

        Ok(ChatResponse {
            answer,
            sources: if request.include_sources { sources } else { Vec::new() },
            processing_time_ms,
            routing,
            conversation_id,
            turn_number,
            persistence_warning,
        })
    }

    /// Generate, validate, and execute a statement. Every failure is a typed
    /// outcome; the caller inspects the tag.
    async fn run_sql_path(
        &self,
        question: &str,
        classification: &QueryClassification,
    ) -> SqlOutcome {
        let timer = StageTimer::start(SERVICE, EventCategory::SqlPath, "sql_attempted");

        let sql = match self.sql_generator.generate(question, self.stats.schema()).await {
            Ok(sql) => sql,
            Err(failure) => {
                timer.failure(failure.kind());
                return SqlOutcome::Failed { sql: None, failure };
            }
        };

        match self.stats.execute(&sql).await {
            Ok(execution) => {
                if execution.rows.is_empty() && classification.is_confident_statistical() {
                    // Empty-but-valid: the statement ran, the data just is
                    // not there. Falls back rather than answering from air.
                    timer.failure(SqlFailure::EmptyResult.kind());
                    SqlOutcome::Failed {
                        sql: Some(sql),
                        failure: SqlFailure::EmptyResult,
                    }
                } else {
                    timer.success_with(serde_json::json!({
                        "rows": execution.rows.len(),
                        "truncated": execution.truncated,
                    }));
                    SqlOutcome::Completed(execution)
                }
            }
            Err(failure) => {
                timer.failure(failure.kind());
                SqlOutcome::Failed {
                    sql: Some(sql),
                    failure,
                }
            }
        }
    }

    /// Embed the query and search the index. An embedding failure fails the
    /// request only when the vector path is the last option standing.
    async fn run_vector_path(
        &self,
        request: &ChatRequest,
        sql_grounded: bool,
    ) -> Result<Vec<RetrievalHit>, ApiError> {
        let timer = StageTimer::start(SERVICE, EventCategory::VectorPath, "index_searched");

        let vector = match self.embedder.embed_query(&request.query).await {
            Ok(vector) => vector,
            Err(e) if sql_grounded => {
                warn!(error = %e, "embedding failed; continuing on SQL results alone");
                timer.failure("embedding_degraded");
                return Ok(Vec::new());
            }
            Err(e) => {
                timer.failure("upstream_unavailable");
                return Err(ApiError::UpstreamUnavailable(format!("embedding provider: {e}")));
            }
        };

        let k = if request.k > 0 {
            request.k
        } else {
            adaptive_k(&request.query)
        };

        let hits = self
            .index
            .search(&vector, k, None)
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        if hits.is_empty() {
            timer.failure("vector_filtered_all");
        } else {
            timer.success_with(serde_json::json!({ "k": k, "hits": hits.len() }));
        }
        Ok(hits)
    }

    async fn persist(
        &self,
        existing: Option<Conversation>,
        query: &str,
        answer: &str,
        sources: &[SourceAttribution],
        processing_time_ms: u64,
    ) -> (String, i32, Option<String>) {
        let timer = StageTimer::start(SERVICE, EventCategory::Persistence, "turn_persisted");

        // Lazy conversation creation on the first turn.
        let conversation = match existing {
            Some(c) => c,
            None => match self.writer.start_conversation().await {
                Ok(c) => c,
                Err(e) => {
                    timer.failure("persistence_failure");
                    return (
                        String::new(),
                        0,
                        Some(format!("conversation could not be created: {e}")),
                    );
                }
            },
        };

        let source_names: Vec<String> = sources.iter().map(|s| s.source.clone()).collect();
        match self
            .writer
            .append_interaction(&conversation.id, query, answer, &source_names, processing_time_ms)
            .await
        {
            Ok(turn_number) => {
                timer.success();
                (conversation.id, turn_number, None)
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "append failed");
                timer.failure("persistence_failure");
                (
                    conversation.id,
                    0,
                    Some(format!("response was not persisted: {e}")),
                )
            }
        }
    }
}

/// Adaptive k selection for auto-k requests: a complexity estimate and a
/// recall floor over the same query taxonomy, combined with max.
pub fn adaptive_k(query: &str) -> usize {
    let lowered = query.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    let continuation = has(&["also", "what about", "how about", "as well", "and his", "and her", "and their"]);
    let comparison = has(&["compare", " vs ", " vs.", "versus", "difference between", "better than", "worse than"]);
    let collection = has(&["top ", "best ", "worst ", "teams", "players who", "leaders", "list "]);

    let complexity = if continuation {
        9
    } else if comparison {
        7
    } else if collection {
        7
    } else {
        5
    };
    let recall = if continuation {
        8
    } else if comparison || collection {
        7
    } else {
        6
    };

    complexity.max(recall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkSource, DocumentChunk, HistoryTurn, Interaction, SqlExecution};
    use crate::services::conversation_store::derive_title;
    use crate::services::generation::GenerationError;
    use crate::services::stats_store::SchemaCatalog;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    // ------------------------------------------------------------------
    // Mock capabilities
    // ------------------------------------------------------------------

    struct FixedEmbedder {
        vector: Vec<f32>,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("embedding provider is down");
            }
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    /// Answers SQL-generation prompts with a scripted statement and answer
    /// prompts with a scripted reply; records every prompt it sees.
    struct ScriptedGenerator {
        sql: String,
        answer: String,
        fail_generation: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(sql: &str, answer: &str) -> Self {
            Self {
                sql: sql.to_string(),
                answer: answer.to_string(),
                fail_generation: false,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn seen_prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _params: GenerationParams,
        ) -> Result<String, GenerationError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            if prompt.starts_with("You translate NBA statistics questions") {
                return Ok(self.sql.clone());
            }
            if self.fail_generation {
                return Err(GenerationError::Unavailable("model down".to_string()));
            }
            Ok(self.answer.clone())
        }
    }

    struct ScriptedExecutor {
        rows: Vec<crate::models::SqlRow>,
        fail: Option<SqlFailure>,
        catalog: SchemaCatalog,
    }

    impl ScriptedExecutor {
        fn rows(rows: Vec<crate::models::SqlRow>) -> Self {
            Self {
                rows,
                fail: None,
                catalog: SchemaCatalog::nba(),
            }
        }

        fn failing(failure: SqlFailure) -> Self {
            Self {
                rows: Vec::new(),
                fail: Some(failure),
                catalog: SchemaCatalog::nba(),
            }
        }
    }

    #[async_trait]
    impl SqlExecutor for ScriptedExecutor {
        async fn execute(&self, sql: &str) -> Result<SqlExecution, SqlFailure> {
            if let Some(failure) = &self.fail {
                return Err(failure.clone());
            }
            Ok(SqlExecution {
                sql: sql.to_string(),
                rows: self.rows.clone(),
                truncated: false,
                duration_ms: 3,
            })
        }

        fn schema(&self) -> &SchemaCatalog {
            &self.catalog
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        state: Mutex<HashMap<String, (Conversation, Vec<Interaction>)>>,
        fail_appends: bool,
    }

    #[async_trait]
    impl ConversationReader for MemoryStore {
        async fn fetch(&self, id: &str) -> AnyResult<Option<Conversation>> {
            Ok(self
                .state
                .lock()
                .ok()
                .and_then(|s| s.get(id).map(|(c, _)| c.clone())))
        }

        async fn history(&self, id: &str, limit: usize) -> AnyResult<Vec<HistoryTurn>> {
            let state = self.state.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            let turns = state
                .get(id)
                .map(|(_, interactions)| {
                    let start = interactions.len().saturating_sub(limit);
                    interactions[start..]
                        .iter()
                        .map(|i| HistoryTurn {
                            turn_number: i.turn_number,
                            query: i.query.clone(),
                            response: i.response.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(turns)
        }

        async fn list(
            &self,
            _status: Option<ConversationStatus>,
            _limit: i64,
            _offset: i64,
        ) -> AnyResult<Vec<crate::models::ConversationSummary>> {
            Ok(Vec::new())
        }

        async fn messages(&self, id: &str) -> AnyResult<Vec<Interaction>> {
            let state = self.state.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            Ok(state.get(id).map(|(_, i)| i.clone()).unwrap_or_default())
        }
    }

    #[async_trait]
    impl ConversationWriter for MemoryStore {
        async fn start_conversation(&self) -> AnyResult<Conversation> {
            let conversation = Conversation {
                id: format!("conv-{}", uuid::Uuid::new_v4()),
                title: String::new(),
                status: ConversationStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.state
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .insert(conversation.id.clone(), (conversation.clone(), Vec::new()));
            Ok(conversation)
        }

        async fn append_interaction(
            &self,
            conversation_id: &str,
            query: &str,
            response: &str,
            sources: &[String],
            processing_time_ms: u64,
        ) -> AnyResult<i32> {
            if self.fail_appends {
                anyhow::bail!("storage offline");
            }
            let mut state = self.state.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            let (conversation, interactions) = state
                .get_mut(conversation_id)
                .ok_or_else(|| anyhow::anyhow!("conversation {conversation_id} does not exist"))?;
            let turn_number = interactions.last().map(|i| i.turn_number).unwrap_or(0) + 1;
            interactions.push(Interaction {
                id: format!("turn-{turn_number}"),
                conversation_id: conversation_id.to_string(),
                turn_number,
                query: query.to_string(),
                response: response.to_string(),
                sources: sources.to_vec(),
                processing_time_ms: processing_time_ms as i64,
                created_at: Utc::now(),
            });
            if conversation.title.is_empty() {
                conversation.title = derive_title(query);
            }
            conversation.updated_at = Utc::now();
            Ok(turn_number)
        }

        async fn rename(&self, _id: &str, _title: &str) -> AnyResult<bool> {
            Ok(true)
        }

        async fn set_status(&self, id: &str, status: ConversationStatus) -> AnyResult<bool> {
            let mut state = self.state.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            if let Some((conversation, _)) = state.get_mut(id) {
                conversation.status = status;
                return Ok(true);
            }
            Ok(false)
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            app_name: "Courtside".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            embedding_dim: 2,
            embedding_model: "embed-model".to_string(),
            chat_model: "chat-model".to_string(),
            chat_temperature: 0.1,
            generation_max_tokens: 2048,
            provider_base_url: "http://localhost".to_string(),
            provider_api_key: "test".to_string(),
            database_url: "postgres://localhost/test".to_string(),
            stats_database_url: "postgres://localhost/test".to_string(),
            stats_pool_size: 8,
            vector_matrix_path: "unused".to_string(),
            vector_chunks_path: "unused".to_string(),
            sql_timeout: Duration::from_secs(2),
            sql_row_cap: 1000,
            conversation_history_turns: 5,
            request_deadline: Duration::from_secs(60),
            quality_threshold: 0.5,
            retrieval_oversample: 3,
        })
    }

    fn chunk(id: &str, text: &str) -> DocumentChunk {
        let mut metadata = HashMap::new();
        metadata.insert("data_type".to_string(), "discussion".to_string());
        DocumentChunk {
            id: id.to_string(),
            text: text.to_string(),
            source: ChunkSource {
                file: format!("{id}.csv"),
                sheet: None,
                page: None,
            },
            metadata,
        }
    }

    fn populated_index() -> Arc<VectorIndex> {
        let chunks = vec![
            chunk("threads", "Fans argue the second unit decides playoff series more than stars."),
            chunk("column", "Beat writers noted the coaching staff leaned into drop coverage."),
        ];
        let vectors = vec![1.0, 0.0, 0.0, 1.0];
        Arc::new(VectorIndex::from_parts(vectors, 2, chunks, 0.5, 3).unwrap())
    }

    fn empty_index() -> Arc<VectorIndex> {
        Arc::new(VectorIndex::from_parts(Vec::new(), 2, Vec::new(), 0.5, 3).unwrap())
    }

    fn jokic_row() -> crate::models::SqlRow {
        vec![
            ("name".to_string(), serde_json::json!("Nikola Jokic")),
            ("pts".to_string(), serde_json::json!(26.4)),
        ]
    }

    struct Fixture {
        orchestrator: Orchestrator,
        generator: Arc<ScriptedGenerator>,
        store: Arc<MemoryStore>,
    }

    fn fixture(
        embedder: FixedEmbedder,
        generator: ScriptedGenerator,
        executor: ScriptedExecutor,
        index: Arc<VectorIndex>,
        store: MemoryStore,
    ) -> Fixture {
        let generator = Arc::new(generator);
        let store = Arc::new(store);
        let orchestrator = Orchestrator::new(
            settings(),
            Arc::new(embedder),
            Arc::clone(&generator) as Arc<dyn GenerationClient>,
            index,
            Arc::new(executor),
            Arc::clone(&store) as Arc<dyn ConversationReader>,
            Arc::clone(&store) as Arc<dyn ConversationWriter>,
        );
        Fixture {
            orchestrator,
            generator,
            store,
        }
    }

    fn request(query: &str) -> ChatRequest {
        ChatRequest {
            query: query.to_string(),
            k: 0,
            conversation_id: None,
            turn_number: None,
            include_sources: true,
        }
    }

    const VALID_SQL: &str = "SELECT p.name, s.pts FROM players p JOIN player_stats s ON s.player_id = p.id ORDER BY s.pts DESC LIMIT 1";

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn statistical_question_routes_sql_only() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "Nikola Jokic led with 26.4 points per game. [SQL]"),
            ScriptedExecutor::rows(vec![jokic_row()]),
            populated_index(),
            MemoryStore::default(),
        );

        let response = f
            .orchestrator
            .handle(request("Who scored the most points this season?"))
            .await
            .unwrap();

        assert_eq!(response.routing, RoutingLabel::SqlOnly);
        assert!(response.answer.contains("26.4"));
        assert!(response.sources.is_empty());
        assert_eq!(response.turn_number, 1);
        assert!(!response.conversation_id.is_empty());
        assert!(response.persistence_warning.is_none());

        // The answer prompt carried the formatted SQL block.
        let prompts = f.generator.seen_prompts();
        let answer_prompt = prompts.last().unwrap();
        assert!(answer_prompt.contains("name: Nikola Jokic, pts: 26.4"));
    }

    #[tokio::test]
    async fn sql_failure_falls_back_to_vector_path() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "Grounded answer. [Source: threads.csv]"),
            ScriptedExecutor::failing(SqlFailure::ExecutionError("relation vanished".to_string())),
            populated_index(),
            MemoryStore::default(),
        );

        let response = f
            .orchestrator
            .handle(request("Who scored the most points this season?"))
            .await
            .unwrap();

        assert_eq!(response.routing, RoutingLabel::VectorOnly);
        assert!(!response.sources.is_empty());
    }

    #[tokio::test]
    async fn hybrid_question_carries_both_blocks() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(
                "SELECT p.name, s.pts, s.reb, s.ast FROM players p JOIN player_stats s ON s.player_id = p.id WHERE p.name IN ('Nikola Jokic', 'Joel Embiid')",
                "Jokic averages 26.4 points. [SQL] Fans lean Jokic. [Source: threads.csv]",
            ),
            ScriptedExecutor::rows(vec![jokic_row(), vec![
                ("name".to_string(), serde_json::json!("Joel Embiid")),
                ("pts".to_string(), serde_json::json!(33.0)),
            ]]),
            populated_index(),
            MemoryStore::default(),
        );

        let response = f
            .orchestrator
            .handle(request(
                "Compare Jokic and Embiid's stats and explain which one is more valuable based on their playing style.",
            ))
            .await
            .unwrap();

        assert_eq!(response.routing, RoutingLabel::Hybrid);
        assert!(!response.sources.is_empty());

        let prompts = f.generator.seen_prompts();
        let answer_prompt = prompts.last().unwrap();
        assert!(answer_prompt.contains("SQL query results:"));
        assert!(answer_prompt.contains("[Source: threads.csv]"));
    }

    #[tokio::test]
    async fn nothing_grounded_returns_sentinel() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "should never be used"),
            ScriptedExecutor::rows(Vec::new()),
            empty_index(),
            MemoryStore::default(),
        );

        let response = f
            .orchestrator
            .handle(request("What is the weather forecast for Los Angeles tomorrow?"))
            .await
            .unwrap();

        assert_eq!(response.answer, UNAVAILABLE_ANSWER);
        assert_eq!(response.routing, RoutingLabel::Unknown);
        assert!(response.sources.is_empty());
        // The sentinel still persists as a turn.
        assert_eq!(response.turn_number, 1);
    }

    #[tokio::test]
    async fn follow_up_reclassifies_with_history_and_injects_it() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "He also averages 9.0 assists. [SQL]"),
            ScriptedExecutor::rows(vec![jokic_row()]),
            populated_index(),
            MemoryStore::default(),
        );

        let conversation = f.store.start_conversation().await.unwrap();
        f.store
            .append_interaction(
                &conversation.id,
                "Who scored the most points?",
                "Nikola Jokic led with 26.4 points per game. [SQL]",
                &[],
                5,
            )
            .await
            .unwrap();

        let mut follow_up = request("and overall?");
        follow_up.conversation_id = Some(conversation.id.clone());
        let response = f.orchestrator.handle(follow_up).await.unwrap();

        // "and overall?" alone is Unknown; merged with the previous user
        // turn it classifies statistical and the SQL path runs.
        assert_eq!(response.routing, RoutingLabel::SqlOnly);
        assert_eq!(response.turn_number, 2);

        let prompts = f.generator.seen_prompts();
        let answer_prompt = prompts.last().unwrap();
        assert!(answer_prompt.contains("Conversation so far:"));
        assert!(answer_prompt.contains("User: Who scored the most points?"));
    }

    #[tokio::test]
    async fn turns_stay_contiguous_across_requests() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "Answer. [SQL]"),
            ScriptedExecutor::rows(vec![jokic_row()]),
            populated_index(),
            MemoryStore::default(),
        );

        let first = f
            .orchestrator
            .handle(request("Who scored the most points this season?"))
            .await
            .unwrap();
        assert_eq!(first.turn_number, 1);

        let mut second = request("Who had the most assists this season?");
        second.conversation_id = Some(first.conversation_id.clone());
        let second = f.orchestrator.handle(second).await.unwrap();
        assert_eq!(second.turn_number, 2);
        assert_eq!(second.conversation_id, first.conversation_id);
    }

    #[tokio::test]
    async fn persistence_failure_is_a_warning_not_an_error() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "Answer survives storage loss. [SQL]"),
            ScriptedExecutor::rows(vec![jokic_row()]),
            populated_index(),
            MemoryStore {
                fail_appends: true,
                ..Default::default()
            },
        );

        let response = f
            .orchestrator
            .handle(request("Who scored the most points this season?"))
            .await
            .unwrap();

        assert!(response.answer.contains("survives"));
        assert!(response.persistence_warning.is_some());
    }

    #[tokio::test]
    async fn embedding_failure_on_contextual_question_is_upstream_unavailable() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: true },
            ScriptedGenerator::new(VALID_SQL, "unused"),
            ScriptedExecutor::rows(Vec::new()),
            populated_index(),
            MemoryStore::default(),
        );

        let err = f
            .orchestrator
            .handle(request("What do fans think about home court advantage in the playoffs?"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn deleted_conversation_is_not_found() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "unused"),
            ScriptedExecutor::rows(Vec::new()),
            populated_index(),
            MemoryStore::default(),
        );

        let conversation = f.store.start_conversation().await.unwrap();
        f.store
            .set_status(&conversation.id, ConversationStatus::Deleted)
            .await
            .unwrap();

        let mut req = request("Who scored the most points this season?");
        req.conversation_id = Some(conversation.id.clone());
        let err = f.orchestrator.handle(req).await.unwrap_err();
        assert!(matches!(err, ApiError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn caller_supplied_k_bounds_sources() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "Grounded. [Source: threads.csv]"),
            ScriptedExecutor::rows(Vec::new()),
            populated_index(),
            MemoryStore::default(),
        );

        let mut req = request("What do fans think about bench depth in the playoffs?");
        req.k = 1;
        let response = f.orchestrator.handle(req).await.unwrap();
        assert_eq!(response.routing, RoutingLabel::VectorOnly);
        assert_eq!(response.sources.len(), 1);
    }

    #[tokio::test]
    async fn sources_are_ordered_by_descending_score() {
        let f = fixture(
            FixedEmbedder { vector: vec![1.0, 0.0], fail: false },
            ScriptedGenerator::new(VALID_SQL, "Grounded. [Source: threads.csv]"),
            ScriptedExecutor::rows(Vec::new()),
            populated_index(),
            MemoryStore::default(),
        );

        let response = f
            .orchestrator
            .handle(request("What do fans think about bench depth in the playoffs?"))
            .await
            .unwrap();
        for pair in response.sources.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    // ------------------------------------------------------------------
    // Adaptive k
    // ------------------------------------------------------------------

    #[test]
    fn adaptive_k_single_entity_defaults_to_recall_floor() {
        assert_eq!(adaptive_k("Who is Nikola Jokic?"), 6);
    }

    #[test]
    fn adaptive_k_for_comparisons() {
        assert_eq!(adaptive_k("Compare Jokic and Embiid"), 7);
    }

    #[test]
    fn adaptive_k_for_continuations() {
        assert_eq!(adaptive_k("What about his assists?"), 9);
    }

    #[test]
    fn adaptive_k_for_collections() {
        assert_eq!(adaptive_k("top 5 scoring teams"), 7);
    }
}
