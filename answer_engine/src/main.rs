use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;

use courtside_config::Settings;
use courtside_observability::{info, init_tracing, TracingConfig};

use answer_engine::handlers::{chat, conversations, health};
use answer_engine::models::AppState;
use answer_engine::services::conversation_store::{
    ConversationReader, ConversationWriter, PgConversationStore,
};
use answer_engine::services::embedding::OpenAiEmbeddingClient;
use answer_engine::services::generation::OpenAiGenerationClient;
use answer_engine::services::orchestrator::Orchestrator;
use answer_engine::services::stats_store::PgStatsStore;
use answer_engine::services::vector_index::VectorIndex;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Settings and observability first; an unknown config key stops here.
    let settings = Arc::new(Settings::load()?);
    init_tracing(TracingConfig::for_service("answer-engine"));

    info!("🏀 [Answer Engine] starting {}", settings.app_name);

    // Everything below loads eagerly: the index, both pools, and the
    // provider clients are constructed once and shared by reference.
    let index = Arc::new(VectorIndex::load(
        &settings.vector_matrix_path,
        &settings.vector_chunks_path,
        settings.embedding_dim,
        settings.quality_threshold,
        settings.retrieval_oversample,
    )?);
    info!("📚 vector index ready: {} chunks", index.len());

    let stats = Arc::new(
        PgStatsStore::connect(
            &settings.stats_database_url,
            settings.stats_pool_size,
            settings.sql_timeout,
            settings.sql_row_cap,
        )
        .await?,
    );
    info!("📊 statistics store connected");

    let conversations_store = Arc::new(
        PgConversationStore::connect(&settings.database_url, settings.stats_pool_size).await?,
    );
    info!("💬 conversation store connected");

    let embedder = Arc::new(OpenAiEmbeddingClient::new(
        settings.provider_base_url.clone(),
        settings.provider_api_key.clone(),
        settings.embedding_model.clone(),
        settings.embedding_dim,
    ));
    let generator = Arc::new(OpenAiGenerationClient::new(
        settings.provider_base_url.clone(),
        settings.provider_api_key.clone(),
        settings.chat_model.clone(),
    ));

    let reader: Arc<dyn ConversationReader> = conversations_store.clone();
    let writer: Arc<dyn ConversationWriter> = conversations_store.clone();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&settings),
        embedder,
        generator,
        Arc::clone(&index),
        stats,
        Arc::clone(&reader),
        Arc::clone(&writer),
    ));

    let state = Arc::new(AppState {
        settings: Arc::clone(&settings),
        orchestrator,
        conversation_reader: reader,
        conversation_writer: writer,
        index,
    });

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/chat", post(chat::chat))
        .route(
            "/conversations",
            post(conversations::create).get(conversations::list),
        )
        .route(
            "/conversations/:id",
            get(conversations::get)
                .put(conversations::update)
                .delete(conversations::remove),
        )
        .route("/conversations/:id/messages", get(conversations::messages))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", settings.server_host, settings.server_port).parse()?;
    info!("✅ Answer Engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
