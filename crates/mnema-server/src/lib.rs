pub mod handlers;
pub mod sessions;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use mnema_core::db::SqlitePool;
use mnema_core::{
    default_registry, CheckpointStore, EmbeddingProvider, EngineTuning, HashedEmbedder,
    HttpEmbedder, McpService, MemoryEngine, MemoryStore, MnemaConfig, TokenStore,
};

use sessions::Sessions;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<McpService>,
    pub sessions: Sessions,
    pub tokens: TokenStore,
    pub store: MemoryStore,
    pub engine: Arc<MemoryEngine>,
    pub config: Arc<MnemaConfig>,
}

/// Wire the engine, stores, tool registry, and MCP service onto one pool.
pub fn build_state(config: Arc<MnemaConfig>, pool: SqlitePool) -> AppState {
    let tokens = TokenStore::new(pool.clone());
    let store = MemoryStore::new(pool.clone());

    let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding.base_url {
        Some(base_url) => Arc::new(HttpEmbedder::new(base_url, config.embedding.model.clone())),
        None => Arc::new(HashedEmbedder),
    };

    let engine = Arc::new(MemoryEngine::new(
        store.clone(),
        embedder,
        EngineTuning::from(config.as_ref()),
    ));
    let checkpoints = Arc::new(CheckpointStore::new(pool));
    let registry = default_registry(engine.clone(), checkpoints);
    let service = Arc::new(McpService::new(
        registry,
        tokens.clone(),
        config.hosts.clone(),
    ));

    AppState {
        service,
        sessions: Sessions::new(),
        tokens,
        store,
        engine,
        config,
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sse", get(handlers::open_stream).post(handlers::open_stream))
        .route("/messages/", post(handlers::post_message))
        .route("/health", get(handlers::health))
        .route("/api/generate-token", post(handlers::generate_token))
        .route("/api/join-waitlist", post(handlers::join_waitlist))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
