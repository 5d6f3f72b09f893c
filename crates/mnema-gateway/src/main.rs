mod auth;
mod inject;
mod proxy;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use dashmap::DashMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mnema_core::{db, MnemaConfig, TokenStore};

use proxy::SessionTable;

/// Auth gateway for the mnema tool server: validates URL-bound tokens,
/// binds upstream session ids to principals, and injects the bearer token
/// into every forwarded tool call.
#[derive(Debug, Parser)]
#[command(name = "mnema-gateway")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "MNEMA_GATEWAY_LISTEN", default_value = "0.0.0.0:8000")]
    listen: SocketAddr,

    /// Upstream tool-server base URL.
    #[arg(long, env = "MNEMA_UPSTREAM_URL")]
    upstream: Option<String>,

    /// Override the configured database path.
    #[arg(long, env = "MNEMA_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct GatewayState {
    pub tokens: TokenStore,
    pub sessions: SessionTable,
    pub client: reqwest::Client,
    pub upstream: String,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%origin, %err, "skipping unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::list(parsed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = MnemaConfig::load()?;
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    let upstream = args.upstream.unwrap_or_else(|| config.upstream_url.clone());

    let pool = db::connect(&config.db_path).await?;
    let state = GatewayState {
        tokens: TokenStore::new(pool),
        sessions: Arc::new(DashMap::new()),
        client: reqwest::Client::new(),
        upstream: upstream.clone(),
    };

    let app = Router::new()
        .route("/sse", get(proxy::open_stream).post(proxy::open_stream))
        .route("/messages/", post(proxy::forward_message))
        .route("/health", get(proxy::health))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, upstream = %upstream, "mnema gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
