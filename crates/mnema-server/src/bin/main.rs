use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mnema_core::{db, MnemaConfig};
use mnema_server::{build_router, build_state};

/// Multi-tenant semantic memory service: MCP tools over SSE.
#[derive(Debug, Parser)]
#[command(name = "mnema-server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "MNEMA_LISTEN", default_value = "0.0.0.0:9000")]
    listen: SocketAddr,

    /// Override the configured database path.
    #[arg(long, env = "MNEMA_DB_PATH")]
    db_path: Option<PathBuf>,
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
    let config = Arc::new(config);

    let pool = db::connect(&config.db_path).await?;
    let state = build_state(config.clone(), pool);

    if let Some(bootstrap) = state.tokens.ensure_bootstrap_token().await? {
        info!(
            token = %bootstrap.token,
            user_id = %bootstrap.user_id,
            "bootstrap token created; connect with {}/sse?token=<token>",
            config.public_base_url.trim_end_matches('/')
        );
    }

    let warmed = state.engine.warm_hash_cache().await?;
    info!(hashes = warmed, "exact-duplicate cache warmed");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, db = %config.db_path.display(), "mnema server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
