use anyhow::Result;
use axum::Router;
use clap::Parser;
use leadsearch_core::config::Settings;
use server::{build_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Lead database directory (overrides LEADS_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Redis URL (overrides REDIS_URL)
    #[arg(long)]
    redis_url: Option<String>,
    /// Run without the cache store
    #[arg(long, default_value_t = false)]
    no_cache: bool,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let mut settings = Settings::from_env()?;
    if let Some(db) = args.db {
        settings.db_path = db;
    }
    if let Some(url) = args.redis_url {
        settings.cache.url = url;
    }
    if args.no_cache {
        settings.cache.enabled = false;
    }

    let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
    if admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set, admin endpoints are disabled");
    }
    let state = AppState::open(&settings, admin_token).await?;
    let app: Router = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, db = %settings.db_path.display(), "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
