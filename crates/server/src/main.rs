//! Deskline Server
//!
//! Live customer-support chat backend. Customers and support admins
//! connect over WebSocket; chat state is persisted in SQLite and
//! fanned out to connected clients in real time.

mod auth;
mod engine;
mod error;
mod hub;
mod logging;
mod migration_runner;
mod notify;
mod store;
mod transition;
mod websocket;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Router};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::StaticTokens;
use crate::engine::ChatEngine;
use crate::hub::Hub;
use crate::notify::Notifier;
use crate::store::ChatStore;
use crate::websocket::{ws_handler, AppContext};

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("deskline")
        .join("deskline.db")
}

#[derive(Parser, Debug)]
#[command(name = "deskline", about = "Live customer-support chat server")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "DESKLINE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 4600, env = "DESKLINE_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(long, env = "DESKLINE_DB")]
    db: Option<PathBuf>,

    /// JSON file mapping tokens to participant identities
    #[arg(long, env = "DESKLINE_TOKENS")]
    tokens: PathBuf,

    /// Optional webhook URL notified when a new chat enters the queue
    #[arg(long, env = "DESKLINE_NOTIFY_URL")]
    notify_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _logging = logging::init_logging()?;

    let db_path = args.db.unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = ChatStore::open(&db_path)?;
    info!(
        component = "main",
        event = "store.opened",
        db_path = %db_path.display(),
        "Chat store opened"
    );

    let tokens = StaticTokens::load(&args.tokens)?;
    let notifier = args.notify_url.map(Notifier::new);
    let hub = Arc::new(Hub::new());
    let engine = Arc::new(ChatEngine::new(store, hub, notifier));

    let ctx = Arc::new(AppContext {
        engine,
        auth: Arc::new(tokens),
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(ctx);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!(
        component = "main",
        event = "server.listening",
        addr = %addr,
        "Listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
