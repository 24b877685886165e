//! Arena Game Server - authoritative tick-based grid arena
//!
//! Each lobby runs its own simulation task. Clients join over WebSocket as
//! players or spectators, send one action per tick and receive a snapshot
//! of the world after every tick. Lobbies are listed and created over HTTP.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

pub use crate::app::AppState;
pub use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;

/// Seed the configured lobbies and serve on `listener` until `shutdown` resolves
pub async fn run<F>(listener: TcpListener, config: Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;

    // Initialize server time tracking
    init_server_time();

    // Create application state and boot lobbies
    let state = AppState::new(config);
    state.seed_lobbies()?;

    let lobbies = state.lobbies.clone();
    let router = build_router(state);

    info!("Server listening on {}", addr);
    info!("Lobby list: http://{}/lobbies", addr);
    info!("WebSocket endpoint: ws://{}/lobby/{{lobby_id}}", addr);

    // Upgraded sockets are not part of axum's drain; closing the lobbies
    // ends their sessions with a close frame.
    let shutdown = async move {
        shutdown.await;
        lobbies.shutdown_all().await;
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
