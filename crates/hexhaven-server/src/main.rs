//! Hexhaven multiplayer game server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod gateway;
mod lobby;
mod protocol;
mod session;
mod storage;

use gateway::Gateway;
use lobby::LobbyManager;
use session::{SessionConfig, SessionManager};
use storage::NoopStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    if let Ok(frontend) = std::env::var("FRONTEND_URL") {
        info!("frontend origin: {frontend}");
    }
    if std::env::var("DATABASE_URL").is_ok() {
        info!("DATABASE_URL set, but no storage adapter is configured; finished games are dropped");
    }

    info!("starting hexhaven server...");

    let config = SessionConfig::default();
    let subscriber_buffer = config.subscriber_buffer;
    let sessions = SessionManager::new(config, Arc::new(NoopStore));
    let gateway = Arc::new(Gateway::new(
        sessions,
        LobbyManager::new(),
        Duration::from_secs(3),
        subscriber_buffer,
    ));

    gateway::run(addr, gateway).await
}
