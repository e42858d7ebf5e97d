//! encounter - tabletop combat encounter tracker
//!
//! The combat engine (initiative, turns, hit points, class resources), a
//! session service that mirrors it to a shared store, and `encounterd`, the
//! daemon serving that store to every client of a campaign.

pub mod api;
pub mod combat;
pub mod db;
pub mod session;
pub mod sync;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use api::AppState;
use db::Database;

pub use session::CombatSession;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "encounterd.toml";

/// Environment variable prefix for config overrides
pub const ENV_PREFIX: &str = "ENCOUNTERD_";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// SQLite file; `None` keeps sessions in memory
    pub db_path: Option<String>,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            db_path: None, // None = in-memory
            log_json: false,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if it exists), then `ENCOUNTERD_*`
    /// environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        Ok(config)
    }
}

/// The encounterd server instance
pub struct Server {
    config: Config,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server instance
    pub async fn new(config: Config) -> Result<Self> {
        let db = Database::new(config.db_path.as_deref()).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            state: AppState::new(Arc::new(db)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the database handle
    pub fn db(&self) -> Arc<Database> {
        self.state.db.clone()
    }

    /// The session store this server serves
    pub fn store(&self) -> Arc<sync::SqliteSessionStore> {
        self.state.store.clone()
    }

    /// Build the router
    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("encounterd listening on {}", local_addr);

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        info!("encounterd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
