//! wiki-sync - Local/remote document sync with an auth-gated replication lifecycle
//!
//! This crate provides the storage side of an offline-first wiki:
//! - redb-backed local document stores with revisions and a change log
//! - CouchDB-compatible remote stores over HTTP
//! - Credential validation by write probe, saved login, online detection
//! - A session state machine deciding between login form, sync and offline use
//! - Continuous two-way replication that follows the session

pub mod config;
pub mod login;
pub mod online;
pub mod remote;
pub mod replication;
pub mod settings;
pub mod storage;
pub mod store;
pub mod telemetry;
#[cfg(test)]
pub mod testutil;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use config::{Config, ConfigError};
use login::{CredentialStore, CredentialsValidator, Reachability, SessionService};
use online::OnlineMonitor;
use replication::{ReplicaError, ReplicaManager, StoreBinding};
use settings::SettingsStore;
use storage::{Database, DatabaseError};

/// Local database holding the saved credentials
pub const LOGIN_DB: &str = "login";
/// Local database holding the wiki pages
pub const PAGES_DB: &str = "pouchwiki";
pub const SETTINGS_DB: &str = "settings";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Page store error: {0}")]
    Replica(#[from] ReplicaError),
}

/// Everything the application shares across tasks
pub struct AppContext {
    pub config: Config,
    pub online: OnlineMonitor,
    pub pages: Arc<ReplicaManager>,
    pub session: Arc<SessionService>,
    pub settings: SettingsStore,
    tasks: Vec<JoinHandle<()>>,
}

impl AppContext {
    /// Open the local stores and start session resolution in the background
    pub async fn start(config: Config) -> Result<Self, AppError> {
        Self::start_with(config, OnlineMonitor::detect()).await
    }

    /// Like [`start`](Self::start) with a caller-supplied connectivity source
    pub async fn start_with(config: Config, online: OnlineMonitor) -> Result<Self, AppError> {
        config.validate()?;
        info!(version = env!("CARGO_PKG_VERSION"), data_dir = %config.data_dir, "wiki-sync starting");

        let data_dir = Path::new(&config.data_dir);
        let login_db = Database::open(data_dir, LOGIN_DB)?;
        let settings = SettingsStore::open(Database::open(data_dir, SETTINGS_DB)?);

        let client = reqwest::Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .timeout(config.network.request_timeout())
            .build()?;

        let validator = CredentialsValidator::new(
            client.clone(),
            Reachability::new(client.clone(), config.network.probe_timeout()),
        );
        let session = Arc::new(SessionService::new(
            CredentialStore::new(login_db),
            validator,
            online.clone(),
        ));

        let pages = Arc::new(ReplicaManager::open(
            data_dir,
            StoreBinding::new(PAGES_DB, config.sync.naming),
            client,
            &config.sync,
        )?);

        // Subscribe before resolving so the first do_sync transition is seen
        let listener = pages.spawn_session_listener(&session);
        let initializer = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session.initialize().await;
            })
        };

        Ok(Self {
            config,
            online,
            pages,
            session,
            settings,
            tasks: vec![listener, initializer],
        })
    }

    /// Stop background tasks and any running replication
    pub async fn shutdown(self) {
        info!("Shutting down background tasks");
        for task in &self.tasks {
            task.abort();
        }
        // Aborted tasks release their store handles once joined
        for task in self.tasks {
            let _ = task.await;
        }
        self.pages.on_logout().await;
        info!("Shutdown complete");
    }
}
