//! Owns the page store and its replication link

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::link::{ReplicationLink, ReplicationOptions};
use crate::config::{RemoteNaming, SyncConfig};
use crate::login::{CredentialStoreError, Credentials, SessionService};
use crate::remote::{RemoteError, RemoteStore};
use crate::storage::{Database, DatabaseError};
use crate::store::DocumentStore;

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("Credential store error: {0}")]
    Credentials(#[from] CredentialStoreError),
    #[error("Local store error: {0}")]
    Local(#[from] DatabaseError),
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),
}

/// Which local database a manager owns and how its remote is named
#[derive(Debug, Clone)]
pub struct StoreBinding {
    pub local_name: String,
    pub naming: RemoteNaming,
}

impl StoreBinding {
    pub fn new(local_name: impl Into<String>, naming: RemoteNaming) -> Self {
        Self {
            local_name: local_name.into(),
            naming,
        }
    }
}

#[derive(Default)]
struct Active {
    link: Option<ReplicationLink>,
    remote: Option<Arc<RemoteStore>>,
}

pub struct ReplicaManager {
    active: Mutex<Active>,
    binding: StoreBinding,
    client: reqwest::Client,
    loaded_tx: watch::Sender<bool>,
    /// `None` in remote-only mode
    local: Option<Database>,
    options: ReplicationOptions,
}

impl ReplicaManager {
    /// Open the local database for `binding`, unless `config.remote_only`
    pub fn open(
        data_dir: &Path,
        binding: StoreBinding,
        client: reqwest::Client,
        config: &SyncConfig,
    ) -> Result<Self, ReplicaError> {
        let local = if config.remote_only {
            info!(store = %binding.local_name, "Remote-only mode, local store not opened");
            None
        } else {
            Some(Database::open(data_dir, &binding.local_name)?)
        };
        Ok(Self::new(binding, local, client, ReplicationOptions::from(config)))
    }

    pub fn new(
        binding: StoreBinding,
        local: Option<Database>,
        client: reqwest::Client,
        options: ReplicationOptions,
    ) -> Self {
        let (loaded_tx, _) = watch::channel(local.is_some());
        Self {
            active: Mutex::new(Active::default()),
            binding,
            client,
            loaded_tx,
            local,
            options,
        }
    }

    pub fn binding(&self) -> &StoreBinding {
        &self.binding
    }

    pub fn is_remote_only(&self) -> bool {
        self.local.is_none()
    }

    /// Open the remote store for `credentials` and start syncing with it.
    ///
    /// A link that is already running is replaced.
    pub async fn on_authenticated(&self, credentials: &Credentials) -> Result<(), ReplicaError> {
        let db_name = self.binding.naming.database_name(credentials);
        let remote = RemoteStore::open(
            self.client.clone(),
            &credentials.url,
            &db_name,
            Some(credentials),
        )
        .await?;
        let remote = Arc::new(remote);

        let mut active = self.active.lock().await;
        if let Some(link) = active.link.take() {
            link.stop().await;
        }

        match &self.local {
            Some(local) => {
                active.link = Some(ReplicationLink::start(
                    local.clone(),
                    Arc::clone(&remote),
                    self.options,
                ));
            }
            None => {
                info!(remote = %remote.id(), "Using remote store directly");
                self.loaded_tx.send_replace(true);
            }
        }
        active.remote = Some(remote);
        Ok(())
    }

    /// Stop syncing. In remote-only mode the store becomes unavailable.
    pub async fn on_logout(&self) {
        let mut active = self.active.lock().await;
        if let Some(link) = active.link.take() {
            link.stop().await;
        }
        active.remote = None;

        if self.local.is_none() {
            self.loaded_tx.send_replace(false);
        }
        debug!(store = %self.binding.local_name, "Store detached from remote");
    }

    pub async fn is_syncing(&self) -> bool {
        let active = self.active.lock().await;
        active.link.as_ref().is_some_and(|link| link.is_running())
    }

    /// The store operations should use right now
    pub async fn store(&self) -> Option<Arc<dyn DocumentStore>> {
        if let Some(local) = &self.local {
            return Some(Arc::new(local.clone()));
        }
        let active = self.active.lock().await;
        active
            .remote
            .as_ref()
            .map(|remote| Arc::clone(remote) as Arc<dyn DocumentStore>)
    }

    /// Resolve once a store is available
    pub async fn wait_loaded(&self) {
        let mut rx = self.loaded_tx.subscribe();
        // The sender lives as long as self
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    /// Follow the session: sync with the saved credentials while `do_sync`
    /// is on, re-attaching when they change, and stop on logout.
    pub fn spawn_session_listener(self: &Arc<Self>, session: &Arc<SessionService>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        let mut state_rx = session.subscribe();
        let mut logout_rx = session.subscribe_logout();

        tokio::spawn(async move {
            // Credentials the running link was started with
            let mut attached: Option<Credentials> = None;

            loop {
                let do_sync = state_rx.borrow_and_update().do_sync;
                if do_sync {
                    attached = manager.attach_saved(&session, attached).await;
                }

                // do_sync only turns off after a link exists through logout,
                // which is handled once, on the broadcast
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    notice = logout_rx.recv() => match notice {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if attached.take().is_some() {
                                manager.on_logout().await;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Session listener exiting");
        })
    }

    /// Attach to the saved credentials unless the link already uses them.
    ///
    /// Returns the credentials the link runs with afterwards. On failure the
    /// previous link, if any, keeps running.
    async fn attach_saved(
        &self,
        session: &SessionService,
        attached: Option<Credentials>,
    ) -> Option<Credentials> {
        let credentials = match session.saved_credentials() {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                warn!("Sync requested without saved credentials");
                return attached;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load credentials for sync");
                return attached;
            }
        };
        if attached.as_ref() == Some(&credentials) {
            return attached;
        }

        if let Some(previous) = &attached {
            info!(
                from = %previous.username,
                to = %credentials.username,
                db = %credentials.db,
                "Saved credentials changed, re-attaching"
            );
        }
        match self.on_authenticated(&credentials).await {
            Ok(()) => Some(credentials),
            Err(e) => {
                warn!(store = %self.binding.local_name, error = %e, "Failed to start sync");
                attached
            }
        }
    }
}

impl std::fmt::Debug for ReplicaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaManager")
            .field("binding", &self.binding)
            .field("remote_only", &self.is_remote_only())
            .finish()
    }
}
