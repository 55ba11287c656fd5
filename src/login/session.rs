//! Login session state machine.
//!
//! Session state is published as one value through a `watch` channel, so a
//! transition changes `show_login` and `do_sync` together and late
//! subscribers see the latest state immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use super::credentials::{CredentialStore, CredentialStoreError, Credentials};
use super::initial::{resolve_initial_state, InitialState};
use super::validator::{CredentialsValidator, ValidationError};
use crate::online::OnlineMonitor;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Credential store error: {0}")]
    Storage(#[from] CredentialStoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl LoginError {
    /// Message to show the user: a fixed text for classified validation
    /// failures, the error's own text otherwise.
    pub fn user_message(&self) -> String {
        match self {
            LoginError::Validation(e) => e.user_message().to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Offline,
    Online,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Offline => "Offline",
            ConnectionStatus::Online => "Online",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Synchronization with the remote store should run
    pub do_sync: bool,
    /// The initial state has been resolved
    pub initialized: bool,
    /// The login form should be shown
    pub show_login: bool,
}

impl SessionState {
    /// Assume a login is needed until proven otherwise
    pub const STARTUP: SessionState = SessionState {
        do_sync: false,
        initialized: false,
        show_login: true,
    };

    pub fn from_initial(initial: InitialState) -> Self {
        Self {
            do_sync: initial.is_online && initial.authorized,
            initialized: true,
            show_login: initial.is_online && !initial.authorized,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.do_sync {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        }
    }
}

pub struct SessionService {
    credentials: CredentialStore,
    /// Set once login/logout has published, so a late initial resolution
    /// does not overwrite it. Only read or written while holding the state
    /// channel's lock.
    explicit_transition: AtomicBool,
    logout_tx: broadcast::Sender<()>,
    online: OnlineMonitor,
    state_tx: watch::Sender<SessionState>,
    validator: CredentialsValidator,
}

impl SessionService {
    pub fn new(
        credentials: CredentialStore,
        validator: CredentialsValidator,
        online: OnlineMonitor,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::STARTUP);
        let (logout_tx, _) = broadcast::channel(16);
        Self {
            credentials,
            explicit_transition: AtomicBool::new(false),
            logout_tx,
            online,
            state_tx,
            validator,
        }
    }

    /// Resolve the initial state and publish it
    pub async fn initialize(&self) -> SessionState {
        let initial = resolve_initial_state(&self.online, &self.credentials, &self.validator).await;
        let resolved = SessionState::from_initial(initial);

        let mut explicit = false;
        let mut state = resolved;
        self.state_tx.send_modify(|current| {
            explicit = self.explicit_transition.load(Ordering::SeqCst);
            if !explicit {
                current.show_login = resolved.show_login;
                current.do_sync = resolved.do_sync;
            }
            current.initialized = true;
            state = *current;
        });

        if explicit {
            debug!("Login state changed during initialization, keeping it");
        }
        info!(
            show_login = state.show_login,
            do_sync = state.do_sync,
            "Session initialized"
        );
        state
    }

    /// Validate `credentials` and, on success, save them and start the session.
    ///
    /// On failure the state is left as it was.
    pub async fn login(&self, credentials: Option<Credentials>) -> Result<(), LoginError> {
        let Some(credentials) = credentials else {
            return Err(ValidationError::NullCredentials.into());
        };
        info!(username = %credentials.username, url = %credentials.url, "Login");

        self.validator.validate(Some(&credentials)).await?;
        self.credentials.save(&credentials)?;

        self.publish(false, true);
        info!(username = %credentials.username, "Login successful");
        Ok(())
    }

    /// End the session and forget the saved credentials
    pub async fn logout(&self) -> Result<(), LoginError> {
        info!("Logout");
        self.publish(true, false);

        // No subscribers is fine
        let _ = self.logout_tx.send(());

        if !self.credentials.clear()? {
            debug!("No saved credentials to delete");
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Notifications sent on every logout
    pub fn subscribe_logout(&self) -> broadcast::Receiver<()> {
        self.logout_tx.subscribe()
    }

    pub fn saved_credentials(&self) -> Result<Option<Credentials>, CredentialStoreError> {
        self.credentials.load()
    }

    pub fn online(&self) -> &OnlineMonitor {
        &self.online
    }

    /// Publish an explicit transition
    fn publish(&self, show_login: bool, do_sync: bool) {
        self.state_tx.send_modify(|state| {
            self.explicit_transition.store(true, Ordering::SeqCst);
            state.show_login = show_login;
            state.do_sync = do_sync;
        });
    }
}
