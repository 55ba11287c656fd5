//! Remote credential validation by write probe.
//!
//! Credentials are considered valid when a disposable marker document can be
//! written to and deleted from the remote database they name.

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credentials::Credentials;
use super::reachability::Reachability;
use crate::remote::{RemoteError, RemoteStore};
use crate::storage::Document;

/// Id prefix of the marker document written by the probe
pub const PROBE_DOC_PREFIX: &str = "credentials-probe-";

/// Signature in the server's error text for a rejected username/password
const AUTHENTICATION_SIGNATURE: &str = "is incorrect";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Authorization failed: {reason}")]
    AuthorizationFailed { reason: String },
    #[error("Remote host is not reachable: {url}")]
    HostUnreachable { url: String },
    #[error("No credentials given")]
    NullCredentials,
}

impl ValidationError {
    /// Fixed message shown to the user for this outcome
    pub fn user_message(&self) -> &'static str {
        match self {
            ValidationError::AuthenticationFailed => "Wrong username or password",
            ValidationError::AuthorizationFailed { .. } => "You are not authorized",
            ValidationError::HostUnreachable { .. } => "URL cannot be reached",
            ValidationError::NullCredentials => "Given login credentials were null",
        }
    }
}

/// Classify a failure that happened after the host was found reachable
pub fn classify(error: &RemoteError) -> ValidationError {
    let text = error.to_string();
    if text.contains(AUTHENTICATION_SIGNATURE) {
        ValidationError::AuthenticationFailed
    } else {
        ValidationError::AuthorizationFailed { reason: text }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialsValidator {
    client: reqwest::Client,
    reachability: Reachability,
}

impl CredentialsValidator {
    pub fn new(client: reqwest::Client, reachability: Reachability) -> Self {
        Self {
            client,
            reachability,
        }
    }

    pub async fn validate(&self, credentials: Option<&Credentials>) -> Result<(), ValidationError> {
        let Some(credentials) = credentials else {
            return Err(ValidationError::NullCredentials);
        };

        info!(username = %credentials.username, url = %credentials.url, db = %credentials.db, "Validating credentials");

        if !self.reachability.probe(&credentials.url).await {
            debug!(url = %credentials.url, "Remote not reachable, skipping write probe");
            return Err(ValidationError::HostUnreachable {
                url: credentials.url.clone(),
            });
        }

        match self.write_probe(credentials).await {
            Ok(()) => {
                debug!("Probe document written and deleted, credentials are valid");
                Ok(())
            }
            Err(e) => {
                let classified = classify(&e);
                info!(error = %e, outcome = ?classified, "Credentials are not valid");
                Err(classified)
            }
        }
    }

    /// Open the remote database, write a marker document, then delete it
    async fn write_probe(&self, credentials: &Credentials) -> Result<(), RemoteError> {
        let remote = RemoteStore::open(
            self.client.clone(),
            &credentials.url,
            &credentials.db,
            Some(credentials),
        )
        .await?;

        let mut marker = Document::new(format!("{PROBE_DOC_PREFIX}{}", uuid::Uuid::new_v4()));
        marker.body.insert(
            "createdAt".to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        let rev = remote.put(&marker).await?;

        // The marker exists from here on, so the delete is always attempted
        if let Err(e) = remote.remove(&marker.id, &rev).await {
            warn!(doc_id = %marker.id, error = %e, "Failed to delete probe document");
            return Err(e);
        }
        Ok(())
    }
}
