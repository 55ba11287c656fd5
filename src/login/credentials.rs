use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::models::DOC_VERSION;
use crate::storage::{Database, DatabaseError, Document};

/// Well-known id of the saved credentials document
pub const CREDENTIALS_DOC_ID: &str = "credentials";

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Malformed credentials document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Login for a remote database server.
///
/// Equality is field-wise; `Debug` never shows the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Remote database name
    pub db: String,
    pub password: String,
    /// Remote server base URL
    pub url: String,
    pub username: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        url: impl Into<String>,
        db: impl Into<String>,
    ) -> Self {
        Self {
            db: db.into(),
            password: password.into(),
            url: url.into(),
            username: username.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("url", &self.url)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

/// Stored form of the credentials document
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsRecord {
    doc_version: u32,
    #[serde(flatten)]
    credentials: Credentials,
}

/// Durable record of the single saved credential set
#[derive(Debug, Clone)]
pub struct CredentialStore {
    db: Database,
}

impl CredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace any saved credentials with `credentials`
    pub fn save(&self, credentials: &Credentials) -> Result<(), CredentialStoreError> {
        if !self.clear()? {
            tracing::debug!("No previous credentials to delete");
        }

        let record = CredentialsRecord {
            doc_version: DOC_VERSION,
            credentials: credentials.clone(),
        };
        let doc = Document::from_record(CREDENTIALS_DOC_ID, &record)?;
        self.db.put_document(doc)?;
        tracing::debug!(username = %credentials.username, url = %credentials.url, "Saved credentials");
        Ok(())
    }

    /// Load the saved credentials, `None` if nothing is saved
    pub fn load(&self) -> Result<Option<Credentials>, CredentialStoreError> {
        match self.db.get_document(CREDENTIALS_DOC_ID)? {
            Some(doc) => {
                let record: CredentialsRecord = doc.to_record()?;
                Ok(Some(record.credentials))
            }
            None => Ok(None),
        }
    }

    /// Delete the saved credentials. Returns false if nothing was saved.
    pub fn clear(&self) -> Result<bool, CredentialStoreError> {
        let Some(doc) = self.db.get_document(CREDENTIALS_DOC_ID)? else {
            return Ok(false);
        };
        let rev = doc.rev.unwrap_or_default();
        Ok(self.db.remove_document(CREDENTIALS_DOC_ID, &rev)?)
    }
}
