//! HTTP client for a CouchDB-compatible remote document database

use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::login::Credentials;
use crate::storage::Document;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid remote URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{error}: {reason} (status {status})")]
    Server {
        error: String,
        reason: String,
        status: u16,
    },
}

impl RemoteError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RemoteError::Http(e) => e.status(),
            RemoteError::Server { status, .. } => StatusCode::from_u16(*status).ok(),
            RemoteError::InvalidUrl { .. } => None,
        }
    }
}

/// CouchDB error body, `{"error": "...", "reason": "..."}`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    doc: Option<Document>,
}

/// One row of the `_changes` feed
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    pub doc: Option<Document>,
    pub seq: Value,
}

/// A page of the `_changes` feed
#[derive(Debug, Clone, Deserialize)]
pub struct ChangesPage {
    pub last_seq: Value,
    pub results: Vec<ChangeRow>,
}

#[derive(Debug, Serialize)]
struct BulkDocsRequest<'a> {
    docs: &'a [Document],
    new_edits: bool,
}

#[derive(Debug, Deserialize)]
struct BulkDocsResult {
    #[serde(default)]
    error: Option<String>,
    id: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Format a CouchDB sequence value for use as a `since` parameter.
///
/// CouchDB 1.x uses integers, 2.x+ opaque strings.
pub fn seq_to_string(seq: &Value) -> String {
    match seq {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A handle to one database on a remote server
#[derive(Clone)]
pub struct RemoteStore {
    auth: Option<(String, String)>,
    base_url: Url,
    client: reqwest::Client,
    db: String,
}

impl RemoteStore {
    /// Create a handle without contacting the server
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        db: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }

        Ok(Self {
            auth: credentials.map(|c| (c.username.clone(), c.password.clone())),
            base_url,
            client,
            db: db.to_string(),
        })
    }

    /// Create a handle and check that the database is accessible
    pub async fn open(
        client: reqwest::Client,
        base_url: &str,
        db: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Self, RemoteError> {
        let store = Self::new(client, base_url, db, credentials)?;
        store.info().await?;
        debug!(remote = %store.id(), "Opened remote database");
        Ok(store)
    }

    pub fn db_name(&self) -> &str {
        &self.db
    }

    /// Stable identifier of this remote database (no credentials)
    pub fn id(&self) -> String {
        self.url(&[]).to_string()
    }

    /// `GET /{db}`
    pub async fn info(&self) -> Result<Value, RemoteError> {
        let response = self.request(Method::GET, &[]).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Fetch a document, `None` if it does not exist or was deleted
    pub async fn get(&self, id: &str) -> Result<Option<Document>, RemoteError> {
        let response = self.request(Method::GET, &[id]).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    /// Create or update a document, returning the new revision
    pub async fn put(&self, doc: &Document) -> Result<String, RemoteError> {
        let response = self
            .request(Method::PUT, &[doc.id.as_str()])
            .json(doc)
            .send()
            .await?;
        let written: WriteResponse = check(response).await?.json().await?;
        Ok(written.rev)
    }

    /// Delete a document at `rev`
    pub async fn remove(&self, id: &str, rev: &str) -> Result<String, RemoteError> {
        let response = self
            .request(Method::DELETE, &[id])
            .query(&[("rev", rev)])
            .send()
            .await?;
        let written: WriteResponse = check(response).await?.json().await?;
        Ok(written.rev)
    }

    /// All live documents
    pub async fn all_docs(&self) -> Result<Vec<Document>, RemoteError> {
        let response = self
            .request(Method::GET, &["_all_docs"])
            .query(&[("include_docs", "true")])
            .send()
            .await?;
        let page: AllDocsResponse = check(response).await?.json().await?;
        Ok(page.rows.into_iter().filter_map(|row| row.doc).collect())
    }

    /// Read the change feed after `since`, including documents
    pub async fn changes(&self, since: Option<&str>, limit: usize) -> Result<ChangesPage, RemoteError> {
        let limit = limit.to_string();
        let mut query = vec![
            ("include_docs", "true"),
            ("style", "main_only"),
            ("limit", limit.as_str()),
        ];
        if let Some(since) = since {
            query.push(("since", since));
        }

        let response = self
            .request(Method::GET, &["_changes"])
            .query(&query)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Write documents with their revisions preserved (`new_edits: false`).
    ///
    /// Returns the number of documents the server accepted.
    pub async fn bulk_docs_replicated(&self, docs: &[Document]) -> Result<usize, RemoteError> {
        if docs.is_empty() {
            return Ok(0);
        }

        let body = BulkDocsRequest {
            docs,
            new_edits: false,
        };
        let response = self
            .request(Method::POST, &["_bulk_docs"])
            .json(&body)
            .send()
            .await?;
        let results: Vec<BulkDocsResult> = check(response).await?.json().await?;

        let mut rejected = 0;
        for result in &results {
            if let Some(error) = &result.error {
                rejected += 1;
                debug!(
                    doc_id = %result.id,
                    error = %error,
                    reason = result.reason.as_deref().unwrap_or_default(),
                    "Remote rejected replicated document"
                );
            }
        }
        // With new_edits=false CouchDB omits successful rows from the response
        Ok(docs.len().saturating_sub(rejected))
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.db).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        match &self.auth {
            Some((username, password)) => builder.basic_auth(username, Some(password)),
            None => builder,
        }
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("base_url", &self.base_url.as_str())
            .field("db", &self.db)
            .finish()
    }
}

/// Turn a non-2xx response into a `RemoteError::Server`
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_else(|_| ErrorBody {
        error: status
            .canonical_reason()
            .unwrap_or("unknown_error")
            .to_string(),
        reason: text,
    });

    Err(RemoteError::Server {
        error: body.error,
        reason: body.reason,
        status: status.as_u16(),
    })
}
