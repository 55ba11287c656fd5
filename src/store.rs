//! Storage capability shared by the local and remote adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::remote::{RemoteError, RemoteStore};
use crate::storage::{Database, DatabaseError, Document};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Local store error: {0}")]
    Local(#[from] DatabaseError),
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),
}

/// Document operations available on whichever store is currently active.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable store name, for logs
    fn name(&self) -> String;

    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Create or update a document, returning its new revision
    async fn put(&self, doc: Document) -> Result<String, StoreError>;

    /// Delete a document at `rev`
    async fn remove(&self, id: &str, rev: &str) -> Result<(), StoreError>;

    async fn all_docs(&self) -> Result<Vec<Document>, StoreError>;
}

#[async_trait]
impl DocumentStore for Database {
    fn name(&self) -> String {
        format!("local:{}", Database::name(self))
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.get_document(id)?)
    }

    async fn put(&self, doc: Document) -> Result<String, StoreError> {
        Ok(self.put_document(doc)?)
    }

    async fn remove(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        self.remove_document(id, rev)?;
        Ok(())
    }

    async fn all_docs(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self.all_documents()?)
    }
}

#[async_trait]
impl DocumentStore for RemoteStore {
    fn name(&self) -> String {
        format!("remote:{}", self.db_name())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(RemoteStore::get(self, id).await?)
    }

    async fn put(&self, doc: Document) -> Result<String, StoreError> {
        Ok(RemoteStore::put(self, &doc).await?)
    }

    async fn remove(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        RemoteStore::remove(self, id, rev).await?;
        Ok(())
    }

    async fn all_docs(&self) -> Result<Vec<Document>, StoreError> {
        Ok(RemoteStore::all_docs(self).await?)
    }
}
