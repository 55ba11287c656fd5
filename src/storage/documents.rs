use redb::{ReadableTable, WriteTransaction};

use super::changes::append_change;
use super::db::{Database, DatabaseError};
use super::models::{ChangeOrigin, Document, Revision, Revisions};
use super::tables::*;

impl Database {
    // ========================================================================
    // Document operations
    // ========================================================================

    /// Get a live document. Deleted documents read as missing.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>, DatabaseError> {
        Ok(self
            .get_raw_document(id)?
            .filter(|doc| !doc.deleted)
            .map(without_history))
    }

    /// Get a document as stored, including its revision history and its
    /// tombstone if it was deleted
    pub fn get_raw_document(&self, id: &str) -> Result<Option<Document>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS)?;

        let result = table.get(id)?;
        match result {
            Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Store a document and return its new revision.
    ///
    /// `doc.rev` must match the stored revision of a live document, and must
    /// be absent for a new one. A deleted document may be recreated without a
    /// revision.
    pub fn put_document(&self, doc: Document) -> Result<String, DatabaseError> {
        debug_assert!(!doc.id.is_empty(), "document id must not be empty");

        let write_txn = self.begin_write()?;
        let previous = match read_stored(&write_txn, &doc.id)? {
            None if doc.rev.is_some() => {
                return Err(DatabaseError::Conflict { id: doc.id });
            }
            None => None,
            Some(existing) if existing.deleted => {
                if doc.rev.is_some() && doc.rev != existing.rev {
                    return Err(DatabaseError::Conflict { id: doc.id });
                }
                existing.history()
            }
            Some(existing) => {
                if doc.rev != existing.rev {
                    return Err(DatabaseError::Conflict { id: doc.id });
                }
                existing.history()
            }
        };

        let (rev, revisions) = next_revision(previous.as_ref());
        let stored = Document {
            rev: Some(rev.clone()),
            deleted: false,
            revisions: Some(revisions),
            ..doc
        };
        write_stored(&write_txn, &stored)?;
        append_change(&write_txn, &stored, ChangeOrigin::Local)?;
        write_txn.commit()?;

        Ok(rev)
    }

    /// Delete a live document at revision `rev`.
    ///
    /// Returns false if there was no live document to delete.
    pub fn remove_document(&self, id: &str, rev: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing = match read_stored(&write_txn, id)? {
            Some(existing) if !existing.deleted => existing,
            _ => return Ok(false),
        };
        if existing.rev.as_deref() != Some(rev) {
            return Err(DatabaseError::Conflict { id: id.to_string() });
        }

        let (next, revisions) = next_revision(existing.history().as_ref());
        let mut tombstone = Document::tombstone(id, next);
        tombstone.revisions = Some(revisions);
        write_stored(&write_txn, &tombstone)?;
        append_change(&write_txn, &tombstone, ChangeOrigin::Local)?;
        write_txn.commit()?;

        Ok(true)
    }

    /// Apply a document received from a remote store, keeping its revision.
    ///
    /// The document is only written if its revision wins over the stored one.
    /// Its `_revisions`, when present and consistent, become the local
    /// history. Returns whether it was applied.
    pub fn apply_replicated(&self, doc: &Document) -> Result<bool, DatabaseError> {
        let Some(incoming) = doc.revision() else {
            tracing::debug!(doc_id = %doc.id, "Skipping replicated document without revision");
            return Ok(false);
        };

        let write_txn = self.begin_write()?;
        if let Some(existing) = read_stored(&write_txn, &doc.id)? {
            if existing.revision().is_some_and(|current| current >= incoming) {
                return Ok(false);
            }
        }

        let stored = Document {
            revisions: doc.history(),
            ..doc.clone()
        };
        write_stored(&write_txn, &stored)?;
        append_change(&write_txn, &stored, ChangeOrigin::Remote)?;
        write_txn.commit()?;

        Ok(true)
    }

    /// Get all live documents, ordered by id
    pub fn all_documents(&self) -> Result<Vec<Document>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS)?;

        let mut docs = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let doc: Document = serde_json::from_slice(value.value())?;
            if !doc.deleted {
                docs.push(without_history(doc));
            }
        }

        Ok(docs)
    }
}

/// The revision after `previous` together with its history
fn next_revision(previous: Option<&Revisions>) -> (String, Revisions) {
    let parent = previous.map(|p| Revision {
        generation: p.start,
        hash: p.ids.first().cloned().unwrap_or_default(),
    });
    let rev = Revision::next(parent.as_ref());
    let revisions = match previous {
        Some(previous) => Revisions::child_of(previous, &rev),
        None => Revisions::root(&rev),
    };
    (rev.to_string(), revisions)
}

fn without_history(doc: Document) -> Document {
    Document {
        revisions: None,
        ..doc
    }
}

fn read_stored(write_txn: &WriteTransaction, id: &str) -> Result<Option<Document>, DatabaseError> {
    let table = write_txn.open_table(DOCUMENTS)?;
    let result = table.get(id)?;
    match result {
        Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
        None => Ok(None),
    }
}

fn write_stored(write_txn: &WriteTransaction, doc: &Document) -> Result<(), DatabaseError> {
    let mut table = write_txn.open_table(DOCUMENTS)?;
    let data = serde_json::to_vec(doc)?;
    table.insert(doc.id.as_str(), data.as_slice())?;
    Ok(())
}
