use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{ChangeEntry, ChangeOrigin, Checkpoint, Document};
use super::tables::*;

/// Append a change for `doc` inside an open write transaction.
///
/// Reading the last sequence and inserting the next one in the same
/// transaction keeps the log gapless under concurrent writers.
pub(super) fn append_change(
    write_txn: &WriteTransaction,
    doc: &Document,
    origin: ChangeOrigin,
) -> Result<u64, DatabaseError> {
    let mut table = write_txn.open_table(CHANGES)?;

    let previous_sequence = match table.last()? {
        Some((key, _)) => key.value(),
        None => 0,
    };
    let sequence = previous_sequence + 1;

    let entry = ChangeEntry {
        deleted: doc.deleted,
        doc_id: doc.id.clone(),
        origin,
        rev: doc.rev.clone().unwrap_or_default(),
        sequence,
        timestamp: chrono::Utc::now(),
    };
    let data = rmp_serde::to_vec(&entry)?;
    table.insert(sequence, data.as_slice())?;
    Ok(sequence)
}

impl Database {
    // ========================================================================
    // Change log operations
    // ========================================================================

    /// Get the latest sequence number
    pub fn latest_sequence(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHANGES)?;

        let result = table.last()?;
        match result {
            Some((key, _)) => Ok(key.value()),
            None => Ok(0),
        }
    }

    /// Get up to `limit` change entries after `since`
    pub fn changes_since(&self, since: u64, limit: usize) -> Result<Vec<ChangeEntry>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHANGES)?;

        let mut entries = Vec::new();
        for result in table.range((since + 1)..)?.take(limit) {
            let (_, value) = result?;
            let entry: ChangeEntry = rmp_serde::from_slice(value.value())?;
            entries.push(entry);
        }

        Ok(entries)
    }

    // ========================================================================
    // Checkpoint operations
    // ========================================================================

    pub fn get_checkpoint(&self, remote_id: &str) -> Result<Option<Checkpoint>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHECKPOINTS)?;

        let result = table.get(remote_id)?;
        match result {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_checkpoint(&self, remote_id: &str, checkpoint: &Checkpoint) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(CHECKPOINTS)?;
            let data = rmp_serde::to_vec(checkpoint)?;
            table.insert(remote_id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
