use redb::TableDefinition;

/// Documents: doc_id -> Document (JSON)
pub const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// Change log: sequence_number -> ChangeEntry (msgpack)
pub const CHANGES: TableDefinition<u64, &[u8]> = TableDefinition::new("changes");

/// Replication checkpoints: remote_id -> Checkpoint (msgpack)
pub const CHECKPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoints");
