mod link;
mod manager;

pub use link::{sync_once, ReplicationLink, ReplicationOptions, SyncError, SyncStats};
pub use manager::{ReplicaError, ReplicaManager, StoreBinding};
