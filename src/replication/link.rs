//! Continuous two-way sync between the local store and one remote database

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::remote::{seq_to_string, RemoteError, RemoteStore};
use crate::storage::{ChangeOrigin, Checkpoint, Database, DatabaseError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Local(#[from] DatabaseError),
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, Copy)]
pub struct ReplicationOptions {
    pub batch_size: usize,
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl From<&SyncConfig> for ReplicationOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            interval: Duration::from_millis(config.interval_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl ReplicationOptions {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.interval
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.interval))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub pulled: usize,
    pub pushed: usize,
}

/// A running sync task. Dropping it without [`stop`](Self::stop) cancels the
/// task but does not wait for it.
#[derive(Debug)]
pub struct ReplicationLink {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    remote_id: String,
}

impl ReplicationLink {
    pub fn start(local: Database, remote: Arc<RemoteStore>, options: ReplicationOptions) -> Self {
        let cancel = CancellationToken::new();
        let remote_id = remote.id();
        info!(local = %local.name(), remote = %remote_id, "Starting replication");

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run(local, remote, options, token).await;
        });

        Self {
            cancel,
            handle: Some(handle),
            remote_id,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the task and wait for it to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(remote = %self.remote_id, error = %e, "Replication task ended abnormally");
            }
        }
        info!(remote = %self.remote_id, "Replication stopped");
    }
}

impl Drop for ReplicationLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    local: Database,
    remote: Arc<RemoteStore>,
    options: ReplicationOptions,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let result = tokio::select! {
            result = sync_once(&local, &remote, options.batch_size) => result,
            _ = cancel.cancelled() => break,
        };

        let delay = match result {
            Ok(stats) => {
                if failures > 0 {
                    info!(remote = %remote.id(), failures, "Replication recovered");
                }
                failures = 0;
                if stats.pulled > 0 || stats.pushed > 0 {
                    debug!(pulled = stats.pulled, pushed = stats.pushed, "Sync round complete");
                }
                options.interval
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = options.backoff(failures);
                warn!(
                    remote = %remote.id(),
                    error = %e,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Sync link failure"
                );
                delay
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    debug!(remote = %remote.id(), "Replication task exiting");
}

/// Run one push and one pull round against `remote`.
pub async fn sync_once(
    local: &Database,
    remote: &RemoteStore,
    batch_size: usize,
) -> Result<SyncStats, SyncError> {
    let remote_id = remote.id();
    let mut checkpoint = local.get_checkpoint(&remote_id)?.unwrap_or_default();

    let pushed = push(local, remote, &remote_id, &mut checkpoint, batch_size).await?;
    let pulled = pull(local, remote, &remote_id, &mut checkpoint, batch_size).await?;

    Ok(SyncStats { pulled, pushed })
}

/// Send locally originated changes after the checkpoint
async fn push(
    local: &Database,
    remote: &RemoteStore,
    remote_id: &str,
    checkpoint: &mut Checkpoint,
    batch_size: usize,
) -> Result<usize, SyncError> {
    let mut pushed = 0;

    loop {
        let entries = local.changes_since(checkpoint.local_seq, batch_size)?;
        let Some(last) = entries.last().map(|e| e.sequence) else {
            break;
        };

        // Latest revision only; earlier entries for the same doc are superseded
        let mut latest: HashMap<&str, u64> = HashMap::new();
        for entry in entries.iter().filter(|e| e.origin == ChangeOrigin::Local) {
            latest.insert(entry.doc_id.as_str(), entry.sequence);
        }

        let mut ids: Vec<(&str, u64)> = latest.into_iter().collect();
        ids.sort_by_key(|(_, seq)| *seq);

        // Raw documents carry `_revisions`, so the remote extends its branch
        let mut docs = Vec::with_capacity(ids.len());
        for (id, _) in ids {
            if let Some(doc) = local.get_raw_document(id)? {
                docs.push(doc);
            }
        }

        pushed += remote.bulk_docs_replicated(&docs).await?;

        checkpoint.local_seq = last;
        checkpoint.updated_at = Some(chrono::Utc::now());
        local.put_checkpoint(remote_id, checkpoint)?;

        if entries.len() < batch_size {
            break;
        }
    }

    Ok(pushed)
}

/// Apply remote changes after the checkpoint
async fn pull(
    local: &Database,
    remote: &RemoteStore,
    remote_id: &str,
    checkpoint: &mut Checkpoint,
    batch_size: usize,
) -> Result<usize, SyncError> {
    let mut pulled = 0;

    loop {
        let page = remote
            .changes(checkpoint.remote_seq.as_deref(), batch_size)
            .await?;
        let count = page.results.len();

        for row in &page.results {
            match &row.doc {
                Some(doc) => {
                    if local.apply_replicated(doc)? {
                        pulled += 1;
                    }
                }
                None => debug!(doc_id = %row.id, "Change without document body, skipping"),
            }
        }

        let last_seq = seq_to_string(&page.last_seq);
        let advanced = checkpoint.remote_seq.as_deref() != Some(last_seq.as_str());
        checkpoint.remote_seq = Some(last_seq);
        checkpoint.updated_at = Some(chrono::Utc::now());
        local.put_checkpoint(remote_id, checkpoint)?;

        if count < batch_size || !advanced {
            break;
        }
    }

    Ok(pulled)
}
