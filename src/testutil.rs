//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::net::TcpListener;

use serde_json::json;
use tempfile::TempDir;

use crate::config::Config;
use crate::login::Credentials;
use crate::storage::{Database, Document};

/// Open a fresh database named `test` in a temporary directory.
///
/// The caller must keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path(), "test").unwrap();
    (db, temp_dir)
}

/// A `Config` rooted in `data_dir` with short sync timings.
pub fn test_config(data_dir: &std::path::Path) -> Config {
    let mut config = Config {
        data_dir: data_dir.to_string_lossy().into_owned(),
        ..Default::default()
    };
    config.network.probe_timeout_ms = 500;
    config.network.request_timeout_ms = 2_000;
    config.sync.interval_ms = 50;
    config.sync.max_backoff_ms = 200;
    config
}

/// A document with a single `text` field.
pub fn make_document(id: &str, text: &str) -> Document {
    let mut doc = Document::new(id);
    doc.body.insert("text".to_string(), json!(text));
    doc
}

/// Credentials for user `alice` against `url`.
pub fn make_credentials(url: &str, db: &str) -> Credentials {
    Credentials::new("alice", "wonderland", url, db)
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
