//! User interface settings, kept in their own local database

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::storage::models::DOC_VERSION;
use crate::storage::{Database, DatabaseError, Document};

pub const SETTINGS_DOC_ID: &str = "settings";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Malformed settings document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub dark_theme: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRecord {
    doc_version: u32,
    #[serde(flatten)]
    settings: Settings,
}

#[derive(Debug)]
pub struct SettingsStore {
    db: Database,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Load saved settings. A missing or unreadable document yields defaults.
    pub fn open(db: Database) -> Self {
        let settings = match read(&db) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!("No saved settings, using defaults");
                Settings::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                Settings::default()
            }
        };
        let (tx, _) = watch::channel(settings);
        Self { db, tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Persist `settings` and publish them to subscribers
    pub fn save(&self, settings: Settings) -> Result<(), SettingsError> {
        let record = SettingsRecord {
            doc_version: DOC_VERSION,
            settings: settings.clone(),
        };
        let mut doc = Document::from_record(SETTINGS_DOC_ID, &record)?;
        doc.rev = self.db.get_document(SETTINGS_DOC_ID)?.and_then(|d| d.rev);
        self.db.put_document(doc)?;

        self.tx.send_replace(settings);
        Ok(())
    }
}

fn read(db: &Database) -> Result<Option<Settings>, SettingsError> {
    match db.get_document(SETTINGS_DOC_ID)? {
        Some(doc) => {
            let record: SettingsRecord = doc.to_record()?;
            Ok(Some(record.settings))
        }
        None => Ok(None),
    }
}
