use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version written into application records (`docVersion`)
pub const DOC_VERSION: u32 = 1;

/// A JSON document as stored locally and exchanged with the remote store.
///
/// Field names follow the CouchDB wire format so the same value can be sent
/// to `_bulk_docs` and read back from `_changes` without conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(
        rename = "_deleted",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub deleted: bool,
    /// Ancestry of `rev`, sent with replicated writes
    #[serde(rename = "_revisions", default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<Revisions>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            revisions: None,
            body: Map::new(),
        }
    }

    pub fn with_body(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            body,
            ..Self::new(id)
        }
    }

    /// A deletion marker for `id` at revision `rev`
    pub fn tombstone(id: impl Into<String>, rev: String) -> Self {
        Self {
            rev: Some(rev),
            deleted: true,
            ..Self::new(id)
        }
    }

    /// Build a document whose body is the serialized form of `record`.
    ///
    /// The record must serialize to a JSON object.
    pub fn from_record<T: Serialize>(id: &str, record: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(record)? {
            Value::Object(body) => Ok(Self::with_body(id, body)),
            _ => Err(<serde_json::Error as serde::ser::Error>::custom(
                "record must serialize to a JSON object",
            )),
        }
    }

    /// Decode the document body into a typed record
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.body.clone()))
    }

    pub fn revision(&self) -> Option<Revision> {
        self.rev.as_deref().and_then(Revision::parse)
    }

    /// The stored ancestry, or a single-entry history for `rev`
    pub fn history(&self) -> Option<Revisions> {
        match (&self.revisions, self.revision()) {
            (Some(revisions), Some(rev))
                if revisions.start == rev.generation
                    && revisions.ids.first() == Some(&rev.hash) =>
            {
                Some(revisions.clone())
            }
            (_, Some(rev)) => Some(Revisions::root(&rev)),
            (_, None) => None,
        }
    }
}

/// A document revision, `"{generation}-{hash}"`.
///
/// Ordering is by generation, then by hash, which gives every replica the
/// same winner for concurrent edits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    pub generation: u64,
    pub hash: String,
}

impl Revision {
    pub fn parse(value: &str) -> Option<Self> {
        let (generation, hash) = value.split_once('-')?;
        let generation = generation.parse().ok()?;
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            generation,
            hash: hash.to_string(),
        })
    }

    /// The revision following `previous` (or the first one)
    pub fn next(previous: Option<&Revision>) -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self {
            generation: previous.map_or(1, |r| r.generation + 1),
            hash: hex::encode(bytes),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

/// Maximum number of ancestors kept per document
pub const REVS_LIMIT: usize = 100;

/// Revision ancestry in CouchDB's `_revisions` form: the newest generation and
/// the hashes from newest to oldest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisions {
    pub start: u64,
    pub ids: Vec<String>,
}

impl Revisions {
    /// History of a first revision
    pub fn root(rev: &Revision) -> Self {
        Self {
            start: rev.generation,
            ids: vec![rev.hash.clone()],
        }
    }

    /// History of `rev`, a child of the revision `parent` describes
    pub fn child_of(parent: &Revisions, rev: &Revision) -> Self {
        if parent.start + 1 != rev.generation {
            return Self::root(rev);
        }
        let mut ids = Vec::with_capacity(parent.ids.len() + 1);
        ids.push(rev.hash.clone());
        ids.extend(parent.ids.iter().take(REVS_LIMIT - 1).cloned());
        Self {
            start: rev.generation,
            ids,
        }
    }

    /// Full revision strings, newest first
    pub fn revs(&self) -> impl Iterator<Item = String> + '_ {
        self.ids
            .iter()
            .enumerate()
            .map(|(i, hash)| format!("{}-{hash}", self.start.saturating_sub(i as u64)))
    }
}

/// Where a change entered the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// An entry in the local change log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub deleted: bool,
    pub doc_id: String,
    pub origin: ChangeOrigin,
    pub rev: String,
    /// Monotonic, gapless sequence number
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Replication progress against one remote database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last local sequence examined by a push
    pub local_seq: u64,
    /// Opaque `last_seq` returned by the remote change feed
    pub remote_seq: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}
