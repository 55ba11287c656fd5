mod changes;
pub mod db;
mod documents;
pub mod models;
mod tables;

pub use db::{Database, DatabaseError};
pub use models::{ChangeEntry, ChangeOrigin, Checkpoint, Document, Revision, Revisions};
pub use tables::*;
