mod client;

pub use client::{seq_to_string, ChangeRow, ChangesPage, RemoteError, RemoteStore};
