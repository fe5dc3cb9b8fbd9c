//! SynciT Store - document storage with collection change feeds
//!
//! This crate defines the boundary between the group layer and the managed
//! document database it runs on. Groups are stored as schemaless JSON documents
//! in named collections, and every subscriber of a collection receives the full
//! collection again after each change.
//!
//! # Backends
//!
//! - **MemoryDocumentStore**: process-local maps with a connectivity switch,
//!   used by tests and single-process embedding
//! - **SqliteDocumentStore**: Sea-ORM over SQLite, with an optional poller that
//!   notices writes from other processes
//!
//! # Database Schema
//!
//! - `documents`: `(collection, doc_id)` primary key, JSON `body`, `updated_at`
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use syncit_store::{DocumentStore, Fields, SqliteDocumentStore, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig {
//!     db_path: "syncit.db".into(),
//!     ..Default::default()
//! };
//! let store = SqliteDocumentStore::open(&config).await?;
//!
//! let mut feed = store.subscribe("groups").await?;
//! store.create("groups", "1700000000000", Fields::new()).await?;
//!
//! while let Some(Ok(snapshot)) = feed.next().await {
//!     println!("{} groups", snapshot.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod entities;
pub mod error;
mod hub;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod store;

pub use document::{ChangeFeed, ChangeNotice, CollectionSnapshot, Document, Fields};
pub use error::StoreError;
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
pub use store::DocumentStore;

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Buffered snapshots per collection before slow subscribers lag (default: 64)
    pub channel_capacity: usize,

    /// Interval in milliseconds for detecting writes from other processes (default: 1000ms)
    pub poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("syncit.db"),
            channel_capacity: 64,
            poll_interval_ms: 1000,
        }
    }
}
