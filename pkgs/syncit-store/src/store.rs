//! The document store contract consumed by the group layer

use async_trait::async_trait;

use crate::document::{ChangeFeed, Document, Fields};
use crate::error::StoreError;

/// A managed document database with a collection-wide change feed.
///
/// Writes are atomic per call. There is no ordering guarantee between calls
/// issued concurrently by different clients: the last write to a field wins.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new document. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, collection: &str, id: &str, data: Fields) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// All documents of a collection, ordered by id
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Merge top-level fields into an existing document.
    /// Fails with `NotFound` if the document is absent.
    async fn update(&self, collection: &str, id: &str, partial: Fields) -> Result<(), StoreError>;

    /// Remove a document. Removing an absent document is a no-op.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Subscribe to every insert, update and delete in a collection
    async fn subscribe(&self, collection: &str) -> Result<ChangeFeed, StoreError>;
}
