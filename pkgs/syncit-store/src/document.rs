//! Documents, collection snapshots and change feeds

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Top-level fields of a document
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A single document in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Fields) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Shallow merge: every field in `partial` replaces the field of the same name
    pub fn merge(&mut self, partial: Fields) {
        for (key, value) in partial {
            self.data.insert(key, value);
        }
    }
}

/// Full contents of a collection at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub collection: String,
    pub documents: Vec<Document>,
}

impl CollectionSnapshot {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// What a backend broadcasts to subscribers of a collection
#[derive(Debug, Clone)]
pub enum ChangeNotice {
    Changed(Arc<CollectionSnapshot>),
    Failed(StoreError),
}

/// Live subscription to a collection.
///
/// Yields the snapshot taken at subscribe time first, then one snapshot per
/// change. Dropping the feed unsubscribes.
pub struct ChangeFeed {
    collection: String,
    initial: Option<Arc<CollectionSnapshot>>,
    receiver: broadcast::Receiver<ChangeNotice>,
}

impl ChangeFeed {
    pub fn new(
        collection: &str,
        initial: Arc<CollectionSnapshot>,
        receiver: broadcast::Receiver<ChangeNotice>,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            initial: Some(initial),
            receiver,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Wait for the next snapshot. Returns `None` once the backend is gone.
    pub async fn next(&mut self) -> Option<Result<Arc<CollectionSnapshot>, StoreError>> {
        if let Some(snapshot) = self.initial.take() {
            return Some(Ok(snapshot));
        }

        loop {
            match self.receiver.recv().await {
                Ok(ChangeNotice::Changed(snapshot)) => return Some(Ok(snapshot)),
                Ok(ChangeNotice::Failed(e)) => return Some(Err(e)),
                Err(RecvError::Lagged(skipped)) => {
                    // Snapshots are complete, so older ones can be dropped
                    warn!(
                        "Change feed for '{}' lagged, skipped {} snapshots",
                        self.collection, skipped
                    );
                }
                Err(RecvError::Closed) => {
                    debug!("Change feed for '{}' closed", self.collection);
                    return None;
                }
            }
        }
    }
}
