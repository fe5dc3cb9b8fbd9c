//! Per-collection broadcast channels shared by the backends

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::document::{ChangeNotice, CollectionSnapshot};

/// Registry of broadcast senders, one per collection, created on first use
pub(crate) struct ChangeHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeNotice>>>,
}

impl ChangeHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, collection: &str) -> broadcast::Sender<ChangeNotice> {
        let mut channels = self.channels.lock();
        channels
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub(crate) fn receiver(&self, collection: &str) -> broadcast::Receiver<ChangeNotice> {
        self.sender(collection).subscribe()
    }

    /// Whether anybody is listening, so backends can skip building snapshots
    pub(crate) fn has_subscribers(&self, collection: &str) -> bool {
        self.channels
            .lock()
            .get(collection)
            .is_some_and(|tx| tx.receiver_count() > 0)
    }

    pub(crate) fn publish(&self, collection: &str, snapshot: CollectionSnapshot) {
        // No receivers is fine
        let _ = self
            .sender(collection)
            .send(ChangeNotice::Changed(Arc::new(snapshot)));
    }

    pub(crate) fn publish_error(&self, collection: &str, error: crate::StoreError) {
        let _ = self.sender(collection).send(ChangeNotice::Failed(error));
    }
}
