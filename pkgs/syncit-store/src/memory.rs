//! In-memory document store
//!
//! Suitable for tests and single-process embedding. Changes are broadcast
//! only within the process. `set_online(false)` makes every call fail with
//! `StoreError::Unavailable`, which is how callers exercise their
//! connectivity-loss paths.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::document::{ChangeFeed, CollectionSnapshot, Document, Fields};
use crate::error::StoreError;
use crate::hub::ChangeHub;
use crate::store::DocumentStore;
use crate::StoreConfig;

type Collection = BTreeMap<String, Fields>;

/// Process-local document store
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
    hub: ChangeHub,
    online: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            hub: ChangeHub::new(config.channel_capacity),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining connectivity
    pub fn set_online(&self, online: bool) {
        debug!("Memory store online: {}", online);
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn snapshot(&self, collection: &str) -> CollectionSnapshot {
        let collections = self.collections.read();
        let documents = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default();

        CollectionSnapshot {
            collection: collection.to_string(),
            documents,
        }
    }

    fn notify(&self, collection: &str) {
        if self.hub.has_subscribers(collection) {
            self.hub.publish(collection, self.snapshot(collection));
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, id: &str, data: Fields) -> Result<(), StoreError> {
        self.ensure_online()?;
        {
            let mut collections = self.collections.write();
            let docs = collections.entry(collection.to_string()).or_default();
            if docs.contains_key(id) {
                return Err(StoreError::already_exists(collection, id));
            }
            docs.insert(id.to_string(), data);
        }

        debug!("Created {}/{}", collection, id);
        self.notify(collection);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        let collections = self.collections.read();

        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        Ok(self.snapshot(collection).documents)
    }

    async fn update(&self, collection: &str, id: &str, partial: Fields) -> Result<(), StoreError> {
        self.ensure_online()?;
        {
            let mut collections = self.collections.write();
            let data = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            for (key, value) in partial {
                data.insert(key, value);
            }
        }

        debug!("Updated {}/{}", collection, id);
        self.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let removed = self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();

        if removed {
            debug!("Deleted {}/{}", collection, id);
            self.notify(collection);
        }
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        self.ensure_online()?;
        // Receiver first so no write can slip between the snapshot and the feed
        let receiver = self.hub.receiver(collection);
        let initial = self.snapshot(collection);
        Ok(ChangeFeed::new(collection, initial.into(), receiver))
    }
}
