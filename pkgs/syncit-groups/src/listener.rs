//! Keeps the group cache in step with the backend collection

use parking_lot::Mutex;
use std::sync::Arc;
use syncit_store::{ChangeFeed, DocumentStore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::GroupCache;
use crate::error::Result;
use crate::models::UserId;
use crate::reconcile::reconcile;

/// Lifecycle of a [`ReconciliationListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Uninitialized,
    /// Subscribed, waiting for the first snapshot
    Subscribing,
    Active,
    TornDown,
}

/// Holds at most one live subscription to the groups collection and rebuilds
/// the current user's visible groups from every snapshot it delivers.
pub struct ReconciliationListener {
    store: Arc<dyn DocumentStore>,
    collection: String,
    cache: GroupCache,
    state: Arc<Mutex<ListenerState>>,
    user_id: Option<UserId>,
    task: Option<JoinHandle<()>>,
}

impl ReconciliationListener {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, cache: GroupCache) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            cache,
            state: Arc::new(Mutex::new(ListenerState::Uninitialized)),
            user_id: None,
            task: None,
        }
    }

    /// Subscribe on behalf of `user_id`.
    ///
    /// Starting again for the user already being served is a no-op; starting
    /// for a different user tears the previous subscription down first.
    #[instrument(skip(self))]
    pub async fn start(&mut self, user_id: &str) -> Result<()> {
        let running = self.task.as_ref().is_some_and(|task| !task.is_finished());
        if running && self.user_id.as_deref() == Some(user_id) {
            debug!("Listener already active for {}", user_id);
            return Ok(());
        }
        if self.task.is_some() {
            self.stop();
        }

        let epoch = self.cache.begin(user_id);
        *self.state.lock() = ListenerState::Subscribing;
        self.user_id = Some(user_id.to_string());

        let feed = match self.store.subscribe(&self.collection).await {
            Ok(feed) => feed,
            Err(e) => {
                error!("Failed to subscribe to '{}': {}", self.collection, e);
                self.cache.record_error(epoch, e.to_string());
                *self.state.lock() = ListenerState::TornDown;
                return Err(e.into());
            }
        };

        let cache = self.cache.clone();
        let state = self.state.clone();
        let user = user_id.to_string();
        self.task = Some(tokio::spawn(run_feed(feed, cache, state, user, epoch)));

        info!("Group listener started for {}", user_id);
        Ok(())
    }

    /// Tear down the live subscription, if any. The cached view is kept.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(
                "Group listener stopped for {}",
                self.user_id.as_deref().unwrap_or("<none>")
            );
        }
        *self.state.lock() = ListenerState::TornDown;
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    pub fn current_user(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn cache(&self) -> &GroupCache {
        &self.cache
    }
}

impl Drop for ReconciliationListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_feed(
    mut feed: ChangeFeed,
    cache: GroupCache,
    state: Arc<Mutex<ListenerState>>,
    user_id: String,
    epoch: u64,
) {
    while let Some(next) = feed.next().await {
        match next {
            Ok(snapshot) => {
                let groups = reconcile(&snapshot, &user_id);
                if cache.apply_snapshot(epoch, groups) {
                    debug!("Visible groups for {} updated", user_id);
                }
                let mut state = state.lock();
                if *state == ListenerState::Subscribing {
                    *state = ListenerState::Active;
                }
            }
            Err(e) => {
                warn!("Change feed for '{}' failed: {}", feed.collection(), e);
                cache.record_error(epoch, e.to_string());
            }
        }
    }

    debug!("Change feed for {} ended", user_id);
    *state.lock() = ListenerState::TornDown;
}
