//! SQLite document store built on Sea-ORM
//!
//! Each document is one row of the `documents` table with its fields stored as
//! a JSON object. Writes made through this handle are published to subscribers
//! immediately; writes made by other processes are picked up by the optional
//! poller started with [`SqliteDocumentStore::spawn_poller`].

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::document::{ChangeFeed, CollectionSnapshot, Document, Fields};
use crate::entities::documents;
use crate::error::StoreError;
use crate::hub::ChangeHub;
use crate::migration::{Migrator, MigratorTrait};
use crate::store::DocumentStore;
use crate::StoreConfig;

/// Document store persisted in a SQLite database
pub struct SqliteDocumentStore {
    db: DatabaseConnection,
    hub: ChangeHub,
}

impl SqliteDocumentStore {
    /// Open (or create) the database at `config.db_path` and run migrations
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = format!(
            "sqlite:{}?mode=rwc",
            config.db_path.to_string_lossy().replace('\\', "/")
        );
        let db = Database::connect(&url).await?;
        Migrator::up(&db, None).await?;

        info!("Document store initialized at {}", config.db_path.display());

        Ok(Self::with_connection(db, config))
    }

    /// Wrap an existing, already migrated connection
    pub fn with_connection(db: DatabaseConnection, config: &StoreConfig) -> Self {
        Self {
            db,
            hub: ChangeHub::new(config.channel_capacity),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn load(&self, collection: &str) -> Result<Vec<documents::Model>, StoreError> {
        let rows = documents::Entity::find()
            .filter(documents::Column::Collection.eq(collection))
            .order_by_asc(documents::Column::DocId)
            .all(&self.db)
            .await?;

        Ok(rows)
    }

    fn to_document(model: &documents::Model) -> Result<Document, StoreError> {
        let data: Fields = serde_json::from_str(&model.body)?;
        Ok(Document::new(model.doc_id.clone(), data))
    }

    fn snapshot_from(
        collection: &str,
        rows: &[documents::Model],
    ) -> Result<CollectionSnapshot, StoreError> {
        let documents = rows
            .iter()
            .map(Self::to_document)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CollectionSnapshot {
            collection: collection.to_string(),
            documents,
        })
    }

    async fn snapshot(&self, collection: &str) -> Result<CollectionSnapshot, StoreError> {
        let rows = self.load(collection).await?;
        Self::snapshot_from(collection, &rows)
    }

    async fn notify(&self, collection: &str) {
        if !self.hub.has_subscribers(collection) {
            return;
        }

        match self.snapshot(collection).await {
            Ok(snapshot) => self.hub.publish(collection, snapshot),
            Err(e) => {
                warn!("Failed to build snapshot of '{}': {}", collection, e);
                self.hub.publish_error(collection, e);
            }
        }
    }

    /// Periodically re-read `collection` and publish a snapshot whenever its
    /// row count or latest write time changes.
    pub fn spawn_poller(self: Arc<Self>, collection: &str, interval: Duration) -> JoinHandle<()> {
        let collection = collection.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_fingerprint: Option<(usize, i64)> = None;

            loop {
                ticker.tick().await;

                let rows = match self.load(&collection).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!("Polling '{}' failed: {}", collection, e);
                        self.hub.publish_error(&collection, e);
                        continue;
                    }
                };

                let fingerprint = (
                    rows.len(),
                    rows.iter().map(|row| row.updated_at).max().unwrap_or(0),
                );
                let changed = last_fingerprint.is_some_and(|prev| prev != fingerprint);
                last_fingerprint = Some(fingerprint);

                if changed {
                    debug!("Detected external change in '{}'", collection);
                    match Self::snapshot_from(&collection, &rows) {
                        Ok(snapshot) => self.hub.publish(&collection, snapshot),
                        Err(e) => self.hub.publish_error(&collection, e),
                    }
                }
            }
        })
    }
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(&self, collection: &str, id: &str, data: Fields) -> Result<(), StoreError> {
        let row = documents::ActiveModel {
            collection: Set(collection.to_string()),
            doc_id: Set(id.to_string()),
            body: Set(serde_json::to_string(&data)?),
            updated_at: Set(now_micros()),
        };
        // The primary key decides between concurrent creators
        documents::Entity::insert(row)
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    StoreError::already_exists(collection, id)
                }
                _ => StoreError::from(e),
            })?;

        debug!("Created {}/{}", collection, id);
        self.notify(collection).await;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = documents::Entity::find_by_id((collection.to_string(), id.to_string()))
            .one(&self.db)
            .await?;

        row.as_ref().map(Self::to_document).transpose()
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        Ok(self.snapshot(collection).await?.documents)
    }

    async fn update(&self, collection: &str, id: &str, partial: Fields) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;

        let row = documents::Entity::find_by_id((collection.to_string(), id.to_string()))
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        let mut document = Self::to_document(&row)?;
        document.merge(partial);

        let mut active: documents::ActiveModel = row.into();
        active.body = Set(serde_json::to_string(&document.data)?);
        active.updated_at = Set(now_micros());
        active.update(&txn).await?;

        txn.commit().await?;

        debug!("Updated {}/{}", collection, id);
        self.notify(collection).await;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let result = documents::Entity::delete_by_id((collection.to_string(), id.to_string()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            debug!("Deleted {}/{}", collection, id);
            self.notify(collection).await;
        }
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        let receiver = self.hub.receiver(collection);
        let initial = self.snapshot(collection).await?;
        Ok(ChangeFeed::new(collection, Arc::new(initial), receiver))
    }
}
