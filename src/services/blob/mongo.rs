//! MongoDB implementation of [`DocumentStore`]: one collection per bucket.

use super::{KeyStream, document::DocumentStore};
use crate::{
    models::document::BlobDocument,
    services::error::{StorageError, StorageResult},
};
use async_trait::async_trait;
use bson::{Document, doc};
use futures::{StreamExt, future};
use mongodb::{Client, Collection, Database};
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct MongoDocumentStore {
    db: Database,
}

impl MongoDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect to `uri`, select `db_name` and verify the server answers.
    pub async fn connect(uri: &str, db_name: &str) -> StorageResult<Self> {
        info!("Connecting to MongoDB database '{}'", db_name);
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StorageError::document("connect to MongoDB", e))?;
        let store = Self::new(client.database(db_name));
        store.ping().await?;
        info!("Connected to MongoDB database '{}'", db_name);
        Ok(store)
    }

    fn collection(&self, name: &str) -> StorageResult<Collection<BlobDocument>> {
        if name.is_empty() {
            return Err(StorageError::Configuration("invalid collection".into()));
        }
        Ok(self.db.collection(name))
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn find_one(
        &self,
        collection: &str,
        schema: &str,
        key: &str,
    ) -> StorageResult<Option<BlobDocument>> {
        self.collection(collection)?
            .find_one(doc! { "schema": schema, "key": key })
            .await
            .map_err(|e| StorageError::document("find object in collection", e))
    }

    async fn insert(&self, collection: &str, document: BlobDocument) -> StorageResult<()> {
        self.collection(collection)?
            .insert_one(document)
            .await
            .map_err(|e| StorageError::document("save object", e))?;
        Ok(())
    }

    async fn delete_one(&self, collection: &str, schema: &str, key: &str) -> StorageResult<()> {
        self.collection(collection)?
            .delete_one(doc! { "schema": schema, "key": key })
            .await
            .map_err(|e| StorageError::document("delete file from MongoDB", e))?;
        Ok(())
    }

    /// Streams only the `key` field of documents in `schema`. Documents without a string key are
    /// logged and skipped.
    async fn find_all_keys(&self, collection: &str, schema: &str) -> StorageResult<KeyStream> {
        self.collection(collection)?;
        let cursor = self
            .db
            .collection::<Document>(collection)
            .find(doc! { "schema": schema })
            .projection(doc! { "key": 1 })
            .await
            .map_err(|e| StorageError::document("list collection", e))?;

        let collection = collection.to_string();
        let keys = cursor.filter_map(move |item| {
            let key = match item {
                Ok(document) => match document.get_str("key") {
                    Ok(key) => Some(Ok(key.to_string())),
                    Err(_) => {
                        warn!(
                            "skipping document {:?} without a key in collection {}",
                            document.get("_id"),
                            collection
                        );
                        None
                    }
                },
                Err(e) => Some(Err(StorageError::document("read collection cursor", e))),
            };
            future::ready(key)
        });
        Ok(keys.boxed())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StorageError::document("ping MongoDB", e))?;
        Ok(())
    }
}
