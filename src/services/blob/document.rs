//! Document-database blob backend.
//!
//! Each bucket is a collection and each object one [`BlobDocument`] keyed by
//! its schema and object key. The collection operations sit behind
//! [`DocumentStore`] so the same backend runs against MongoDB in production
//! and an in-process map in tests.

use super::{BlobBackend, BlobLocator, BlobPayload, KeyStream};
use crate::{
    models::{document::BlobDocument, object::BlobRef},
    services::error::{StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::debug;

/// The collection operations the document backend needs. Every lookup is
/// scoped to one tenant schema.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        schema: &str,
        key: &str,
    ) -> StorageResult<Option<BlobDocument>>;

    /// Insert without deduplication; several documents may share a key.
    async fn insert(&self, collection: &str, document: BlobDocument) -> StorageResult<()>;

    /// Delete one document matching `schema` and `key`. Missing documents
    /// are not an error.
    async fn delete_one(&self, collection: &str, schema: &str, key: &str) -> StorageResult<()>;

    /// Keys of every document of `schema` in the collection.
    async fn find_all_keys(&self, collection: &str, schema: &str) -> StorageResult<KeyStream>;

    async fn ping(&self) -> StorageResult<()>;
}

#[derive(Clone)]
pub struct DocumentBlobBackend {
    store: Arc<dyn DocumentStore>,
}

impl DocumentBlobBackend {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

fn schema_of(locator: &BlobLocator) -> StorageResult<&str> {
    locator.schema.as_deref().ok_or_else(|| {
        StorageError::Configuration(format!("document locator {} has no schema", locator))
    })
}

#[async_trait]
impl BlobBackend for DocumentBlobBackend {
    fn kind(&self) -> &'static str {
        "document"
    }

    fn locate(&self, blob: &BlobRef<'_>) -> BlobLocator {
        BlobLocator::in_schema(blob.schema, blob.bucket, blob.key)
    }

    async fn write(&self, locator: &BlobLocator, payload: &BlobPayload<'_>) -> StorageResult<()> {
        let document = BlobDocument::new(
            schema_of(locator)?,
            &locator.name,
            payload.content,
            payload.file_name,
            payload.signature,
            payload.sign_method,
        );
        self.store.insert(&locator.scope, document).await?;
        debug!("inserted {} bytes as {}", payload.content.len(), locator);
        Ok(())
    }

    async fn read(&self, locator: &BlobLocator) -> StorageResult<Bytes> {
        let schema = schema_of(locator)?;
        match self
            .store
            .find_one(&locator.scope, schema, &locator.name)
            .await?
        {
            Some(document) => Ok(Bytes::from(document.content.bytes)),
            None => Err(StorageError::BlobNotFound(locator.to_string())),
        }
    }

    async fn delete(&self, locator: &BlobLocator) -> StorageResult<()> {
        let schema = schema_of(locator)?;
        self.store
            .delete_one(&locator.scope, schema, &locator.name)
            .await
    }

    async fn list_keys(&self, schema: &str, bucket: &str) -> StorageResult<Option<KeyStream>> {
        Ok(Some(self.store.find_all_keys(bucket, schema).await?))
    }

    async fn ping(&self) -> StorageResult<()> {
        self.store.ping().await
    }
}

/// `HashMap`-backed document store for tests and embedding.
///
/// Mirrors the collection semantics the backend relies on: inserts never
/// dedupe, lookups return the earliest matching document, deletes remove one.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<BlobDocument>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .expect("lock poisoned")
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(
        &self,
        collection: &str,
        schema: &str,
        key: &str,
    ) -> StorageResult<Option<BlobDocument>> {
        let map = self.collections.read().expect("lock poisoned");
        Ok(map
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.schema == schema && d.key == key))
            .cloned())
    }

    async fn insert(&self, collection: &str, document: BlobDocument) -> StorageResult<()> {
        let mut map = self.collections.write().expect("lock poisoned");
        map.entry(collection.to_string()).or_default().push(document);
        Ok(())
    }

    async fn delete_one(&self, collection: &str, schema: &str, key: &str) -> StorageResult<()> {
        let mut map = self.collections.write().expect("lock poisoned");
        if let Some(docs) = map.get_mut(collection) {
            if let Some(pos) = docs.iter().position(|d| d.schema == schema && d.key == key) {
                docs.remove(pos);
            }
        }
        Ok(())
    }

    async fn find_all_keys(&self, collection: &str, schema: &str) -> StorageResult<KeyStream> {
        let keys: Vec<StorageResult<String>> = self
            .collections
            .read()
            .expect("lock poisoned")
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| d.schema == schema)
                    .map(|d| Ok(d.key.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(stream::iter(keys).boxed())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn backend() -> (Arc<MemoryDocumentStore>, DocumentBlobBackend) {
        let store = Arc::new(MemoryDocumentStore::new());
        (store.clone(), DocumentBlobBackend::new(store))
    }

    fn payload(content: &[u8]) -> BlobPayload<'_> {
        BlobPayload {
            content,
            file_name: "notes.txt",
            signature: "sig",
            sign_method: "sha256",
        }
    }

    #[tokio::test]
    async fn locator_is_schema_bucket_and_key() {
        let (_, backend) = backend();
        let blob = BlobRef {
            schema: "public",
            bucket: "docs",
            key: "q3",
            signature: "sig",
            file_name: "notes.txt",
        };
        assert_eq!(
            backend.locate(&blob),
            BlobLocator::in_schema("public", "docs", "q3")
        );
        assert!(!backend.content_addressed());
    }

    #[tokio::test]
    async fn write_read_delete() {
        let (store, backend) = backend();
        let locator = BlobLocator::in_schema("public", "docs", "q3");

        backend.write(&locator, &payload(b"hello")).await.unwrap();
        assert_eq!(store.len("docs"), 1);
        assert_eq!(
            backend.read(&locator).await.unwrap(),
            Bytes::from_static(b"hello")
        );

        let document = store.find_one("docs", "public", "q3").await.unwrap().unwrap();
        assert_eq!(document.schema, "public");
        assert_eq!(document.filename, "notes.txt");
        assert_eq!(document.sign, "sig");
        assert_eq!(document.sign_method, "sha256");

        backend.delete(&locator).await.unwrap();
        assert!(store.is_empty("docs"));
        assert!(backend.read(&locator).await.unwrap_err().is_not_found());
        backend.delete(&locator).await.unwrap();
    }

    #[tokio::test]
    async fn schemas_do_not_share_documents() {
        let (store, backend) = backend();
        let a = BlobLocator::in_schema("tenant_a", "docs", "k");
        let b = BlobLocator::in_schema("tenant_b", "docs", "k");
        backend.write(&a, &payload(b"AAAA")).await.unwrap();
        backend.write(&b, &payload(b"BBBB")).await.unwrap();

        assert_eq!(backend.read(&b).await.unwrap(), Bytes::from_static(b"BBBB"));
        backend.delete(&b).await.unwrap();
        assert_eq!(store.len("docs"), 1);
        assert_eq!(backend.read(&a).await.unwrap(), Bytes::from_static(b"AAAA"));
    }

    #[tokio::test]
    async fn locator_without_schema_is_rejected() {
        let (_, backend) = backend();
        let err = backend
            .write(&BlobLocator::new("docs", "q3"), &payload(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn write_does_not_dedupe() {
        let (store, backend) = backend();
        let locator = BlobLocator::in_schema("public", "docs", "q3");
        backend.write(&locator, &payload(b"one")).await.unwrap();
        backend.write(&locator, &payload(b"two")).await.unwrap();
        assert_eq!(store.len("docs"), 2);
        assert_eq!(backend.read(&locator).await.unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn list_keys_per_schema_and_bucket() {
        let (_, backend) = backend();
        for (schema, bucket, key) in [
            ("public", "docs", "a"),
            ("public", "docs", "b"),
            ("tenant", "docs", "t"),
            ("public", "pics", "c"),
        ] {
            backend
                .write(&BlobLocator::in_schema(schema, bucket, key), &payload(b"1"))
                .await
                .unwrap();
        }

        let keys: Vec<String> = backend
            .list_keys("public", "docs")
            .await
            .unwrap()
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        let empty: Vec<String> = backend
            .list_keys("public", "missing")
            .await
            .unwrap()
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
