//! Blob backends: where object payload bytes live.
//!
//! The catalog only keeps the inputs needed to recompute a locator
//! (`BlobRef`), so a backend can be swapped without migrating metadata.
//! Exactly one backend is chosen when the object store is built.

pub mod document;
pub mod filesystem;
pub mod mongo;

use crate::{models::object::BlobRef, services::error::StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;

pub use document::{DocumentBlobBackend, DocumentStore, MemoryDocumentStore};
pub use filesystem::FilesystemBlobBackend;
pub use mongo::MongoDocumentStore;

/// Backend-specific address of a blob.
///
/// Filesystem: `scope` = signature, `name` = file name, no schema.
/// Document: `scope` = bucket (collection), `name` = key, `schema` = the
/// tenant the document belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobLocator {
    pub schema: Option<String>,
    pub scope: String,
    pub name: String,
}

impl BlobLocator {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: None,
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// A locator partitioned by tenant schema.
    pub fn in_schema(
        schema: impl Into<String>,
        scope: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            schema: Some(schema.into()),
            ..Self::new(scope, name)
        }
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}:{}/{}", schema, self.scope, self.name),
            None => write!(f, "{}/{}", self.scope, self.name),
        }
    }
}

/// A payload and the attributes recorded alongside it.
#[derive(Debug, Clone, Copy)]
pub struct BlobPayload<'a> {
    pub content: &'a [u8],
    pub file_name: &'a str,
    pub signature: &'a str,
    pub sign_method: &'a str,
}

/// One-shot stream of object keys present in a bucket.
pub type KeyStream = BoxStream<'static, StorageResult<String>>;

#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short name for logs ("fs", "document").
    fn kind(&self) -> &'static str;

    /// Compute where the payload described by `blob` lives.
    fn locate(&self, blob: &BlobRef<'_>) -> BlobLocator;

    /// True when several catalog rows may resolve to the same locator
    /// (identical payload and file name).
    fn content_addressed(&self) -> bool {
        false
    }

    /// Persist `payload` at `locator`. Does not remove earlier blobs.
    async fn write(&self, locator: &BlobLocator, payload: &BlobPayload<'_>) -> StorageResult<()>;

    /// Read the payload at `locator`. A missing blob is `BlobNotFound`.
    async fn read(&self, locator: &BlobLocator) -> StorageResult<Bytes>;

    /// Remove the payload at `locator`. Missing blobs are not an error.
    async fn delete(&self, locator: &BlobLocator) -> StorageResult<()>;

    /// Keys physically present in `bucket` for `schema`, or `None` when the
    /// backend cannot enumerate by bucket.
    async fn list_keys(&self, _schema: &str, _bucket: &str) -> StorageResult<Option<KeyStream>> {
        Ok(None)
    }

    /// Readiness check.
    async fn ping(&self) -> StorageResult<()>;
}
