//! src/services/object_store.rs
//!
//! The object lifecycle over two independent stores. The
//! catalog (SQLite) answers whether an object exists, the blob backend holds
//! its bytes. Writes are sequenced so the catalog never points at a payload
//! that was not written; the reverse (a payload nothing points at) is a
//! tolerated leak, logged and counted, and cleaned up by the sweeps.
//!
//! There is no per-identity locking. The catalog's unique index is the only
//! guard: racing first writes of one identity end in one row and one
//! `Conflict`, while racing replacements of an existing row may interleave
//! their blob writes and deletes, so a reader can briefly see a missing or
//! stale payload.

use crate::{
    models::object::{BlobRef, FileAttrs, ObjectInfo, ObjectRecord, Tags},
    services::{
        blob::{BlobBackend, BlobLocator, BlobPayload},
        catalog::{Catalog, NewObject},
        error::{AuthError, StorageError, StorageResult},
        signature::SignatureCodec,
        token::{DOWNLOAD_TOKEN_TTL, TokenAuthority, derive_access_key},
        validation,
    },
};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info, warn};

/// Extra age added to every retention window before rows are purged.
pub const RETENTION_GRACE: Duration = Duration::from_secs(48 * 60 * 60);

/// What `remove` does to the catalog row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RemoveMode {
    /// Delete the row.
    #[default]
    Hard,
    /// Stamp `deleted_at`; the row is purged later by the retention sweep.
    Soft,
}

/// Immutable settings fixed when the store is built.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// HS256 secret for download tokens. Must be non-empty.
    pub secret: String,
    /// Path prefix download URLs are built under, e.g. `/api/v1/s3`.
    pub api_prefix: String,
    pub remove_mode: RemoveMode,
    /// Upper bound on every blob backend call; `None` waits indefinitely.
    pub backend_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct ObjectStore {
    catalog: Catalog,
    backend: Arc<dyn BlobBackend>,
    signer: SignatureCodec,
    tokens: TokenAuthority,
    api_prefix: String,
    remove_mode: RemoveMode,
    backend_timeout: Option<Duration>,
    leaked_blobs: Arc<AtomicU64>,
}

impl ObjectStore {
    /// Build a store over `catalog` and `backend`. Fails if the signing
    /// secret is empty.
    pub fn new(
        config: StoreConfig,
        catalog: Catalog,
        backend: Arc<dyn BlobBackend>,
    ) -> StorageResult<Self> {
        let tokens = TokenAuthority::new(&config.secret)?;
        info!(
            "object store ready: backend={} remove_mode={:?} backend_timeout={:?}",
            backend.kind(),
            config.remove_mode,
            config.backend_timeout
        );
        Ok(Self {
            catalog,
            backend,
            signer: SignatureCodec,
            tokens,
            api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
            remove_mode: config.remove_mode,
            backend_timeout: config.backend_timeout,
            leaked_blobs: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn backend(&self) -> &dyn BlobBackend {
        self.backend.as_ref()
    }

    /// Blobs whose best-effort cleanup failed since the store was built.
    pub fn leaked_blobs(&self) -> u64 {
        self.leaked_blobs.load(Ordering::Relaxed)
    }

    /// Store `payload` under the identity tuple, creating the record or
    /// replacing the payload of the existing one.
    pub async fn put(
        &self,
        schema: &str,
        bucket: &str,
        key: &str,
        file_name: &str,
        payload: Bytes,
    ) -> StorageResult<ObjectRecord> {
        validation::ensure_schema_safe(schema)?;
        validation::ensure_bucket_name_safe(bucket)?;
        validation::ensure_key_safe(key)?;
        validation::ensure_file_name_safe(file_name)?;

        let signature = self.signer.sign(&payload);
        let attrs = FileAttrs {
            file_name: file_name.to_string(),
            file_size: payload.len() as i64,
            signature: signature.value,
            sign_method: signature.method.to_string(),
        };
        let new_ref = BlobRef {
            schema,
            bucket,
            key,
            signature: &attrs.signature,
            file_name: &attrs.file_name,
        };
        let blob = BlobPayload {
            content: &payload,
            file_name: &attrs.file_name,
            signature: &attrs.signature,
            sign_method: &attrs.sign_method,
        };

        match self.catalog.find(schema, bucket, key).await? {
            None => self.create(schema, bucket, key, &attrs, &new_ref, &blob).await,
            Some(existing) => self.replace(&existing, &attrs, &new_ref, &blob).await,
        }
    }

    async fn create(
        &self,
        schema: &str,
        bucket: &str,
        key: &str,
        attrs: &FileAttrs,
        new_ref: &BlobRef<'_>,
        blob: &BlobPayload<'_>,
    ) -> StorageResult<ObjectRecord> {
        let locator = self.backend.locate(new_ref);
        self.bounded("put file", self.backend.write(&locator, blob))
            .await?;

        let new = NewObject {
            schema,
            bucket,
            key,
            attrs,
        };
        match self.catalog.insert(new).await {
            Ok(record) => {
                info!(
                    "created object {}/{}/{} id={} size={}",
                    schema, bucket, key, record.id, record.file_size
                );
                Ok(record)
            }
            Err(err @ StorageError::Conflict { .. }) => {
                // The winner may own the same locator; only a content-addressed
                // backend can tell whether ours is unreferenced.
                if self.backend.content_addressed() {
                    self.discard_blob(new_ref).await;
                } else {
                    self.note_leak(&locator, &err);
                }
                Err(err)
            }
            Err(err) => {
                self.discard_blob(new_ref).await;
                Err(err)
            }
        }
    }

    async fn replace(
        &self,
        existing: &ObjectRecord,
        attrs: &FileAttrs,
        new_ref: &BlobRef<'_>,
        blob: &BlobPayload<'_>,
    ) -> StorageResult<ObjectRecord> {
        let old_ref = existing.blob_ref();
        let old_locator = self.backend.locate(&old_ref);
        let new_locator = self.backend.locate(new_ref);
        let same_locator = old_locator == new_locator;

        if same_locator && !self.backend.content_addressed() {
            // Insert semantics: the old document has to go before the new one lands.
            self.discard_blob(&old_ref).await;
        }
        self.bounded("put file", self.backend.write(&new_locator, blob))
            .await?;

        let updated = match self.catalog.update_file(existing.id, attrs).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                if !same_locator {
                    self.discard_blob(new_ref).await;
                }
                return Err(StorageError::Conflict {
                    schema: existing.schema.clone(),
                    bucket: existing.bucket.clone(),
                    key: existing.key.clone(),
                });
            }
            Err(err) => {
                if !same_locator {
                    self.discard_blob(new_ref).await;
                }
                return Err(err);
            }
        };

        if !same_locator {
            self.discard_blob(&old_ref).await;
        }
        info!(
            "replaced object {}/{}/{} id={} size={}",
            updated.schema, updated.bucket, updated.key, updated.id, updated.file_size
        );
        Ok(updated)
    }

    /// Live record for the identity tuple, if any.
    pub async fn get_metadata(
        &self,
        schema: &str,
        bucket: &str,
        key: &str,
    ) -> StorageResult<Option<ObjectRecord>> {
        self.catalog.find(schema, bucket, key).await
    }

    pub async fn get_by_id(&self, schema: &str, id: i64) -> StorageResult<Option<ObjectRecord>> {
        self.catalog.find_by_id(schema, id).await
    }

    /// Payload of `record`. `None` is rejected as an invalid object.
    pub async fn get_content(&self, record: Option<&ObjectRecord>) -> StorageResult<Bytes> {
        let record = record.ok_or(StorageError::InvalidObject)?;
        let locator = self.backend.locate(&record.blob_ref());
        self.bounded("read object", self.backend.read(&locator))
            .await
    }

    /// Replace the free-form metadata of an object; file columns are untouched.
    pub async fn update_metadata(
        &self,
        schema: &str,
        bucket: &str,
        key: &str,
        metadata: &Tags,
    ) -> StorageResult<Option<ObjectRecord>> {
        match self.catalog.find(schema, bucket, key).await? {
            Some(record) => self.catalog.update_metadata(record.id, metadata).await,
            None => Ok(None),
        }
    }

    /// Remove an object and its payload. Absent objects are a no-op.
    pub async fn remove(&self, schema: &str, bucket: &str, key: &str) -> StorageResult<()> {
        match self.catalog.find(schema, bucket, key).await? {
            Some(record) => self.remove_record(&record).await,
            None => Ok(()),
        }
    }

    pub async fn remove_by_id(&self, schema: &str, id: i64) -> StorageResult<()> {
        match self.catalog.find_by_id(schema, id).await? {
            Some(record) => self.remove_record(&record).await,
            None => Ok(()),
        }
    }

    async fn remove_record(&self, record: &ObjectRecord) -> StorageResult<()> {
        let removed = match self.remove_mode {
            RemoveMode::Hard => self.catalog.hard_delete(record.id).await?,
            RemoveMode::Soft => self.catalog.soft_delete(record.id).await?,
        };
        if removed {
            self.discard_blob(&record.blob_ref()).await;
            info!(
                "removed object {}/{}/{} id={}",
                record.schema, record.bucket, record.key, record.id
            );
        }
        Ok(())
    }

    pub fn access_key(&self, schema: &str, bucket: &str, key: &str) -> String {
        derive_access_key(schema, bucket, key)
    }

    /// Retrieval path carrying a one-hour token, or an empty string if the
    /// token could not be signed. Bucket and key segments are percent-encoded;
    /// the key's `/` separators are kept.
    pub fn make_download_url(&self, schema: &str, bucket: &str, key: &str) -> String {
        let access_key = derive_access_key(schema, bucket, key);
        match self.tokens.issue_token(&access_key, DOWNLOAD_TOKEN_TTL) {
            Ok(token) => format!(
                "{}/objects/{}/{}?token={}",
                self.api_prefix,
                urlencoding::encode(bucket),
                encode_key(key),
                token
            ),
            Err(err) => {
                warn!("download url unavailable for {}/{}: {}", bucket, key, err);
                String::new()
            }
        }
    }

    pub fn object_info(&self, record: ObjectRecord) -> ObjectInfo {
        let download_url = self.make_download_url(&record.schema, &record.bucket, &record.key);
        ObjectInfo {
            record,
            download_url,
        }
    }

    /// Check that `token` is live and was issued for `record`.
    pub fn authorize_download(&self, record: &ObjectRecord, token: &str) -> Result<(), AuthError> {
        let granted = self.tokens.verify(token)?;
        if granted != derive_access_key(&record.schema, &record.bucket, &record.key) {
            return Err(AuthError::Invalid);
        }
        Ok(())
    }

    /// Purge rows not updated within `retention + 48h` and their payloads.
    /// Returns the number of purged rows.
    pub async fn drop_objects_before_interval(&self, retention: Duration) -> StorageResult<u64> {
        self.drop_objects_before_interval_at(retention, Utc::now())
            .await
    }

    /// As [`Self::drop_objects_before_interval`], with `now` supplied.
    pub async fn drop_objects_before_interval_at(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let window = retention
            .checked_add(RETENTION_GRACE)
            .ok_or_else(|| StorageError::Configuration("retention window too large".into()))?;
        let interval = TimeDelta::from_std(window)
            .map_err(|e| StorageError::Configuration(format!("retention window: {}", e)))?;
        let threshold = now
            .checked_sub_signed(interval)
            .ok_or_else(|| StorageError::Configuration("retention window too large".into()))?;

        let purged = self.catalog.purge_updated_before(threshold).await?;
        for record in &purged {
            if record.deleted_at.is_none() {
                self.discard_blob(&record.blob_ref()).await;
            }
        }
        info!(
            "retention sweep purged {} objects updated before {}",
            purged.len(),
            threshold
        );
        Ok(purged.len() as u64)
    }

    /// Delete payloads in `bucket` that no live catalog row in `schema`
    /// refers to. Backends that cannot enumerate a bucket are skipped.
    /// Returns the number of deleted payloads.
    pub async fn drop_invalid_object_files(&self, schema: &str, bucket: &str) -> StorageResult<u64> {
        let Some(mut keys) = self
            .bounded("list bucket", self.backend.list_keys(schema, bucket))
            .await?
        else {
            debug!(
                "{} backend cannot enumerate buckets; skipping orphan sweep",
                self.backend.kind()
            );
            return Ok(0);
        };

        let mut orphans = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key?;
            if self.catalog.find(schema, bucket, &key).await?.is_none() {
                orphans.push(key);
            }
        }
        drop(keys);

        for key in &orphans {
            let locator = self.backend.locate(&BlobRef {
                schema,
                bucket,
                key,
                signature: "",
                file_name: "",
            });
            self.bounded("delete object from collection", self.backend.delete(&locator))
                .await?;
            debug!("dropped orphaned blob {}", locator);
        }
        info!(
            "orphan sweep removed {} blobs from {}/{}",
            orphans.len(),
            schema,
            bucket
        );
        Ok(orphans.len() as u64)
    }

    /// Best-effort payload removal. Content-addressed payloads still
    /// referenced by a live row are kept. Failures are logged and counted.
    async fn discard_blob(&self, blob: &BlobRef<'_>) {
        let locator = self.backend.locate(blob);
        if self.backend.content_addressed() {
            match self
                .catalog
                .count_payload_refs(blob.signature, blob.file_name)
                .await
            {
                Ok(0) => {}
                Ok(refs) => {
                    debug!("keeping {}: still referenced by {} objects", locator, refs);
                    return;
                }
                Err(err) => {
                    self.note_leak(&locator, &err);
                    return;
                }
            }
        }
        if let Err(err) = self
            .bounded("delete object file", self.backend.delete(&locator))
            .await
        {
            self.note_leak(&locator, &err);
        }
    }

    fn note_leak(&self, locator: &BlobLocator, err: &StorageError) {
        let total = self.leaked_blobs.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            backend = self.backend.kind(),
            leaked_blobs = total,
            "blob {} left behind: {}",
            locator,
            err
        );
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        match self.backend_timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| StorageError::Timeout { op, after })?,
            None => call.await,
        }
    }
}

/// Percent-encode each `/`-separated segment of an object key.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}
