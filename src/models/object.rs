//! Represents an object's catalog row: identity, file attributes and timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, types::Json};

/// Free-form key/value metadata attached to an object.
pub type Tags = Map<String, Value>;

/// A single object's metadata as stored in the catalog.
///
/// The record owns the answer to "does this object exist"; the blob backend
/// owns its bytes. Only the inputs needed to locate the blob are kept here,
/// never a backend-specific path.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ObjectRecord {
    /// Surrogate identifier, stable across payload replacements.
    pub id: i64,

    /// Tenant namespace; first element of the identity tuple.
    pub schema: String,

    pub bucket: String,

    pub key: String,

    /// Name the payload was uploaded under.
    pub file_name: String,

    /// Size of the current payload in bytes.
    pub file_size: i64,

    /// Digest of the current payload.
    pub signature: String,

    /// Algorithm tag for `signature` (e.g. "sha256").
    pub sign_method: String,

    pub metadata: Json<Tags>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker; live rows have `None`.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ObjectRecord {
    /// The inputs a blob backend needs to locate this record's payload.
    pub fn blob_ref(&self) -> BlobRef<'_> {
        BlobRef {
            schema: &self.schema,
            bucket: &self.bucket,
            key: &self.key,
            signature: &self.signature,
            file_name: &self.file_name,
        }
    }
}

/// Borrowed locator inputs. Each backend picks the fields it addresses by.
#[derive(Debug, Clone, Copy)]
pub struct BlobRef<'a> {
    pub schema: &'a str,
    pub bucket: &'a str,
    pub key: &'a str,
    pub signature: &'a str,
    pub file_name: &'a str,
}

/// The mutable file columns rewritten when a payload is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttrs {
    pub file_name: String,
    pub file_size: i64,
    pub signature: String,
    pub sign_method: String,
}

/// A record as returned to clients, with a freshly signed download URL.
#[derive(Serialize, Debug, Clone)]
pub struct ObjectInfo {
    #[serde(flatten)]
    pub record: ObjectRecord,
    pub download_url: String,
}
