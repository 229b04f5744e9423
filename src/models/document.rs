//! Represents a payload as stored by the document blob backend.

use bson::{Binary, Document, spec::BinarySubtype};
use serde::{Deserialize, Serialize};

/// One document per object in the bucket's collection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlobDocument {
    /// Tenant schema of the owning object. Lookups match on it together
    /// with `key`, so tenants sharing a bucket never see each other's payloads.
    pub schema: String,

    /// Object key; the lookup field within the collection.
    pub key: String,

    /// Raw payload bytes.
    pub content: Binary,

    pub filename: String,

    pub sign: String,

    pub sign_method: String,

    #[serde(default)]
    pub metadata: Document,
}

impl BlobDocument {
    pub fn new(
        schema: &str,
        key: &str,
        content: &[u8],
        filename: &str,
        sign: &str,
        sign_method: &str,
    ) -> Self {
        Self {
            schema: schema.to_string(),
            key: key.to_string(),
            content: Binary {
                subtype: BinarySubtype::Generic,
                bytes: content.to_vec(),
            },
            filename: filename.to_string(),
            sign: sign.to_string(),
            sign_method: sign_method.to_string(),
            metadata: Document::new(),
        }
    }
}
