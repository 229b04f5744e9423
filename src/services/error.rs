//! Error taxonomy shared by the catalog, the blob backends and the object store.

use std::{io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob `{0}` not found")]
    BlobNotFound(String),
    #[error("invalid object")]
    InvalidObject,
    #[error("invalid schema `{0}`")]
    InvalidSchema(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid file name `{0}`")]
    InvalidFileName(String),
    #[error("object `{bucket}/{key}` already exists in schema `{schema}`")]
    Conflict {
        schema: String,
        bucket: String,
        key: String,
    },
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("{op}: timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("{op}: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{op}: {source}")]
    Document {
        op: &'static str,
        #[source]
        source: mongodb::error::Error,
    },
    #[error("{op}: {reason}")]
    CorruptDocument { op: &'static str, reason: String },
}

impl StorageError {
    pub fn database(op: &'static str, source: sqlx::Error) -> Self {
        Self::Database { op, source }
    }

    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    pub fn document(op: &'static str, source: mongodb::error::Error) -> Self {
        Self::Document { op, source }
    }

    /// True for errors that mean "the thing is not there" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BlobNotFound(_))
    }

    /// True for rejections caused by the caller's input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidObject
                | Self::InvalidSchema(_)
                | Self::InvalidObjectKey
                | Self::InvalidBucketName { .. }
                | Self::InvalidFileName(_)
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Access token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("access token expired")]
    Expired,
    #[error("access token invalid")]
    Invalid,
    #[error("could not sign access token: {0}")]
    Signing(String),
}
