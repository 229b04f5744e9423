//! Input checks applied before anything is written.
//!
//! Buckets double as document collection names and URL path segments, keys
//! are arbitrary path-like strings, and file names become a single path
//! component on disk.

use crate::services::error::{StorageError, StorageResult};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_BUCKET_NAME_LEN: usize = 120;
const MAX_FILE_NAME_LEN: usize = 255;

/// Rejects empty schemas and schemas with control characters.
pub fn ensure_schema_safe(schema: &str) -> StorageResult<()> {
    if schema.is_empty() || schema.chars().any(|c| c.is_control()) {
        return Err(StorageError::InvalidSchema(schema.escape_debug().to_string()));
    }
    Ok(())
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects keys that begin with `/` or contain `..`, backslashes or control
/// characters.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// Validate a bucket name.
///
/// - 1–120 characters, no surrounding whitespace
/// - no `/`, `\`, `$` or control characters
/// - must not use the reserved `system.` prefix
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() || name.len() > MAX_BUCKET_NAME_LEN {
        return Err(invalid("must be between 1 and 120 characters"));
    }
    if name.trim() != name {
        return Err(invalid("cannot begin or end with whitespace"));
    }
    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '\\' | '$'))
    {
        return Err(invalid("must not contain `/`, `\\`, `$` or control characters"));
    }
    if name.starts_with("system.") {
        return Err(invalid("the `system.` prefix is reserved"));
    }
    Ok(())
}

/// A file name must be one plain path component.
pub fn ensure_file_name_safe(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name.len() > MAX_FILE_NAME_LEN
        || name == "."
        || name == ".."
        || name.chars().any(|c| c.is_control() || matches!(c, '/' | '\\'));
    if bad {
        return Err(StorageError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys() {
        assert!(ensure_key_safe("photos/2025/img.jpg").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/abs").is_err());
        assert!(ensure_key_safe("a/../b").is_err());
        assert!(ensure_key_safe("a\\b").is_err());
        assert!(ensure_key_safe(&"k".repeat(1025)).is_err());
    }

    #[test]
    fn buckets() {
        assert!(ensure_bucket_name_safe("avatars").is_ok());
        assert!(ensure_bucket_name_safe("User_Files-2").is_ok());
        assert!(ensure_bucket_name_safe("").is_err());
        assert!(ensure_bucket_name_safe(" padded").is_err());
        assert!(ensure_bucket_name_safe("a/b").is_err());
        assert!(ensure_bucket_name_safe("$cmd").is_err());
        assert!(ensure_bucket_name_safe("system.users").is_err());
    }

    #[test]
    fn file_names() {
        assert!(ensure_file_name_safe("report.pdf").is_ok());
        assert!(ensure_file_name_safe(".hidden").is_ok());
        assert!(ensure_file_name_safe("..").is_err());
        assert!(ensure_file_name_safe("a/b").is_err());
        assert!(ensure_file_name_safe("").is_err());
    }

    #[test]
    fn schemas() {
        assert!(ensure_schema_safe("public").is_ok());
        assert!(ensure_schema_safe("").is_err());
        assert!(ensure_schema_safe("a\nb").is_err());
    }
}
