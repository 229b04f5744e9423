//! Local-disk blob backend.
//!
//! Payloads live at `base_path/{signature}/{file_name}`. Two rows holding the
//! same bytes under the same file name share one file, so this backend reports
//! itself as content-addressed and leaves reference counting to the caller.

use super::{BlobBackend, BlobLocator, BlobPayload};
use crate::{
    models::object::BlobRef,
    services::error::{StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct FilesystemBlobBackend {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl FilesystemBlobBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve a locator to a path strictly beneath `base_path`.
    ///
    /// Each locator part must be exactly one normal path component.
    fn blob_path(&self, locator: &BlobLocator) -> StorageResult<PathBuf> {
        for part in [&locator.scope, &locator.name] {
            let mut components = Path::new(part.as_str()).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => {}
                _ => return Err(StorageError::InvalidFileName(part.clone())),
            }
        }
        Ok(self.base_path.join(&locator.scope).join(&locator.name))
    }

    /// Recursively remove empty directories up to `base_path`.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.base_path.as_path();
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobBackend for FilesystemBlobBackend {
    fn kind(&self) -> &'static str {
        "fs"
    }

    fn locate(&self, blob: &BlobRef<'_>) -> BlobLocator {
        BlobLocator::new(blob.signature, blob.file_name)
    }

    fn content_addressed(&self) -> bool {
        true
    }

    /// Writes to a temporary sibling, fsyncs, then renames into place so a
    /// reader never sees a half-written payload.
    async fn write(&self, locator: &BlobLocator, payload: &BlobPayload<'_>) -> StorageResult<()> {
        let file_path = self.blob_path(locator)?;
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::io(
                "save object",
                io::Error::new(ErrorKind::Other, "object path missing parent directory"),
            )
        })?;
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::io("create object directory", e))?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let result: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(payload.content).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            match fs::rename(&tmp_path, &file_path).await {
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    fs::remove_file(&file_path).await?;
                    fs::rename(&tmp_path, &file_path).await
                }
                other => other,
            }
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::io("save object", err));
        }
        debug!(
            "wrote {} bytes to {}",
            payload.content.len(),
            file_path.display()
        );
        Ok(())
    }

    async fn read(&self, locator: &BlobLocator) -> StorageResult<Bytes> {
        let file_path = self.blob_path(locator)?;
        match fs::read(&file_path).await {
            Ok(buffer) => Ok(Bytes::from(buffer)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::BlobNotFound(locator.to_string()))
            }
            Err(err) => Err(StorageError::io("read object", err)),
        }
    }

    async fn delete(&self, locator: &BlobLocator) -> StorageResult<()> {
        let file_path = self.blob_path(locator)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::io("delete object file", err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Write/read/delete a marker file under `base_path`.
    async fn ping(&self) -> StorageResult<()> {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz")
            .await
            .map_err(|e| StorageError::io("write readiness marker", e))?;
        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match read {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err(StorageError::io(
                "read readiness marker",
                io::Error::new(ErrorKind::InvalidData, "file content mismatch"),
            )),
            Err(e) => Err(StorageError::io("read readiness marker", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(content: &[u8]) -> BlobPayload<'_> {
        BlobPayload {
            content,
            file_name: "report.pdf",
            signature: "abc123",
            sign_method: "sha256",
        }
    }

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBlobBackend::new(dir.path());
        let blob = BlobRef {
            schema: "public",
            bucket: "docs",
            key: "q3",
            signature: "abc123",
            file_name: "report.pdf",
        };
        let locator = backend.locate(&blob);
        assert_eq!(locator, BlobLocator::new("abc123", "report.pdf"));

        backend.write(&locator, &payload(b"v1")).await.unwrap();
        assert!(dir.path().join("abc123").join("report.pdf").is_file());
        assert_eq!(backend.read(&locator).await.unwrap(), Bytes::from_static(b"v1"));

        backend.write(&locator, &payload(b"v2")).await.unwrap();
        assert_eq!(backend.read(&locator).await.unwrap(), Bytes::from_static(b"v2"));

        backend.delete(&locator).await.unwrap();
        assert!(!dir.path().join("abc123").exists());
        assert!(backend.read(&locator).await.unwrap_err().is_not_found());

        // deleting again is a no-op
        backend.delete(&locator).await.unwrap();
    }

    #[tokio::test]
    async fn delete_keeps_non_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBlobBackend::new(dir.path());
        let a = BlobLocator::new("abc123", "a.txt");
        let b = BlobLocator::new("abc123", "b.txt");
        backend.write(&a, &payload(b"x")).await.unwrap();
        backend.write(&b, &payload(b"x")).await.unwrap();

        backend.delete(&a).await.unwrap();
        assert_eq!(backend.read(&b).await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBlobBackend::new(dir.path());
        for locator in [
            BlobLocator::new("..", "x"),
            BlobLocator::new("abc", "../x"),
            BlobLocator::new("abc", "nested/x"),
            BlobLocator::new("abc", ""),
        ] {
            let err = backend.read(&locator).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidFileName(_)), "{locator}");
        }
    }

    #[tokio::test]
    async fn ping_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBlobBackend::new(dir.path());
        backend.ping().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
