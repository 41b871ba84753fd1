//! Node-local replica of files synchronized through the farm.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, thiserror::Error)]
pub enum FileReplicaError {
    #[error("invalid replica path `{0}`")]
    InvalidPath(String),
    #[error("payload digest {actual} does not match {expected}")]
    DigestMismatch { expected: String, actual: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Whether a write changed anything on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Files below one root directory, addressed by relative paths.
#[derive(Debug, Clone)]
pub struct FileReplica {
    root: PathBuf,
}

impl FileReplica {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `payload` to `relative` unless the file already holds content
    /// with digest `expected`. The payload itself must match `expected`.
    pub async fn write(
        &self,
        relative: &str,
        expected: &str,
        payload: &[u8],
    ) -> Result<WriteOutcome, FileReplicaError> {
        let absolute = self.resolve(relative)?;
        let expected = expected.trim().to_ascii_lowercase();
        let actual = sha256_hex(payload);
        if actual != expected {
            return Err(FileReplicaError::DigestMismatch { expected, actual });
        }

        match fs::read(&absolute).await {
            Ok(existing) if sha256_hex(&existing) == expected => return Ok(WriteOutcome::Unchanged),
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }
        replace_file(&absolute, payload).await?;
        Ok(WriteOutcome::Written)
    }

    /// Remove `relative`. A missing file counts as success.
    pub async fn delete(&self, relative: &str) -> Result<(), FileReplicaError> {
        let absolute = self.resolve(relative)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, FileReplicaError> {
        Ok(fs::read(self.resolve(relative)?).await?)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, FileReplicaError> {
        let path = Path::new(relative);
        if relative.trim().is_empty()
            || path.is_absolute()
            || path.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(FileReplicaError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(path))
    }
}

/// Replace `target` through a uniquely named staging file next to it. The
/// staging file never outlives a failed attempt.
async fn replace_file(target: &Path, payload: &[u8]) -> std::io::Result<()> {
    let staging = target.with_file_name(format!(
        ".{}.{}.tmp",
        target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("replica"),
        Uuid::new_v4().simple()
    ));
    let result = publish(&staging, target, payload).await;
    if result.is_err() {
        let _ = fs::remove_file(&staging).await;
    }
    result
}

async fn publish(staging: &Path, target: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(staging).await?;
    file.write_all(payload).await?;
    file.flush().await?;
    drop(file);
    fs::rename(staging, target).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let replica = FileReplica::new(dir.path());
        let digest = sha256_hex(b"hello");

        let first = replica
            .write("media/a.txt", &digest, b"hello")
            .await
            .expect("write");
        let second = replica
            .write("media/a.txt", &digest, b"hello")
            .await
            .expect("write");

        assert_eq!(first, WriteOutcome::Written);
        assert_eq!(second, WriteOutcome::Unchanged);
        assert_eq!(replica.read("media/a.txt").await.expect("read"), b"hello");
    }

    #[tokio::test]
    async fn rejects_mismatched_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let replica = FileReplica::new(dir.path());
        let err = replica
            .write("a.txt", &sha256_hex(b"other"), b"hello")
            .await
            .expect_err("mismatch");
        assert!(matches!(err, FileReplicaError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_missing_file_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let replica = FileReplica::new(dir.path());
        replica.delete("gone.txt").await.expect("delete");
        replica.delete("gone.txt").await.expect("delete again");
    }

    #[tokio::test]
    async fn failed_replacement_leaves_no_staging_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let occupied = dir.path().join("occupied");
        std::fs::create_dir(&occupied).expect("dir");
        std::fs::write(occupied.join("keep.txt"), b"x").expect("file");

        assert!(replace_file(&occupied, b"hello").await.is_err());

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("occupied")]);
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let replica = FileReplica::new("/srv/files");
        for path in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            assert!(replica.resolve(path).is_err(), "{path} must be rejected");
        }
        assert_eq!(
            replica.resolve("a/b.txt").expect("valid"),
            PathBuf::from("/srv/files/a/b.txt")
        );
    }
}
