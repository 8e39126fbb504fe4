//! Artifact storage backends.
//!
//! Originals and rendition artifacts are addressed by `local://` URIs
//! relative to the media directory.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Storage backend for image bytes.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Write data at the given URI.
    ///
    /// Implementations must publish atomically: a reader either sees no
    /// file or the complete file, never a partial write.
    async fn write(&self, uri: &str, data: &[u8]) -> Result<()>;

    /// Read data from the given URI.
    async fn read(&self, uri: &str) -> Result<Vec<u8>>;

    /// Delete the file at the given URI. Missing files are not an error.
    async fn delete(&self, uri: &str) -> Result<()>;

    /// Check if a file exists.
    async fn exists(&self, uri: &str) -> Result<bool>;

    /// Public URL for a stored file.
    fn public_url(&self, uri: &str) -> String;

    /// Storage scheme (e.g. "local").
    fn scheme(&self) -> &'static str;
}

/// Local filesystem storage rooted at the media directory.
pub struct LocalFileStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalFileStorage {
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
        }
    }

    /// Resolve a `local://` URI to a path under the base directory.
    ///
    /// Rejects `..` and absolute components.
    fn parse_uri(&self, uri: &str) -> Result<PathBuf> {
        let path = uri
            .strip_prefix("local://")
            .context("invalid local URI, must start with local://")?;
        for component in Path::new(path).components() {
            if !matches!(component, Component::Normal(_) | Component::CurDir) {
                anyhow::bail!("storage URI must be a relative path: {uri}");
            }
        }
        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn write(&self, uri: &str, data: &[u8]) -> Result<()> {
        let path = self.parse_uri(uri)?;
        let parent = path
            .parent()
            .context("storage path has no parent directory")?;
        fs::create_dir_all(parent)
            .await
            .context("failed to create directories")?;

        // Unique temp name in the same directory so the rename stays on one filesystem.
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("storage path has no file name")?;
        let temp = parent.join(format!(".{file_name}.{}.tmp", Uuid::now_v7().simple()));

        let result = async {
            let mut file = fs::File::create(&temp)
                .await
                .context("failed to create temporary file")?;
            file.write_all(data)
                .await
                .context("failed to write file")?;
            file.sync_all().await.context("failed to flush file")?;
            fs::rename(&temp, &path)
                .await
                .context("failed to publish file")
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                debug!(path = %temp.display(), error = %cleanup, "temporary file already gone");
            }
            return Err(e);
        }

        debug!(uri = %uri, size = data.len(), "file written");
        Ok(())
    }

    async fn read(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.parse_uri(uri)?;
        let data = fs::read(&path)
            .await
            .with_context(|| format!("failed to read {uri}"))?;
        debug!(uri = %uri, size = data.len(), "file read");
        Ok(data)
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = self.parse_uri(uri)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(uri = %uri, "file deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(uri = %uri, "file not found for deletion");
                Ok(())
            }
            Err(e) => Err(e).context("failed to delete file"),
        }
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        let path = self.parse_uri(uri)?;
        fs::try_exists(&path)
            .await
            .context("failed to stat file")
    }

    fn public_url(&self, uri: &str) -> String {
        let path = uri.strip_prefix("local://").unwrap_or(uri);
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn scheme(&self) -> &'static str {
        "local"
    }
}

impl std::fmt::Debug for LocalFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileStorage")
            .field("base_path", &self.base_path)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Reduce an uploaded file name to a safe single path segment.
pub fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .take(200)
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_unsafe_characters() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("my photo.jpg"), "my_photo.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "image");
    }

    #[test]
    fn traversal_uris_rejected() {
        let storage = LocalFileStorage::new("/tmp/media", "/media");
        assert!(storage.parse_uri("local://../secret").is_err());
        assert!(storage.parse_uri("local:///etc/passwd").is_err());
        assert!(storage.parse_uri("s3://bucket/key").is_err());
        assert!(storage.parse_uri("local://renditions/a/b.jpg").is_ok());
    }

    #[test]
    fn public_url_joins_base() {
        let storage = LocalFileStorage::new("/tmp/media", "https://example.com/media/");
        assert_eq!(
            storage.public_url("local://renditions/a/b.jpg"),
            "https://example.com/media/renditions/a/b.jpg"
        );
    }

    #[tokio::test]
    async fn write_publishes_without_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path(), "/media");

        storage.write("local://originals/x/a.png", b"first").await.unwrap();
        storage.write("local://originals/x/a.png", b"second").await.unwrap();

        assert_eq!(storage.read("local://originals/x/a.png").await.unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("originals/x"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path(), "/media");
        storage.delete("local://nothing/here.png").await.unwrap();
        assert!(!storage.exists("local://nothing/here.png").await.unwrap());
    }
}
