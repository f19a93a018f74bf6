use anyhow::{Result, bail};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use doubtdesk_types::models::Screenshot;

/// 5 MB limit for a decoded screenshot.
pub const MAX_SCREENSHOT_SIZE: usize = 5 * 1024 * 1024;

/// Manages on-disk storage for doubt screenshots.
///
/// Each screenshot is stored as a flat file at `{dir}/{file_id}` and served
/// back at `{public_url}/screenshots/{file_id}`.
pub struct ScreenshotStore {
    dir: PathBuf,
    public_url: String,
}

impl ScreenshotStore {
    pub async fn new(dir: PathBuf, public_url: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Screenshot storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a fresh id that keeps the original extension.
    pub async fn upload(&self, bytes: &[u8], filename: &str) -> Result<Screenshot> {
        if bytes.is_empty() {
            bail!("refusing to store an empty screenshot");
        }

        let file_id = match extension(filename) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        let path = self.dir.join(&file_id);
        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        info!("Stored screenshot {} ({} bytes)", file_id, bytes.len());
        Ok(Screenshot {
            url: format!("{}/screenshots/{}", self.public_url, file_id),
            file_id,
        })
    }

    /// Release a stored screenshot. A file that is already gone counts as released.
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        if !is_safe_file_id(file_id) {
            bail!("invalid screenshot file id '{}'", file_id);
        }

        match fs::remove_file(self.dir.join(file_id)).await {
            Ok(()) => {
                info!("Released screenshot {}", file_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Screenshot {} already gone", file_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lowercased alphanumeric extension of at most 8 characters.
fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// Prevent path traversal
fn is_safe_file_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && file_id != "."
        && file_id != ".."
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> ScreenshotStore {
        let dir = std::env::temp_dir().join(format!("doubtdesk-shots-{}", Uuid::new_v4()));
        ScreenshotStore::new(dir, "http://localhost:3000/").await.unwrap()
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(extension("trace.PNG").as_deref(), Some("png"));
        assert_eq!(extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension("evil./../x"), None);
    }

    #[test]
    fn traversal_ids_are_rejected() {
        assert!(is_safe_file_id("0b6f1c2e-1111-4a4a-9999-123456789abc.png"));
        assert!(!is_safe_file_id("../etc/passwd"));
        assert!(!is_safe_file_id(".."));
        assert!(!is_safe_file_id(""));
    }

    #[tokio::test]
    async fn upload_then_delete() {
        let store = temp_store().await;
        let shot = store.upload(b"\x89PNG fake", "error.png").await.unwrap();

        assert!(shot.file_id.ends_with(".png"));
        assert_eq!(shot.url, format!("http://localhost:3000/screenshots/{}", shot.file_id));
        assert!(store.dir().join(&shot.file_id).exists());

        store.delete(&shot.file_id).await.unwrap();
        assert!(!store.dir().join(&shot.file_id).exists());

        // Second release is a no-op.
        store.delete(&shot.file_id).await.unwrap();
    }

    #[tokio::test]
    async fn empty_upload_is_refused() {
        let store = temp_store().await;
        assert!(store.upload(b"", "a.png").await.is_err());
    }
}
