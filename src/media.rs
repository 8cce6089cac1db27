use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("Media not found: {0}")]
    NotFound(String),

    #[error("Invalid media path: {0}")]
    InvalidPath(String),

    #[error("Media I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage holding original and rendered video bytes, addressed by
/// opaque `/`-separated paths
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn download(&self, path: &str) -> Result<Vec<u8>, MediaError>;

    /// Store bytes at `path`, overwriting any existing object
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), MediaError>;

    /// Time-limited URL for playback
    async fn signed_url(&self, path: &str, ttl_secs: u64) -> Result<Url, MediaError>;
}

/// Media store backed by a local directory
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub async fn new(root: PathBuf) -> Result<Self, MediaError> {
        fs::create_dir_all(&root).await?;
        // Signed URLs need an absolute path
        let root = fs::canonicalize(&root).await?;
        debug!("📁 Media store rooted at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store path onto the root, refusing anything that could escape it
    fn resolve(&self, path: &str) -> Result<PathBuf, MediaError> {
        let relative = Path::new(path);
        if path.is_empty() {
            return Err(MediaError::InvalidPath(path.to_string()));
        }

        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(MediaError::InvalidPath(path.to_string())),
            }
        }

        Ok(self.root.join(relative))
    }
}

/// Sibling file an upload is written to before being renamed into place
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        let full_path = self.resolve(path)?;
        match fs::read(&full_path).await {
            Ok(bytes) => {
                debug!("📥 Read {} bytes from {}", bytes.len(), path);
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), MediaError> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so readers never see a partial file
        let tmp_path = partial_path(&full_path);
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &full_path).await?;

        debug!("📤 Stored {} bytes at {} ({})", bytes.len(), path, content_type);
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl_secs: u64) -> Result<Url, MediaError> {
        let full_path = self.resolve(path)?;
        if !fs::try_exists(&full_path).await? {
            return Err(MediaError::NotFound(path.to_string()));
        }

        let mut url = Url::from_file_path(&full_path)
            .map_err(|_| MediaError::InvalidPath(full_path.display().to_string()))?;
        let expires = Utc::now() + ChronoDuration::seconds(ttl_secs.min(u32::MAX as u64) as i64);
        url.query_pairs_mut()
            .append_pair("expires", &expires.timestamp().to_string());

        Ok(url)
    }
}
