//! Object storage for uploaded media.
//!
//! Handlers talk to a [`MediaStorage`]; the binary plugs in
//! [`LocalMediaStorage`], which keeps objects under `MEDIA_ROOT` and serves
//! them back through `GET /media/{*key}`.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::{fs, process::Command};
use uuid::Uuid;

/// Public URL prefix under which stored objects are served.
pub const MEDIA_URL_PREFIX: &str = "/media";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Thumbnail,
    Avatar,
    CoverImage,
}

impl MediaKind {
    pub const ALL: [Self; 4] = [Self::Video, Self::Thumbnail, Self::Avatar, Self::CoverImage];

    pub fn dir(self) -> &'static str {
        match self {
            Self::Video => "videos",
            Self::Thumbnail => "thumbnails",
            Self::Avatar => "avatars",
            Self::CoverImage => "covers",
        }
    }

    /// Whether an upload declared as `content_type` fits this kind.
    pub fn accepts(self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        match self {
            Self::Video => content_type.starts_with("video/"),
            _ => content_type.starts_with("image/"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub key: String,
    pub url: String,
    pub size: u64,
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Stores `bytes` under a fresh key. Only the extension of `file_name`
    /// is kept.
    async fn put(&self, kind: MediaKind, file_name: &str, bytes: &[u8]) -> Result<StoredMedia>;

    /// Removes an object. `Ok(false)` when it was already gone.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Local path of a stored object, when it exists.
    async fn locate(&self, key: &str) -> Option<PathBuf>;

    /// Duration in seconds of a stored video, if it can be determined.
    async fn probe_duration(&self, key: &str) -> Option<f64>;
}

/// Deletes an object that is no longer referenced. Failures are logged only,
/// since the database row has already moved on.
pub async fn discard(media: &dyn MediaStorage, key: Option<&str>) {
    let Some(key) = key else {
        return;
    };
    match media.delete(key).await {
        Ok(true) => tracing::debug!(key, "deleted media object"),
        Ok(false) => tracing::debug!(key, "media object already gone"),
        Err(err) => tracing::warn!(key, error = %err, "failed to delete media object"),
    }
}

pub struct LocalMediaStorage {
    root: PathBuf,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating media root {}", root.display()))?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Option<PathBuf> {
        let relative = media_key_path(key)?;
        Some(self.root.join(relative))
    }
}

/// Accepts only keys shaped like the ones `put` hands out:
/// `<kind dir>/<file name>`. Anything else under the root (the database
/// among others) is unreachable.
fn media_key_path(key: &str) -> Option<&Path> {
    let path = Path::new(key);
    let mut components = path.components();
    let (Some(Component::Normal(dir)), Some(Component::Normal(_)), None) =
        (components.next(), components.next(), components.next())
    else {
        return None;
    };
    MediaKind::ALL
        .iter()
        .any(|kind| dir.to_str() == Some(kind.dir()))
        .then_some(path)
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn put(&self, kind: MediaKind, file_name: &str, bytes: &[u8]) -> Result<StoredMedia> {
        let key = format!("{}/{}.{}", kind.dir(), Uuid::new_v4(), extension_of(file_name));
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        Ok(StoredMedia {
            url: format!("{MEDIA_URL_PREFIX}/{key}"),
            key,
            size: bytes.len() as u64,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let Some(path) = self.resolve(key) else {
            bail!("refusing to delete unsafe media key {key:?}");
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }

    async fn locate(&self, key: &str) -> Option<PathBuf> {
        let path = self.resolve(key)?;
        let metadata = fs::metadata(&path).await.ok()?;
        metadata.is_file().then_some(path)
    }

    async fn probe_duration(&self, key: &str) -> Option<f64> {
        let path = self.locate(key).await?;
        match ffprobe_duration(&path).await {
            Ok(duration) => Some(duration),
            Err(err) => {
                tracing::warn!(key, error = %err, "could not determine video duration");
                None
            }
        }
    }
}

async fn ffprobe_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .output()
        .await
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        bail!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }

    let duration = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .context("failed to parse ffprobe duration")?;
    if !duration.is_finite() || duration < 0.0 {
        bail!("ffprobe reported an invalid duration {duration}");
    }
    Ok(duration)
}
