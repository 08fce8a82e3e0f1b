//! Captured frames on disk.

use async_trait::async_trait;
use claim_core::collaborators::{ArtifactRef, ArtifactStore};
use claim_core::error::AdapterError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

const CAPTURE_EXTENSION: &str = "jpg";

/// Keeps captured frames in a single directory. An [`ArtifactRef`] is the
/// file name inside that directory.
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reserve a fresh capture path. Nothing is written until the capturer
    /// does so.
    pub fn allocate(&self) -> (ArtifactRef, PathBuf) {
        let name = format!("{}.{}", Uuid::now_v7(), CAPTURE_EXTENSION);
        let path = self.dir.join(&name);
        (ArtifactRef::new(name), path)
    }

    pub fn path_of(&self, artifact: &ArtifactRef) -> Option<PathBuf> {
        let name = Path::new(artifact.as_str());
        // Refs are bare file names; anything else never came from us
        if name.components().count() != 1 || name.file_name().is_none() {
            return None;
        }
        Some(self.dir.join(name))
    }

    /// Delete captures older than `max_age`. `None` removes every capture.
    /// Returns how many files were removed.
    pub async fn sweep(&self, max_age: Option<Duration>) -> std::io::Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let now = SystemTime::now();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CAPTURE_EXTENSION) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let stale = match max_age {
                None => true,
                Some(max_age) => metadata
                    .modified()
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age > max_age),
            };
            if stale {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to remove stale capture {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            debug!(removed, dir = %self.dir.display(), "Swept captures");
        }
        Ok(removed)
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn release(&self, artifact: ArtifactRef) -> Result<(), AdapterError> {
        let path = self
            .path_of(&artifact)
            .ok_or_else(|| AdapterError::Malformed(format!("bad artifact ref: {}", artifact)))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AdapterError::Other(e.into())),
        }
    }
}
