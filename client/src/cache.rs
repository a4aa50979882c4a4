//! File cache of the last accepted application catalog per host.
//!
//! The cache is best-effort: failures are logged and otherwise ignored.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AppListCache {
    dir: PathBuf,
}

impl AppListCache {
    /// Cache rooted at `cache_dir`; catalogs go to `<cache_dir>/applist/<uuid>`.
    #[must_use]
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            dir: cache_dir.join("applist"),
        }
    }

    fn path(&self, uuid: Uuid) -> PathBuf {
        self.dir.join(uuid.to_string())
    }

    /// Replaces the cached catalog of `uuid`. Returns `false` if it could not be written.
    pub async fn store(&self, uuid: Uuid, raw: &str) -> bool {
        match self.try_store(uuid, raw).await {
            Ok(()) => {
                debug!(%uuid, "Cached app list");
                true
            }
            Err(e) => {
                warn!(%uuid, "Failed to cache app list: {e}");
                false
            }
        }
    }

    async fn try_store(&self, uuid: Uuid, raw: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path(uuid);
        // Write next to the target and rename so readers never see a partial catalog.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, &path).await
    }

    pub async fn load(&self, uuid: Uuid) -> Option<String> {
        match fs::read_to_string(self.path(uuid)).await {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(%uuid, "Failed to read cached app list: {e}");
                None
            }
        }
    }

    pub async fn remove(&self, uuid: Uuid) {
        match fs::remove_file(self.path(uuid)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!(%uuid, "Failed to remove cached app list: {e}");
            }
            _ => {}
        }
    }
}
