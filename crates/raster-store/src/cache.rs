//! Fetch-once disk cache for per-(run, step) rasters.
//!
//! Multiple processes may share one cache directory. Coordination:
//! - a named advisory file lock (bounded wait) makes each download
//!   happen at most once per key across all cooperating processes;
//! - the final cache path only ever receives complete files, published
//!   with a single atomic rename — readers never see partial data;
//! - an existing cache file is probe-opened on every access and
//!   deleted if unreadable, so a corrupted download heals itself on
//!   the next request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tokio::task;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use netcdf_reader::{probe_file, read_grid};
use sti_common::{Dataset, StiError, StiResult};

use crate::key::{RasterKey, RemoteLayout};
use crate::object_store::ObjectStorage;

/// Configuration for the raster cache.
#[derive(Debug, Clone)]
pub struct RasterCacheConfig {
    /// Directory for cached NetCDF files (shared across processes)
    pub cache_dir: PathBuf,
    /// Canonical payload variable name (e.g. "sti")
    pub preferred_variable: String,
    /// Maximum wait for the per-key download lock
    pub lock_timeout: Duration,
    /// Downloads smaller than this are rejected as corrupt
    pub min_file_bytes: u64,
}

impl Default for RasterCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir(),
            preferred_variable: "sti".to_string(),
            lock_timeout: Duration::from_secs(60),
            min_file_bytes: 100,
        }
    }
}

/// Fetch-or-reuse cache for remote rasters.
pub struct RasterCache {
    storage: Arc<ObjectStorage>,
    layout: RemoteLayout,
    config: RasterCacheConfig,
}

impl RasterCache {
    pub fn new(storage: Arc<ObjectStorage>, layout: RemoteLayout, config: RasterCacheConfig) -> Self {
        Self {
            storage,
            layout,
            config,
        }
    }

    /// Return the raster for `key`, downloading it at most once.
    ///
    /// The returned dataset is fully in memory; callers never touch
    /// the cache file afterwards.
    #[instrument(skip(self), fields(run = %key.run(), step = %key.step()))]
    pub async fn get_or_fetch(&self, key: &RasterKey) -> StiResult<Dataset> {
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;

        let final_path = self.config.cache_dir.join(self.layout.local_filename(key));
        let lock_path = lock_path_for(&final_path);

        // Only one process/task may probe or download this key at a time.
        let lock = {
            let lock_path = lock_path.clone();
            let timeout = self.config.lock_timeout;
            task::spawn_blocking(move || acquire_file_lock(&lock_path, timeout))
                .await
                .map_err(join_err)??
        };

        let fetched = self.ensure_local(key, &final_path).await;
        drop(lock);
        fetched?;

        // The file is published and validated; open it under the HDF5
        // lock and materialize everything before returning.
        let path = final_path.clone();
        let variable = self.config.preferred_variable.clone();
        task::spawn_blocking(move || read_grid(&path, &variable))
            .await
            .map_err(join_err)?
    }

    /// Make sure a validated file sits at `final_path`. Must hold the
    /// per-key lock.
    async fn ensure_local(&self, key: &RasterKey, final_path: &Path) -> StiResult<()> {
        if tokio::fs::try_exists(final_path).await? {
            let probe_target = final_path.to_path_buf();
            match task::spawn_blocking(move || probe_file(&probe_target))
                .await
                .map_err(join_err)?
            {
                Ok(()) => {
                    info!(path = %final_path.display(), "cache hit, file valid");
                    return Ok(());
                }
                Err(e) => {
                    warn!(path = %final_path.display(), error = %e, "corrupt cache file, deleting for re-download");
                    tokio::fs::remove_file(final_path).await?;
                }
            }
        }

        let object_key = self.layout.object_key(key);

        // One automatic re-download on a corrupt artifact; the second
        // failure is fatal.
        match self.download_and_publish(&object_key, final_path).await {
            Err(StiError::Corrupt(msg)) => {
                warn!(key = %object_key, error = %msg, "fresh download failed validation, retrying once");
                self.download_and_publish(&object_key, final_path).await
            }
            other => other,
        }
    }

    /// Download into a unique temp path on the cache filesystem,
    /// validate, then atomically rename into place. The rename is the
    /// sole publish event.
    async fn download_and_publish(&self, object_key: &str, final_path: &Path) -> StiResult<()> {
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("raster.nc");
        let tmp_path = final_path.with_file_name(format!("{}.{}.tmp", file_name, Uuid::new_v4()));

        let result = self.fetch_into(object_key, &tmp_path, final_path).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }

    async fn fetch_into(
        &self,
        object_key: &str,
        tmp_path: &Path,
        final_path: &Path,
    ) -> StiResult<()> {
        info!(key = %object_key, tmp = %tmp_path.display(), "starting download");
        self.storage.download_to(object_key, tmp_path).await?;

        let size = tokio::fs::metadata(tmp_path).await?.len();
        if size < self.config.min_file_bytes {
            return Err(StiError::Corrupt(format!(
                "downloaded object {} is too small ({} bytes)",
                object_key, size
            )));
        }

        let probe_target = tmp_path.to_path_buf();
        task::spawn_blocking(move || probe_file(&probe_target))
            .await
            .map_err(join_err)?
            .map_err(|e| {
                StiError::Corrupt(format!(
                    "downloaded object {} failed to open: {}",
                    object_key, e
                ))
            })?;

        tokio::fs::rename(tmp_path, final_path).await?;
        info!(path = %final_path.display(), bytes = size, "download validated and published");
        Ok(())
    }
}

fn lock_path_for(final_path: &Path) -> PathBuf {
    let mut s = final_path.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

/// Guard for an exclusive advisory file lock; dropping releases it.
#[derive(Debug)]
struct FileLockGuard {
    _file: std::fs::File,
}

/// Acquire an exclusive lock on `path`, polling until `timeout`.
fn acquire_file_lock(path: &Path, timeout: Duration) -> StiResult<FileLockGuard> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)?;

    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(FileLockGuard { _file: file }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(StiError::LockTimeout {
                        path: path.display().to_string(),
                        waited_secs: timeout.as_secs(),
                    });
                }
                std::thread::sleep(Duration::from_millis(250));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn join_err(e: task::JoinError) -> StiError {
    StiError::InternalError(format!("blocking task failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_suffix() {
        let p = lock_path_for(Path::new("/tmp/sti_2025111500_072.nc"));
        assert_eq!(p, Path::new("/tmp/sti_2025111500_072.nc.lock"));
    }

    #[test]
    fn test_lock_acquire_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("x.lock");

        let held = acquire_file_lock(&lock_path, Duration::from_millis(100)).unwrap();

        let err = acquire_file_lock(&lock_path, Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, StiError::LockTimeout { .. }));
        assert!(err.is_retryable());

        drop(held);
        acquire_file_lock(&lock_path, Duration::from_millis(100)).unwrap();
    }
}
