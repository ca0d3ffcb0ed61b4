//! Filesystem Status Cache
//!
//! Process-wide cache of target-script existence checks, backed by a
//! bounded, timed [`Table`].

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::table::{Table, TableConfig, TableStats, TableValue};

/// Default number of cached paths.
pub const STAT_CACHE_CAP_DEFAULT: usize = 1024;

/// Default lifetime of a cached status.
pub const STAT_CACHE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);

// == File Status ==
/// Outcome of an existence check on a resolved script path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Not cached; the filesystem must be consulted
    Unknown,
    /// A regular file, possibly behind a symlink
    Found,
    NotFound,
}

impl TableValue for FileStatus {
    fn duplicate(&self) -> Self {
        *self
    }
}

// == Stat Cache ==
/// Shared cache mapping resolved paths to [`FileStatus`].
///
/// Lookup and populate are separate critical sections, so two requests
/// racing on an uncached path may both stat it; the later result wins.
#[derive(Debug)]
pub struct StatCache {
    table: Mutex<Table<FileStatus>>,
}

impl StatCache {
    // == Constructor ==
    /// Creates a cache holding at most `capacity` paths for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let config = TableConfig::new()
            .dup(true)
            .capacity(capacity)
            .ttl(Some(ttl));
        debug!(capacity, ttl_ms = ttl.as_millis() as u64, "stat cache created");
        Self {
            table: Mutex::new(Table::with_config(32, "stat_cache", config)),
        }
    }

    // == Get ==
    /// Returns the cached status, or [`FileStatus::Unknown`] on a miss.
    pub fn get(&self, path: &str) -> FileStatus {
        let status = self
            .table
            .lock()
            .get(path)
            .copied()
            .unwrap_or(FileStatus::Unknown);
        debug!(path, ?status, "stat cache get");
        status
    }

    // == Set ==
    pub fn set(&self, path: &str, status: FileStatus) {
        // Keys are never empty here: callers pass resolved paths
        if self.table.lock().set(path, status).is_ok() {
            debug!(path, ?status, "stat cache set");
        }
    }

    // == Purge Expired ==
    /// Drops expired statuses, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.table.lock().purge_expired()
    }

    pub fn stats(&self) -> TableStats {
        self.table.lock().stats()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

// == File Status Lookup ==
/// Classifies `path`, consulting and populating `cache` when present.
///
/// Symlinks are followed: a link counts as found only if its target is a
/// regular file.
pub async fn file_status(cache: Option<&StatCache>, path: &str) -> FileStatus {
    if let Some(cache) = cache {
        let status = cache.get(path);
        if status != FileStatus::Unknown {
            return status;
        }
    }

    let status = stat(path).await;

    if let Some(cache) = cache {
        cache.set(path, status);
    }
    status
}

async fn stat(path: &str) -> FileStatus {
    if path.is_empty() {
        return FileStatus::NotFound;
    }
    match tokio::fs::metadata(Path::new(path)).await {
        Ok(meta) if meta.is_file() => FileStatus::Found,
        _ => FileStatus::NotFound,
    }
}
