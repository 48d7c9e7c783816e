use crate::common::metrics;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Serialize)]
struct CacheRecordRef<'a, T> {
    timestamp: i64,
    data: &'a T,
}

#[derive(Deserialize)]
struct CacheRecord<T> {
    timestamp: i64,
    data: T,
}

/// File-backed key/group cache with read-time expiry.
///
/// One file per normalized `key[_group]`, holding `{"timestamp", "data"}`.
/// Expired entries stay on disk and read as absent. I/O and decode failures
/// also read as absent.
#[derive(Debug, Clone)]
pub struct TtlCache {
    dir: PathBuf,
}

impl TtlCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn set<T: Serialize>(&self, key: &str, group: Option<&str>, payload: &T) -> bool {
        self.set_at(key, group, payload, now())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str, group: Option<&str>, ttl: Duration) -> Option<T> {
        self.get_at(key, group, ttl, now())
    }

    pub fn invalidate(&self, key: &str, group: Option<&str>) {
        let path = self.entry_path(key, group);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Invalidated cache entry {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove cache entry {}: {}", path.display(), e),
        }
    }

    fn set_at<T: Serialize>(&self, key: &str, group: Option<&str>, payload: &T, timestamp: i64) -> bool {
        let path = self.entry_path(key, group);
        let record = CacheRecordRef {
            timestamp,
            data: payload,
        };

        let serialized = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize cache entry {}: {}", path.display(), e);
                return false;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("Failed to create cache directory {}: {}", self.dir.display(), e);
            return false;
        }

        match std::fs::write(&path, serialized) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write cache entry {}: {}", path.display(), e);
                false
            }
        }
    }

    fn get_at<T: DeserializeOwned>(
        &self,
        key: &str,
        group: Option<&str>,
        ttl: Duration,
        now: i64,
    ) -> Option<T> {
        let path = self.entry_path(key, group);

        let raw = match std::fs::read(&path) {
            Ok(raw) if !raw.is_empty() => raw,
            Ok(_) => return self.miss(&path, "empty"),
            Err(_) => return self.miss(&path, "absent"),
        };

        let record: CacheRecord<T> = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                debug!("Undecodable cache entry {}: {}", path.display(), e);
                return self.miss(&path, "undecodable");
            }
        };

        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        if now > record.timestamp.saturating_add(ttl) {
            return self.miss(&path, "expired");
        }

        metrics::increment_cache_hit();
        debug!("Cache hit {}", path.display());
        Some(record.data)
    }

    fn miss<T>(&self, path: &Path, reason: &str) -> Option<T> {
        metrics::increment_cache_miss();
        debug!("Cache miss {} ({})", path.display(), reason);
        None
    }

    fn entry_path(&self, key: &str, group: Option<&str>) -> PathBuf {
        let mut filename = normalize_key(key);
        if let Some(group) = group {
            filename.push('_');
            filename.push_str(&normalize_key(group));
        }
        self.dir.join(filename)
    }
}

/// Map path separators and query delimiters to filename-safe characters.
/// Ex. `users/john-doe` => `users.john-doe`
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | '&' | '?' => '.',
            '=' => '_',
            ',' | '+' => '-',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
