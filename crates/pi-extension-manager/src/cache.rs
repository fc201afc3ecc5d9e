//! Persistent package metadata cache.
//!
//! Entries expire by timestamp comparison only; nothing is evicted in the
//! background. Writes are serialized so that concurrent `set` calls never
//! interleave, while reads always see the in-memory state immediately.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ManagerOptions;
use crate::error::ExtMgrError;
use crate::persist::write_atomic_async;

pub const CACHE_VERSION: u32 = 1;

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPackage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub timestamp: i64,
}

/// Fields supplied by a registry lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub description: Option<String>,
    pub version: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSearch {
    pub query: String,
    pub results: Vec<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheData {
    pub version: u32,
    pub packages: BTreeMap<String, CachedPackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_search: Option<CachedSearch>,
}

impl Default for CacheData {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            packages: BTreeMap::new(),
            last_search: None,
        }
    }
}

impl CacheData {
    /// Keep every well-formed record and drop the rest.
    fn from_value(value: Value) -> Self {
        let mut data = CacheData::default();
        let Value::Object(mut root) = value else {
            return data;
        };

        if let Some(Value::Object(packages)) = root.remove("packages") {
            for (key, entry) in packages {
                match serde_json::from_value::<CachedPackage>(entry) {
                    Ok(package) => {
                        data.packages.insert(key, package);
                    }
                    Err(e) => tracing::debug!("Dropping invalid cache entry '{key}': {e}"),
                }
            }
        }
        if let Some(search) = root.remove("lastSearch") {
            data.last_search = serde_json::from_value::<CachedSearch>(search).ok();
        }
        data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub has_search: bool,
}

pub struct MetadataCache {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    metadata_ttl: Duration,
    search_ttl: Duration,
    data: RwLock<CacheData>,
    write_lock: tokio::sync::Mutex<()>,
}

impl MetadataCache {
    /// Load the cache file. Missing files start empty; unparsable files are
    /// backed up next to the original and reset.
    pub async fn open(path: &Path, options: &ManagerOptions, clock: Arc<dyn Clock>) -> Self {
        let data = load_cache_data(path, clock.as_ref()).await;
        Self {
            path: path.to_path_buf(),
            clock,
            metadata_ttl: options.metadata_ttl,
            search_ttl: options.search_ttl,
            data: RwLock::new(data),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_fresh(&self, timestamp: i64, ttl: Duration) -> bool {
        let age = self.clock.now_ms().saturating_sub(timestamp);
        age < ttl.as_millis() as i64
    }

    pub fn get(&self, name: &str) -> Option<CachedPackage> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.packages
            .get(name)
            .filter(|entry| self.is_fresh(entry.timestamp, self.metadata_ttl))
            .cloned()
    }

    pub async fn set(&self, name: &str, metadata: PackageMetadata) -> Result<(), ExtMgrError> {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            data.packages.insert(
                name.to_string(),
                CachedPackage {
                    name: name.to_string(),
                    description: metadata.description,
                    version: metadata.version,
                    size: metadata.size,
                    timestamp: self.clock.now_ms(),
                },
            );
        }
        self.persist().await
    }

    /// Insert several entries with one write.
    pub async fn set_many(
        &self,
        entries: Vec<(String, PackageMetadata)>,
    ) -> Result<(), ExtMgrError> {
        if entries.is_empty() {
            return Ok(());
        }
        {
            let now = self.clock.now_ms();
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            for (name, metadata) in entries {
                data.packages.insert(
                    name.clone(),
                    CachedPackage {
                        name,
                        description: metadata.description,
                        version: metadata.version,
                        size: metadata.size,
                        timestamp: now,
                    },
                );
            }
        }
        self.persist().await
    }

    /// Cached search results, re-joined against fresh package entries.
    /// Names whose package entry expired are silently dropped.
    pub fn get_search(&self, query: &str) -> Option<Vec<CachedPackage>> {
        let names = {
            let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
            let search = data.last_search.as_ref()?;
            if search.query != query || !self.is_fresh(search.timestamp, self.search_ttl) {
                return None;
            }
            search.results.clone()
        };
        Some(names.iter().filter_map(|name| self.get(name)).collect())
    }

    pub async fn set_search(&self, query: &str, results: &[String]) -> Result<(), ExtMgrError> {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            data.last_search = Some(CachedSearch {
                query: query.to_string(),
                results: results.to_vec(),
                timestamp: self.clock.now_ms(),
            });
        }
        self.persist().await
    }

    pub async fn invalidate(&self, name: &str) -> Result<(), ExtMgrError> {
        let removed = {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            data.packages.remove(name).is_some()
        };
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ExtMgrError> {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            *data = CacheData::default();
        }
        self.persist().await
    }

    pub fn stats(&self) -> CacheStats {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let valid = data
            .packages
            .values()
            .filter(|entry| self.is_fresh(entry.timestamp, self.metadata_ttl))
            .count();
        CacheStats {
            total: data.packages.len(),
            valid,
            expired: data.packages.len() - valid,
            has_search: data.last_search.is_some(),
        }
    }

    /// Snapshot is taken under the write lock so every write carries the
    /// latest state and writes land in order.
    async fn persist(&self) -> Result<(), ExtMgrError> {
        let _guard = self.write_lock.lock().await;
        let content = {
            let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_vec_pretty(&*data)?
        };
        write_atomic_async(&self.path, content).await
    }
}

async fn load_cache_data(path: &Path, clock: &dyn Clock) -> CacheData {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheData::default(),
        Err(e) => {
            tracing::warn!("Failed to read cache {}: {e}", path.display());
            return CacheData::default();
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(value) => CacheData::from_value(value),
        Err(e) => {
            let backup = backup_path(path, clock.now_ms());
            match tokio::fs::rename(path, &backup).await {
                Ok(()) => tracing::warn!(
                    "Cache {} is corrupted ({e}); moved to {}",
                    path.display(),
                    backup.display()
                ),
                Err(rename_err) => tracing::warn!(
                    "Cache {} is corrupted ({e}) and could not be backed up: {rename_err}",
                    path.display()
                ),
            }
            CacheData::default()
        }
    }
}

fn backup_path(path: &Path, now_ms: i64) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "cache.json".to_string());
    path.with_file_name(format!("{file_name}.corrupt-{now_ms}"))
}
