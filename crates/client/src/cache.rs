//! File-backed result cache. Each entry is a JSON document in the
//! cache directory, named after the SHA-256 of its key, carrying the
//! value alongside an optional absolute expiry and tag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    value: serde_json::Value,
    /// Unix timestamp in seconds after which the entry is stale.
    expires_at: Option<u64>,
    tag: Option<String>,
}

/// Cache over a directory of JSON files. A cache built without a
/// directory is a no-op: reads miss and writes are dropped, so callers
/// never branch on whether caching is enabled.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: Option<PathBuf>,
}

impl ResultCache {
    pub fn new(dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("unable to create cache directory {}: {e}", dir.display());
            return Self { dir: None };
        }
        Self { dir: Some(dir) }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Cache key for an operation and its arguments. Hashing keeps
    /// arbitrary argument values filename-safe.
    pub fn derive_key(op: &str, args: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(args.join("_").as_bytes());
        format!("{op}_{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        Some(dir.join(format!("{:x}.json", hasher.finalize())))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key)?;
        let raw = std::fs::read_to_string(&path).ok()?;
        let entry: Entry = serde_json::from_str(&raw).ok()?;
        if let Some(expires_at) = entry.expires_at {
            if now_secs() >= expires_at {
                let _ = std::fs::remove_file(&path);
                return None;
            }
        }
        serde_json::from_value(entry.value).ok()
    }

    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tag: Option<&str>,
    ) -> bool {
        let Some(path) = self.entry_path(key) else {
            return false;
        };
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("cache set {key}: unserializable value: {e}");
                return false;
            }
        };
        let entry = Entry {
            value,
            expires_at: ttl.map(|t| now_secs() + t.as_secs()),
            tag: tag.map(str::to_owned),
        };
        let written = serde_json::to_string(&entry)
            .ok()
            .and_then(|body| std::fs::write(&path, body).ok())
            .is_some();
        debug!("cache set {key} ttl:{ttl:?} tag:{tag:?} success:{written}");
        written
    }

    /// Read-through composition: on a miss (or when `skip_cache` asks
    /// for a forced refresh) compute the value and store it under the
    /// same key.
    pub async fn get_or_put<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        skip_cache: bool,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !skip_cache {
            if let Some(hit) = self.get::<T>(key) {
                debug!("cache hit:{key}");
                return Ok(hit);
            }
        }
        let value = compute().await?;
        self.set(key, &value, ttl, None);
        Ok(value)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
