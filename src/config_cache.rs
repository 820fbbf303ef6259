//! File-backed cache of the outbound mail credentials.
//!
//! Holds the last captured bearer token and the Zoho account identity, plus
//! whatever the latest company config carries. The file lives across restarts
//! and is reseeded from the store at startup.
//!
//! Every read-modify-write and every seed in this process runs under one async
//! mutex, and each write replaces the file through a rename. Other processes
//! writing the same file are not coordinated with.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Contents of the cache file. Any JSON object is kept field for field.
///
/// The recognised fields are read leniently: strings as they are, numbers in
/// their decimal form. Anything else counts as unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedConfig(Map<String, Value>);

impl CachedConfig {
    pub fn token(&self) -> Option<String> {
        self.text("token")
    }

    pub fn account_id(&self) -> Option<String> {
        self.text("accountId")
    }

    pub fn from_address(&self) -> Option<String> {
        self.text("fromAddress")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), Value::String(value.to_string()));
    }
}

impl From<CachedConfig> for Value {
    fn from(cached: CachedConfig) -> Self {
        Value::Object(cached.0)
    }
}

pub struct ConfigCache {
    path: PathBuf,
    legacy_path: PathBuf,
    lock: Mutex<()>,
}

impl ConfigCache {
    pub fn new(path: impl Into<PathBuf>, legacy_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_path: legacy_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents. A missing, empty, unreadable or non-object file reads as empty.
    pub async fn load(&self) -> CachedConfig {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    /// Records the literal `Authorization` header value as the outbound token.
    pub async fn capture_token(&self, token: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        let mut cached = self.read_unlocked().await;
        cached.set("token", token);
        self.write_unlocked(&cached.into()).await
    }

    pub async fn merge_account(&self, account_id: &str, from_address: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        let mut cached = self.read_unlocked().await;
        cached.set("accountId", account_id);
        cached.set("fromAddress", from_address);
        self.write_unlocked(&cached.into()).await
    }

    /// Replaces the whole file with `config_data`.
    ///
    /// Unlike the other writers this does not merge, so a previously captured
    /// token or account identity is dropped unless `config_data` carries one.
    pub async fn seed(&self, config_data: &Value) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        let previous = self.read_unlocked().await;
        if previous.get("token").is_some() && config_data.get("token").is_none() {
            warn!(
                "seeding {} from company config discards the captured token",
                self.path.display()
            );
        }
        self.write_unlocked(config_data).await
    }

    /// Deletes the legacy account sidecar if one is lying around.
    pub async fn remove_legacy_sidecar(&self) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(&self.legacy_path).await {
            Ok(()) => {
                debug!("removed legacy sidecar {}", self.legacy_path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Remove {
                path: self.legacy_path.clone(),
                source,
            }),
        }
    }

    async fn read_unlocked(&self) -> CachedConfig {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return CachedConfig::default(),
            Err(e) => {
                error!("Error reading {}, starting fresh: {}", self.path.display(), e);
                return CachedConfig::default();
            }
        };
        if content.trim().is_empty() {
            return CachedConfig::default();
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => CachedConfig(map),
            Ok(_) => {
                warn!("{} does not hold a JSON object, starting fresh", self.path.display());
                CachedConfig::default()
            }
            Err(e) => {
                warn!("Error parsing {}, starting fresh: {}", self.path.display(), e);
                CachedConfig::default()
            }
        }
    }

    async fn write_unlocked(&self, value: &Value) -> Result<(), CacheError> {
        let body = serde_json::to_string_pretty(value)?;
        let tmp = self.tmp_path();
        let write_err = |source| CacheError::Write {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&tmp, body).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> ConfigCache {
        ConfigCache::new(dir.path().join("config.txt"), dir.path().join("zoho_account.json"))
    }

    async fn raw(cache: &ConfigCache) -> Value {
        let content = tokio::fs::read_to_string(cache.path()).await.unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        assert_eq!(cache.load().await, CachedConfig::default());
        assert!(!cache.path().exists());
    }

    #[tokio::test]
    async fn capture_creates_file_lazily() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        cache.capture_token("Zoho-oauthtoken abc").await.unwrap();

        assert_eq!(raw(&cache).await, json!({"token": "Zoho-oauthtoken abc"}));
    }

    #[tokio::test]
    async fn capture_keeps_other_fields() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.seed(&json!({"accountId": "77", "brand": {"color": "teal"}})).await.unwrap();

        cache.capture_token("Bearer one").await.unwrap();
        cache.capture_token("Bearer two").await.unwrap();

        let loaded = cache.load().await;
        assert_eq!(loaded.token().as_deref(), Some("Bearer two"));
        assert_eq!(loaded.account_id().as_deref(), Some("77"));
        assert_eq!(loaded.get("brand"), Some(&json!({"color": "teal"})));
    }

    #[tokio::test]
    async fn capture_keeps_numeric_account_id() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.seed(&json!({"accountId": 123456, "brand": "teal"})).await.unwrap();

        cache.capture_token("Bearer t").await.unwrap();

        assert_eq!(
            raw(&cache).await,
            json!({"accountId": 123456, "brand": "teal", "token": "Bearer t"})
        );
        let loaded = cache.load().await;
        assert_eq!(loaded.account_id().as_deref(), Some("123456"));
        assert_eq!(loaded.token().as_deref(), Some("Bearer t"));
    }

    #[tokio::test]
    async fn capture_keeps_nested_and_odd_typed_fields() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let seeded = json!({
            "token": {"kind": "oauth"},
            "fromAddress": null,
            "accountId": ["a", "b"],
            "limits": {"daily": 50, "tags": ["x"]},
        });
        cache.seed(&seeded).await.unwrap();

        let loaded = cache.load().await;
        assert!(loaded.token().is_none());
        assert!(loaded.account_id().is_none());
        assert!(loaded.from_address().is_none());

        cache.merge_account("99", "ops@example.com").await.unwrap();

        assert_eq!(
            raw(&cache).await,
            json!({
                "token": {"kind": "oauth"},
                "fromAddress": "ops@example.com",
                "accountId": "99",
                "limits": {"daily": 50, "tags": ["x"]},
            })
        );
    }

    #[tokio::test]
    async fn non_object_seed_is_replaced_on_capture() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.seed(&json!(["plain", 1])).await.unwrap();

        assert!(cache.load().await.is_empty());

        cache.capture_token("Bearer t").await.unwrap();
        assert_eq!(raw(&cache).await, json!({"token": "Bearer t"}));
    }

    #[tokio::test]
    async fn unparseable_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        tokio::fs::write(cache.path(), "{not json").await.unwrap();

        assert_eq!(cache.load().await, CachedConfig::default());

        cache.capture_token("Bearer fresh").await.unwrap();
        assert_eq!(raw(&cache).await, json!({"token": "Bearer fresh"}));
    }

    #[tokio::test]
    async fn merge_account_sets_identity() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.capture_token("Bearer t").await.unwrap();

        cache.merge_account("123", "me@example.com").await.unwrap();

        assert_eq!(
            raw(&cache).await,
            json!({"token": "Bearer t", "accountId": "123", "fromAddress": "me@example.com"})
        );
    }

    #[tokio::test]
    async fn seed_overwrites_verbatim() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.capture_token("Bearer t").await.unwrap();
        cache.merge_account("123", "me@example.com").await.unwrap();

        let config_data = json!({"greeting": "hello", "limits": [1, 2]});
        cache.seed(&config_data).await.unwrap();

        assert_eq!(raw(&cache).await, config_data);
        assert!(cache.load().await.token().is_none());
    }

    #[tokio::test]
    async fn concurrent_captures_do_not_lose_account_metadata() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(cache_in(&dir));

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                if i == 7 {
                    cache.merge_account("acct", "from@example.com").await
                } else {
                    cache.capture_token(&format!("Bearer {i}")).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = cache.load().await;
        assert_eq!(loaded.account_id().as_deref(), Some("acct"));
        assert!(loaded.token().is_some());
    }

    #[tokio::test]
    async fn removes_legacy_sidecar_once() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let sidecar = dir.path().join("zoho_account.json");
        tokio::fs::write(&sidecar, "{}").await.unwrap();

        assert!(cache.remove_legacy_sidecar().await.unwrap());
        assert!(!sidecar.exists());
        assert!(!cache.remove_legacy_sidecar().await.unwrap());
    }
}
