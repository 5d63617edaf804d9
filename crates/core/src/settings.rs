//! Flat key-value settings store.
//!
//! The daemon only reads these keys; the CLI (standing in for the options
//! UI) writes them. Every read goes back to the backing store so a change
//! made by another process is picked up by the next sweep.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Error, Result};

pub mod keys {
    pub const EXTENSION_ENABLED: &str = "extensionEnabled";
    pub const SUSPEND_TIME: &str = "suspendTime";
    pub const EXCLUDED_SITES: &str = "excludedSites";
    pub const COOKIE_WHITELIST: &str = "cookieWhitelist";
    pub const POPUP_BLOCKER_ENABLED: &str = "popupBlockerEnabled";
    pub const POPUP_BLOCKED_TOTAL: &str = "popupBlockedTotal";
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Snapshot of the whole store.
    async fn all(&self) -> Result<Map<String, Value>>;

    async fn get_string_list(&self, key: &str) -> Result<Vec<String>> {
        Ok(match self.get(key).await? {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        })
    }
}

/// Settings persisted as a single pretty-printed JSON object.
pub struct JsonFileSettings {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<Map<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        // Writes go through a rename, so an empty file was never written by us.
        if content.trim().is_empty() {
            return Err(Error::Settings(format!("{} is empty", self.path.display())));
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::Settings(format!(
                "{} must contain a JSON object, found {}",
                self.path.display(),
                type_name(&other)
            ))),
        }
    }

    async fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(map)?;

        // Readers in other processes must see either the old or the new file.
        let tmp_path = self.temp_path();
        tokio::fs::write(&tmp_path, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::Settings(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "settings.json".to_string());
        self.path.with_file_name(format!(
            ".{}.{}-{}.tmp",
            name,
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value);
        self.write_map(&map).await?;
        debug!(key, path = %self.path.display(), "Settings updated");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }

    async fn all(&self) -> Result<Map<String, Value>> {
        self.read_map().await
    }
}

/// In-process store, used by tests and as a fallback when no file is wanted.
#[derive(Default)]
pub struct MemorySettings {
    values: RwLock<Map<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object literal; non-object values yield an empty store.
    pub fn from_value(value: Value) -> Self {
        let values = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn all(&self) -> Result<Map<String, Value>> {
        Ok(self.values.read().await.clone())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
