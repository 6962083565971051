//! Record cache used by `get_cached` and invalidated by writes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::PolyDbError;
use crate::types::{Record, RowValues};

/// Narrow get/put/del store holding serialized records, e.g. a Redis client.
#[async_trait]
pub trait Cache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, PolyDbError>;

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), PolyDbError>;

    async fn del(&self, key: &str) -> Result<(), PolyDbError>;
}

/// `"<prefix>|<key values joined by |>"`; `None` when a key value is missing.
#[must_use]
pub fn cache_key(prefix: &str, keys: &[String], obj: &Record) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    let mut parts = Vec::with_capacity(keys.len() + 1);
    parts.push(prefix.to_string());
    for key in keys {
        let value = obj.get(key).filter(|v| !v.is_empty())?;
        parts.push(value.to_text());
    }
    Some(parts.join("|"))
}

/// # Errors
/// `JsonError` when the record cannot be serialized.
pub fn encode_record(record: &Record) -> Result<String, PolyDbError> {
    let object: serde_json::Map<String, serde_json::Value> = record
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    Ok(serde_json::to_string(&object)?)
}

/// # Errors
/// `JsonError` for malformed text, `ParameterError` when it is not a JSON object.
pub fn decode_record(text: &str) -> Result<Record, PolyDbError> {
    match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), RowValues::from_json(v)))
            .collect()),
        _ => Err(PolyDbError::ParameterError("cached value is not an object".into())),
    }
}

struct Entry {
    value: String,
    expires: Option<Instant>,
}

/// In-process [`Cache`] with per-entry expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache").field("len", &self.len()).finish()
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, PolyDbError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires.is_none_or(|at| at > Instant::now()) {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            debug!("cache: expired {key}");
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), PolyDbError> {
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), Entry { value, expires });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), PolyDbError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn keys_need_every_value() {
        let keys = vec!["id".to_string(), "at".to_string()];
        let obj = record! { "id" => "a", "at" => 5_i64 };
        assert_eq!(cache_key("users", &keys, &obj).as_deref(), Some("users|a|5"));
        let partial = record! { "id" => "a" };
        assert_eq!(cache_key("users", &keys, &partial), None);
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache.put("a", "1".into(), Some(Duration::ZERO)).await.unwrap();
        cache.put("b", "2".into(), None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap().as_deref(), Some("2"));
        cache.del("b").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_writers_share_one_map() {
        let cache = std::sync::Arc::new(MemoryCache::new());
        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let cache = std::sync::Arc::clone(&cache);
                tokio::spawn(async move { cache.put(&format!("k{n}"), n.to_string(), None).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(cache.len(), 16);
        assert_eq!(cache.get("k7").await.unwrap().as_deref(), Some("7"));
    }
}
