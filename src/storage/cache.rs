use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Result};
use serde_json::Value;
use tracing::{debug, error};

use crate::clock::Clock;

/// SQLite-backed key/value cache with optional per-entry expiry.
///
/// An entry whose `expires_at` has passed is invisible to every read path
/// (`get`, `exists`, `list_keys`) whether or not [`EphemeralCache::clear_expired`]
/// has physically removed it yet. `set` always replaces.
///
/// Storage failures never propagate: they are logged and the caller sees
/// the absent/false/zero default.
pub struct EphemeralCache {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl EphemeralCache {
    pub fn new(path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache (
                key        TEXT PRIMARY KEY,
                value      TEXT,
                expires_at REAL,
                created_at REAL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache(expires_at);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// In-memory cache for tests.
    #[cfg(test)]
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(":memory:", clock)
    }

    /// Store `value` under `key`, replacing any previous entry. With a TTL
    /// the entry expires `ttl_seconds` from now; without one it never does.
    pub fn set(&self, key: &str, value: &Value, ttl_seconds: Option<u64>) -> bool {
        match self.try_set(key, value, ttl_seconds) {
            Ok(()) => true,
            Err(e) => {
                error!(key, error = %e, "Failed to set cache entry");
                false
            }
        }
    }

    fn try_set(&self, key: &str, value: &Value, ttl_seconds: Option<u64>) -> Result<()> {
        let now = self.clock.epoch();
        let expires_at = ttl_seconds.map(|ttl| now + ttl as f64);
        let value_str = value.to_string();

        let conn = self.conn.lock().expect("cache mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO cache (key, value, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, value_str, expires_at, now],
        )?;
        Ok(())
    }

    /// Look up a non-expired entry.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                error!(key, error = %e, "Failed to read cache entry");
                None
            }
        }
    }

    fn try_get(&self, key: &str) -> Result<Option<Value>> {
        let now = self.clock.epoch();
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let value_str: Option<String> = conn
            .query_row(
                "SELECT value FROM cache
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;

        // Entries are written as JSON; anything unparseable is surfaced as
        // a plain string rather than dropped.
        Ok(value_str.map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s))))
    }

    /// Remove an entry. Returns whether a row was deleted, expired or not.
    pub fn delete(&self, key: &str) -> bool {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        match conn.execute("DELETE FROM cache WHERE key = ?1", params![key]) {
            Ok(n) => n > 0,
            Err(e) => {
                error!(key, error = %e, "Failed to delete cache entry");
                false
            }
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Physically remove expired entries. Returns the number removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.epoch();
        let conn = self.conn.lock().expect("cache mutex poisoned");
        match conn.execute(
            "DELETE FROM cache WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        ) {
            Ok(n) => {
                if n > 0 {
                    debug!(removed = n, "Cleared expired cache entries");
                }
                n
            }
            Err(e) => {
                error!(error = %e, "Failed to clear expired cache entries");
                0
            }
        }
    }

    /// All non-expired keys, in no particular order.
    pub fn list_keys(&self) -> Vec<String> {
        match self.try_list_keys() {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Failed to list cache keys");
                Vec::new()
            }
        }
    }

    fn try_list_keys(&self) -> Result<Vec<String>> {
        let now = self.clock.epoch();
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT key FROM cache WHERE expires_at IS NULL OR expires_at > ?1",
        )?;
        let keys = stmt.query_map(params![now], |row| row.get(0))?;
        keys.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache_at(epoch: f64) -> (EphemeralCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch(epoch));
        let cache = EphemeralCache::open_in_memory(clock.clone()).unwrap();
        (cache, clock)
    }

    #[test]
    fn test_set_then_get() {
        let (cache, _clock) = cache_at(1_000.0);
        assert!(cache.set("k", &json!("v"), Some(1)));
        assert_eq!(cache.get("k"), Some(json!("v")));
        assert!(cache.exists("k"));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = cache_at(1_000.0);
        cache.set("k", &json!("v"), Some(1));
        clock.advance_secs(1.1);
        assert_eq!(cache.get("k"), None);
        assert!(!cache.exists("k"));
        assert!(cache.list_keys().is_empty());
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let (cache, clock) = cache_at(1_000.0);
        cache.set("k", &json!({"a": 1}), None);
        clock.advance_secs(1e9);
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_set_replaces_value_and_ttl() {
        let (cache, clock) = cache_at(1_000.0);
        cache.set("k", &json!("old"), Some(1));
        cache.set("k", &json!("new"), Some(100));
        clock.advance_secs(2.0);
        assert_eq!(cache.get("k"), Some(json!("new")));
    }

    #[test]
    fn test_delete() {
        let (cache, _clock) = cache_at(1_000.0);
        cache.set("k", &json!("v"), None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_clear_expired_counts_only_expired() {
        let (cache, clock) = cache_at(1_000.0);
        cache.set("short", &json!(1), Some(1));
        cache.set("long", &json!(2), Some(100));
        cache.set("forever", &json!(3), None);
        clock.advance_secs(5.0);
        assert_eq!(cache.clear_expired(), 1);
        assert_eq!(cache.clear_expired(), 0);
        let mut keys = cache.list_keys();
        keys.sort();
        assert_eq!(keys, vec!["forever", "long"]);
    }

    #[test]
    fn test_list_keys_hides_expired() {
        let (cache, clock) = cache_at(1_000.0);
        cache.set("a", &json!(1), Some(1));
        cache.set("b", &json!(2), None);
        clock.advance_secs(2.0);
        // No sweep has run; the expired key must still be invisible.
        assert_eq!(cache.list_keys(), vec!["b"]);
    }
}
