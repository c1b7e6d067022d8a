use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::clock::Clock;

/// Exact-equality match on a named field.
#[derive(Debug, Clone, Deserialize)]
pub struct TermFilter {
    pub field: String,
    pub value: Value,
}

/// Numeric range match on a named field. A document field that is missing
/// or non-numeric compares as 0.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeFilter {
    pub field: String,
    pub gte: Option<f64>,
    pub lte: Option<f64>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
}

/// Filter for [`EventStore::search`]. Both clauses must hold when present;
/// the empty query matches everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub term: Option<TermFilter>,
    pub range: Option<RangeFilter>,
}

/// One page of search results. `total` counts every match, not just the
/// returned page.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub total: usize,
    pub documents: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndexStats {
    pub count: usize,
    pub size_bytes: u64,
}

/// Append-only document log, one JSONL file per named collection.
///
/// Documents are stored with server-stamped `_id` and `_timestamp` keys
/// merged into the caller's field map. Inserts only ever append; delete
/// and retention cleanup rewrite the collection file without the removed
/// entries. All file access is serialized by a whole-store lock.
pub struct EventStore {
    data_dir: PathBuf,
    lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
}

impl EventStore {
    pub fn new(data_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        Ok(Self {
            data_dir,
            lock: Mutex::new(()),
            clock,
            seq: AtomicU64::new(0),
        })
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            bail!("Invalid collection name: {collection:?}");
        }
        Ok(self.data_dir.join(format!("{collection}.jsonl")))
    }

    /// Unique within the store: epoch millis + a monotonic counter + a
    /// content hash prefix.
    fn generate_id(&self, fields: &Map<String, Value>) -> String {
        let millis = (self.clock.epoch() * 1000.0) as u64;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(Value::Object(fields.clone()).to_string().as_bytes());
        let mut hash = String::with_capacity(8);
        for byte in &digest[..4] {
            hash.push_str(&format!("{byte:02x}"));
        }
        format!("{millis}-{seq}-{hash}")
    }

    /// Append a document to `collection`, stamping `_id` (generated unless
    /// supplied) and `_timestamp` (epoch seconds). Returns the id.
    ///
    /// The only store operation whose error reaches the caller; read paths
    /// degrade to empty results internally.
    pub fn index_document(
        &self,
        collection: &str,
        fields: Map<String, Value>,
        doc_id: Option<&str>,
    ) -> Result<String> {
        let path = self.collection_path(collection)?;
        let _guard = self.lock.lock();

        let id = match doc_id {
            Some(id) => id.to_string(),
            None => self.generate_id(&fields),
        };

        let mut doc = fields;
        doc.insert("_id".to_string(), Value::String(id.clone()));
        doc.insert(
            "_timestamp".to_string(),
            Value::from(self.clock.epoch()),
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", Value::Object(doc))
            .with_context(|| format!("Failed to append to {}", path.display()))?;

        debug!(collection, id = %id, "Indexed document");
        Ok(id)
    }

    fn read_all(&self, collection: &str) -> Result<Vec<Map<String, Value>>> {
        let path = self.collection_path(collection)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut documents = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A torn or corrupt line loses that document, not the log.
            match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(doc)) => documents.push(doc),
                _ => continue,
            }
        }
        Ok(documents)
    }

    fn write_all(&self, collection: &str, documents: &[Map<String, Value>]) -> Result<()> {
        let path = self.collection_path(collection)?;
        let mut file = File::create(&path)
            .with_context(|| format!("Failed to rewrite {}", path.display()))?;
        for doc in documents {
            writeln!(file, "{}", Value::Object(doc.clone()))?;
        }
        Ok(())
    }

    fn matches(doc: &Map<String, Value>, query: &SearchQuery) -> bool {
        if let Some(term) = &query.term {
            if doc.get(&term.field) != Some(&term.value) {
                return false;
            }
        }
        if let Some(range) = &query.range {
            let v = doc
                .get(&range.field)
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if let Some(gte) = range.gte {
                if v < gte {
                    return false;
                }
            }
            if let Some(lte) = range.lte {
                if v > lte {
                    return false;
                }
            }
            if let Some(gt) = range.gt {
                if v <= gt {
                    return false;
                }
            }
            if let Some(lt) = range.lt {
                if v >= lt {
                    return false;
                }
            }
        }
        true
    }

    /// Filtered, paginated view of a collection in append order.
    pub fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
        size: usize,
        offset: usize,
    ) -> SearchResult {
        let _guard = self.lock.lock();
        let documents = match self.read_all(collection) {
            Ok(docs) => docs,
            Err(e) => {
                error!(collection, error = %e, "Search failed");
                return SearchResult::default();
            }
        };

        let matched: Vec<Map<String, Value>> = documents
            .into_iter()
            .filter(|doc| Self::matches(doc, query))
            .collect();
        let total = matched.len();
        let documents = matched.into_iter().skip(offset).take(size).collect();

        SearchResult { total, documents }
    }

    pub fn get_document(&self, collection: &str, doc_id: &str) -> Option<Map<String, Value>> {
        let _guard = self.lock.lock();
        match self.read_all(collection) {
            Ok(docs) => docs
                .into_iter()
                .find(|doc| doc.get("_id").and_then(Value::as_str) == Some(doc_id)),
            Err(e) => {
                error!(collection, doc_id, error = %e, "Document lookup failed");
                None
            }
        }
    }

    /// Remove the document with `doc_id`, rewriting the collection without
    /// it. Returns whether anything was removed.
    pub fn delete_document(&self, collection: &str, doc_id: &str) -> bool {
        let _guard = self.lock.lock();
        let result = (|| -> Result<bool> {
            let documents = self.read_all(collection)?;
            let before = documents.len();
            let remaining: Vec<Map<String, Value>> = documents
                .into_iter()
                .filter(|doc| doc.get("_id").and_then(Value::as_str) != Some(doc_id))
                .collect();
            if remaining.len() == before {
                return Ok(false);
            }
            self.write_all(collection, &remaining)?;
            debug!(collection, doc_id, "Deleted document");
            Ok(true)
        })();

        result.unwrap_or_else(|e| {
            error!(collection, doc_id, error = %e, "Document delete failed");
            false
        })
    }

    pub fn stats(&self, collection: &str) -> IndexStats {
        let _guard = self.lock.lock();
        let result = (|| -> Result<IndexStats> {
            let path = self.collection_path(collection)?;
            if !path.exists() {
                return Ok(IndexStats::default());
            }
            let count = self.read_all(collection)?.len();
            let size_bytes = fs::metadata(&path)?.len();
            Ok(IndexStats { count, size_bytes })
        })();

        result.unwrap_or_else(|e| {
            error!(collection, error = %e, "Stats failed");
            IndexStats::default()
        })
    }

    /// Drop documents whose stamped `_timestamp` is older than
    /// `days_to_keep`. Returns the number removed.
    pub fn cleanup(&self, collection: &str, days_to_keep: u64) -> usize {
        let cutoff = self.clock.epoch() - (days_to_keep as f64) * 86_400.0;
        let _guard = self.lock.lock();
        let result = (|| -> Result<usize> {
            let documents = self.read_all(collection)?;
            let before = documents.len();
            let kept: Vec<Map<String, Value>> = documents
                .into_iter()
                .filter(|doc| {
                    doc.get("_timestamp")
                        .and_then(Value::as_f64)
                        .map_or(false, |ts| ts >= cutoff)
                })
                .collect();
            let removed = before - kept.len();
            if removed > 0 {
                self.write_all(collection, &kept)?;
            }
            Ok(removed)
        })();

        result.unwrap_or_else(|e| {
            error!(collection, error = %e, "Cleanup failed");
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    static TEST_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn store_at(epoch: f64) -> (EventStore, Arc<ManualClock>) {
        let dir = std::env::temp_dir().join(format!(
            "rampart-events-{}-{}",
            std::process::id(),
            TEST_DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let clock = Arc::new(ManualClock::at_epoch(epoch));
        let store = EventStore::new(dir, clock.clone()).unwrap();
        (store, clock)
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_index_assigns_unique_ids_and_timestamp() {
        let (store, _clock) = store_at(1_000.0);
        let a = store
            .index_document("events", fields(&[("n", json!(1))]), None)
            .unwrap();
        let b = store
            .index_document("events", fields(&[("n", json!(1))]), None)
            .unwrap();
        assert_ne!(a, b);

        let doc = store.get_document("events", &a).unwrap();
        assert_eq!(doc["_timestamp"], json!(1_000.0));
        assert_eq!(doc["n"], json!(1));
    }

    #[test]
    fn test_supplied_id_is_used() {
        let (store, _clock) = store_at(1_000.0);
        let id = store
            .index_document("events", fields(&[("n", json!(1))]), Some("doc-1"))
            .unwrap();
        assert_eq!(id, "doc-1");
        assert!(store.get_document("events", "doc-1").is_some());
    }

    #[test]
    fn test_search_without_filter_returns_all_in_append_order() {
        let (store, _clock) = store_at(1_000.0);
        for n in 0..5 {
            store
                .index_document("events", fields(&[("n", json!(n))]), None)
                .unwrap();
        }
        let result = store.search("events", &SearchQuery::default(), 10, 0);
        assert_eq!(result.total, 5);
        let ns: Vec<i64> = result
            .documents
            .iter()
            .map(|d| d["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_term_filter() {
        let (store, _clock) = store_at(1_000.0);
        store
            .index_document("events", fields(&[("kind", json!("a"))]), None)
            .unwrap();
        store
            .index_document("events", fields(&[("kind", json!("b"))]), None)
            .unwrap();
        let query = SearchQuery {
            term: Some(TermFilter {
                field: "kind".to_string(),
                value: json!("a"),
            }),
            range: None,
        };
        let result = store.search("events", &query, 10, 0);
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0]["kind"], json!("a"));
    }

    #[test]
    fn test_range_filter_gte() {
        let (store, _clock) = store_at(1_000.0);
        let t = 500.0;
        for i in 0..5 {
            store
                .index_document(
                    "events",
                    fields(&[("timestamp", json!(t + i as f64))]),
                    None,
                )
                .unwrap();
        }
        let query = SearchQuery {
            term: None,
            range: Some(RangeFilter {
                field: "timestamp".to_string(),
                gte: Some(t + 2.0),
                ..Default::default()
            }),
        };
        let result = store.search("events", &query, 10, 0);
        assert_eq!(result.total, 3);
        for doc in &result.documents {
            assert!(doc["timestamp"].as_f64().unwrap() >= t + 2.0);
        }
    }

    #[test]
    fn test_range_filter_strict_bounds() {
        let (store, _clock) = store_at(1_000.0);
        for v in [1.0, 2.0, 3.0] {
            store
                .index_document("events", fields(&[("v", json!(v))]), None)
                .unwrap();
        }
        let query = SearchQuery {
            term: None,
            range: Some(RangeFilter {
                field: "v".to_string(),
                gt: Some(1.0),
                lt: Some(3.0),
                ..Default::default()
            }),
        };
        let result = store.search("events", &query, 10, 0);
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0]["v"], json!(2.0));
    }

    #[test]
    fn test_pagination_windows() {
        let (store, _clock) = store_at(1_000.0);
        for n in 0..7 {
            store
                .index_document("events", fields(&[("n", json!(n))]), None)
                .unwrap();
        }
        let page = store.search("events", &SearchQuery::default(), 3, 3);
        assert_eq!(page.total, 7);
        let ns: Vec<i64> = page
            .documents
            .iter()
            .map(|d| d["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![3, 4, 5]);

        let tail = store.search("events", &SearchQuery::default(), 3, 6);
        assert_eq!(tail.documents.len(), 1);
    }

    #[test]
    fn test_delete_document_leaves_others_intact() {
        let (store, _clock) = store_at(1_000.0);
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(
                store
                    .index_document("events", fields(&[("n", json!(n))]), None)
                    .unwrap(),
            );
        }
        assert!(store.delete_document("events", &ids[1]));
        assert!(!store.delete_document("events", &ids[1]));

        let result = store.search("events", &SearchQuery::default(), 10, 0);
        assert_eq!(result.total, 2);
        assert!(store.get_document("events", &ids[0]).is_some());
        assert!(store.get_document("events", &ids[2]).is_some());
    }

    #[test]
    fn test_stats() {
        let (store, _clock) = store_at(1_000.0);
        assert_eq!(store.stats("events").count, 0);
        store
            .index_document("events", fields(&[("n", json!(1))]), None)
            .unwrap();
        store
            .index_document("events", fields(&[("n", json!(2))]), None)
            .unwrap();
        let stats = store.stats("events");
        assert_eq!(stats.count, 2);
        assert!(stats.size_bytes > 0);
    }

    #[test]
    fn test_cleanup_by_stamped_timestamp() {
        let (store, clock) = store_at(1_000.0);
        store
            .index_document("events", fields(&[("n", json!("old"))]), None)
            .unwrap();
        clock.advance_secs(10.0 * 86_400.0);
        store
            .index_document("events", fields(&[("n", json!("new"))]), None)
            .unwrap();

        let removed = store.cleanup("events", 7);
        assert_eq!(removed, 1);
        let result = store.search("events", &SearchQuery::default(), 10, 0);
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0]["n"], json!("new"));
    }

    #[test]
    fn test_collections_are_independent() {
        let (store, _clock) = store_at(1_000.0);
        store
            .index_document("alpha", fields(&[("n", json!(1))]), None)
            .unwrap();
        store
            .index_document("beta", fields(&[("n", json!(2))]), None)
            .unwrap();
        assert_eq!(store.search("alpha", &SearchQuery::default(), 10, 0).total, 1);
        assert_eq!(store.search("beta", &SearchQuery::default(), 10, 0).total, 1);
    }

    #[test]
    fn test_invalid_collection_name_is_rejected() {
        let (store, _clock) = store_at(1_000.0);
        assert!(store
            .index_document("../escape", fields(&[]), None)
            .is_err());
        assert_eq!(store.search("../escape", &SearchQuery::default(), 10, 0).total, 0);
    }
}
