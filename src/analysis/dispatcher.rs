use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::analysis::classifier::PatternClassifier;
use crate::analysis::geoip::GeoIpLookup;
use crate::analysis::profiler::TrafficProfiler;
use crate::blocking::policy::IpBlocker;
use crate::clock::Clock;
use crate::models::event::TrafficEvent;
use crate::storage::cache::EphemeralCache;
use crate::storage::event_store::EventStore;

/// Collection holding one document per detected attack pattern.
pub const ATTACK_PATTERNS_COLLECTION: &str = "attack-patterns";
/// Cache key prefix for short-lived attack alerts.
pub const ALERT_KEY_PREFIX: &str = "attack:";

/// Orchestrates the per-event pipeline: parse → profile → classify →
/// blocking policy → persistence → broadcast.
///
/// Every failure past parsing is absorbed: a storage error or a losing
/// block race degrades that one event's handling and the loop moves on.
pub struct AnalysisDispatcher {
    profiler: Arc<TrafficProfiler>,
    classifier: PatternClassifier,
    blocker: Arc<IpBlocker>,
    events: Arc<EventStore>,
    cache: Arc<EphemeralCache>,
    geoip: Arc<GeoIpLookup>,
    clock: Arc<dyn Clock>,
    alert_ttl_secs: u64,
    tx: broadcast::Sender<String>,
}

impl AnalysisDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profiler: Arc<TrafficProfiler>,
        blocker: Arc<IpBlocker>,
        events: Arc<EventStore>,
        cache: Arc<EphemeralCache>,
        geoip: Arc<GeoIpLookup>,
        clock: Arc<dyn Clock>,
        alert_ttl_secs: u64,
    ) -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            profiler,
            classifier: PatternClassifier::new(),
            blocker,
            events,
            cache,
            geoip,
            clock,
            alert_ttl_secs,
            tx,
        }
    }

    /// Subscribe to the stream of broadcast analyses.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of source addresses currently profiled.
    pub fn tracked_addresses(&self) -> usize {
        self.profiler.tracked_addresses()
    }

    /// Parse and process one raw ingestion frame. Returns `None` when the
    /// frame is dropped as malformed (bad JSON, missing or invalid ip) —
    /// dropped frames mutate nothing.
    pub fn process_raw(&self, text: &str) -> Option<Value> {
        let event: TrafficEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed ingestion event");
                return None;
            }
        };

        let addr: IpAddr = match event.ip.parse() {
            Ok(addr) => addr,
            Err(_) => {
                warn!(ip = %event.ip, "Dropping event with invalid source address");
                return None;
            }
        };

        Some(self.process_event(&event, addr))
    }

    /// Run one validated event through the pipeline and return the
    /// broadcast payload.
    pub fn process_event(&self, event: &TrafficEvent, addr: IpAddr) -> Value {
        let now = self.clock.epoch();
        let profile = self.profiler.observe(&event.ip, event.bytes_sent, now);

        let already_blocked = self.blocker.is_blocked(&event.ip);
        let mut analysis = self.classifier.classify(&profile, now, already_blocked);

        if analysis.pattern_detected {
            if let Some(attack_type) = analysis.attack_type {
                if self
                    .blocker
                    .should_auto_block(&event.ip, analysis.threat_level, &attack_type)
                {
                    let reason = format!(
                        "{} detected (confidence {:.2})",
                        attack_type, analysis.confidence
                    );
                    if self.blocker.block_ip(
                        &event.ip,
                        &reason,
                        analysis.threat_level,
                        &attack_type,
                        true,
                    ) {
                        analysis.blocked = true;
                    }
                }
            }
        }

        let location = self.geoip.lookup(addr);

        let mut payload = match serde_json::to_value(&analysis) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        payload.insert(
            "location".to_string(),
            serde_json::to_value(&location).unwrap_or(Value::Null),
        );
        let payload = Value::Object(payload);

        if analysis.pattern_detected {
            self.persist_detection(&analysis.ip, &payload, now, &analysis);
        }

        // No subscribers is not an error; the analysis is still returned.
        let _ = self.tx.send(payload.to_string());

        payload
    }

    fn persist_detection(
        &self,
        ip: &str,
        payload: &Value,
        now: f64,
        analysis: &crate::models::analysis::AttackAnalysis,
    ) {
        let mut fields = Map::new();
        fields.insert("timestamp".to_string(), Value::from(now));
        fields.insert("ip".to_string(), Value::from(ip));
        fields.insert(
            "attack_type".to_string(),
            analysis
                .attack_type
                .map(|t| Value::from(t.to_string()))
                .unwrap_or(Value::Null),
        );
        fields.insert("confidence".to_string(), Value::from(analysis.confidence));
        fields.insert(
            "request_count".to_string(),
            Value::from(analysis.request_count),
        );
        fields.insert("duration".to_string(), Value::from(analysis.duration));

        if let Err(e) = self
            .events
            .index_document(ATTACK_PATTERNS_COLLECTION, fields, None)
        {
            error!(ip, error = %e, "Failed to store attack pattern");
        }

        let alert_key = format!("{ALERT_KEY_PREFIX}{ip}:{now}");
        self.cache
            .set(&alert_key, payload, Some(self.alert_ttl_secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::firewall::NoopEnforcer;
    use crate::clock::ManualClock;
    use crate::storage::event_store::SearchQuery;
    use crate::storage::sqlite::BlockStore;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn dispatcher_at(epoch: f64) -> (AnalysisDispatcher, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch(epoch));
        let dir = std::env::temp_dir().join(format!(
            "rampart-dispatch-{}-{}",
            std::process::id(),
            TEST_DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let store = Arc::new(BlockStore::open_in_memory().unwrap());
        let blocker = Arc::new(IpBlocker::new(
            store,
            Arc::new(NoopEnforcer),
            clock.clone(),
            3600,
        ));
        let events = Arc::new(EventStore::new(dir, clock.clone()).unwrap());
        let cache = Arc::new(EphemeralCache::open_in_memory(clock.clone()).unwrap());
        let dispatcher = AnalysisDispatcher::new(
            Arc::new(TrafficProfiler::new(1_000)),
            blocker,
            events,
            cache,
            Arc::new(GeoIpLookup::disabled()),
            clock.clone(),
            3600,
        );
        (dispatcher, clock)
    }

    fn frame(ip: &str, bytes: u64) -> String {
        format!(r#"{{"ip":"{ip}","bytes_sent":{bytes}}}"#)
    }

    #[test]
    fn test_malformed_frames_are_dropped_without_mutation() {
        let (dispatcher, _clock) = dispatcher_at(1_000.0);
        assert!(dispatcher.process_raw("not json").is_none());
        assert!(dispatcher.process_raw(r#"{"bytes_sent":5}"#).is_none());
        assert!(dispatcher.process_raw(r#"{"ip":"not-an-ip"}"#).is_none());
        assert_eq!(dispatcher.tracked_addresses(), 0);
    }

    #[test]
    fn test_benign_event_is_analyzed_and_enriched() {
        let (dispatcher, _clock) = dispatcher_at(1_000.0);
        let payload = dispatcher.process_raw(&frame("198.51.100.7", 512)).unwrap();
        assert_eq!(payload["ip"], "198.51.100.7");
        assert_eq!(payload["pattern_detected"], false);
        assert_eq!(payload["location"]["country"], "Unknown");
        // Nothing persisted for benign traffic.
        assert_eq!(
            dispatcher
                .events
                .search(ATTACK_PATTERNS_COLLECTION, &SearchQuery::default(), 10, 0)
                .total,
            0
        );
    }

    #[test]
    fn test_flood_scenario_end_to_end() {
        let (dispatcher, clock) = dispatcher_at(1_000.0);
        let mut rx = dispatcher.subscribe();

        // 15 events from one address inside 0.1s.
        let mut last = Value::Null;
        for i in 0..15 {
            clock.set(
                chrono::DateTime::from_timestamp_micros(
                    (1_000.0 * 1e6 + (0.1 * 1e6) * (i as f64) / 14.0) as i64,
                )
                .unwrap(),
            );
            last = dispatcher.process_raw(&frame("203.0.113.5", 1500)).unwrap();
        }

        // The flood was detected and the address auto-blocked mid-stream,
        // so the final analysis reports the blocked short-circuit.
        assert_eq!(last["blocked"], true);
        assert!(dispatcher.blocker.is_blocked("203.0.113.5"));

        // Exactly one block record exists despite repeated detections.
        let stats = dispatcher.blocker.get_blocking_statistics();
        assert_eq!(stats.total_blocked, 1);
        assert_eq!(stats.auto_blocked, 1);

        // The detection was persisted and cached as an alert.
        let patterns = dispatcher.events.search(
            ATTACK_PATTERNS_COLLECTION,
            &SearchQuery::default(),
            100,
            0,
        );
        assert!(patterns.total >= 1);
        let doc = &patterns.documents[0];
        assert_eq!(doc["ip"], "203.0.113.5");
        assert_eq!(doc["attack_type"], "HTTP Flood");
        assert!(doc["confidence"].as_f64().unwrap() > 0.6);

        let alert_keys: Vec<String> = dispatcher
            .cache
            .list_keys()
            .into_iter()
            .filter(|k| k.starts_with(ALERT_KEY_PREFIX))
            .collect();
        assert!(!alert_keys.is_empty());

        // Every processed event reached the broadcast stream.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 15);

        // A further event short-circuits without reclassification.
        clock.advance_secs(0.01);
        let after = dispatcher.process_raw(&frame("203.0.113.5", 1500)).unwrap();
        assert_eq!(after["blocked"], true);
        assert_eq!(after["pattern_detected"], false);
        assert_eq!(after["reason"], "IP is currently blocked");
    }

    #[test]
    fn test_detection_below_block_threshold_is_not_blocked() {
        let (dispatcher, clock) = dispatcher_at(1_000.0);

        // Volumetric traffic with payloads just over 1 MB: threat
        // 1.1e6/2e6 = 0.55, under both the 0.8 bar and the 0.6
        // critical-type bar. Jittered timing keeps the bot rule quiet.
        let mut last = Value::Null;
        for i in 0..20 {
            clock.advance_secs(if i % 2 == 0 { 1.0 } else { 3.0 });
            last = dispatcher
                .process_raw(&frame("198.51.100.9", 1_100_000))
                .unwrap();
        }
        assert_eq!(last["pattern_detected"], true);
        assert_eq!(last["attack_type"], "Volumetric Attack");
        let threat = last["threat_level"].as_f64().unwrap();
        assert!(threat < 0.6, "threat={threat}");
        assert_eq!(last["blocked"], false);
        assert!(!dispatcher.blocker.is_blocked("198.51.100.9"));
    }
}
