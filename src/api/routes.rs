use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::analysis::dispatcher::{AnalysisDispatcher, ALERT_KEY_PREFIX, ATTACK_PATTERNS_COLLECTION};
use crate::blocking::policy::IpBlocker;
use crate::clock::Clock;
use crate::models::analysis::AttackType;
use crate::storage::cache::EphemeralCache;
use crate::storage::event_store::{EventStore, RangeFilter, SearchQuery};

/// Shared state handed to every control handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<AnalysisDispatcher>,
    pub blocker: Arc<IpBlocker>,
    pub events: Arc<EventStore>,
    pub cache: Arc<EphemeralCache>,
    pub clock: Arc<dyn Clock>,
    pub start_time: Instant,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BlockIpRequest {
    pub ip: String,
    pub reason: Option<String>,
    pub threat_level: Option<f64>,
    pub attack_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UnblockIpRequest {
    pub ip: String,
}

/// Service liveness and headline numbers.
pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let stats = state.blocker.get_blocking_statistics();
    let patterns = state.events.stats(ATTACK_PATTERNS_COLLECTION);

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "tracked_addresses": state.dispatcher.tracked_addresses(),
        "currently_blocked": stats.currently_blocked,
        "attack_patterns": {
            "count": patterns.count,
            "size_bytes": patterns.size_bytes,
        },
    }))
}

/// Detected patterns from the last 24 hours, with attack-type counts and
/// an hourly timeline.
pub async fn get_attack_patterns(State(state): State<AppState>) -> Json<Value> {
    let cutoff = state.clock.epoch() - 24.0 * 3600.0;
    let query = SearchQuery {
        term: None,
        range: Some(RangeFilter {
            field: "timestamp".to_string(),
            gte: Some(cutoff),
            ..Default::default()
        }),
    };
    let result = state
        .events
        .search(ATTACK_PATTERNS_COLLECTION, &query, 1000, 0);

    let mut attack_types: BTreeMap<String, u64> = BTreeMap::new();
    let mut timeline: BTreeMap<i64, u64> = BTreeMap::new();
    let mut hits = Vec::with_capacity(result.documents.len());

    for doc in &result.documents {
        let attack_type = doc
            .get("attack_type")
            .and_then(Value::as_str)
            .unwrap_or("Unknown");
        *attack_types.entry(attack_type.to_string()).or_insert(0) += 1;

        let timestamp = doc.get("timestamp").and_then(Value::as_f64).unwrap_or(0.0);
        let hour_key = (timestamp / 3600.0).floor() as i64 * 3600;
        *timeline.entry(hour_key).or_insert(0) += 1;

        let source: serde_json::Map<String, Value> = doc
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        hits.push(json!({
            "_id": doc.get("_id").cloned().unwrap_or(Value::Null),
            "_source": source,
            "_score": 1.0,
        }));
    }

    Json(json!({
        "hits": {
            "total": { "value": result.total },
            "hits": hits,
        },
        "aggregations": {
            "attack_types": attack_types
                .iter()
                .map(|(k, v)| json!({ "key": k, "doc_count": v }))
                .collect::<Vec<_>>(),
            "timeline": timeline
                .iter()
                .map(|(k, v)| json!({ "key": k, "doc_count": v }))
                .collect::<Vec<_>>(),
        },
    }))
}

/// Non-expired alert entries from the cache.
pub async fn get_active_threats(State(state): State<AppState>) -> Json<Value> {
    let threats: Vec<Value> = state
        .cache
        .list_keys()
        .into_iter()
        .filter(|key| key.starts_with(ALERT_KEY_PREFIX))
        .filter_map(|key| state.cache.get(&key))
        .collect();

    Json(json!({ "threats": threats }))
}

/// Currently active blocks, newest first.
pub async fn get_blocked_ips(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "blocked_ips": state.blocker.get_blocked_ips(true) }))
}

pub async fn get_blocking_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "statistics": state.blocker.get_blocking_statistics() }))
}

/// Operator-initiated block.
pub async fn block_ip(
    State(state): State<AppState>,
    Json(body): Json<BlockIpRequest>,
) -> Json<Value> {
    if body.ip.parse::<std::net::IpAddr>().is_err() {
        return Json(json!({
            "status": "error",
            "message": format!("Invalid IP address: {}", body.ip),
        }));
    }

    let attack_type = body
        .attack_type
        .as_deref()
        .and_then(AttackType::from_str_name)
        .unwrap_or(AttackType::Unknown);
    let reason = body.reason.as_deref().unwrap_or("Manual block");
    let threat_level = body.threat_level.unwrap_or(0.0);

    if state
        .blocker
        .block_ip(&body.ip, reason, threat_level, &attack_type, false)
    {
        Json(json!({
            "status": "success",
            "message": format!("IP {} has been blocked", body.ip),
        }))
    } else {
        Json(json!({
            "status": "error",
            "message": format!("IP {} is already blocked", body.ip),
        }))
    }
}

pub async fn unblock_ip(
    State(state): State<AppState>,
    Json(body): Json<UnblockIpRequest>,
) -> Json<Value> {
    if state.blocker.unblock_ip(&body.ip) {
        Json(json!({
            "status": "success",
            "message": format!("IP {} has been unblocked", body.ip),
        }))
    } else {
        Json(json!({
            "status": "error",
            "message": format!("IP {} is not currently blocked", body.ip),
        }))
    }
}

pub async fn is_blocked(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Json<Value> {
    Json(json!({
        "ip": ip,
        "blocked": state.blocker.is_blocked(&ip),
    }))
}
