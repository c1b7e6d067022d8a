use serde::{Deserialize, Serialize};

/// One inbound telemetry event, as received on the ingestion socket.
///
/// Only `ip` and `bytes_sent` are meaningful to the pipeline; senders may
/// attach whatever else they like and it is ignored. `bytes_sent` defaults
/// to zero when absent. The arrival time is stamped server-side at receipt,
/// never trusted from the sender.
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficEvent {
    pub ip: String,

    #[serde(default)]
    pub bytes_sent: u64,
}

/// Geographic enrichment attached to every broadcast analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            country: "Unknown".to_string(),
            city: "Unknown".to_string(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}
