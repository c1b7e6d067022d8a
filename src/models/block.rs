use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One row of the blocking table. Primary key is the ip; at most one row
/// per address ever exists. `is_active = true` implies `unblocked_at` is
/// unset. Timestamps use the fixed-width format from [`crate::clock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub ip: String,
    pub blocked_at: String,
    pub reason: String,
    pub threat_level: f64,
    pub attack_type: String,
    pub auto_blocked: bool,
    pub unblocked_at: Option<String>,
    pub is_active: bool,
    /// When the block lapses on its own; `None` means no automatic expiry.
    pub expires_at: Option<String>,
}

/// Aggregate view over the blocking table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockingStats {
    pub total_blocked: u64,
    pub currently_blocked: u64,
    pub auto_blocked: u64,
    pub manual_blocked: u64,
    pub unblocked: u64,
    pub recent_blocks_24h: u64,
    pub attack_types: BTreeMap<String, u64>,
    pub threat_levels: BTreeMap<String, u64>,
    /// Share of all blocks that were automatic, as a percentage.
    pub blocking_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_record_serializes_nullable_fields() {
        let record = BlockRecord {
            ip: "10.0.0.1".to_string(),
            blocked_at: "2026-01-01 00:00:00.000000".to_string(),
            reason: "test".to_string(),
            threat_level: 0.9,
            attack_type: "HTTP Flood".to_string(),
            auto_blocked: true,
            unblocked_at: None,
            is_active: true,
            expires_at: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ip"], "10.0.0.1");
        assert!(json["unblocked_at"].is_null());
        assert_eq!(json["is_active"], true);
    }
}
