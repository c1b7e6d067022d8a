use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, warn};

use crate::blocking::firewall::FirewallEnforcer;
use crate::clock::{format_ts, Clock};
use crate::models::analysis::AttackType;
use crate::models::block::{BlockRecord, BlockingStats};
use crate::storage::sqlite::BlockStore;

/// Threat level at which any attack type is blocked automatically.
const HIGH_THREAT_THRESHOLD: f64 = 0.8;
/// Threshold for attack types in the critical set.
const CRITICAL_TYPE_THRESHOLD: f64 = 0.6;
/// Threshold for addresses that were blocked before and released.
const REPEAT_OFFENDER_THRESHOLD: f64 = 0.5;

/// Owns the block/unblock lifecycle and its persisted record.
///
/// Every operation catches storage failures at this boundary: the caller
/// sees `false` or an empty result, never an error — a storage hiccup must
/// not take down the event pipeline.
pub struct IpBlocker {
    store: Arc<BlockStore>,
    firewall: Arc<dyn FirewallEnforcer>,
    clock: Arc<dyn Clock>,
    /// Lifetime of an automatic or manual block; `None` means blocks stay
    /// until explicitly released.
    block_ttl: Option<Duration>,
}

impl IpBlocker {
    pub fn new(
        store: Arc<BlockStore>,
        firewall: Arc<dyn FirewallEnforcer>,
        clock: Arc<dyn Clock>,
        block_ttl_secs: u64,
    ) -> Self {
        let block_ttl = (block_ttl_secs > 0).then(|| Duration::seconds(block_ttl_secs as i64));
        info!(
            firewall = firewall.backend_name(),
            block_ttl_secs, "IP blocker initialised"
        );
        Self {
            store,
            firewall,
            clock,
            block_ttl,
        }
    }

    /// Whether `ip` is actively blocked right now (lazy expiry applied).
    pub fn is_blocked(&self, ip: &str) -> bool {
        let now = format_ts(self.clock.now());
        self.store.is_active(ip, &now).unwrap_or_else(|e| {
            error!(ip, error = %e, "Failed to check block state");
            false
        })
    }

    /// Decide whether a detection warrants an automatic block. Reads the
    /// prior-offender history but never mutates anything.
    pub fn should_auto_block(&self, ip: &str, threat_level: f64, attack_type: &AttackType) -> bool {
        if threat_level >= HIGH_THREAT_THRESHOLD {
            return true;
        }

        if attack_type.is_critical() && threat_level >= CRITICAL_TYPE_THRESHOLD {
            return true;
        }

        // Previously blocked and released: block again at medium threat.
        if threat_level >= REPEAT_OFFENDER_THRESHOLD {
            match self.store.has_inactive_record(ip) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    error!(ip, error = %e, "Failed to check offender history");
                }
            }
        }

        false
    }

    /// Block `ip`. Returns `false` when it is already actively blocked
    /// (nothing is written — no duplicate active records) or on storage
    /// failure. On success the firewall rule is applied fire-and-forget.
    pub fn block_ip(
        &self,
        ip: &str,
        reason: &str,
        threat_level: f64,
        attack_type: &AttackType,
        auto_blocked: bool,
    ) -> bool {
        let now = self.clock.now();
        let now_ts = format_ts(now);
        let record = BlockRecord {
            ip: ip.to_string(),
            blocked_at: now_ts.clone(),
            reason: reason.to_string(),
            threat_level,
            attack_type: attack_type.to_string(),
            auto_blocked,
            unblocked_at: None,
            is_active: true,
            expires_at: self.block_ttl.map(|ttl| format_ts(now + ttl)),
        };

        match self.store.insert_active_block(&record, &now_ts) {
            Ok(true) => {
                self.firewall.apply_block(ip);
                info!(
                    ip,
                    reason,
                    threat_level,
                    attack_type = %attack_type,
                    auto_blocked,
                    "Blocked IP"
                );
                true
            }
            Ok(false) => {
                warn!(ip, "IP is already blocked");
                false
            }
            Err(e) => {
                error!(ip, error = %e, "Failed to block IP");
                false
            }
        }
    }

    /// Release an active block. Returns `false` when nothing was active.
    pub fn unblock_ip(&self, ip: &str) -> bool {
        let now = format_ts(self.clock.now());
        match self.store.deactivate(ip, &now) {
            Ok(true) => {
                self.firewall.apply_unblock(ip);
                info!(ip, "Unblocked IP");
                true
            }
            Ok(false) => {
                warn!(ip, "IP is not currently blocked");
                false
            }
            Err(e) => {
                error!(ip, error = %e, "Failed to unblock IP");
                false
            }
        }
    }

    /// Block records, newest first.
    pub fn get_blocked_ips(&self, active_only: bool) -> Vec<BlockRecord> {
        let now = format_ts(self.clock.now());
        self.store.get_blocked(active_only, &now).unwrap_or_else(|e| {
            error!(error = %e, "Failed to list blocked IPs");
            Vec::new()
        })
    }

    pub fn get_blocking_statistics(&self) -> BlockingStats {
        let now = self.clock.now();
        let day_ago = format_ts(now - Duration::days(1));
        self.store
            .stats(&format_ts(now), &day_ago)
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to compute blocking statistics");
                BlockingStats::default()
            })
    }

    /// Deactivate blocks whose TTL has lapsed and drop their firewall
    /// rules. Returns the number released.
    pub fn sweep_expired(&self) -> usize {
        let now = format_ts(self.clock.now());
        match self.store.sweep_expired(&now) {
            Ok(ips) => {
                for ip in &ips {
                    self.firewall.apply_unblock(ip);
                    info!(ip = %ip, "Block expired");
                }
                ips.len()
            }
            Err(e) => {
                error!(error = %e, "Failed to sweep expired blocks");
                0
            }
        }
    }

    /// Purge inactive records released more than `days` ago. Returns the
    /// number removed.
    pub fn cleanup_old_blocks(&self, days: u64) -> usize {
        let cutoff = format_ts(self.clock.now() - Duration::days(days as i64));
        match self.store.purge_inactive_before(&cutoff) {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, days, "Cleaned up old block records");
                }
                removed
            }
            Err(e) => {
                error!(error = %e, "Failed to clean up old blocks");
                0
            }
        }
    }
}
