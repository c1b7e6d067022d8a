use crate::analysis::profiler::IpProfile;
use crate::models::analysis::{AttackAnalysis, AttackType};

/// Minimum lifetime request count before any pattern is considered.
const MIN_REQUESTS: u64 = 10;
/// Requests per second above which traffic reads as an HTTP flood.
const FLOOD_RATE: f64 = 100.0;
/// Interval standard deviation below which timing reads as scripted.
const BOT_STD_INTERVAL: f64 = 0.1;
/// Request count required before the bot-timing rule applies.
const BOT_MIN_REQUESTS: u64 = 50;
/// Mean payload size above which traffic reads as volumetric.
const VOLUMETRIC_AVG_BYTES: f64 = 1_000_000.0;

/// Classifies a profile snapshot against the attack-pattern heuristics.
///
/// Pure: no storage, no I/O. Whether the address is already blocked is the
/// caller's knowledge, passed in.
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Derive an [`AttackAnalysis`] from `profile` as of `now`.
    ///
    /// Already-blocked addresses short-circuit without computing
    /// statistics. Below [`MIN_REQUESTS`] lifetime requests, nothing is
    /// classified. Otherwise the rules apply first-match-wins, in fixed
    /// order: flood rate, bot timing, volumetric payloads. The order
    /// encodes precedence when several conditions hold — do not reorder.
    pub fn classify(&self, profile: &IpProfile, now: f64, already_blocked: bool) -> AttackAnalysis {
        let duration = now - profile.first_seen;
        let mut analysis = AttackAnalysis::benign(&profile.ip, profile.request_count, duration);

        if already_blocked {
            analysis.blocked = true;
            analysis.reason = Some("IP is currently blocked".to_string());
            return analysis;
        }

        if profile.request_count <= MIN_REQUESTS {
            return analysis;
        }

        let rate = profile.request_count as f64 / duration;
        let avg_bytes = mean(profile.bytes_sent.iter().map(|&b| b as f64));
        let std_interval = population_std(&profile.intervals);

        if rate > FLOOD_RATE {
            let score = (rate / 200.0).min(1.0);
            analysis.pattern_detected = true;
            analysis.attack_type = Some(AttackType::HttpFlood);
            analysis.confidence = score;
            analysis.threat_level = score;
        } else if std_interval.map_or(false, |s| s < BOT_STD_INTERVAL)
            && profile.request_count > BOT_MIN_REQUESTS
        {
            analysis.pattern_detected = true;
            analysis.attack_type = Some(AttackType::BotActivity);
            analysis.confidence = 0.8;
            analysis.threat_level = 0.8;
        } else if avg_bytes > VOLUMETRIC_AVG_BYTES {
            let score = (avg_bytes / 2_000_000.0).min(1.0);
            analysis.pattern_detected = true;
            analysis.attack_type = Some(AttackType::VolumetricAttack);
            analysis.confidence = score;
            analysis.threat_level = score;
        }

        analysis
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Population standard deviation; `None` for an empty history, which every
/// rule treats as "no pattern".
fn population_std(values: &std::collections::VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let m = mean(values.iter().copied());
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}
