use std::fmt;

use serde::{Deserialize, Serialize};

/// Attack category assigned by the classifier or by an operator.
///
/// The classifier only ever emits `HttpFlood`, `BotActivity`, and
/// `VolumetricAttack`; the remaining variants arrive through the manual
/// block endpoint and participate in the auto-block critical set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackType {
    #[serde(rename = "HTTP Flood")]
    HttpFlood,
    #[serde(rename = "SYN Flood")]
    SynFlood,
    #[serde(rename = "UDP Flood")]
    UdpFlood,
    #[serde(rename = "Bot Activity")]
    BotActivity,
    #[serde(rename = "Volumetric Attack")]
    VolumetricAttack,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackType::HttpFlood => write!(f, "HTTP Flood"),
            AttackType::SynFlood => write!(f, "SYN Flood"),
            AttackType::UdpFlood => write!(f, "UDP Flood"),
            AttackType::BotActivity => write!(f, "Bot Activity"),
            AttackType::VolumetricAttack => write!(f, "Volumetric Attack"),
            AttackType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl AttackType {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "HTTP Flood" => Some(Self::HttpFlood),
            "SYN Flood" => Some(Self::SynFlood),
            "UDP Flood" => Some(Self::UdpFlood),
            "Bot Activity" => Some(Self::BotActivity),
            "Volumetric Attack" => Some(Self::VolumetricAttack),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Attack types severe enough to auto-block at a reduced threshold.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            AttackType::HttpFlood
                | AttackType::SynFlood
                | AttackType::UdpFlood
                | AttackType::VolumetricAttack
        )
    }
}

/// Result of classifying one profile snapshot. Immutable once produced.
///
/// `confidence` and `threat_level` carry the same value in every
/// classification branch; both are kept because downstream consumers read
/// them under different names.
#[derive(Debug, Clone, Serialize)]
pub struct AttackAnalysis {
    pub ip: String,
    pub request_count: u64,
    /// Seconds since the address was first seen.
    pub duration: f64,
    pub pattern_detected: bool,
    pub attack_type: Option<AttackType>,
    pub confidence: f64,
    pub threat_level: f64,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AttackAnalysis {
    /// An analysis that found nothing: no pattern, zero scores.
    pub fn benign(ip: &str, request_count: u64, duration: f64) -> Self {
        Self {
            ip: ip.to_string(),
            request_count,
            duration,
            pattern_detected: false,
            attack_type: None,
            confidence: 0.0,
            threat_level: 0.0,
            blocked: false,
            reason: None,
        }
    }
}
