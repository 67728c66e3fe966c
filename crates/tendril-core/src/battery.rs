//! Context-window battery.
//!
//! The battery is the share of the input context window still free. It is
//! measured with a token-count dry run and shown to the model through the
//! prompt suffix.

use serde::{Deserialize, Serialize};
use tendril_provider::TokenCount;

/// Remaining context, or a marker that it could not be measured.
///
/// Serialized as a plain number, with `-1` for a failed count. Readings
/// never go below zero, so a real reading cannot collide with the marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub enum Battery {
    Percent(f64),
    CountingFailed,
}

const FAILED_SENTINEL: f64 = -1.0;

impl Battery {
    /// A fresh conversation.
    pub const FULL: Battery = Battery::Percent(100.0);

    /// Derive the battery from a token count. A history larger than the
    /// window reads as empty.
    pub fn from_count(count: TokenCount, max_input_tokens: u32) -> Self {
        match count {
            TokenCount::Counted(tokens) => {
                let remaining = 1.0 - tokens as f64 / f64::from(max_input_tokens);
                Battery::Percent((100.0 * remaining).max(0.0))
            }
            TokenCount::Failed => Battery::CountingFailed,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Battery::Percent(pct) => pct.max(0.0),
            Battery::CountingFailed => FAILED_SENTINEL,
        }
    }

    pub fn percent(self) -> Option<f64> {
        match self {
            Battery::Percent(pct) => Some(pct),
            Battery::CountingFailed => None,
        }
    }

    /// Below the warning threshold. A failed count is never low.
    pub fn is_low(self, threshold: f64) -> bool {
        self.percent().is_some_and(|pct| pct < threshold)
    }

    pub fn emoji(self, threshold: f64) -> &'static str {
        if self.is_low(threshold) {
            "🪫"
        } else {
            "🔋"
        }
    }

    /// The notice substituted for the battery placeholder.
    pub fn notice(self, threshold: f64) -> String {
        match self {
            Battery::CountingFailed => "⚠️ SYSTEM NOTICE: ❌ Token counting failed".to_string(),
            Battery::Percent(pct) => {
                let mut text = format!("⚠️ SYSTEM NOTICE: {} {:.0}%", self.emoji(threshold), pct);
                if self.is_low(threshold) {
                    text.push_str("\n⚠️ BATTERY LOW! Wrap up your current task for a clean handoff.");
                }
                text
            }
        }
    }
}

impl Default for Battery {
    fn default() -> Self {
        Battery::FULL
    }
}

impl From<f64> for Battery {
    fn from(value: f64) -> Self {
        if value == FAILED_SENTINEL {
            Battery::CountingFailed
        } else {
            Battery::Percent(value.max(0.0))
        }
    }
}

impl From<Battery> for f64 {
    fn from(battery: Battery) -> Self {
        battery.as_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_count() {
        assert_eq!(
            Battery::from_count(TokenCount::Counted(50_000), 200_000),
            Battery::Percent(75.0)
        );
        assert_eq!(
            Battery::from_count(TokenCount::Failed, 200_000),
            Battery::CountingFailed
        );
    }

    #[test]
    fn test_failed_count_serializes_as_negative_one() {
        let json = serde_json::to_string(&Battery::CountingFailed).unwrap();
        assert_eq!(json, "-1.0");
        let back: Battery = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Battery::CountingFailed);
    }

    #[test]
    fn test_overfull_window_is_empty_not_failed() {
        let battery = Battery::from_count(TokenCount::Counted(202_000), 200_000);
        assert_eq!(battery, Battery::Percent(0.0));

        let json = serde_json::to_string(&Battery::Percent(-1.0)).unwrap();
        assert_eq!(json, "0.0");
        let back: Battery = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Battery::Percent(0.0));
    }

    #[test]
    fn test_notice_text() {
        assert_eq!(
            Battery::Percent(75.4).notice(20.0),
            "⚠️ SYSTEM NOTICE: 🔋 75%"
        );
        assert_eq!(
            Battery::Percent(12.0).notice(20.0),
            "⚠️ SYSTEM NOTICE: 🪫 12%\n⚠️ BATTERY LOW! Wrap up your current task for a clean handoff."
        );
        assert_eq!(
            Battery::CountingFailed.notice(20.0),
            "⚠️ SYSTEM NOTICE: ❌ Token counting failed"
        );
    }

    #[test]
    fn test_failed_count_is_not_low() {
        assert!(!Battery::CountingFailed.is_low(20.0));
        assert!(Battery::Percent(19.9).is_low(20.0));
    }
}
