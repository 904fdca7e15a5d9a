//! Reconnect policy: exponential back-off with a little jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How [`DeviceClient`](crate::DeviceClient) paces reconnect attempts after
/// the link drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    /// Cap before jitter.
    pub max_delay_ms: u64,
    pub factor: f64,
    /// Consecutive failures tolerated; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based).  At most 20%
    /// above the capped exponential value.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay_ms as f64 * self.factor.max(1.0).powi(attempt.min(64) as i32);
        let capped = exp.min(self.max_delay_ms as f64);
        let jitter = capped * 0.2 * spread(attempt);
        Duration::from_millis((capped + jitter) as u64)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

// Deterministic value in [0, 1) that varies between attempts.
fn spread(attempt: u32) -> f64 {
    let mut x = u64::from(attempt).wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let p = ReconnectPolicy::default();
        let first = p.delay(0);
        assert!(first >= Duration::from_millis(1_000));
        assert!(first <= Duration::from_millis(1_200));
        assert!(p.delay(2) >= Duration::from_millis(4_000));
        for attempt in [10, 40, 1_000] {
            let d = p.delay(attempt);
            assert!(d >= Duration::from_millis(30_000));
            assert!(d <= Duration::from_millis(36_000));
        }
    }

    #[test]
    fn attempt_budget() {
        let unlimited = ReconnectPolicy::default();
        assert!(!unlimited.exhausted(u32::MAX));

        let limited = ReconnectPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(!limited.exhausted(2));
        assert!(limited.exhausted(3));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let p: ReconnectPolicy = serde_json::from_str(r#"{ "max_attempts": 4 }"#).unwrap();
        assert_eq!(p.max_attempts, 4);
        assert_eq!(p.initial_delay_ms, 1_000);
    }
}
