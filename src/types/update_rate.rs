//! Update rate control for packet streams

use serde::{Deserialize, Serialize};

/// Update rate for packet subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every packet as it is replayed
    Native,

    /// Throttled to at most this many packets per second
    /// If the requested rate is at or above the source rate, Native is used
    Max(u32),
}

impl UpdateRate {
    /// Normalize against the source packet rate, when it is known
    pub fn normalize(self, source_hz: Option<f64>) -> Self {
        match (self, source_hz) {
            (UpdateRate::Native, _) => UpdateRate::Native,
            (UpdateRate::Max(0), _) => UpdateRate::Native,
            (UpdateRate::Max(hz), Some(source)) if hz as f64 >= source => UpdateRate::Native,
            (UpdateRate::Max(hz), _) => UpdateRate::Max(hz),
        }
    }

    /// Get throttle interval if needed
    pub fn throttle_interval(self, source_hz: Option<f64>) -> Option<std::time::Duration> {
        match self.normalize(source_hz) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(std::time::Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn faster_than_source_is_native() {
        assert_eq!(UpdateRate::Max(60).normalize(Some(30.0)), UpdateRate::Native);
        assert_eq!(UpdateRate::Max(10).normalize(Some(30.0)), UpdateRate::Max(10));
        assert_eq!(UpdateRate::Max(10).normalize(None), UpdateRate::Max(10));
        assert_eq!(UpdateRate::Max(0).normalize(None), UpdateRate::Native);
    }

    #[test]
    fn throttle_interval_only_when_needed() {
        assert_eq!(UpdateRate::Native.throttle_interval(Some(100.0)), None);
        assert_eq!(UpdateRate::Max(200).throttle_interval(Some(100.0)), None);
        assert_eq!(UpdateRate::Max(4).throttle_interval(Some(100.0)), Some(Duration::from_millis(250)));
    }
}
