// ── Runtime monitor configuration ──
//
// Tuning for one `ApplianceMonitor`. Never touches disk; `homelink-config`
// builds it from a profile.

use std::time::Duration;

/// Driver id reported with connection-interrupted notifications.
pub const DEFAULT_DRIVER_ID: &str = "homeconnect";

/// Keepalive watchdog and identity settings for an appliance monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Identifies this engine to the sink.
    pub driver_id: String,
    /// Watchdog period. Default: 30s.
    pub keepalive_interval: Duration,
    /// Silent watchdog ticks before the connection is torn down. Default: 6.
    pub max_missed_keepalives: u32,
    /// Silent watchdog ticks before the monitor reports `Degraded`. Default: 3.
    pub degraded_after_misses: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            driver_id: DEFAULT_DRIVER_ID.into(),
            keepalive_interval: Duration::from_secs(30),
            max_missed_keepalives: 6,
            degraded_after_misses: 3,
        }
    }
}

impl MonitorConfig {
    /// How long the stream may stay silent before teardown.
    pub fn silence_budget(&self) -> Duration {
        self.keepalive_interval
            .saturating_mul(self.max_missed_keepalives)
    }
}
