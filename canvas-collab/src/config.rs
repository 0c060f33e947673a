//! Engine tuning knobs.

use std::time::Duration;

/// Configuration shared by every artboard coordinator and the session
/// manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Active -> Stale after this long without a heartbeat.
    pub heartbeat_timeout: Duration,
    /// Stale -> Closed once this long has passed since the last heartbeat.
    pub grace_period: Duration,
    /// Deadline for a coordinator reply.
    pub request_timeout: Duration,
    /// The op log keeps at least this many operations...
    pub log_min_ops: usize,
    /// ...and everything younger than this.
    pub log_min_age: Duration,
    /// Take a periodic snapshot every N applied operations.
    pub snapshot_interval: u64,
    /// Periodic snapshots kept in memory (named ones are never dropped).
    pub max_periodic_snapshots: usize,
    /// Per-artboard broadcast buffer. Receivers further behind must resync.
    pub broadcast_capacity: usize,
    /// Inbound command queue per coordinator.
    pub queue_capacity: usize,
    /// Name and size of artboards created on first join.
    pub default_name: String,
    pub default_width: f64,
    pub default_height: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
            log_min_ops: 500,
            log_min_age: Duration::from_secs(10 * 60),
            snapshot_interval: 100,
            max_periodic_snapshots: 16,
            broadcast_capacity: 256,
            queue_capacity: 1024,
            default_name: canvas_core::DEFAULT_ARTBOARD_NAME.to_string(),
            default_width: 1920.0,
            default_height: 1080.0,
        }
    }
}

impl EngineConfig {
    /// Small buffers and short retention for tests.
    pub fn for_testing() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(200),
            grace_period: Duration::from_millis(500),
            request_timeout: Duration::from_secs(2),
            log_min_ops: 20,
            log_min_age: Duration::ZERO,
            snapshot_interval: 10,
            max_periodic_snapshots: 4,
            broadcast_capacity: 64,
            queue_capacity: 64,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.grace_period, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.log_min_ops, 500);
        assert_eq!(config.log_min_age, Duration::from_secs(600));
        assert_eq!(config.snapshot_interval, 100);
        assert_eq!((config.default_width, config.default_height), (1920.0, 1080.0));
        assert_eq!(config.default_name, "Artboard");
    }

    #[test]
    fn test_testing_config_keeps_grace_after_timeout() {
        let config = EngineConfig::for_testing();
        assert!(config.grace_period > config.heartbeat_timeout);
        assert!(config.broadcast_capacity < EngineConfig::default().broadcast_capacity);
    }
}
