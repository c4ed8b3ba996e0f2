//! Engine-wide settings
//!
//! [`EngineConfig`] is the single place deployments tune the engine. It is split into the
//! per-service configs when [`crate::Tableside`] is assembled, so values shared between services
//! (the session lifetime, the store timeout) can never disagree.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};
use tableside_core::services::{AnalyticsConfig, ExpiryConfig, SessionConfig};

/// The configuration for the engine.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tableside::EngineConfig;
///
/// let config = EngineConfig::default()
///     .session_ttl(chrono::Duration::minutes(45))
///     .sweep_interval(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime of a newly issued session
    pub session_ttl: ChronoDuration,
    /// How long unused sessions are kept once expired
    pub retention: ChronoDuration,
    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
    /// Upper bound for one sweep batch
    pub sweep_batch_timeout: Duration,
    /// Sessions transitioned per sweep batch
    pub sweep_batch_size: usize,
    /// Period of the retention purge
    pub retention_sweep_interval: Duration,
    /// Upper bound for store round-trips on request paths
    pub store_timeout: Duration,
    /// Customer-facing origin encoded into QR codes
    pub base_url: String,
    /// Offset whose midnight starts an analytics day
    pub utc_offset: FixedOffset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl: ChronoDuration::minutes(30),
            retention: ChronoDuration::days(7),
            sweep_interval: Duration::from_secs(30),
            sweep_batch_timeout: Duration::from_secs(10),
            sweep_batch_size: 500,
            retention_sweep_interval: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(5),
            base_url: "http://localhost:5173".to_string(),
            utc_offset: Utc.fix(),
        }
    }
}

impl EngineConfig {
    pub fn session_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn retention(mut self, retention: ChronoDuration) -> Self {
        self.retention = retention;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn sweep_batch_timeout(mut self, timeout: Duration) -> Self {
        self.sweep_batch_timeout = timeout;
        self
    }

    pub fn sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size;
        self
    }

    pub fn retention_sweep_interval(mut self, interval: Duration) -> Self {
        self.retention_sweep_interval = interval;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub(crate) fn session(&self) -> SessionConfig {
        SessionConfig {
            ttl: self.session_ttl,
            retention: self.retention,
            base_url: self.base_url.clone(),
            store_timeout: self.store_timeout,
        }
    }

    pub(crate) fn expiry(&self) -> ExpiryConfig {
        ExpiryConfig {
            sweep_interval: self.sweep_interval,
            batch_timeout: self.sweep_batch_timeout,
            batch_size: self.sweep_batch_size.max(1),
            retention_sweep_interval: self.retention_sweep_interval,
            store_timeout: self.store_timeout,
        }
    }

    pub(crate) fn analytics(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            utc_offset: self.utc_offset,
            // an order can only be placed while its session is live
            session_lookback: self.session_ttl,
            store_timeout: self.store_timeout,
            ..AnalyticsConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.session_ttl, ChronoDuration::minutes(30));
        assert_eq!(config.retention, ChronoDuration::days(7));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.utc_offset.local_minus_utc(), 0);
    }

    #[test]
    fn test_shared_values_reach_every_service() {
        let config = EngineConfig::default()
            .session_ttl(ChronoDuration::minutes(90))
            .store_timeout(Duration::from_millis(250))
            .sweep_batch_size(0);

        assert_eq!(config.session().ttl, ChronoDuration::minutes(90));
        assert_eq!(config.analytics().session_lookback, ChronoDuration::minutes(90));
        assert_eq!(config.expiry().store_timeout, Duration::from_millis(250));
        assert_eq!(config.analytics().store_timeout, Duration::from_millis(250));
        assert_eq!(config.expiry().batch_size, 1);
    }
}
