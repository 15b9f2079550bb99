//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use signkit_lib::{AppMetaData, Result, SignError, FIVE_MINUTES_IN_SECONDS, THIRTY_SECONDS};

/// Configuration of a [`SignEngine`](crate::SignEngine).
///
/// ```
/// use signkit_engine::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{"metadata":{"name":"Dapp","description":"","url":"https://dapp.example"}}"#).unwrap();
/// assert_eq!(config.request_timeout().as_secs(), 300);
/// assert_eq!(config.sweep_interval().map(|d| d.as_secs()), Some(900));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Metadata shared with peers in proposals and settlements.
    pub metadata: AppMetaData,

    /// How long `session_request` waits for the peer's response.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long `ping` waits for the peer's response.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Interval of the periodic expiry sweep; `None` disables it.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: Option<u64>,

    /// Buffer of the domain event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_request_timeout() -> u64 {
    FIVE_MINUTES_IN_SECONDS
}

fn default_ping_timeout() -> u64 {
    THIRTY_SECONDS
}

fn default_sweep_interval() -> Option<u64> {
    Some(15 * 60)
}

fn default_event_capacity() -> usize {
    256
}

impl EngineConfig {
    /// Create a configuration with default timings.
    pub fn new(metadata: AppMetaData) -> Self {
        Self {
            metadata,
            request_timeout_secs: default_request_timeout(),
            ping_timeout_secs: default_ping_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            event_capacity: default_event_capacity(),
        }
    }

    /// Load a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.event_capacity == 0 {
            return Err(SignError::Internal(
                "event_capacity must be greater than zero".into(),
            ));
        }
        Ok(config)
    }

    /// Set the session request timeout.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set the ping timeout.
    pub fn with_ping_timeout(mut self, secs: u64) -> Self {
        self.ping_timeout_secs = secs;
        self
    }

    /// Set or disable the periodic expiry sweep.
    pub fn with_sweep_interval(mut self, secs: Option<u64>) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Session request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Ping timeout.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Sweep interval, if the periodic sweep is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(AppMetaData::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.ping_timeout(), Duration::from_secs(30));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_json_overrides() {
        let config = EngineConfig::from_json(
            r#"{
                "metadata": {"name": "Wallet", "description": "", "url": "https://w.example"},
                "request_timeout_secs": 10,
                "sweep_interval_secs": null
            }"#,
        )
        .unwrap();
        assert_eq!(config.metadata.name, "Wallet");
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.ping_timeout_secs, 30);
        assert!(config.sweep_interval().is_none());
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = EngineConfig::from_json(
            r#"{"metadata": {"name": "", "description": "", "url": ""}, "event_capacity": 0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SignError::Internal(_)));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_request_timeout(1)
            .with_ping_timeout(2)
            .with_sweep_interval(Some(0))
            .with_event_capacity(0);
        assert_eq!(config.request_timeout().as_secs(), 1);
        assert_eq!(config.ping_timeout().as_secs(), 2);
        assert!(config.sweep_interval().is_none());
        assert_eq!(config.event_capacity, 1);
    }
}
