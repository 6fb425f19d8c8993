//! Configuration types.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Queue the plugin publishes to and polls from.
pub const QUEUE_NAME: &str = "testqueue";

/// Container holding the ASiC bundles.
pub const CONTAINER_NAME: &str = "testcontainer";

/// Env var holding the blob storage connection string.
pub const BLOB_STORAGE_URL_VAR: &str = "DIFI_MOVE_PLUGIN_BLOB_STORAGE_URL";

/// Env var holding the Service Bus connection string.
pub const SERVICEBUS_URL_VAR: &str = "DIFI_MOVE_PLUGIN_SERVICEBUS_URL";

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Azure Storage connection string.
    pub blob_storage_url: SecretString,
    /// Azure Service Bus connection string.
    pub servicebus_url: SecretString,
    pub queue_name: String,
    pub container_name: String,
    /// Maximum number of queue items fetched per poll.
    pub batch_size: usize,
    /// Maximum time a poll waits for items on an empty queue.
    pub receive_wait: Duration,
    /// Interval between polls when the bridge drives its own poll loop.
    pub poll_interval: Duration,
    /// Per-request timeout for the HTTP transports.
    pub http_timeout: Duration,
}

impl BridgeConfig {
    /// Config with the given endpoints and default tuning.
    pub fn new(blob_storage_url: impl Into<String>, servicebus_url: impl Into<String>) -> Self {
        Self {
            blob_storage_url: SecretString::from(blob_storage_url.into()),
            servicebus_url: SecretString::from(servicebus_url.into()),
            queue_name: QUEUE_NAME.to_string(),
            container_name: CONTAINER_NAME.to_string(),
            batch_size: 50,
            receive_wait: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(60),
        }
    }

    /// Build config from environment variables.
    ///
    /// Both connection strings are required; tuning knobs fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let blob_storage_url = std::env::var(BLOB_STORAGE_URL_VAR)
            .map_err(|_| ConfigError::MissingEnvVar(BLOB_STORAGE_URL_VAR.to_string()))?;
        let servicebus_url = std::env::var(SERVICEBUS_URL_VAR)
            .map_err(|_| ConfigError::MissingEnvVar(SERVICEBUS_URL_VAR.to_string()))?;

        let mut config = Self::new(blob_storage_url, servicebus_url);

        if let Some(batch_size) = parse_env("NEXTMOVE_BRIDGE_BATCH_SIZE")? {
            config.batch_size = batch_size;
        }
        if let Some(secs) = parse_env("NEXTMOVE_BRIDGE_RECEIVE_WAIT_SECS")? {
            config.receive_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env("NEXTMOVE_BRIDGE_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env("NEXTMOVE_BRIDGE_HTTP_TIMEOUT_SECS")? {
            config.http_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that both endpoints are present and the tuning is usable.
    ///
    /// The poll loop's interval timer cannot tick with a zero period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blob_storage_url.expose_secret().trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: BLOB_STORAGE_URL_VAR.to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.servicebus_url.expose_secret().trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: SERVICEBUS_URL_VAR.to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.queue_name.is_empty() || self.container_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "queue_name/container_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.receive_wait.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "receive_wait".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.http_timeout <= self.receive_wait {
            return Err(ConfigError::InvalidValue {
                key: "http_timeout".to_string(),
                message: "must be longer than receive_wait".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_plugin_constants() {
        let config = BridgeConfig::new("blob", "bus");
        assert_eq!(config.queue_name, "testqueue");
        assert_eq!(config.container_name, "testcontainer");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.receive_wait, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let config = BridgeConfig::new("  ", "bus");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == BLOB_STORAGE_URL_VAR
        ));

        let config = BridgeConfig::new("blob", "");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == SERVICEBUS_URL_VAR
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = BridgeConfig::new("blob", "bus");
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_receive_wait_is_rejected() {
        let mut config = BridgeConfig::new("blob", "bus");
        config.receive_wait = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = BridgeConfig::new("blob", "bus");
        config.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "poll_interval"
        ));
    }

    #[test]
    fn http_timeout_must_outlast_receive_wait() {
        let mut config = BridgeConfig::new("blob", "bus");
        config.http_timeout = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_does_not_leak_connection_strings() {
        let config = BridgeConfig::new("AccountKey=secret-key", "SharedAccessKey=bus-key");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(!rendered.contains("bus-key"));
    }
}
