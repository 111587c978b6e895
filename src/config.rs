//! Process-level bus configuration, read from the environment.

use std::fmt;

use crate::constants::*;
use crate::error::ConfigError;

#[derive(Clone)]
pub struct BusConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_username: Option<String>,
    pub broker_password: Option<String>,
    pub stream_maxlen: u64,
    pub envelope_size_limit: usize,
    pub namespace: String,
}

impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConfig")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("broker_username", &self.broker_username)
            .field("broker_password", &self.broker_password.as_ref().map(|_| "<redacted>"))
            .field("stream_maxlen", &self.stream_maxlen)
            .field("envelope_size_limit", &self.envelope_size_limit)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            broker_username: None,
            broker_password: None,
            stream_maxlen: DEFAULT_BUS_STREAM_MAXLEN,
            envelope_size_limit: DEFAULT_ENVELOPE_SIZE_LIMIT,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl BusConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset. Returns an error only if a set value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(host) = std::env::var(ENV_BROKER_HOST) {
            cfg.broker_host = host;
        }
        if let Ok(port) = std::env::var(ENV_BROKER_PORT) {
            cfg.broker_port = port.parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_BROKER_PORT,
                value: port,
            })?;
        }
        cfg.broker_username = std::env::var(ENV_BROKER_USERNAME).ok();
        cfg.broker_password = std::env::var(ENV_BROKER_PASSWORD).ok();
        if let Ok(maxlen) = std::env::var(ENV_BUS_STREAM_MAXLEN) {
            cfg.stream_maxlen = maxlen.parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_BUS_STREAM_MAXLEN,
                value: maxlen,
            })?;
        }
        if let Ok(limit) = std::env::var(ENV_ENVELOPE_SIZE_LIMIT) {
            cfg.envelope_size_limit = limit.parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_ENVELOPE_SIZE_LIMIT,
                value: limit,
            })?;
        }
        if let Ok(ns) = std::env::var(ENV_NAMESPACE) {
            cfg.namespace = ns;
        }

        Ok(cfg)
    }

    /// Redis connection URL for this config. Never logged in full —
    /// callers should route through `redacted_url` for anything printed.
    pub fn redis_url(&self) -> String {
        match (&self.broker_username, &self.broker_password) {
            (Some(user), Some(pass)) => format!(
                "redis://{user}:{pass}@{}:{}",
                self.broker_host, self.broker_port
            ),
            (None, Some(pass)) => {
                format!("redis://:{pass}@{}:{}", self.broker_host, self.broker_port)
            }
            _ => format!("redis://{}:{}", self.broker_host, self.broker_port),
        }
    }

    /// Same as `redis_url` but with any credentials redacted, safe for logs.
    pub fn redacted_url(&self) -> String {
        format!("redis://{}:{}", self.broker_host, self.broker_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.broker_host, "127.0.0.1");
        assert_eq!(cfg.broker_port, 6379);
        assert_eq!(cfg.stream_maxlen, 10_000);
        assert_eq!(cfg.envelope_size_limit, 131_072);
        assert_eq!(cfg.namespace, "AG1");
    }

    #[test]
    fn redacted_url_never_contains_password() {
        let mut cfg = BusConfig::default();
        cfg.broker_password = Some("hunter2".to_string());
        assert!(!cfg.redacted_url().contains("hunter2"));
        assert!(cfg.redis_url().contains("hunter2"));
    }
}
