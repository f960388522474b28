// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

#[derive(Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub kafka: KafkaConfig,
    pub opensearch_url: String,
    pub opensearch_index: String,
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
    pub shutdown_grace: Duration,
    pub provision_attempts: u32,
    pub provision_backoff: Duration,
    /// Extra write attempts per batch; 0 keeps the log-and-discard behaviour.
    pub flush_retry_attempts: u32,
    pub flush_retry_backoff: Duration,
    pub dead_letter_path: Option<PathBuf>,
    pub auth_token: Option<String>,
    pub log_format: LogFormat,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("bind_addr", &self.bind_addr)
            .field("kafka", &self.kafka)
            .field("opensearch_url", &self.opensearch_url)
            .field("opensearch_index", &self.opensearch_index)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("flush_interval", &self.flush_interval)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("provision_attempts", &self.provision_attempts)
            .field("provision_backoff", &self.provision_backoff)
            .field("flush_retry_attempts", &self.flush_retry_attempts)
            .field("flush_retry_backoff", &self.flush_retry_backoff)
            .field("dead_letter_path", &self.dead_letter_path)
            // Never print the secret itself
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            kafka: KafkaConfig {
                brokers: vec!["localhost:9092".to_string()],
                topic: "audit-events".to_string(),
                group_id: "witness-group".to_string(),
            },
            opensearch_url: "http://localhost:9200".to_string(),
            opensearch_index: "audit-events".to_string(),
            buffer_capacity: 100,
            flush_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
            provision_attempts: 5,
            provision_backoff: Duration::from_secs(2),
            flush_retry_attempts: 0,
            flush_retry_backoff: Duration::from_millis(500),
            dead_letter_path: None,
            auth_token: None,
            log_format: LogFormat::Text,
        }
    }
}

impl NodeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = NodeConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("APP_PORT") {
            let port: u16 = parse("APP_PORT", &port)?;
            cfg.bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        }
        if let Some(brokers) = get("KAFKA_BROKERS") {
            let brokers: Vec<String> = brokers
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();
            if brokers.is_empty() {
                return Err(invalid("KAFKA_BROKERS", "", "no broker address"));
            }
            cfg.kafka.brokers = brokers;
        }
        if let Some(topic) = get("KAFKA_TOPIC") {
            cfg.kafka.topic = topic;
        }
        if let Some(group) = get("KAFKA_CONSUMER_GROUP") {
            cfg.kafka.group_id = group;
        }
        if let Some(url) = get("OPENSEARCH_URL") {
            cfg.opensearch_url = url;
        }
        if let Some(index) = get("OPENSEARCH_INDEX") {
            cfg.opensearch_index = index;
        }
        if let Some(capacity) = get("BUFFER_CAPACITY") {
            cfg.buffer_capacity = parse("BUFFER_CAPACITY", &capacity)?;
            if cfg.buffer_capacity == 0 {
                return Err(invalid("BUFFER_CAPACITY", &capacity, "must be at least 1"));
            }
        }
        if let Some(ms) = get("FLUSH_INTERVAL_MS") {
            let ms: u64 = parse("FLUSH_INTERVAL_MS", &ms)?;
            if ms == 0 {
                return Err(invalid("FLUSH_INTERVAL_MS", "0", "must be positive"));
            }
            cfg.flush_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = get("SHUTDOWN_GRACE_SECS") {
            cfg.shutdown_grace = Duration::from_secs(parse("SHUTDOWN_GRACE_SECS", &secs)?);
        }
        if let Some(attempts) = get("PROVISION_ATTEMPTS") {
            cfg.provision_attempts = parse("PROVISION_ATTEMPTS", &attempts)?;
        }
        if let Some(ms) = get("PROVISION_BACKOFF_MS") {
            cfg.provision_backoff = Duration::from_millis(parse("PROVISION_BACKOFF_MS", &ms)?);
        }
        if let Some(attempts) = get("FLUSH_RETRY_ATTEMPTS") {
            cfg.flush_retry_attempts = parse("FLUSH_RETRY_ATTEMPTS", &attempts)?;
        }
        if let Some(ms) = get("FLUSH_RETRY_BACKOFF_MS") {
            cfg.flush_retry_backoff = Duration::from_millis(parse("FLUSH_RETRY_BACKOFF_MS", &ms)?);
        }
        cfg.dead_letter_path = get("DEAD_LETTER_PATH").map(PathBuf::from);
        cfg.auth_token = get("AUTH_TOKEN");
        if let Some(format) = get("LOG_FORMAT") {
            cfg.log_format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => return Err(invalid("LOG_FORMAT", &format, "expected text or json")),
            };
        }

        Ok(cfg)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = NodeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.kafka.brokers, vec!["localhost:9092"]);
        assert_eq!(cfg.kafka.topic, "audit-events");
        assert_eq!(cfg.kafka.group_id, "witness-group");
        assert_eq!(cfg.buffer_capacity, 100);
        assert_eq!(cfg.flush_interval, Duration::from_secs(5));
        assert_eq!(cfg.provision_attempts, 5);
        assert!(cfg.dead_letter_path.is_none());
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let cfg = NodeConfig::from_lookup(lookup(&[
            ("APP_PORT", "9000"),
            ("KAFKA_BROKERS", "k1:9092, k2:9092,"),
            ("BUFFER_CAPACITY", "250"),
            ("FLUSH_INTERVAL_MS", "750"),
            ("DEAD_LETTER_PATH", "/var/lib/witness/dlq.bin"),
            ("AUTH_TOKEN", "secret"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.kafka.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(cfg.buffer_capacity, 250);
        assert_eq!(cfg.flush_interval, Duration::from_millis(750));
        assert_eq!(cfg.dead_letter_path, Some(PathBuf::from("/var/lib/witness/dlq.bin")));
        assert_eq!(cfg.auth_token.as_deref(), Some("secret"));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn test_debug_redacts_auth_token() {
        let cfg = NodeConfig::from_lookup(lookup(&[("AUTH_TOKEN", "hunter2")])).unwrap();
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("auth_token: Some(\"<redacted>\")"));
        assert!(printed.contains("buffer_capacity: 100"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(NodeConfig::from_lookup(lookup(&[("APP_PORT", "eighty")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("BUFFER_CAPACITY", "0")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("FLUSH_INTERVAL_MS", "0")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("KAFKA_BROKERS", " , ")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).is_err());
    }
}
