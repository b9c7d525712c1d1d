//! Transport configuration.
//!
//! Every wait interval and retry count the firmware hard-coded is a field
//! here, defaulting to the firmware value. Loaded from TOML:
//!
//! ```toml
//! host = "broker.example.test"
//! port = 8883
//! connect_timeout_ms = 20000
//! retry_count = 3
//!
//! [static_hosts]
//! "broker.example.test" = "192.0.2.10"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::constants::*;
use crate::core::ConfigError;
use crate::transport::dns::parse_literal;
use crate::transport::{
    Backend, ConnectParams, ConnectSettings, IoSettings, Network, Resolver,
};

/// Environment variable overriding [`TransportConfig::host`].
pub const ENV_HOST: &str = "NETBRIDGE_HOST";

/// Environment variable overriding [`TransportConfig::port`].
pub const ENV_PORT: &str = "NETBRIDGE_PORT";

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Broker hostname or literal address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Budget for resolution and for each connect attempt (ms).
    pub connect_timeout_ms: u32,
    /// Low-level connect attempts.
    pub retry_count: u32,
    /// Pause after a failed attempt (ms).
    pub retry_delay_ms: u32,
    /// Pause between closing and reopening (ms).
    pub settle_delay_ms: u32,
    /// Readiness poll step (ms).
    pub poll_interval_ms: u32,
    /// DNS mailbox poll step (ms).
    pub dns_poll_interval_ms: u32,
    /// Consecutive would-block reads that end a line read.
    pub line_retry_count: u32,
    /// Pause between those retries (ms).
    pub line_retry_delay_ms: u32,
    /// Bound on waiting for send buffer space (ms, 0 = unbounded).
    pub send_timeout_ms: u32,
    /// MQTT keepalive (s).
    pub keepalive_s: u32,
    /// Default facade read timeout (ms).
    pub read_timeout_ms: u32,
    /// Largest buffered message (bytes).
    pub max_message_size: usize,
    /// Hostname → literal address overrides.
    pub static_hosts: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            dns_poll_interval_ms: DEFAULT_DNS_POLL_INTERVAL_MS,
            line_retry_count: DEFAULT_LINE_RETRY_COUNT,
            line_retry_delay_ms: DEFAULT_LINE_RETRY_DELAY_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            keepalive_s: DEFAULT_KEEPALIVE_S,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            static_hosts: BTreeMap::new(),
        }
    }
}

impl TransportConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply [`ENV_HOST`] / [`ENV_PORT`] from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply host/port overrides from `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_PORT}={port} is not a port")))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check ranges and consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host is empty".into()));
        }
        if self.host.len() > MAX_DOMAIN_NAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "host longer than {MAX_DOMAIN_NAME_LEN} bytes"
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 || self.dns_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be non-zero".into()));
        }
        for (name, literal) in &self.static_hosts {
            parse_literal(literal).map_err(|_| {
                ConfigError::Invalid(format!("static host {name}: {literal} is not an IP address"))
            })?;
        }
        Ok(())
    }

    /// Where to connect.
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            timeout_ms: self.connect_timeout_ms,
        }
    }

    /// Connection manager policy.
    pub fn connect_settings(&self) -> ConnectSettings {
        ConnectSettings {
            retry_count: self.retry_count,
            retry_delay_ms: self.retry_delay_ms,
            settle_delay_ms: self.settle_delay_ms,
            dns_poll_interval_ms: self.dns_poll_interval_ms,
        }
    }

    /// I/O engine policy.
    pub fn io_settings(&self) -> IoSettings {
        IoSettings {
            poll_interval_ms: self.poll_interval_ms,
            send_timeout_ms: self.send_timeout_ms,
            line_retry_count: self.line_retry_count,
            line_retry_delay_ms: self.line_retry_delay_ms,
        }
    }

    /// Parsed static host table.
    pub fn static_addresses(&self) -> Result<BTreeMap<String, IpAddr>, ConfigError> {
        self.static_hosts
            .iter()
            .map(|(name, literal)| {
                parse_literal(literal)
                    .map(|addr| (name.clone(), addr))
                    .map_err(|_| ConfigError::Invalid(format!("static host {name}")))
            })
            .collect()
    }

    /// Build a [`Network`] using these settings.
    pub fn network<B: Backend, R: Resolver>(&self, backend: B, resolver: R) -> Network<B, R> {
        let mut builder = Network::builder(backend)
            .resolver(resolver)
            .connect_settings(self.connect_settings())
            .io_settings(self.io_settings())
            .read_timeout_ms(self.read_timeout_ms)
            .max_message_size(self.max_message_size);
        for (name, literal) in &self.static_hosts {
            builder = builder.static_host(name.clone(), literal.clone());
        }
        builder.build()
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Builder holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Broker port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Connect and resolution budget (ms).
    pub fn connect_timeout_ms(mut self, ms: u32) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Connect attempts and the pause after each failure.
    pub fn retries(mut self, count: u32, delay_ms: u32) -> Self {
        self.config.retry_count = count;
        self.config.retry_delay_ms = delay_ms;
        self
    }

    /// Close-to-reopen pause (ms).
    pub fn settle_delay_ms(mut self, ms: u32) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    /// Readiness poll step (ms).
    pub fn poll_interval_ms(mut self, ms: u32) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// DNS poll step (ms).
    pub fn dns_poll_interval_ms(mut self, ms: u32) -> Self {
        self.config.dns_poll_interval_ms = ms;
        self
    }

    /// Line read retry policy.
    pub fn line_retries(mut self, count: u32, delay_ms: u32) -> Self {
        self.config.line_retry_count = count;
        self.config.line_retry_delay_ms = delay_ms;
        self
    }

    /// Send would-block bound (ms).
    pub fn send_timeout_ms(mut self, ms: u32) -> Self {
        self.config.send_timeout_ms = ms;
        self
    }

    /// MQTT keepalive (s).
    pub fn keepalive_s(mut self, s: u32) -> Self {
        self.config.keepalive_s = s;
        self
    }

    /// Facade read timeout (ms).
    pub fn read_timeout_ms(mut self, ms: u32) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Largest buffered message (bytes).
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Add a static host mapping.
    pub fn static_host(mut self, name: impl Into<String>, literal: impl Into<String>) -> Self {
        self.config.static_hosts.insert(name.into(), literal.into());
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::core::NetError;
    use crate::testing::FakeBackend;
    use crate::transport::NoResolver;

    #[test]
    fn test_defaults_match_firmware() {
        let config = TransportConfig::default();
        assert_eq!(config.port, 1883);
        assert_eq!(config.retry_delay_ms, 200);
        assert_eq!(config.settle_delay_ms, 500);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.line_retry_count, 6);
        assert_eq!(config.line_retry_delay_ms, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TransportConfig::from_toml_str(
            r#"
host = "broker.example.test"
port = 8883
retry_count = 3

[static_hosts]
"broker.example.test" = "192.0.2.10"
"#,
        )
        .unwrap();

        assert_eq!(config.host, "broker.example.test");
        assert_eq!(config.port, 8883);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(
            config.static_addresses().unwrap()["broker.example.test"].to_string(),
            "192.0.2.10"
        );

        let params = config.connect_params();
        assert_eq!(params.host, "broker.example.test");
        assert_eq!(params.timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.connect_settings().retry_count, 3);
        assert_eq!(config.io_settings().poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            TransportConfig::from_toml_str("port = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TransportConfig::from_toml_str("poll_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TransportConfig::from_toml_str("[static_hosts]\nbroker = \"not-an-ip\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TransportConfig::from_toml_str("retry_cuont = 3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            TransportConfig::from_toml_str("port = \"high\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"198.51.100.20\"\nkeepalive_s = 60").unwrap();

        let config = TransportConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "198.51.100.20");
        assert_eq!(config.keepalive_s, 60);

        assert!(matches!(
            TransportConfig::from_file("/nonexistent/netbridge.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [(ENV_HOST, "broker.example.test"), (ENV_PORT, "8883")].into();
        let config = TransportConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.host, "broker.example.test");
        assert_eq!(config.port, 8883);

        let bad = TransportConfig::default()
            .with_overrides(|key| (key == ENV_PORT).then(|| "70000".to_string()));
        assert!(matches!(bad, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_builder_validates() {
        let config = TransportConfig::builder()
            .host("broker.example.test")
            .port(8883)
            .retries(3, 250)
            .line_retries(4, 100)
            .static_host("broker.example.test", "192.0.2.10")
            .build()
            .unwrap();
        assert_eq!(config.retry_delay_ms, 250);
        assert_eq!(config.line_retry_count, 4);

        assert!(TransportConfig::builder().host("").build().is_err());
        assert!(TransportConfig::builder().max_message_size(0).build().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_from_config() {
        let config = TransportConfig::builder()
            .host("broker.example.test")
            .static_host("broker.example.test", "192.0.2.10")
            .retries(2, 50)
            .read_timeout_ms(1234)
            .build()
            .unwrap();

        let backend = FakeBackend::refusing();
        let mut net = config.network(backend, NoResolver);
        assert_eq!(net.read_timeout_ms(), 1234);

        let result = net.connect(&config.connect_params()).await;
        assert_eq!(result, Err(NetError::ConnectFailed));
        assert_eq!(net.manager().backend().attempts(), 2);
        assert_eq!(
            net.manager().backend().connected_addrs()[0].to_string(),
            "192.0.2.10:1883"
        );
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let text = toml::to_string(&TransportConfig::default()).unwrap();
        assert_eq!(TransportConfig::from_toml_str(&text).unwrap(), TransportConfig::default());
    }
}
