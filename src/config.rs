use serde::Deserialize;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service name used as ET-Client-Name and subscription RequestorRef
    #[serde(default = "Config::default_product_name")]
    pub product_name: String,
    /// Only feed elements attributed to this operator are processed
    #[serde(default = "Config::default_operator")]
    pub operator: String,
    /// Base cadence for polling and journey flushing (milliseconds)
    #[serde(default = "Config::default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "Config::default_true")]
    pub et_enabled: bool,
    #[serde(default = "Config::default_true")]
    pub sx_enabled: bool,
    /// true: push subscriptions against Anshar; false: polling
    #[serde(default)]
    pub use_subscription: bool,
    /// Write processed ET messages to archive_dir
    #[serde(default)]
    pub store_messages_to_file: bool,
    #[serde(default = "Config::default_archive_dir")]
    pub archive_dir: String,
    #[serde(default = "Config::default_bind")]
    pub bind: String,
    pub anshar: AnsharConfig,
    #[serde(default)]
    pub tiamat: TiamatConfig,
}

/// Upstream aggregator endpoints.
///
/// The polling URLs are templates: `{requestorId}` is replaced with the
/// cluster-wide requestor id so Anshar can track per-client pagination
/// state across replicas.
#[derive(Debug, Clone, Deserialize)]
pub struct AnsharConfig {
    #[serde(default)]
    pub polling_et_url: String,
    #[serde(default)]
    pub polling_sx_url: String,
    /// Where SubscriptionRequests are POSTed in subscription mode
    #[serde(default)]
    pub subscription_url: String,
    /// Externally reachable base URL of this service, used to build the
    /// push callback address
    #[serde(default)]
    pub own_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TiamatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    /// How often to refresh the quay to stop-place mapping (milliseconds)
    #[serde(default = "TiamatConfig::default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for TiamatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            interval_ms: Self::default_interval_ms(),
        }
    }
}

impl TiamatConfig {
    fn default_interval_ms() -> u64 {
        6 * 60 * 60 * 1000
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate configuration values and log warnings for potential issues.
    pub fn validate(&self) {
        if self.use_subscription {
            if !self.et_enabled && !self.sx_enabled {
                warn!("Subscription mode is enabled but both ET and SX are disabled - no subscription triggers will run");
            }
            if self.anshar.subscription_url.is_empty() {
                warn!("Subscription mode is enabled but anshar.subscription_url is not set");
            }
            if self.anshar.own_base_url.is_empty() {
                warn!("Subscription mode is enabled but anshar.own_base_url is not set - Anshar cannot push to this service");
            }
        } else {
            if self.et_enabled && self.anshar.polling_et_url.is_empty() {
                warn!("ET polling is enabled but anshar.polling_et_url is not set");
            }
            if self.sx_enabled && self.anshar.polling_sx_url.is_empty() {
                warn!("SX polling is enabled but anshar.polling_sx_url is not set");
            }
        }
        if self.tiamat.enabled && self.tiamat.url.is_empty() {
            warn!("Tiamat refresh is enabled but tiamat.url is not set");
        }
        if self.operator.trim().is_empty() {
            warn!("Operator filter is empty - no feed elements will be processed");
        }
    }

    pub fn polling_et_url(&self, requestor_id: &str) -> String {
        self.anshar
            .polling_et_url
            .replace("{requestorId}", requestor_id)
    }

    pub fn polling_sx_url(&self, requestor_id: &str) -> String {
        self.anshar
            .polling_sx_url
            .replace("{requestorId}", requestor_id)
    }

    fn default_product_name() -> String {
        "Avvik".to_string()
    }
    fn default_operator() -> String {
        "NSB".to_string()
    }
    fn default_polling_interval_ms() -> u64 {
        30_000
    }
    fn default_true() -> bool {
        true
    }
    fn default_archive_dir() -> String {
        "./data/messages".to_string()
    }
    fn default_bind() -> String {
        "0.0.0.0:3000".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let yaml = r#"
            anshar: {}
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.product_name, "Avvik");
        assert_eq!(config.operator, "NSB");
        assert_eq!(config.polling_interval_ms, 30_000);
        assert!(config.et_enabled);
        assert!(config.sx_enabled);
        assert!(!config.use_subscription);
        assert!(!config.store_messages_to_file);
        assert!(!config.tiamat.enabled);
        assert_eq!(config.tiamat.interval_ms, 6 * 60 * 60 * 1000);
        assert_eq!(config.bind, "0.0.0.0:3000");
    }

    #[test]
    fn full_config_deserializes() {
        let yaml = r#"
            product_name: "Avvik"
            operator: "VYG"
            polling_interval_ms: 15000
            et_enabled: true
            sx_enabled: false
            use_subscription: true
            store_messages_to_file: true
            archive_dir: "/var/spool/avvik"
            bind: "127.0.0.1:8080"
            anshar:
              polling_et_url: "https://anshar.example.org/rest/et?requestorId={requestorId}&maxSize=500"
              polling_sx_url: "https://anshar.example.org/rest/sx?requestorId={requestorId}&maxSize=500"
              subscription_url: "https://anshar.example.org/subscribe"
              own_base_url: "https://avvik.example.org"
            tiamat:
              enabled: true
              url: "https://tiamat.example.org/quay-mapping"
              interval_ms: 3600000
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.operator, "VYG");
        assert_eq!(config.polling_interval_ms, 15_000);
        assert!(!config.sx_enabled);
        assert!(config.use_subscription);
        assert!(config.tiamat.enabled);
        assert_eq!(config.tiamat.interval_ms, 3_600_000);
        assert_eq!(config.archive_dir, "/var/spool/avvik");
    }

    #[test]
    fn polling_url_template_substitutes_requestor_id() {
        let yaml = r#"
            anshar:
              polling_et_url: "https://anshar.example.org/rest/et?requestorId={requestorId}"
              polling_sx_url: "https://anshar.example.org/rest/sx?requestorId={requestorId}"
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.polling_et_url("avvik-123"),
            "https://anshar.example.org/rest/et?requestorId=avvik-123"
        );
        assert_eq!(
            config.polling_sx_url("avvik-123"),
            "https://anshar.example.org/rest/sx?requestorId=avvik-123"
        );
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let yaml = r#"
            polling_interval_ms: 5000
            anshar:
              polling_et_url: "https://anshar.example.org/rest/et"
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.polling_interval_ms, 5000);
        assert_eq!(config.operator, "NSB");
        assert!(config.anshar.polling_sx_url.is_empty());
    }
}
