// icegate-config - Gateway configuration
//
// Sources, in priority order:
// 1. Environment variables (highest)
// 2. Config file path from ICEGATE_CONFIG env var
// 3. Config file contents from ICEGATE_CONFIG_CONTENT env var
// 4. Default config file location (./icegate.toml)
// 5. Built-in defaults (lowest)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

mod env;

pub use env::apply_env_overrides;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub lookup: LookupConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,

    /// The host clients address this gateway by. Requests whose Host carries
    /// more labels than this are treated as virtual-host style.
    pub host: String,

    #[serde(default)]
    pub routing_style: RoutingStyle,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            host: String::new(),
            routing_style: RoutingStyle::Auto,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

/// How bucket names are extracted from requests. `Auto` compares host label
/// counts, which breaks behind Host-rewriting proxies; the explicit styles
/// pin the behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStyle {
    #[default]
    Auto,
    Path,
    Vhost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Backing object store holding `_log/` and `_data/` under tenant prefixes.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub use_path_style: bool,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            use_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// SigV4 secrets, keyed by key id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Remote virtual-bucket lookup endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub self_addr: String,
    /// Peer base URLs. Must include `self_addr`, otherwise ring ownership is
    /// inconsistent across the cluster.
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_cache_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_bytes() -> usize {
    100_000_000
}

fn default_cache_ttl_secs() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            self_addr: String::new(),
            peers: Vec::new(),
            max_bytes: default_cache_bytes(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Developer shortcut: resolve every virtual bucket to a fixed prefix
/// without consulting the lookup service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub lookup_prefix: Option<String>,
    #[serde(default)]
    pub lookup_time_ms: Option<i64>,
}

impl GatewayConfig {
    /// Load from all sources and validate.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_sources()?;
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file, then env overrides, then validate.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: GatewayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_sources() -> Result<Self> {
        if let Ok(path) = std::env::var("ICEGATE_CONFIG") {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            return toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path));
        }

        if let Ok(content) = std::env::var("ICEGATE_CONFIG_CONTENT") {
            return toml::from_str(&content)
                .context("Failed to parse inline config from ICEGATE_CONFIG_CONTENT");
        }

        let default_path = Path::new("./icegate.toml");
        if default_path.exists() {
            let content = std::fs::read_to_string(default_path)
                .context("Failed to read ./icegate.toml")?;
            return toml::from_str(&content).context("Failed to parse ./icegate.toml");
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.bucket.is_empty() {
            anyhow::bail!("storage.bucket is required");
        }
        if self.server.host.is_empty() && self.server.routing_style == RoutingStyle::Auto {
            anyhow::bail!("server.host is required for routing_style = \"auto\"");
        }
        if self.lookup.url.is_empty() && self.dev.lookup_prefix.is_none() {
            anyhow::bail!("lookup.url is required unless dev.lookup_prefix is set");
        }
        if self.cache.enabled {
            if self.cache.self_addr.is_empty() {
                anyhow::bail!("cache.self_addr is required when the cache is enabled");
            }
            if !self.cache.peers.contains(&self.cache.self_addr) {
                anyhow::bail!(
                    "cache.peers must include cache.self_addr ({}), otherwise key \
                     ownership is inconsistent across the cluster",
                    self.cache.self_addr
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.storage.bucket = "real-bucket".to_string();
        config.server.host = "s3.example.com".to_string();
        config.lookup.url = "http://lookup:9000".to_string();
        config
    }

    #[test]
    fn parses_full_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [server]
            listen_addr = "0.0.0.0:9000"
            host = "s3.example.com"
            routing_style = "path"
            log_level = "debug"
            log_format = "json"

            [storage]
            bucket = "real-bucket"
            region = "eu-west-1"
            endpoint = "http://minio:9000"
            use_path_style = true
            access_key_id = "AKIA"
            secret_access_key = "shh"

            [auth.secrets]
            AKIAEXAMPLE = "testpassword"

            [lookup]
            url = "http://lookup:9000"
            auth_token = "bearer-token"

            [cache]
            enabled = true
            self_addr = "http://10.0.0.1:8333"
            peers = ["http://10.0.0.1:8333", "http://10.0.0.2:8333"]
            max_bytes = 50000000
            ttl_secs = 5

            [dev]
            lookup_prefix = "tenant"
            lookup_time_ms = 1700000000000
            "#,
        )
        .unwrap();

        assert_eq!(config.server.routing_style, RoutingStyle::Path);
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert!(config.storage.use_path_style);
        assert_eq!(config.auth.secrets["AKIAEXAMPLE"], "testpassword");
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.dev.lookup_time_ms, Some(1_700_000_000_000));
        config.validate().unwrap();
    }

    #[test]
    fn defaults_are_sensible() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.cache.max_bytes, 100_000_000);
        assert_eq!(config.cache.ttl_secs, 10);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn validate_requires_bucket() {
        let mut config = valid_config();
        config.storage.bucket.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_self_in_peer_list() {
        let mut config = valid_config();
        config.cache.enabled = true;
        config.cache.self_addr = "http://10.0.0.1:8333".to_string();
        config.cache.peers = vec!["http://10.0.0.2:8333".to_string()];
        assert!(config.validate().is_err());

        config
            .cache
            .peers
            .push("http://10.0.0.1:8333".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn validate_allows_dev_override_without_lookup() {
        let mut config = valid_config();
        config.lookup.url.clear();
        assert!(config.validate().is_err());

        config.dev.lookup_prefix = Some("tenant".to_string());
        config.validate().unwrap();
    }
}
