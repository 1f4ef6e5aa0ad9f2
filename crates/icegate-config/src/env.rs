// Environment variable overrides (highest priority)

use crate::{GatewayConfig, LogFormat, RoutingStyle};
use anyhow::{Context, Result};
use std::env;

const ENV_PREFIX: &str = "ICEGATE_";

/// Apply `ICEGATE_*` overrides on top of an already-loaded config.
pub fn apply_env_overrides(config: &mut GatewayConfig) -> Result<()> {
    // Server
    if let Some(addr) = get_env_string("LISTEN_ADDR")? {
        config.server.listen_addr = addr;
    }
    if let Some(host) = get_env_string("MY_HOST")? {
        config.server.host = host;
    }
    if let Some(style) = get_env_string("ROUTING_STYLE")? {
        config.server.routing_style = match style.to_lowercase().as_str() {
            "path" => RoutingStyle::Path,
            "vhost" => RoutingStyle::Vhost,
            "auto" => RoutingStyle::Auto,
            other => anyhow::bail!("invalid ICEGATE_ROUTING_STYLE: {other}"),
        };
    }
    if let Some(level) = get_env_string("LOG_LEVEL")? {
        config.server.log_level = level;
    }
    if let Some(format) = get_env_string("LOG_FORMAT")? {
        config.server.log_format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    // Storage
    if let Some(bucket) = get_env_string("S3_BUCKET")? {
        config.storage.bucket = bucket;
    }
    if let Some(region) = get_env_string("AWS_REGION")? {
        config.storage.region = region;
    }
    if let Some(endpoint) = get_env_string("S3_URL")? {
        config.storage.endpoint = Some(endpoint);
    }
    if let Some(use_path) = get_env_bool("S3_USE_PATH")? {
        config.storage.use_path_style = use_path;
    }
    if let Some(key_id) = get_env_string("AWS_KEY_ID")? {
        config.storage.access_key_id = key_id;
    }
    if let Some(secret) = get_env_string("AWS_SECRET_KEY")? {
        config.storage.secret_access_key = secret;
    }

    // Lookup
    if let Some(url) = get_env_string("LOOKUP_URL")? {
        config.lookup.url = url;
    }
    if let Some(token) = get_env_string("LOOKUP_AUTH")? {
        config.lookup.auth_token = Some(token);
    }

    // Cache
    if let Some(enabled) = get_env_bool("CACHE_ENABLED")? {
        config.cache.enabled = enabled;
    }
    if let Some(self_addr) = get_env_string("CACHE_SELF_ADDR")? {
        config.cache.self_addr = self_addr;
    }
    if let Some(peers) = get_env_string("CACHE_PEERS")? {
        config.cache.peers = peers.split(',').map(|p| p.trim().to_string()).collect();
    }
    if let Some(bytes) = get_env_usize("CACHE_BYTES")? {
        config.cache.max_bytes = bytes;
    }
    if let Some(secs) = get_env_u64("CACHE_SECONDS")? {
        config.cache.ttl_secs = secs;
    }

    // Dev override
    if let Some(prefix) = get_env_string("DEV_LOOKUP_PREFIX")? {
        config.dev.lookup_prefix = Some(prefix);
    }
    if let Some(time_ms) = get_env_string("DEV_LOOKUP_TIME_MS")? {
        let parsed = time_ms
            .parse::<i64>()
            .context("ICEGATE_DEV_LOOKUP_TIME_MS must be a valid number")?;
        config.dev.lookup_time_ms = Some(parsed);
    }

    Ok(())
}

fn get_env_string(key: &str) -> Result<Option<String>> {
    let full_key = format!("{ENV_PREFIX}{key}");
    match env::var(&full_key) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read env var {full_key}")),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>> {
    match get_env_string(key)? {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .with_context(|| format!("{ENV_PREFIX}{key} must be a valid number"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u64(key: &str) -> Result<Option<u64>> {
    match get_env_string(key)? {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .with_context(|| format!("{ENV_PREFIX}{key} must be a valid number"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env_string(key)? {
        Some(val) => {
            let parsed = match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => anyhow::bail!("{ENV_PREFIX}{key} must be true or false"),
            };
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
