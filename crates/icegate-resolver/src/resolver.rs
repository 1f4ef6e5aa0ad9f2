// Virtual bucket resolution
//
// Resolution order: developer override, then the `virtual_buckets` cache
// group (when enabled), then a direct RPC to the lookup service. The cache
// stores the raw JSON response bytes; decoding and the empty-prefix check
// happen on the requesting node.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheGroup, CacheLoader, CacheOptions};
use crate::error::ResolveError;

/// Cache group name shared by every node in the peer set.
pub const VIRTUAL_BUCKETS_GROUP: &str = "virtual_buckets";

/// RPC path on the lookup service.
pub const RESOLVE_RPC_PATH: &str = "/resolve_virtual_bucket";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    #[serde(rename = "VirtualBucket")]
    pub virtual_bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Empty means the lookup service does not know the bucket.
    #[serde(rename = "Prefix", default)]
    pub prefix: String,

    #[serde(rename = "TimeMS", default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<i64>,
}

/// A resolved virtual bucket. `time_ms` is always populated: when the
/// lookup service omits it, the current wall-clock time is substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub prefix: String,
    pub time_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    pub lookup_url: String,
    pub auth_token: Option<String>,
    pub dev_prefix: Option<String>,
    pub dev_time_ms: Option<i64>,
    pub cache: Option<CacheOptions>,
}

pub struct Resolver {
    lookup: Arc<RemoteLookup>,
    dev_override: Option<(String, Option<i64>)>,
    cache: Option<Arc<CacheGroup>>,
}

impl Resolver {
    pub fn new(options: ResolverOptions) -> anyhow::Result<Self> {
        let lookup = Arc::new(RemoteLookup {
            client: reqwest::Client::new(),
            url: options.lookup_url,
            auth_token: options.auth_token,
        });

        let cache = match options.cache {
            Some(cache_options) => Some(CacheGroup::new(
                VIRTUAL_BUCKETS_GROUP,
                cache_options,
                lookup.clone(),
            )?),
            None => None,
        };

        Ok(Self {
            lookup,
            dev_override: options.dev_prefix.map(|p| (p, options.dev_time_ms)),
            cache,
        })
    }

    /// The cache group, for mounting its peer listener. None when caching
    /// is disabled.
    pub fn cache_group(&self) -> Option<Arc<CacheGroup>> {
        self.cache.clone()
    }

    /// Resolve `virtual_bucket` for the caller identified by `key_id`.
    pub async fn resolve(
        &self,
        virtual_bucket: &str,
        key_id: &str,
    ) -> Result<Resolved, ResolveError> {
        debug!(virtual_bucket, key_id, "resolving virtual bucket");

        if let Some((prefix, time_ms)) = &self.dev_override {
            return Ok(Resolved {
                prefix: prefix.clone(),
                time_ms: time_ms.unwrap_or_else(|| Utc::now().timestamp_millis()),
            });
        }

        let bytes = match &self.cache {
            Some(group) => group.get(virtual_bucket).await?,
            None => self.lookup.fetch(virtual_bucket).await?,
        };

        let response: ResolveResponse = serde_json::from_slice(&bytes)?;
        if response.prefix.is_empty() {
            return Err(ResolveError::NoPathPrefix(virtual_bucket.to_string()));
        }

        Ok(Resolved {
            prefix: response.prefix,
            time_ms: response
                .time_ms
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        })
    }
}

/// The lookup RPC, shared between the direct path and the cache loader.
struct RemoteLookup {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl RemoteLookup {
    async fn fetch(&self, virtual_bucket: &str) -> Result<Bytes, ResolveError> {
        let mut request = self
            .client
            .post(format!("{}{RESOLVE_RPC_PATH}", self.url))
            .json(&ResolveRequest {
                virtual_bucket: virtual_bucket.to_string(),
            });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(ResolveError::LookupStatus {
                status: status.as_u16(),
            });
        }

        Ok(res.bytes().await?)
    }
}

#[async_trait]
impl CacheLoader for RemoteLookup {
    async fn load(&self, key: &str) -> anyhow::Result<Bytes> {
        self.fetch(key).await.map_err(Into::into)
    }
}
