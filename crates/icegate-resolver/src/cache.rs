// Distributed TTL cache
//
// Every key is owned by exactly one peer, chosen by consistent hashing over
// a shared peer list. The owner fills misses through the loader under a
// per-key single-flight guard, so at most one fill RPC is in flight per key
// per process. Non-owners fetch over HTTP from the owner.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::error::CacheError;
use crate::ring::Ring;

/// Fills a missing entry. The returned bytes are cached verbatim for the
/// group TTL.
#[async_trait]
pub trait CacheLoader: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub self_addr: String,
    pub peers: Vec<String>,
    pub max_bytes: usize,
    pub ttl: Duration,
}

pub struct CacheGroup {
    name: &'static str,
    ring: Ring,
    self_addr: String,
    ttl: Duration,
    store: Mutex<TtlStore>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<Bytes>>>>,
    client: reqwest::Client,
    loader: Arc<dyn CacheLoader>,
}

impl CacheGroup {
    pub fn new(
        name: &'static str,
        options: CacheOptions,
        loader: Arc<dyn CacheLoader>,
    ) -> anyhow::Result<Arc<Self>> {
        if !options.peers.contains(&options.self_addr) {
            anyhow::bail!(
                "cache peer list must include the self address {}",
                options.self_addr
            );
        }

        Ok(Arc::new(Self {
            name,
            ring: Ring::new(options.peers),
            self_addr: options.self_addr,
            ttl: options.ttl,
            store: Mutex::new(TtlStore::new(options.max_bytes)),
            inflight: Mutex::new(HashMap::new()),
            client: reqwest::Client::new(),
            loader,
        }))
    }

    /// Fetch `key`, from the owning peer or by filling locally when this
    /// node owns it.
    pub async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let owner = self.ring.owner(key);
        if owner == self.self_addr {
            self.load_owned(key).await
        } else {
            self.fetch_from_peer(owner, key).await
        }
    }

    /// Owner-side lookup: local store, then a single-flight fill.
    async fn load_owned(&self, key: &str) -> Result<Bytes, CacheError> {
        if let Some(bytes) = self.store.lock().expect("store lock").get(key) {
            debug!(group = self.name, key, "cache hit");
            return Ok(bytes);
        }

        let cell = {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            inflight.entry(key.to_string()).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                debug!(group = self.name, key, "cache fill");
                let bytes = self.loader.load(key).await.map_err(CacheError::Load)?;
                self.store
                    .lock()
                    .expect("store lock")
                    .insert(key.to_string(), bytes.clone(), self.ttl);
                Ok::<Bytes, CacheError>(bytes)
            })
            .await
            .cloned();

        self.inflight.lock().expect("inflight lock").remove(key);
        result
    }

    async fn fetch_from_peer(&self, peer: &str, key: &str) -> Result<Bytes, CacheError> {
        let url = format!("{peer}/_cache/{}/{key}", self.name);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(CacheError::Transport)?;

        let status = res.status();
        if !status.is_success() {
            return Err(CacheError::Peer {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }

        res.bytes().await.map_err(CacheError::Transport)
    }

    /// Router for the peer protocol: `GET /_cache/<group>/<key>`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/_cache/:group/:key", get(peer_fetch))
            .with_state(self)
    }

    /// Serve peer fetches on the configured self address.
    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self
            .self_addr
            .split("://")
            .last()
            .unwrap_or(&self.self_addr)
            .to_string();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind cache pool listener on {addr}: {e}"))?;
        info!(addr = %addr, "cache pool server listening");
        let router = self.router();
        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("cache pool server error: {e}"))
    }
}

async fn peer_fetch(
    State(group): State<Arc<CacheGroup>>,
    Path((group_name, key)): Path<(String, String)>,
) -> Response {
    if group_name != group.name {
        return (StatusCode::NOT_FOUND, "unknown group").into_response();
    }
    match group.load_owned(&key).await {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) => {
            error!(group = group.name, key = %key, error = %e, "peer fetch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Byte-capped TTL store. Expiry is checked on read; the byte cap evicts
/// oldest entries first.
struct TtlStore {
    entries: HashMap<String, TtlEntry>,
    order: VecDeque<String>,
    total_bytes: usize,
    max_bytes: usize,
}

struct TtlEntry {
    bytes: Bytes,
    expires_at: Instant,
}

impl TtlStore {
    fn new(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    fn get(&mut self, key: &str) -> Option<Bytes> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.bytes.clone()),
            Some(_) => {
                self.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: String, bytes: Bytes, ttl: Duration) {
        if self.entries.contains_key(&key) {
            self.remove(&key);
        }
        self.total_bytes += bytes.len();
        self.entries.insert(
            key.clone(),
            TtlEntry {
                bytes,
                expires_at: Instant::now() + ttl,
            },
        );
        self.order.push_back(key);

        while self.total_bytes > self.max_bytes {
            let Some(oldest) = self.order.front().cloned() else {
                break;
            };
            self.remove(&oldest);
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.total_bytes -= entry.bytes.len();
            self.order.retain(|k| k != key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheLoader for CountingLoader {
        async fn load(&self, key: &str) -> anyhow::Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(format!("value-for-{key}")))
        }
    }

    fn single_node_group(loader: Arc<CountingLoader>, ttl: Duration) -> Arc<CacheGroup> {
        CacheGroup::new(
            "virtual_buckets",
            CacheOptions {
                self_addr: "http://127.0.0.1:1".to_string(),
                peers: vec!["http://127.0.0.1:1".to_string()],
                max_bytes: 1024,
                ttl,
            },
            loader,
        )
        .unwrap()
    }

    #[test]
    fn construction_requires_self_in_peers() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let result = CacheGroup::new(
            "virtual_buckets",
            CacheOptions {
                self_addr: "http://127.0.0.1:1".to_string(),
                peers: vec!["http://127.0.0.2:1".to_string()],
                max_bytes: 1024,
                ttl: Duration::from_secs(10),
            },
            loader,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn second_get_within_ttl_is_a_hit() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let group = single_node_group(loader.clone(), Duration::from_secs(10));

        let a = group.get("tenant").await.unwrap();
        let b = group.get("tenant").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refilled() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let group = single_node_group(loader.clone(), Duration::from_millis(10));

        group.get("tenant").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        group.get("tenant").await.unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_gets_coalesce_into_one_fill() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let group = single_node_group(loader.clone(), Duration::from_secs(10));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let group = group.clone();
                tokio::spawn(async move { group.get("tenant").await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ttl_store_evicts_oldest_when_over_cap() {
        let mut store = TtlStore::new(10);
        store.insert("a".into(), Bytes::from_static(b"aaaaa"), Duration::from_secs(10));
        store.insert("b".into(), Bytes::from_static(b"bbbbb"), Duration::from_secs(10));
        assert!(store.get("a").is_some());

        store.insert("c".into(), Bytes::from_static(b"ccccc"), Duration::from_secs(10));
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn ttl_store_reinsert_replaces_entry() {
        let mut store = TtlStore::new(100);
        store.insert("a".into(), Bytes::from_static(b"old"), Duration::from_secs(10));
        store.insert("a".into(), Bytes::from_static(b"new"), Duration::from_secs(10));
        assert_eq!(store.get("a").unwrap(), Bytes::from_static(b"new"));
        assert_eq!(store.total_bytes, 3);
    }
}
