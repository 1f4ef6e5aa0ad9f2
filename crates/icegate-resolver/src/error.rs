use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The lookup service does not know this virtual bucket (or answered
    /// with an empty prefix, which means the same thing).
    #[error("no path prefix for virtual bucket '{0}'")]
    NoPathPrefix(String),

    #[error("lookup transport error")]
    Transport(#[from] reqwest::Error),

    #[error("lookup endpoint answered {status}")]
    LookupStatus { status: u16 },

    #[error("malformed resolver response")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Peer-cache failures surface as-is; there is no stale-on-error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache peer transport error")]
    Transport(#[source] reqwest::Error),

    #[error("cache peer {peer} answered {status}")]
    Peer { peer: String, status: u16 },

    #[error("cache fill failed")]
    Load(#[source] anyhow::Error),
}
