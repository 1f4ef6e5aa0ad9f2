// icegate-resolver - Virtual bucket resolution
//
// Maps a virtual bucket name to the backing prefix (and optional as-of
// timestamp) it materializes from. Lookups go to a remote endpoint, fronted
// by a consistent-hashed peer cache so a hot bucket costs one RPC per TTL
// across the whole cluster.

mod cache;
mod error;
mod resolver;
mod ring;

pub use cache::{CacheGroup, CacheLoader, CacheOptions};
pub use error::{CacheError, ResolveError};
pub use resolver::{
    Resolved, ResolveRequest, ResolveResponse, Resolver, ResolverOptions, RESOLVE_RPC_PATH,
    VIRTUAL_BUCKETS_GROUP,
};
pub use ring::Ring;
