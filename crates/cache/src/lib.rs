//! TTL key/value cache
//!
//! Holds translation results, the supported-language list, and caption
//! upload results so repeated work does not spend provider quota twice.
//! Keys are built with `cache_key` from the inputs that determine the value.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::BoxFuture;
use moka::Expiry;
use sha2::{Digest, Sha256};
use tracing::trace;

/// Cache operations. Dyn-compatible so providers hold `Arc<dyn Cache>`.
pub trait Cache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BoxFuture<'a, ()>;

    fn get_list<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Vec<String>>>;

    fn set_list<'a>(
        &'a self,
        key: &'a str,
        values: Vec<String>,
        ttl: Duration,
    ) -> BoxFuture<'a, ()>;

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()>;
}

/// Stable cache key: hex SHA-256 over `parts` separated by the ASCII unit
/// separator, so `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
enum Value {
    Text(String),
    List(Arc<Vec<String>>),
}

#[derive(Clone)]
struct Entry {
    value: Value,
    ttl: Duration,
}

/// Expires every entry after its own TTL, restarting on overwrite.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache on `moka` with bounded capacity.
#[derive(Clone)]
pub struct MemoryCache {
    inner: moka::future::Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { inner }
    }

    async fn insert(&self, key: &str, value: Value, ttl: Duration) {
        if ttl.is_zero() {
            self.inner.invalidate(key).await;
            return;
        }
        trace!(key, ttl_secs = ttl.as_secs(), "cache set");
        self.inner.insert(key.to_string(), Entry { value, ttl }).await;
    }
}

impl Cache for MemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            match self.inner.get(key).await?.value {
                Value::Text(text) => Some(text),
                Value::List(_) => None,
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BoxFuture<'a, ()> {
        Box::pin(self.insert(key, Value::Text(value), ttl))
    }

    fn get_list<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Vec<String>>> {
        Box::pin(async move {
            match self.inner.get(key).await?.value {
                Value::List(values) => Some(values.as_ref().clone()),
                Value::Text(_) => None,
            }
        })
    }

    fn set_list<'a>(
        &'a self,
        key: &'a str,
        values: Vec<String>,
        ttl: Duration,
    ) -> BoxFuture<'a, ()> {
        Box::pin(self.insert(key, Value::List(Arc::new(values)), ttl))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.inner.invalidate(key).await;
        })
    }
}
