//! Persistent cache kept in the store file
//!
//! Entries survive across invocations, which the in-process `MemoryCache`
//! does not. Used for results that must not be repeated by a later run,
//! such as caption uploads.

use std::sync::Arc;
use std::time::Duration;

use cache::Cache;
use common::BoxFuture;
use tracing::{trace, warn};

use crate::store::{CachedValue, Store};

/// `Cache` over the store's expiring key/value table.
#[derive(Clone)]
pub struct StoreCache {
    store: Arc<Store>,
}

impl StoreCache {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    async fn put(&self, key: &str, value: CachedValue, ttl: Duration) {
        let result = if ttl.is_zero() {
            self.store.cache_remove(key).await
        } else {
            trace!(key, ttl_secs = ttl.as_secs(), "persistent cache set");
            self.store.cache_put(key, value, ttl).await
        };
        if let Err(e) = result {
            warn!(key, error = %e, "failed to persist cache entry");
        }
    }
}

impl Cache for StoreCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            match self.store.cached(key).await? {
                CachedValue::Text(text) => Some(text),
                CachedValue::List(_) => None,
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BoxFuture<'a, ()> {
        Box::pin(self.put(key, CachedValue::Text(value), ttl))
    }

    fn get_list<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Vec<String>>> {
        Box::pin(async move {
            match self.store.cached(key).await? {
                CachedValue::List(values) => Some(values),
                CachedValue::Text(_) => None,
            }
        })
    }

    fn set_list<'a>(
        &'a self,
        key: &'a str,
        values: Vec<String>,
        ttl: Duration,
    ) -> BoxFuture<'a, ()> {
        Box::pin(self.put(key, CachedValue::List(values), ttl))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = self.store.cache_remove(key).await {
                warn!(key, error = %e, "failed to remove cache entry");
            }
        })
    }
}
