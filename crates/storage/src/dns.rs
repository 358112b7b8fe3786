//! DNS resolution cache, grounded on the original proxy's `DNSResolver`.
//!
//! The cache is intentionally crude: a single timer periodically replaces
//! the whole map with an empty one. This is a full sweep, not a per-entry
//! TTL — an entry resolved a millisecond before the sweep gets exactly as
//! long to live as one resolved a millisecond after. The original names
//! the knob `setCacheTimeout`; we keep that behavior and call the knob
//! a "cache sweep interval" instead, since that's what it actually does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::error::StorageError;

type CacheKey = (String, String);

#[derive(Default)]
struct Cache {
    entries: HashMap<CacheKey, Vec<SocketAddr>>,
}

pub struct DnsCache {
    cache: Mutex<Cache>,
}

impl DnsCache {
    /// Construct the cache and spawn its sweep timer. The returned handle
    /// keeps the cache alive even if the sweep task is the only remaining
    /// owner; callers hold their own clone of the `Arc`.
    pub fn spawn(sweep_interval: Duration) -> Arc<Self> {
        let cache = Arc::new(DnsCache {
            cache: Mutex::new(Cache::default()),
        });
        let weak = Arc::downgrade(&cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => cache.sweep(),
                    None => return,
                }
            }
        });
        cache
    }

    fn sweep(&self) {
        let mut guard = self.cache.lock().unwrap();
        let dropped = guard.entries.len();
        guard.entries = HashMap::new();
        if dropped > 0 {
            debug!(dropped, "dns cache sweep");
        }
    }

    /// Resolve `(host, service)`, consulting the cache first. A cache miss
    /// resolves via the system resolver and populates the cache; a failed
    /// resolve is propagated and never cached, matching the original's
    /// "don't cache negative results" rule.
    pub async fn resolve(
        &self,
        host: &str,
        service: &str,
    ) -> Result<Vec<SocketAddr>, StorageError> {
        let key = (host.to_string(), service.to_string());
        if let Some(cached) = self.cache.lock().unwrap().entries.get(&key) {
            return Ok(cached.clone());
        }

        let query = format!("{host}:{service}");
        let resolved: Vec<SocketAddr> = tokio::net::lookup_host(&query)
            .await
            .map_err(|source| StorageError::Resolve {
                host: host.to_string(),
                service: service.to_string(),
                source,
            })?
            .collect();

        self.cache.lock().unwrap().entries.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Manually pin a resolution, bypassing the resolver. Used by tests and
    /// for static backend pinning.
    pub fn set_cached_resolution(&self, host: &str, service: &str, resolution: Vec<SocketAddr>) {
        self.cache
            .lock()
            .unwrap()
            .entries
            .insert((host.to_string(), service.to_string()), resolution);
    }

    pub fn clear_cached_resolution(&self, host: &str, service: &str) {
        self.cache
            .lock()
            .unwrap()
            .entries
            .remove(&(host.to_string(), service.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_pin_short_circuits_resolution() {
        let cache = DnsCache::spawn(Duration::from_secs(3600));
        let addr: SocketAddr = "127.0.0.1:5672".parse().unwrap();
        cache.set_cached_resolution("broker.local", "5672", vec![addr]);
        let resolved = cache.resolve("broker.local", "5672").await.unwrap();
        assert_eq!(resolved, vec![addr]);
    }

    #[tokio::test]
    async fn clear_forces_a_fresh_resolve() {
        let cache = DnsCache::spawn(Duration::from_secs(3600));
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        cache.set_cached_resolution("localhost", "1", vec![addr]);
        cache.clear_cached_resolution("localhost", "1");
        assert!(cache.cache.lock().unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn sweep_wipes_the_whole_map() {
        let cache = DnsCache::spawn(Duration::from_millis(20));
        let addr: SocketAddr = "127.0.0.1:5672".parse().unwrap();
        cache.set_cached_resolution("broker.local", "5672", vec![addr]);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.cache.lock().unwrap().entries.is_empty());
    }
}
