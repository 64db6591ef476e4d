use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use moka::sync::Cache;

use crate::config::CacheConfig;
use crate::query::QueryRequest;

/// Entry stored per canonical key; the recorded cost drives weighted
/// eviction.
#[derive(Clone)]
struct CachedBody {
    bytes: Arc<Vec<u8>>,
    cost: u32,
}

/// Byte cache for serialized response envelopes. Disabled mode is a
/// no-op: every get misses and every set is dropped.
pub struct ResponseCache {
    store: Option<Cache<String, CachedBody>>,
}

impl ResponseCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        if !cfg.enabled {
            return Self { store: None };
        }
        let ttl = if cfg.ttl.is_zero() {
            Duration::from_secs(60)
        } else {
            cfg.ttl
        };
        let store = Cache::builder()
            .max_capacity(cfg.max_cost.max(1))
            .initial_capacity(cfg.num_counters.min(1 << 20) as usize)
            .weigher(|_key, body: &CachedBody| body.cost)
            .time_to_live(ttl)
            .build();
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.store.as_ref()?.get(key).map(|body| body.bytes)
    }

    /// Stores `bytes` under `key`. Non-positive cost falls back to the
    /// payload length.
    pub fn set(&self, key: String, bytes: Vec<u8>, cost: i64) {
        let Some(store) = &self.store else {
            return;
        };
        let cost = if cost <= 0 { bytes.len() as i64 } else { cost };
        let cost = u32::try_from(cost).unwrap_or(u32::MAX);
        store.insert(
            key,
            CachedBody {
                bytes: Arc::new(bytes),
                cost,
            },
        );
    }
}

/// Canonical key over `(lang, query, tenant, start, end, step,
/// normalize)`. NUL-joined so no component can collide with the
/// separator.
pub fn build_cache_key(req: &QueryRequest, tenant: &str) -> String {
    let mut parts = vec![req.lang.to_lowercase(), req.query.clone(), tenant.to_string()];
    if let Some(start) = req.start {
        parts.push(start.to_rfc3339_opts(SecondsFormat::Nanos, true));
    }
    if let Some(end) = req.end {
        parts.push(end.to_rfc3339_opts(SecondsFormat::Nanos, true));
    }
    if !req.step.is_empty() {
        parts.push(req.step.clone());
    }
    if req.normalize {
        parts.push("normalize=true".to_string());
    }
    parts.join("\0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn enabled_cache() -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            enabled: true,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn get_returns_stored_bytes_until_replaced() {
        let cache = enabled_cache();
        cache.set("key".to_string(), b"payload".to_vec(), 0);
        let hit = cache.get("key").expect("hit");
        assert_eq!(hit.as_slice(), b"payload");
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = ResponseCache::disabled();
        cache.set("key".to_string(), b"payload".to_vec(), 7);
        assert!(cache.get("key").is_none());
    }

    #[test]
    fn identical_canonical_requests_share_a_key() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let req = QueryRequest {
            lang: "PromQL".to_string(),
            query: "up".to_string(),
            start: Some(start),
            end: Some(end),
            step: "30s".to_string(),
            normalize: true,
        };
        let same = QueryRequest {
            lang: "promql".to_string(),
            ..req.clone()
        };
        assert_eq!(build_cache_key(&req, "acme"), build_cache_key(&same, "acme"));
    }

    #[test]
    fn key_distinguishes_every_canonical_field() {
        let base = QueryRequest {
            lang: "promql".to_string(),
            query: "up".to_string(),
            ..QueryRequest::default()
        };
        let key = build_cache_key(&base, "acme");

        assert_ne!(key, build_cache_key(&base, "globex"));

        let mut other = base.clone();
        other.step = "30s".to_string();
        assert_ne!(key, build_cache_key(&other, "acme"));

        let mut other = base.clone();
        other.normalize = true;
        assert_ne!(key, build_cache_key(&other, "acme"));

        let mut other = base.clone();
        other.start = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_ne!(key, build_cache_key(&other, "acme"));
    }
}
