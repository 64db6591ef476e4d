use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use thiserror::Error;

use crate::config::RateLimiterConfig;

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("rate limiter failure: {0}")]
    Shared(String),
}

/// Second admission stage: a cluster-wide sliding window keyed by
/// tenant.
#[async_trait]
pub trait SharedWindow: Send + Sync {
    async fn admit(&self, tenant: &str, burst: u32, window: Duration) -> anyhow::Result<bool>;
}

/// Two-stage per-tenant admission: a local token bucket, then an
/// optional shared sliding window. The local stage rejects before the
/// shared store is touched.
pub struct RateLimiter {
    enabled: bool,
    rps: f64,
    burst: u32,
    window: Duration,
    local: Mutex<HashMap<String, Arc<TokenBucket>>>,
    shared: Option<Arc<dyn SharedWindow>>,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimiterConfig, shared: Option<Arc<dyn SharedWindow>>) -> Self {
        let mut burst = cfg.burst;
        if burst == 0 {
            burst = (cfg.requests_per_second * 2.0) as u32;
            if burst < 1 {
                burst = 1;
            }
        }
        let window = if cfg.window.is_zero() {
            Duration::from_secs(60)
        } else {
            cfg.window
        };
        Self {
            enabled: cfg.enabled,
            rps: cfg.requests_per_second,
            burst,
            window,
            local: Mutex::new(HashMap::new()),
            shared: if cfg.enabled { shared } else { None },
        }
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Admits or rejects the tenant's next request. Transport failures
    /// from the shared window surface as `Shared`, not as a rejection.
    pub async fn allow(&self, tenant: &str) -> Result<(), LimitError> {
        if !self.enabled || tenant.is_empty() {
            return Ok(());
        }
        if !self.bucket(tenant).allow() {
            return Err(LimitError::RateLimited);
        }
        if let Some(shared) = &self.shared {
            let admitted = shared
                .admit(tenant, self.burst, self.window)
                .await
                .map_err(|err| LimitError::Shared(err.to_string()))?;
            if !admitted {
                return Err(LimitError::RateLimited);
            }
        }
        Ok(())
    }

    fn bucket(&self, tenant: &str) -> Arc<TokenBucket> {
        let mut local = self.local.lock().expect("limiter lock poisoned");
        local
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.rps, self.burst)))
            .clone()
    }
}

/// Continuously refilled token bucket. A non-positive rate never
/// refills, so the initial `burst` tokens are all a tenant gets.
struct TokenBucket {
    rps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(rps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rps,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        let now = Instant::now();
        if self.rps > 0.0 {
            let elapsed = now.duration_since(state.last).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.rps).min(self.burst);
        }
        state.last = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

// ---------------- Redis sliding window ----------------

/// Atomic evict-count-record admission; times are epoch milliseconds.
const WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count >= limit then
  return 0
end
redis.call('ZADD', key, now, now)
redis.call('PEXPIRE', key, window)
return 1
"#;

pub struct RedisWindow {
    manager: ConnectionManager,
    script: redis::Script,
}

impl RedisWindow {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("create redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("connect redis")?;
        Ok(Self {
            manager,
            script: redis::Script::new(WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl SharedWindow for RedisWindow {
    async fn admit(&self, tenant: &str, burst: u32, window: Duration) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window.as_millis().max(1) as i64;
        let admitted: i64 = self
            .script
            .key(format!("rate:{tenant}"))
            .arg(now_ms)
            .arg(window_ms)
            .arg(i64::from(burst.max(1)))
            .invoke_async(&mut conn)
            .await?;
        Ok(admitted == 1)
    }
}

// ---------------- In-Memory window (single node / tests) ----------------

/// In-process window with the same semantics as the Redis script.
#[derive(Default)]
pub struct InMemoryWindow {
    entries: Mutex<HashMap<String, Vec<i64>>>,
}

#[async_trait]
impl SharedWindow for InMemoryWindow {
    async fn admit(&self, tenant: &str, burst: u32, window: Duration) -> anyhow::Result<bool> {
        let now = Utc::now().timestamp_millis();
        let horizon = now - window.as_millis().max(1) as i64;
        let mut entries = self.entries.lock().expect("window lock poisoned");
        let hits = entries.entry(tenant.to_string()).or_default();
        hits.retain(|&at| at > horizon);
        if hits.len() as u32 >= burst.max(1) {
            return Ok(false);
        }
        hits.push(now);
        Ok(true)
    }
}
