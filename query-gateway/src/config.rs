use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration document. Every field is optional in the
/// source YAML; absent sections take the documented defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limiter: RateLimiterConfig,
    pub cache: CacheConfig,
    pub audit: AuditConfig,
    pub backends: BackendsConfig,
}

impl GatewayConfig {
    /// Loads configuration from `path`. A missing file yields defaults;
    /// an unreadable or malformed file is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("read config {}", path.display()))
            }
        };
        serde_yaml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwks_url: String,
    pub audience: Vec<String>,
    pub issuer: Option<String>,
    pub tenant_claim: String,
    pub user_claim: String,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    pub insecure_tls: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwks_url: String::new(),
            audience: Vec::new(),
            issuer: None,
            tenant_claim: "tenant".to_string(),
            user_claim: "sub".to_string(),
            cache_ttl: Duration::from_secs(3600),
            insecure_tls: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub requests_per_second: f64,
    /// Zero derives `2 * requests_per_second`, floored at 1.
    pub burst: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub redis_url: Option<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 10.0,
            burst: 20,
            window: Duration::from_secs(60),
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Sizing hint for the eviction bookkeeping.
    pub num_counters: u64,
    /// Total cost ceiling across all entries, in payload bytes.
    pub max_cost: u64,
    /// Accepted for compatibility; the store manages its own write buffering.
    pub buffer_items: u64,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            num_counters: 10_000,
            max_cost: 1 << 28,
            buffer_items: 64,
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Journal file path; absent means stdout.
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub openobserve: OpenObserveConfig,
    pub fallback: FallbackConfig,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenObserveConfig {
    pub base_url: String,
    pub org: String,
    pub api_key: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Endpoint templates; `%s` is replaced with the resolved org.
    pub prom_query_endpoint: String,
    pub prom_range_endpoint: String,
    pub log_search_endpoint: String,
    pub trace_search_endpoint: String,
    pub log_table: String,
    pub trace_table: String,
}

impl Default for OpenObserveConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5080".to_string(),
            org: "default".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            prom_query_endpoint: "/api/%s/promql/query".to_string(),
            prom_range_endpoint: "/api/%s/promql/query_range".to_string(),
            log_search_endpoint: "/api/%s/_search".to_string(),
            trace_search_endpoint: "/api/%s/traces".to_string(),
            log_table: "logs".to_string(),
            trace_table: "traces".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Empty endpoints take the Prometheus API defaults.
    pub query_endpoint: String,
    pub range_endpoint: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            query_endpoint: String::new(),
            range_endpoint: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub enabled: bool,
    pub dsn: String,
    pub max_connections: u32,
    /// One `$1` bind (tenant), three columns: org, log table, trace table.
    pub tenant_lookup_query: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dsn: String::new(),
            max_connections: 0,
            tenant_lookup_query: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.tenant_claim, "tenant");
        assert_eq!(config.auth.user_claim, "sub");
        assert_eq!(config.auth.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.rate_limiter.requests_per_second, 10.0);
        assert_eq!(config.rate_limiter.burst, 20);
        assert_eq!(config.rate_limiter.window, Duration::from_secs(60));
        assert_eq!(config.cache.max_cost, 1 << 28);
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert!(config.audit.enabled);
        assert_eq!(config.backends.openobserve.base_url, "http://localhost:5080");
        assert_eq!(config.backends.openobserve.org, "default");
        assert_eq!(
            config.backends.openobserve.prom_query_endpoint,
            "/api/%s/promql/query"
        );
        assert_eq!(
            config.backends.openobserve.prom_range_endpoint,
            "/api/%s/promql/query_range"
        );
        assert_eq!(config.backends.openobserve.log_search_endpoint, "/api/%s/_search");
        assert_eq!(config.backends.openobserve.trace_search_endpoint, "/api/%s/traces");
        assert!(!config.backends.fallback.enabled);
        assert!(!config.backends.metadata.enabled);
    }

    #[test]
    fn partial_document_overrides_defaults() {
        let raw = r#"
server:
  address: "127.0.0.1:9090"
auth:
  enabled: true
  jwks_url: "https://idp.example.test/jwks.json"
  audience: ["gateway"]
  cache_ttl: 5m
cache:
  enabled: true
  ttl: 30s
rate_limiter:
  enabled: true
  requests_per_second: 2.5
  burst: 0
"#;
        let config: GatewayConfig = serde_yaml::from_str(raw).expect("parse yaml");
        assert_eq!(config.server.address, "127.0.0.1:9090");
        assert!(config.auth.enabled);
        assert_eq!(config.auth.audience, vec!["gateway".to_string()]);
        assert_eq!(config.auth.cache_ttl, Duration::from_secs(300));
        // Untouched fields keep their defaults.
        assert_eq!(config.auth.tenant_claim, "tenant");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl, Duration::from_secs(30));
        assert_eq!(config.rate_limiter.requests_per_second, 2.5);
        assert_eq!(config.rate_limiter.burst, 0);
        assert_eq!(config.backends.openobserve.org, "default");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config =
            GatewayConfig::load(Path::new("/nonexistent/query-gateway.yaml")).expect("defaults");
        assert_eq!(config.server.address, "0.0.0.0:8080");
    }
}
