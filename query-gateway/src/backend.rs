//! Clients for the primary columnar backend and the Prometheus-compatible
//! metrics fallback. Metric queries go out as GET with epoch-second
//! parameters; log and trace queries are translated to SQL and POSTed to
//! the search API.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use serde_json::json;
use thiserror::Error;

use crate::config::{BackendsConfig, FallbackConfig, OpenObserveConfig};
use crate::metadata::{TenantCatalog, TenantMetadata};
use crate::query::QueryRequest;
use crate::translate::{translate_logql, translate_traceql, TranslateError};

const COST_HEADERS: [&str; 2] = ["X-Query-Cost", "X-O2-Query-Cost"];
const TENANT_HEADER: &str = "X-Tenant";

/// Raw upstream payload plus attribution and reported cost.
#[derive(Debug, Clone)]
pub struct BackendResult {
    pub payload: Vec<u8>,
    pub backend: &'static str,
    pub cost: i64,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The primary metrics store rejected the query as unsupported
    /// (400/404/501); the fallback path is authorized.
    #[error("{message}")]
    Unsupported { status: u16, message: String },
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("tenant metadata lookup failed: {0}")]
    Metadata(#[from] sqlx::Error),
    #[error("{0}")]
    Config(String),
}

impl BackendError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Dispatches metric, log, and trace queries. Fallback is reachable
/// only through an `Unsupported` outcome on the metrics path.
pub struct BackendClient {
    primary: SearchBackend,
    fallback: Option<PromFallback>,
    catalog: Option<TenantCatalog>,
    default_log_table: String,
    default_trace_table: String,
}

impl BackendClient {
    pub async fn connect(cfg: &BackendsConfig) -> anyhow::Result<Self> {
        let primary = SearchBackend::new(&cfg.openobserve)?;
        let fallback = if cfg.fallback.enabled {
            Some(PromFallback::new(&cfg.fallback)?)
        } else {
            None
        };
        let catalog = TenantCatalog::connect(&cfg.metadata).await?;

        Ok(Self {
            primary,
            fallback,
            catalog,
            default_log_table: non_empty_or(&cfg.openobserve.log_table, "logs"),
            default_trace_table: non_empty_or(&cfg.openobserve.trace_table, "traces"),
        })
    }

    pub async fn query_metrics(
        &self,
        tenant: &str,
        req: &QueryRequest,
    ) -> Result<BackendResult, BackendError> {
        let meta = self.resolve_metadata(tenant).await?;
        match self.primary.query_metrics(&meta.org, tenant, req).await {
            Ok(fetched) => Ok(fetched.into_result("metrics-primary")),
            Err(err) if err.is_unsupported() => match &self.fallback {
                Some(fallback) => Ok(fallback
                    .query_metrics(tenant, req)
                    .await?
                    .into_result("metrics-fallback")),
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    pub async fn query_logs(
        &self,
        tenant: &str,
        req: &QueryRequest,
    ) -> Result<BackendResult, BackendError> {
        let meta = self.resolve_metadata(tenant).await?;
        let sql = translate_logql(&req.query, &meta.log_table)?;
        let fetched = self
            .primary
            .search(&self.primary.log_search, &meta.org, tenant, &sql, req)
            .await?;
        Ok(fetched.into_result("logs-primary"))
    }

    pub async fn query_traces(
        &self,
        tenant: &str,
        req: &QueryRequest,
    ) -> Result<BackendResult, BackendError> {
        let meta = self.resolve_metadata(tenant).await?;
        let sql = translate_traceql(&req.query, &meta.trace_table)?;
        let fetched = self
            .primary
            .search(&self.primary.trace_search, &meta.org, tenant, &sql, req)
            .await?;
        Ok(fetched.into_result("traces-primary"))
    }

    /// Global defaults overlaid with whatever non-empty fields the
    /// catalog has for the tenant. A missing row is not an error.
    async fn resolve_metadata(&self, tenant: &str) -> Result<TenantMetadata, BackendError> {
        let mut meta = TenantMetadata {
            org: self.primary.org.clone(),
            log_table: self.default_log_table.clone(),
            trace_table: self.default_trace_table.clone(),
        };
        let Some(catalog) = &self.catalog else {
            return Ok(meta);
        };
        if let Some(row) = catalog.lookup(tenant).await? {
            if !row.org.is_empty() {
                meta.org = row.org;
            }
            if !row.log_table.is_empty() {
                meta.log_table = row.log_table;
            }
            if !row.trace_table.is_empty() {
                meta.trace_table = row.trace_table;
            }
        }
        Ok(meta)
    }
}

struct Fetched {
    payload: Vec<u8>,
    cost: i64,
}

impl Fetched {
    fn into_result(self, backend: &'static str) -> BackendResult {
        BackendResult {
            payload: self.payload,
            backend,
            cost: self.cost,
        }
    }
}

// ---- Primary columnar backend ----

struct SearchBackend {
    http: reqwest::Client,
    base_url: Url,
    org: String,
    api_key: String,
    prom_query: String,
    prom_range: String,
    log_search: String,
    trace_search: String,
}

impl SearchBackend {
    fn new(cfg: &OpenObserveConfig) -> anyhow::Result<Self> {
        if cfg.base_url.is_empty() {
            anyhow::bail!("openobserve base_url required");
        }
        let base_url = Url::parse(&cfg.base_url).context("parse openobserve base_url")?;
        let http = reqwest::Client::builder()
            .timeout(timeout_or_default(cfg.timeout))
            .build()
            .context("build openobserve client")?;
        Ok(Self {
            http,
            base_url,
            org: cfg.org.clone(),
            api_key: cfg.api_key.clone(),
            prom_query: cfg.prom_query_endpoint.clone(),
            prom_range: cfg.prom_range_endpoint.clone(),
            log_search: cfg.log_search_endpoint.clone(),
            trace_search: cfg.trace_search_endpoint.clone(),
        })
    }

    async fn query_metrics(
        &self,
        org: &str,
        tenant: &str,
        req: &QueryRequest,
    ) -> Result<Fetched, BackendError> {
        let is_range = req.has_time_range();
        let template = if is_range {
            &self.prom_range
        } else {
            &self.prom_query
        };
        if template.is_empty() {
            return Err(BackendError::Config("promql endpoint not configured".to_string()));
        }

        let mut url = self.resolve(template, org)?;
        append_metric_params(&mut url, req, is_range, true);

        let response = self.request(Method::GET, url, tenant).send().await?;
        let status = response.status().as_u16();
        let cost = parse_cost(response.headers());
        let body = response.bytes().await?;

        if status >= 400 {
            let message = String::from_utf8_lossy(&body).into_owned();
            if matches!(status, 400 | 404 | 501) {
                return Err(BackendError::Unsupported { status, message });
            }
            return Err(BackendError::Upstream(format!(
                "metrics backend error: {message}"
            )));
        }

        Ok(Fetched {
            payload: body.to_vec(),
            cost,
        })
    }

    /// POSTs a translated SQL search; shared by the log and trace paths.
    async fn search(
        &self,
        template: &str,
        org: &str,
        tenant: &str,
        sql: &str,
        req: &QueryRequest,
    ) -> Result<Fetched, BackendError> {
        let url = self.resolve(template, org)?;
        let body = json!({
            "sql": sql,
            "start": req.start,
            "end": req.end,
            "tenant": tenant,
        });

        let response = self
            .request(Method::POST, url, tenant)
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let cost = parse_cost(response.headers());
        let bytes = response.bytes().await?;

        if status >= 400 {
            return Err(BackendError::Upstream(format!(
                "search backend error: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        Ok(Fetched {
            payload: bytes.to_vec(),
            cost,
        })
    }

    fn request(&self, method: Method, url: Url, tenant: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        if !tenant.is_empty() {
            builder = builder.header(TENANT_HEADER, tenant);
        }
        builder
    }

    fn resolve(&self, template: &str, org: &str) -> Result<Url, BackendError> {
        let org = if org.is_empty() { &self.org } else { org };
        let endpoint = if template.contains("%s") {
            template.replacen("%s", org, 1)
        } else {
            template.to_string()
        };
        resolve_under(&self.base_url, &endpoint)
    }
}

// ---- Prometheus-compatible fallback ----

struct PromFallback {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    query_path: String,
    range_path: String,
}

impl PromFallback {
    fn new(cfg: &FallbackConfig) -> anyhow::Result<Self> {
        if cfg.base_url.is_empty() {
            anyhow::bail!("fallback base_url required");
        }
        let base_url = Url::parse(&cfg.base_url).context("parse fallback base_url")?;
        let http = reqwest::Client::builder()
            .timeout(timeout_or_default(cfg.timeout))
            .build()
            .context("build fallback client")?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            query_path: cfg.query_endpoint.clone(),
            range_path: cfg.range_endpoint.clone(),
        })
    }

    async fn query_metrics(
        &self,
        tenant: &str,
        req: &QueryRequest,
    ) -> Result<Fetched, BackendError> {
        let is_range = req.has_time_range();
        let template = if is_range {
            non_empty_or(&self.range_path, "/api/v1/query_range")
        } else {
            non_empty_or(&self.query_path, "/api/v1/query")
        };
        let mut url = resolve_under(&self.base_url, &template)?;
        append_metric_params(&mut url, req, is_range, false);

        let mut builder = self.http.get(url);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        if !tenant.is_empty() {
            builder = builder.header(TENANT_HEADER, tenant);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let cost = parse_cost(response.headers());
        let bytes = response.bytes().await?;

        if status >= 400 {
            return Err(BackendError::Upstream(format!(
                "fallback metrics error: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        Ok(Fetched {
            payload: bytes.to_vec(),
            cost,
        })
    }
}

// ---- Shared helpers ----

/// Instant queries carry `time=now` only toward the primary backend.
fn append_metric_params(url: &mut Url, req: &QueryRequest, is_range: bool, instant_time: bool) {
    let mut params = url.query_pairs_mut();
    params.append_pair("query", &req.query);
    if is_range {
        if let (Some(start), Some(end)) = (req.start, req.end) {
            params.append_pair("start", &epoch_seconds(start));
            params.append_pair("end", &epoch_seconds(end));
        }
        if let Ok(step) = req.step_duration() {
            if !step.is_zero() {
                params.append_pair("step", &format!("{}", step.as_secs_f64()));
            }
        }
    } else if instant_time {
        params.append_pair("time", &epoch_seconds(Utc::now()));
    }
}

fn resolve_under(base: &Url, endpoint: &str) -> Result<Url, BackendError> {
    if endpoint.starts_with("http") {
        return Url::parse(endpoint)
            .map_err(|err| BackendError::Config(format!("parse endpoint url: {err}")));
    }
    let mut url = base.clone();
    let path = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

fn epoch_seconds(at: DateTime<Utc>) -> String {
    let seconds = at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9;
    format!("{seconds}")
}

fn parse_cost(headers: &HeaderMap) -> i64 {
    COST_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(0)
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn timeout_or_default(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::from_secs(30)
    } else {
        timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    #[test]
    fn relative_endpoints_join_under_the_base_path() {
        let base = Url::parse("http://backend:5080/oo").expect("base url");
        let url = resolve_under(&base, "/api/acme/_search").expect("resolve");
        assert_eq!(url.as_str(), "http://backend:5080/oo/api/acme/_search");
    }

    #[test]
    fn absolute_endpoints_bypass_the_base() {
        let base = Url::parse("http://backend:5080").expect("base url");
        let url = resolve_under(&base, "https://other:9090/api/v1/query").expect("resolve");
        assert_eq!(url.as_str(), "https://other:9090/api/v1/query");
    }

    #[test]
    fn cost_header_parsing_prefers_primary_name() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Query-Cost", HeaderValue::from_static("42"));
        headers.insert("X-O2-Query-Cost", HeaderValue::from_static("7"));
        assert_eq!(parse_cost(&headers), 42);

        let mut headers = HeaderMap::new();
        headers.insert("X-O2-Query-Cost", HeaderValue::from_static("7"));
        assert_eq!(parse_cost(&headers), 7);

        let mut headers = HeaderMap::new();
        headers.insert("X-Query-Cost", HeaderValue::from_static("not-a-number"));
        assert_eq!(parse_cost(&headers), 0);

        assert_eq!(parse_cost(&HeaderMap::new()), 0);
    }

    #[test]
    fn epoch_seconds_renders_without_exponent() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(epoch_seconds(at), "1704067200");
        let at = at + chrono::Duration::milliseconds(500);
        assert_eq!(epoch_seconds(at), "1704067200.5");
    }

    #[test]
    fn range_requests_carry_start_end_step() {
        let mut url = Url::parse("http://backend/api/v1/query_range").expect("url");
        let req = QueryRequest {
            lang: "promql".to_string(),
            query: "up".to_string(),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).single(),
            step: "30s".to_string(),
            normalize: false,
        };
        append_metric_params(&mut url, &req, true, true);
        let query = url.query().expect("query string");
        assert!(query.contains("query=up"));
        assert!(query.contains("start=1704067200"));
        assert!(query.contains("end=1704067800"));
        assert!(query.contains("step=30"));
        assert!(!query.contains("time="));
    }

    #[test]
    fn instant_requests_carry_time_only_toward_primary() {
        let req = QueryRequest {
            lang: "promql".to_string(),
            query: "up".to_string(),
            ..QueryRequest::default()
        };

        let mut url = Url::parse("http://backend/q").expect("url");
        append_metric_params(&mut url, &req, false, true);
        assert!(url.query().expect("query string").contains("time="));

        let mut url = Url::parse("http://backend/q").expect("url");
        append_metric_params(&mut url, &req, false, false);
        assert!(!url.query().expect("query string").contains("time="));
    }
}
