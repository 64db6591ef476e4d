use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::warn;

use common_audit::AuditEntry;

use crate::app_state::AppState;
use crate::cache::build_cache_key;
use crate::error::GatewayError;
use crate::query::{QueryRequest, QueryResponse, QueryStats};

/// `POST /api/query`: decode, authenticate, validate, admit, consult the
/// cache, dispatch, assemble. Every terminal branch funnels through the
/// single audit record below.
pub async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let mut audit = AuditEntry::default();

    let outcome = run_query(&state, &headers, &body, started, &mut audit).await;
    audit.duration_ms = duration_ms(started);

    let response = match outcome {
        Ok(payload) => json_response(StatusCode::OK, payload),
        Err(err) => {
            let message = err.to_string();
            audit.error = Some(message.clone());
            error_response(err.status(), &message)
        }
    };
    state.audit.record(audit);
    response
}

async fn run_query(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    started: Instant,
    audit: &mut AuditEntry,
) -> Result<Vec<u8>, GatewayError> {
    let mut req: QueryRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(err.to_string()))?;
    req.lang = req.lang.to_lowercase();
    audit.lang = req.lang.clone();
    audit.query = req.query.clone();

    if req.query.is_empty() {
        return Err(GatewayError::Validation("query is required".to_string()));
    }
    if req.step_duration().is_err() {
        return Err(GatewayError::Validation("invalid step duration".to_string()));
    }

    let identity = state.auth.verify(headers).await?;
    if identity.tenant.is_empty() {
        return Err(GatewayError::Validation("tenant is required".to_string()));
    }
    audit.tenant = identity.tenant.clone();
    audit.user = identity.user;
    let tenant = identity.tenant;

    validate(&req)?;

    state.limiter.allow(&tenant).await?;

    let cache_key = build_cache_key(&req, &tenant);
    if let Some(cached) = state.cache.get(&cache_key) {
        audit.cached = true;
        match serde_json::from_slice::<CachedEnvelope>(&cached) {
            Ok(envelope) => {
                audit.backend = envelope.stats.backend;
                audit.cost = envelope.stats.cost;
            }
            Err(_) => audit.backend = "cache".to_string(),
        }
        return Ok(cached.as_ref().clone());
    }

    let result = dispatch(state, &tenant, &req).await?;
    audit.backend = result.backend.to_string();
    audit.cost = result.cost;

    let raw = String::from_utf8(result.payload)
        .ok()
        .and_then(|payload| RawValue::from_string(payload).ok())
        .ok_or(GatewayError::MarshalResponse)?;
    let mut response = QueryResponse {
        lang: req.lang.clone(),
        tenant: tenant.clone(),
        result: raw,
        stats: QueryStats {
            backend: result.backend.to_string(),
            cached: false,
            duration_ms: duration_ms(started),
            cost: result.cost,
        },
    };
    let payload = serde_json::to_vec(&response).map_err(|_| GatewayError::MarshalResponse)?;

    // The stored copy flips cached=true so later hits replay it verbatim
    // with the original backend attribution, cost, and compute duration.
    response.stats.cached = true;
    match serde_json::to_vec(&response) {
        Ok(stored) => {
            let cost = stored.len() as i64;
            state.cache.set(cache_key, stored, cost);
        }
        Err(err) => warn!(%err, "failed to serialize cache copy"),
    }

    Ok(payload)
}

async fn dispatch(
    state: &AppState,
    tenant: &str,
    req: &QueryRequest,
) -> Result<crate::backend::BackendResult, GatewayError> {
    let result = match req.lang.as_str() {
        "promql" => state.backend.query_metrics(tenant, req).await,
        "logql" => state.backend.query_logs(tenant, req).await,
        "traceql" => state.backend.query_traces(tenant, req).await,
        other => {
            return Err(GatewayError::Validation(format!(
                "unsupported language: {other}"
            )))
        }
    };
    result.map_err(GatewayError::from)
}

/// Metric queries are valid with or without a range; log and trace
/// queries need an ordered one.
fn validate(req: &QueryRequest) -> Result<(), GatewayError> {
    match req.lang.as_str() {
        "promql" => Ok(()),
        "logql" | "traceql" => {
            if !req.has_time_range() {
                return Err(GatewayError::Validation(format!(
                    "{} requires start and end",
                    req.lang
                )));
            }
            if let (Some(start), Some(end)) = (req.start, req.end) {
                if start > end {
                    return Err(GatewayError::Validation(
                        "start must be before end".to_string(),
                    ));
                }
            }
            Ok(())
        }
        other => Err(GatewayError::Validation(format!(
            "unsupported language: {other}"
        ))),
    }
}

#[derive(Deserialize)]
struct CachedEnvelope {
    #[serde(default)]
    stats: QueryStats,
}

fn json_response(status: StatusCode, payload: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": message });
    let payload =
        serde_json::to_vec(&body).unwrap_or_else(|_| br#"{"error":"internal"}"#.to_vec());
    json_response(status, payload)
}

fn duration_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}
