use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Body of `POST /api/query`. Unknown fields reject the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryRequest {
    pub lang: String,
    pub query: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub step: String,
    /// Opaque hint forwarded into the canonical cache key.
    pub normalize: bool,
}

impl QueryRequest {
    /// Both instants present makes this a range query.
    pub fn has_time_range(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    /// Parses `step` ("30s", "5m"). Empty means no step.
    pub fn step_duration(&self) -> Result<Duration, humantime::DurationError> {
        if self.step.is_empty() {
            return Ok(Duration::ZERO);
        }
        humantime::parse_duration(&self.step)
    }
}

/// Uniform response envelope; `result` is the upstream payload verbatim.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub lang: String,
    pub tenant: String,
    pub result: Box<RawValue>,
    pub stats: QueryStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryStats {
    pub backend: String,
    pub cached: bool,
    pub duration_ms: i64,
    pub cost: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_detection_requires_both_instants() {
        let mut req = QueryRequest {
            lang: "promql".to_string(),
            query: "up".to_string(),
            ..QueryRequest::default()
        };
        assert!(!req.has_time_range());
        req.start = Some(Utc::now());
        assert!(!req.has_time_range());
        req.end = Some(Utc::now());
        assert!(req.has_time_range());
    }

    #[test]
    fn step_parses_duration_strings() {
        let mut req = QueryRequest::default();
        assert_eq!(req.step_duration().expect("empty step"), Duration::ZERO);
        req.step = "30s".to_string();
        assert_eq!(req.step_duration().expect("30s"), Duration::from_secs(30));
        req.step = "5m".to_string();
        assert_eq!(req.step_duration().expect("5m"), Duration::from_secs(300));
        req.step = "bogus".to_string();
        assert!(req.step_duration().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<QueryRequest>(r#"{"lang":"promql","surprise":1}"#)
            .expect_err("unknown field");
        assert!(err.to_string().contains("surprise"));
    }
}
