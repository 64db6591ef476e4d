use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the request journal. The sink assigns `time` when the
/// entry is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant: String,
    pub user: String,
    pub lang: String,
    pub query: String,
    pub cost: i64,
    pub duration_ms: i64,
    pub cached: bool,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

impl Default for AuditEntry {
    fn default() -> Self {
        Self {
            tenant: String::new(),
            user: String::new(),
            lang: String::new(),
            query: String::new(),
            cost: 0,
            duration_ms: 0,
            cached: false,
            backend: String::new(),
            error: None,
            time: DateTime::<Utc>::MIN_UTC,
        }
    }
}
