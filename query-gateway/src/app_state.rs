use std::sync::Arc;

use common_audit::AuditSink;
use common_auth::Authenticator;

use crate::backend::BackendClient;
use crate::cache::ResponseCache;
use crate::rate_limiter::RateLimiter;

/// Shared service dependencies handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub backend: Arc<BackendClient>,
    pub audit: Arc<AuditSink>,
}
