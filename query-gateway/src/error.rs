use axum::http::StatusCode;
use thiserror::Error;

use crate::backend::BackendError;
use crate::rate_limiter::LimitError;

/// Terminal request outcomes; each maps to exactly one status code and
/// one audit entry.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Auth(#[from] common_auth::AuthError),
    #[error("{0}")]
    Validation(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("rate limiter failure: {0}")]
    Limiter(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("marshal response failed")]
    MarshalResponse,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Limiter(_) | Self::MarshalResponse => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Backend(err) => {
                if err.is_unsupported() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
        }
    }
}

impl From<LimitError> for GatewayError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::RateLimited => Self::RateLimited,
            LimitError::Shared(message) => Self::Limiter(message),
        }
    }
}
