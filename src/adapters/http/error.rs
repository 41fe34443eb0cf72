//! Maps [`DomainError`] onto REST status codes so every handler can
//! just use `?` and let this conversion pick the right response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::domain::errors::DomainError;

pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DomainError::SprintNotFound(_) | DomainError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            DomainError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            DomainError::InvalidStateTransition { .. } | DomainError::MergeConflict { .. } => StatusCode::CONFLICT,
            DomainError::DependencyCycle(_) | DomainError::OverlappingFilesTouched { .. } | DomainError::CorruptPlan(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DomainError::GitFailed(_) | DomainError::AgentFailed(_) | DomainError::ForgeFailed(_) => StatusCode::BAD_GATEWAY,
            DomainError::InvariantViolated(_) | DomainError::Persistence(_) | DomainError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
