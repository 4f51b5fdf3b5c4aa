use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::store::{StateCode, StoreError};
pub use crate::types::api_error::{ApiErrorCode, ApiErrorResponse};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("state error: {message}")]
    State {
        code: ApiErrorCode,
        message: String,
    },

    #[error("capture failed: {message}")]
    CaptureFailed { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    fn into_response_parts(self) -> (StatusCode, ApiErrorCode, String) {
        match self {
            Self::Validation { message } => {
                (StatusCode::BAD_REQUEST, ApiErrorCode::Validation, message)
            }
            Self::Unauthorized { message } => (
                StatusCode::UNAUTHORIZED,
                ApiErrorCode::Unauthorized,
                message,
            ),
            Self::Forbidden { message } => {
                (StatusCode::FORBIDDEN, ApiErrorCode::Forbidden, message)
            }
            Self::NotFound { message } => (StatusCode::NOT_FOUND, ApiErrorCode::NotFound, message),
            Self::State { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::CaptureFailed { message } => (
                StatusCode::CONFLICT,
                ApiErrorCode::CaptureFailed,
                message,
            ),
            Self::Conflict { message } => (StatusCode::CONFLICT, ApiErrorCode::Conflict, message),
            Self::Db(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorCode::Database,
                "database error".to_string(),
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorCode::Internal,
                message,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.into_response_parts();
        (status, Json(ApiErrorResponse { code, message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Db(db) => Self::Db(db),
            StoreError::NotFound(message) => Self::NotFound { message },
            StoreError::Validation(message) => Self::Validation { message },
            StoreError::Forbidden(message) => Self::Forbidden { message },
            StoreError::State { code, message } => Self::State {
                code: state_code_to_api(code),
                message,
            },
            StoreError::CaptureFailed(message) => Self::CaptureFailed { message },
            StoreError::Payment(message) => Self::Internal { message },
            StoreError::Parse(message) => Self::Internal { message },
        }
    }
}

fn state_code_to_api(code: StateCode) -> ApiErrorCode {
    match code {
        StateCode::InvalidTransition => ApiErrorCode::InvalidTransition,
        StateCode::StatusDrift => ApiErrorCode::StatusDrift,
        StateCode::InvalidOtp => ApiErrorCode::InvalidOtp,
        StateCode::OwnedByOtherProvider => ApiErrorCode::OwnedByOtherProvider,
        StateCode::NotACandidate => ApiErrorCode::NotACandidate,
        StateCode::GraceExpired => ApiErrorCode::GraceExpired,
    }
}
