use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidTransition,
    StatusDrift,
    InvalidOtp,
    OwnedByOtherProvider,
    NotACandidate,
    GraceExpired,
    CaptureFailed,
    Conflict,
    Database,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: ApiErrorCode,
    pub message: String,
}
