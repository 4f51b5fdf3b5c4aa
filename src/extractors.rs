use axum::{
    Json, async_trait,
    body::Body,
    extract::{FromRequest, FromRequestParts, Path, Query, rejection::JsonRejection},
    http::{Request, request::Parts},
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::ApiError;

/// JSON body extractor for the booking API. Folds axum's rejection into the
/// standard validation envelope, keeping the serde field detail for data
/// errors (the case a booking client can actually act on) and replacing the
/// transport-level cases with shorter messages.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::validation(json_rejection_message(rejection)))?;
        Ok(ValidJson(value))
    }
}

fn json_rejection_message(rejection: JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "expected an application/json body".to_string()
        }
        JsonRejection::JsonSyntaxError(_) => "request body is not valid JSON".to_string(),
        other => other.body_text(),
    }
}

pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                ApiError::validation(format!("query string: {}", rejection.body_text()))
            })?;
        Ok(ValidQuery(value))
    }
}

/// Path extractor for the `/bookings/:id` family of routes. Every booking
/// route addresses the aggregate by UUID, so the parse lives here instead of
/// being repeated in each handler; a malformed id is a validation error, not
/// a 404.
pub struct BookingId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for BookingId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::validation("booking id is required"))?;

        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::validation("booking id must be a UUID"))?;
        Ok(BookingId(id))
    }
}
