//! Extractors that reject with the gateway's JSON error body.

use axum::{
    extract::{FromRequestParts, MatchedPath, Query},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use wfsgate::ServiceError;

use super::router::AppState;
use crate::error::ApiError;

/// [`Query`] whose deserialization failures become a 400 validation error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<T> FromRequestParts<AppState> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => {
                let route = parts
                    .extensions
                    .get::<MatchedPath>()
                    .map(|path| path.as_str().to_string())
                    .unwrap_or_else(|| "unmatched".to_string());
                Err(state.reject(
                    &route,
                    ServiceError::validation("Invalid query string")
                        .with_detail("reason", rejection.body_text()),
                ))
            }
        }
    }
}
