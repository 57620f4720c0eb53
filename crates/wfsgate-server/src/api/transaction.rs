//! WFS-T transaction pass-through.

use axum::{
    body::{to_bytes, Body},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use wfsgate::{ServiceError, TransactionRequest};

use super::router::AppState;
use crate::error::ApiError;

const ROUTE: &str = "/wfst/{id}/transaction";

/// POST /wfst/{id}/transaction
pub async fn transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let max_bytes = state.gateway.config().max_transaction_bytes;
    let read_limit = usize::try_from(max_bytes.saturating_add(1)).unwrap_or(usize::MAX);
    let body = to_bytes(body, read_limit).await.map_err(|_| {
        state.reject(
            ROUTE,
            ServiceError::validation("Transaction body too large")
                .with_detail("maxBytes", max_bytes),
        )
    })?;

    let request = TransactionRequest {
        id,
        user: state.user(&headers),
        wash_content: state.wash_content,
        body,
    };
    let response = state
        .gateway
        .transaction(request)
        .await
        .map_err(|e| state.reject(ROUTE, e))?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    ))
}
