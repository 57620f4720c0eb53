//! Layer listing.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use wfsgate::{LayerListing, ListLayersParams};

use super::extract::ApiQuery;
use super::router::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ListLayersQuery {
    /// Comma-separated field names.
    pub fields: Option<String>,
}

/// GET /wfst
pub async fn list_layers(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<ListLayersQuery>,
) -> Result<Json<LayerListing>, ApiError> {
    let fields = query
        .fields
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    let params = ListLayersParams {
        fields,
        user: state.user(&headers),
        wash_content: state.wash_content,
    };

    state
        .gateway
        .list_layers(&params)
        .await
        .map(Json)
        .map_err(|e| state.reject("/wfst", e))
}
