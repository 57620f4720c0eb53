//! GetFeature as GeoJSON.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use wfsgate::GetFeaturesRequest;

use super::extract::ApiQuery;
use super::router::AppState;
use crate::error::ApiError;

const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

/// Query string of the features endpoint. `maxFeatures` and `startIndex` are
/// accepted as aliases of `limit` and `offset`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesQuery {
    pub version: Option<String>,
    pub type_name: Option<String>,
    pub srs_name: Option<String>,
    pub bbox: Option<String>,
    pub limit: Option<String>,
    pub max_features: Option<String>,
    pub offset: Option<String>,
    pub start_index: Option<String>,
    pub filter: Option<String>,
}

/// GET /wfst/{id}/features
pub async fn get_features(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<FeaturesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = GetFeaturesRequest {
        id,
        user: state.user(&headers),
        wash_content: state.wash_content,
        version: query.version,
        type_name: query.type_name,
        srs_name: query.srs_name,
        bbox: query.bbox,
        limit: query.limit.or(query.max_features),
        offset: query.offset.or(query.start_index),
        filter: query.filter,
    };

    let collection = state
        .gateway
        .get_features(request)
        .await
        .map_err(|e| state.reject("/wfst/{id}/features", e))?;

    Ok((
        [(header::CONTENT_TYPE, GEOJSON_CONTENT_TYPE)],
        Json(collection),
    ))
}
