//! Core of the wfsgate WFS / WFS-T access gateway.
//!
//! Looks up layer definitions, builds versioned GetFeature requests, fetches
//! GML from upstream map servers under timeout, retry and byte-cap limits,
//! authenticates to those servers, and translates the result into GeoJSON.

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod geojson;
pub mod gml;
pub mod http_client;
pub mod registry;
mod service;
pub mod url_builder;
pub mod validate;

pub use access::{AccessControl, AccessError, AnonymousAccess, StaticAccessControl};
pub use auth::Authenticator;
pub use config::{AuthConfig, ConfigError, GatewayConfig, OAuth2Config, RetryPolicy};
pub use error::{ErrorKind, Result, ServiceError};
pub use geojson::{Feature, FeatureCollection, Geometry};
pub use gml::{translate_response, GmlError};
pub use http_client::{UpstreamClient, UpstreamClientConfig, UpstreamRequest};
pub use registry::{FileLayerSource, LayerRegistry, LayerSource, StoreState, WfstLayer};
pub use service::{
    GetFeaturesRequest, LayerListing, ListLayersParams, TransactionRequest, TransactionResponse,
    WfsGateway,
};
pub use url_builder::{GetFeatureParams, UrlBuilder, WfsVersion};
pub use validate::RequestValidator;
