//! Gateway façade: layer listing, GetFeature and transaction pass-through.
//!
//! Every operation validates its input before any network call, resolves
//! the layer through the registry, and returns a [`ServiceError`] for every
//! failure path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use wfsgate_telemetry::{log_upstream_error, MetricsRegistry};

use crate::access::AccessControl;
use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::error::{Result, ServiceError};
use crate::geojson::FeatureCollection;
use crate::gml::{self, GmlError};
use crate::http_client::{
    read_text_with_limit, UpstreamClient, UpstreamClientConfig, UpstreamRequest,
};
use crate::registry::{LayerRegistry, LayerSource, StoreState, WfstLayer};
use crate::url_builder::{rewrite_output_format, GetFeatureParams, UrlBuilder, WfsVersion};
use crate::validate::{is_valid_bbox, is_valid_id, RequestValidator};

/// Parameters of [`WfsGateway::list_layers`].
#[derive(Debug, Clone, Default)]
pub struct ListLayersParams {
    /// Keys to keep in each layer object. Empty means everything.
    pub fields: Vec<String>,
    pub user: Option<String>,
    /// Hide layers whose `visibleForGroups` does not include the user.
    pub wash_content: bool,
}

/// Result of [`WfsGateway::list_layers`].
#[derive(Debug, Clone, Serialize)]
pub struct LayerListing {
    pub count: usize,
    pub layers: Vec<Value>,
}

/// Parameters of [`WfsGateway::get_features`]. Paging values are raw query
/// strings; invalid ones are treated as unspecified.
#[derive(Debug, Clone, Default)]
pub struct GetFeaturesRequest {
    pub id: String,
    pub user: Option<String>,
    pub wash_content: bool,
    pub version: Option<String>,
    /// One or more comma-separated type names; defaults to all of the layer's.
    pub type_name: Option<String>,
    pub srs_name: Option<String>,
    pub bbox: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    /// XML filter when it starts with `<`, CQL otherwise.
    pub filter: Option<String>,
}

impl GetFeaturesRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Parameters of [`WfsGateway::transaction`].
#[derive(Debug, Clone, Default)]
pub struct TransactionRequest {
    pub id: String,
    pub user: Option<String>,
    pub wash_content: bool,
    pub body: Bytes,
}

/// Upstream answer to a transaction, passed back unchanged.
#[derive(Debug, Clone)]
pub struct TransactionResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// How an authenticated request is sent.
#[derive(Debug, Clone, Copy)]
enum Dispatch {
    /// Per-attempt fetch timeout with the retry schedule.
    Retry,
    /// A single attempt bounded by the given timeout.
    Once(Duration),
}

/// Failure of one GetFeature round trip. Translation errors are kept apart
/// so an output-format complaint can be retried.
enum FetchError {
    Service(ServiceError),
    Gml(GmlError),
}

impl From<ServiceError> for FetchError {
    fn from(err: ServiceError) -> Self {
        FetchError::Service(err)
    }
}

impl From<FetchError> for ServiceError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Service(err) => err,
            FetchError::Gml(err) => err.into(),
        }
    }
}

/// The WFS gateway.
pub struct WfsGateway {
    config: GatewayConfig,
    registry: LayerRegistry,
    validator: RequestValidator,
    url_builder: UrlBuilder,
    auth: Authenticator,
    client: UpstreamClient,
    access: Arc<dyn AccessControl>,
    metrics: Arc<MetricsRegistry>,
}

impl WfsGateway {
    pub fn new(
        config: GatewayConfig,
        source: Box<dyn LayerSource>,
        access: Arc<dyn AccessControl>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        let validator = RequestValidator::new(config.allowed_hosts.clone(), config.max_limit);
        let url_builder = UrlBuilder::new(
            config.base_url.clone(),
            validator.clone(),
            config.compat_params,
        );

        let client = UpstreamClient::new(
            UpstreamClientConfig {
                fetch_timeout: config.fetch_timeout,
                retry: config.retry.clone(),
                ..Default::default()
            },
            Arc::clone(&metrics),
        )?;
        let auth = Authenticator::new(
            config.auth.clone(),
            client.inner().clone(),
            config.fetch_timeout,
            Arc::clone(&metrics),
        );
        let registry = LayerRegistry::new(source, validator.clone(), Arc::clone(&metrics));

        Ok(Self {
            config,
            registry,
            validator,
            url_builder,
            auth,
            client,
            access,
            metrics,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    /// Layers visible to the caller, projected to the requested fields.
    pub async fn list_layers(&self, params: &ListLayersParams) -> Result<LayerListing> {
        let user = params.user.as_deref();

        let layers: Vec<Arc<WfstLayer>> = match self.registry.get_store().await {
            StoreState::Ready(store) if params.wash_content => {
                let groups = self.groups_of(user);
                store
                    .layers()
                    .iter()
                    .filter(|layer| layer.is_visible_to(&groups))
                    .cloned()
                    .collect()
            }
            StoreState::Ready(store) => store.layers().to_vec(),
            StoreState::Unavailable(_) if params.wash_content => self
                .registry
                .load_uncached()
                .await?
                .into_iter()
                .filter(|layer| self.is_member_of_any(user, layer))
                .collect(),
            StoreState::Unavailable(reason) => {
                return Err(
                    ServiceError::service("Layer store unavailable").with_detail("reason", reason)
                );
            }
        };

        let layers: Vec<Value> = layers
            .iter()
            .map(|layer| project(layer, &params.fields))
            .collect();
        Ok(LayerListing {
            count: layers.len(),
            layers,
        })
    }

    /// Fetch features of a layer from its upstream WFS as GeoJSON.
    pub async fn get_features(&self, request: GetFeaturesRequest) -> Result<FeatureCollection> {
        let layer =
            self.resolve_layer(&request.id, request.user.as_deref(), request.wash_content)
                .await?;

        let bbox = non_empty(request.bbox);
        if let Some(bbox) = &bbox {
            if !is_valid_bbox(bbox) {
                return Err(
                    ServiceError::validation("Invalid bbox").with_detail("bbox", bbox.as_str())
                );
            }
        }

        let limit = self
            .validator
            .validate_limit(request.limit.as_deref())
            .unwrap_or_else(|| self.config.default_limit.min(self.config.max_limit));
        let offset = self.validator.validate_offset(request.offset.as_deref());

        let version = match non_empty(request.version) {
            None => self.config.default_version,
            Some(raw) => WfsVersion::parse(&raw).ok_or_else(|| {
                ServiceError::validation("Unsupported WFS version").with_detail("version", raw)
            })?,
        };

        let type_name = type_names_for(&layer, request.type_name.as_deref())?;

        let mut params = GetFeatureParams::new(layer.url.clone(), version, type_name);
        params.srs_name = non_empty(request.srs_name);
        params.bbox = bbox;
        params.limit = Some(limit);
        params.offset = offset;
        match non_empty(request.filter) {
            Some(filter) if filter.trim_start().starts_with('<') => params.filter = Some(filter),
            Some(filter) => params.cql_filter = Some(filter),
            None => {}
        }

        let url = self.url_builder.build_get_feature_url(&params)?;

        let collection = match self.fetch_collection(&url).await {
            Err(FetchError::Gml(err)) if err.mentions_output_format() => {
                let fallback = version.fallback_output_format();
                tracing::info!(
                    layer_id = %layer.id,
                    output_format = fallback,
                    "upstream rejected output format, retrying with fallback"
                );
                let url = rewrite_output_format(&url, fallback)?;
                self.fetch_collection(&url).await?
            }
            other => other?,
        };

        self.metrics
            .record_features_returned(&layer.id, collection.features.len());
        Ok(collection)
    }

    /// Forward a WFS-T `Transaction` document to the layer's upstream.
    pub async fn transaction(&self, request: TransactionRequest) -> Result<TransactionResponse> {
        let layer =
            self.resolve_layer(&request.id, request.user.as_deref(), request.wash_content)
                .await?;

        let max_bytes = self.config.max_transaction_bytes;
        if request.body.len() as u64 > max_bytes {
            return Err(ServiceError::validation("Transaction body too large")
                .with_detail("maxBytes", max_bytes)
                .with_detail("size", request.body.len() as u64));
        }

        let text = std::str::from_utf8(&request.body)
            .map_err(|_| ServiceError::validation("Transaction body is not valid UTF-8"))?;
        let root = gml::parse_document(text).map_err(|e| {
            ServiceError::validation("Malformed transaction XML")
                .with_detail("reason", e.to_string())
        })?;
        if !root.is("Transaction") {
            return Err(ServiceError::validation("Expected a WFS Transaction document")
                .with_detail("root", root.name.as_str()));
        }

        let url = self.url_builder.resolve(&layer.url)?;
        let upstream = UpstreamRequest::post(url.as_str(), request.body, "transaction")
            .with_header("Content-Type", "text/xml");
        let timeout = self.config.transaction_timeout;
        let response = self.dispatch(upstream, Dispatch::Once(timeout)).await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/xml")
            .to_string();
        let body = self.read_body(response, timeout).await?;

        Ok(TransactionResponse {
            status,
            content_type,
            body,
        })
    }

    async fn resolve_layer(
        &self,
        id: &str,
        user: Option<&str>,
        wash: bool,
    ) -> Result<Arc<WfstLayer>> {
        if !is_valid_id(id) {
            return Err(ServiceError::validation("Invalid layer id").with_detail("id", id));
        }
        let layer = self.registry.lookup(id).await?;
        if wash && !layer.is_visible_to(&self.groups_of(user)) {
            return Err(ServiceError::not_found(format!("WFST layer '{id}' not found")));
        }
        Ok(layer)
    }

    fn groups_of(&self, user: Option<&str>) -> Vec<String> {
        match user {
            Some(user) if self.access.is_user_valid(user) => {
                self.access.group_membership_for_user(user)
            }
            _ => Vec::new(),
        }
    }

    fn is_member_of_any(&self, user: Option<&str>, layer: &WfstLayer) -> bool {
        match (&layer.visible_for_groups, user) {
            (None, _) => true,
            (Some(groups), Some(user)) => groups
                .iter()
                .any(|group| self.access.is_user_member_of(user, group)),
            (Some(_), None) => false,
        }
    }

    async fn fetch_collection(
        &self,
        url: &str,
    ) -> std::result::Result<FeatureCollection, FetchError> {
        let request = UpstreamRequest::get(url, "get_feature");
        let response = self.dispatch(request, Dispatch::Retry).await?;

        let status = response.status();
        if !status.is_success() {
            log_upstream_error!(
                operation = "get_feature",
                url = %url,
                status = status.as_u16(),
                "upstream WFS returned an error status"
            );
            // OWS servers often send their ExceptionReport with a 400
            if status != StatusCode::GATEWAY_TIMEOUT {
                if let Ok(body) = self.read_body(response, self.config.fetch_timeout).await {
                    if let Err(err @ GmlError::Exception { .. }) = gml::translate_response(&body) {
                        return Err(FetchError::Gml(err));
                    }
                }
            }
            let mapped = if status == StatusCode::GATEWAY_TIMEOUT { 504 } else { 502 };
            return Err(ServiceError::upstream(
                format!("Upstream WFS returned {}", status.as_u16()),
                mapped,
            )
            .with_detail("upstreamStatus", status.as_u16())
            .into());
        }

        let body = self.read_body(response, self.config.fetch_timeout).await?;
        gml::translate_response(&body).map_err(FetchError::Gml)
    }

    /// Send with auth headers. In OAuth2 mode a 401 drops the cached token
    /// and the request is sent once more with a fresh one.
    async fn dispatch(&self, request: UpstreamRequest, mode: Dispatch) -> Result<Response> {
        let headers = self.auth.headers().await?;
        let response = self
            .send(&request.clone().with_headers(headers), mode)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED || !self.auth.is_oauth2() {
            return Ok(response);
        }

        drop(response);
        self.auth.invalidate().await;
        let headers = self.auth.headers().await?;
        self.send(&request.with_headers(headers), mode).await
    }

    async fn send(&self, request: &UpstreamRequest, mode: Dispatch) -> Result<Response> {
        match mode {
            Dispatch::Retry => self.client.fetch_with_retry(request).await,
            Dispatch::Once(timeout) => self.client.fetch_with_timeout(request, timeout).await,
        }
    }

    async fn read_body(&self, response: Response, timeout: Duration) -> Result<String> {
        tokio::time::timeout(
            timeout,
            read_text_with_limit(response, self.config.max_response_bytes),
        )
        .await
        .map_err(|_| {
            ServiceError::upstream("Request timeout", 504)
                .with_detail("timeoutMs", timeout.as_millis() as u64)
        })?
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Requested type names, each of which must belong to the layer.
fn type_names_for(layer: &WfstLayer, requested: Option<&str>) -> Result<String> {
    let requested: Vec<&str> = requested
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    if requested.is_empty() {
        if layer.layers.is_empty() {
            return Err(ServiceError::validation("typeName is required")
                .with_detail("layerId", layer.id.as_str()));
        }
        return Ok(layer.layers.join(","));
    }

    if let Some(unknown) = requested.iter().find(|name| !layer.serves(name)) {
        return Err(ServiceError::validation("Type name not served by this layer")
            .with_detail("typeName", *unknown));
    }
    Ok(requested.join(","))
}

/// Copy of the layer with only the requested keys; the full object when no
/// requested key is known.
fn project(layer: &WfstLayer, fields: &[String]) -> Value {
    let full = layer.to_json();
    let Value::Object(object) = &full else {
        return full;
    };

    let selected: Map<String, Value> = fields
        .iter()
        .filter_map(|field| {
            object
                .get(field.as_str())
                .map(|value| (field.clone(), value.clone()))
        })
        .collect();

    if selected.is_empty() {
        full
    } else {
        Value::Object(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AnonymousAccess, StaticAccessControl};
    use crate::config::{AuthConfig, OAuth2Config, RetryPolicy};
    use crate::geojson::Geometry;
    use crate::registry::FileLayerSource;
    use std::io::Write;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STORE: &str = r#"{
        "wfstlayers": [
            {"id": "roads", "url": "/wfs", "caption": "Roads", "layers": ["app:roads", "app:bridges"]},
            {"id": "parcels", "url": "/wfs?map=parcels", "caption": "Parcels",
             "layers": ["app:parcels"], "visibleForGroups": ["planners"], "owner": "lantmateriet"}
        ]
    }"#;

    const GML: &str = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" xmlns:gml="http://www.opengis.net/gml" numberOfFeatures="1">
        <gml:featureMember>
          <app:roads gml:id="roads.1">
            <app:name>Main St</app:name>
            <app:geom><gml:Point srsName="EPSG:4326"><gml:pos>59.3 18.0</gml:pos></gml:Point></app:geom>
          </app:roads>
        </gml:featureMember>
      </wfs:FeatureCollection>"#;

    struct Fixture {
        gateway: WfsGateway,
        _store: tempfile::NamedTempFile,
    }

    fn fixture(server: &MockServer, configure: impl FnOnce(&mut GatewayConfig)) -> Fixture {
        fixture_with_access(server, Arc::new(AnonymousAccess), configure)
    }

    fn fixture_with_access(
        server: &MockServer,
        access: Arc<dyn AccessControl>,
        configure: impl FnOnce(&mut GatewayConfig),
    ) -> Fixture {
        let mut store = tempfile::NamedTempFile::new().unwrap();
        store.write_all(STORE.as_bytes()).unwrap();
        store.flush().unwrap();

        let mut config = GatewayConfig {
            base_url: server.uri(),
            retry: RetryPolicy {
                max_retries: 2,
                delays: vec![Duration::from_millis(10), Duration::from_millis(20)],
                fallback_delay: Duration::from_millis(20),
            },
            ..Default::default()
        };
        configure(&mut config);

        let gateway = WfsGateway::new(
            config,
            Box::new(FileLayerSource::new(store.path())),
            access,
            Arc::new(MetricsRegistry::new()),
        )
        .unwrap();
        Fixture {
            gateway,
            _store: store,
        }
    }

    fn planners() -> Arc<dyn AccessControl> {
        let json = r#"{"alice": ["planners"], "bob": ["editors"]}"#;
        Arc::new(StaticAccessControl::from_json_str(json).unwrap())
    }

    #[tokio::test]
    async fn test_get_features_translates_gml() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("SERVICE", "WFS"))
            .and(query_param("VERSION", "1.1.0"))
            .and(query_param("TYPENAME", "app:roads,app:bridges"))
            .and(query_param("MAXFEATURES", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(GML))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let fc = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap();

        assert_eq!(fc.features.len(), 1);
        assert_eq!(fc.number_returned, Some(1));
        assert_eq!(
            fc.features[0].geometry,
            Some(Geometry::Point {
                coordinates: vec![18.0, 59.3]
            })
        );
        assert_eq!(fc.features[0].properties["name"], "Main St");
    }

    #[tokio::test]
    async fn test_get_features_query_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("VERSION", "2.0.0"))
            .and(query_param("TYPENAMES", "app:bridges"))
            .and(query_param("COUNT", "50"))
            .and(query_param("startIndex", "100"))
            .and(query_param("SRSNAME", "EPSG:3006"))
            .and(query_param("BBOX", "0,0,10,10,EPSG:3006"))
            .and(query_param("CQL_FILTER", "name='Main St'"))
            .respond_with(ResponseTemplate::new(200).set_body_string(GML))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let request = GetFeaturesRequest {
            version: Some("2.0.0".into()),
            type_name: Some("app:bridges".into()),
            srs_name: Some("EPSG:3006".into()),
            bbox: Some("0,0,10,10".into()),
            limit: Some("50".into()),
            offset: Some("100".into()),
            filter: Some("name='Main St'".into()),
            ..GetFeaturesRequest::new("roads")
        };
        fx.gateway.get_features(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_xml_filter_goes_to_filter_param() {
        let server = MockServer::start().await;
        let filter = "<Filter><PropertyIsEqualTo><PropertyName>name</PropertyName><Literal>x</Literal></PropertyIsEqualTo></Filter>";
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("FILTER", filter))
            .respond_with(ResponseTemplate::new(200).set_body_string(GML))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let request = GetFeaturesRequest {
            filter: Some(filter.into()),
            ..GetFeaturesRequest::new("roads")
        };
        fx.gateway.get_features(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_upstream() {
        let server = MockServer::start().await;
        let fx = fixture(&server, |_| {});

        let err = fx
            .gateway
            .get_features(GetFeaturesRequest::new("../etc/passwd"))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let bad_bbox = GetFeaturesRequest {
            bbox: Some("10,0,0,10".into()),
            ..GetFeaturesRequest::new("roads")
        };
        assert!(fx.gateway.get_features(bad_bbox).await.unwrap_err().is_validation());

        let bad_type = GetFeaturesRequest {
            type_name: Some("app:parcels".into()),
            ..GetFeaturesRequest::new("roads")
        };
        assert!(fx.gateway.get_features(bad_type).await.unwrap_err().is_validation());

        let bad_version = GetFeaturesRequest {
            version: Some("3.0.0".into()),
            ..GetFeaturesRequest::new("roads")
        };
        assert!(fx.gateway.get_features(bad_version).await.unwrap_err().is_validation());

        let missing = fx
            .gateway
            .get_features(GetFeaturesRequest::new("nope"))
            .await
            .unwrap_err();
        assert!(missing.is_not_found());

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("TYPENAME", "app:roads"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("TYPENAME", "app:bridges"))
            .respond_with(ResponseTemplate::new(504))
            .expect(3)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let err = fx
            .gateway
            .get_features(GetFeaturesRequest {
                type_name: Some("app:roads".into()),
                ..GetFeaturesRequest::new("roads")
            })
            .await
            .unwrap_err();
        assert_eq!(err.status, 502);
        assert_eq!(err.details["upstreamStatus"], 500);

        let err = fx
            .gateway
            .get_features(GetFeaturesRequest {
                type_name: Some("app:bridges".into()),
                ..GetFeaturesRequest::new("roads")
            })
            .await
            .unwrap_err();
        assert_eq!(err.status, 504);
    }

    #[tokio::test]
    async fn test_unparseable_body_is_502() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<broken><xml>"))
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let err = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap_err();
        assert_eq!(err.status, 502);
        assert_eq!(err.message, "Failed to parse GML response");
    }

    #[tokio::test]
    async fn test_output_format_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("outputFormat", "text/xml; subtype=gml/3.1.1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ows:ExceptionReport><ows:Exception exceptionCode="InvalidParameterValue" locator="outputFormat"><ows:ExceptionText>Unsupported outputFormat</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("outputFormat", "GML3"))
            .and(query_param("OUTPUTFORMAT", "GML3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(GML))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let fc = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[tokio::test]
    async fn test_output_format_fallback_on_400_exception() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("outputFormat", "text/xml; subtype=gml/3.1.1"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"<ows:ExceptionReport><ows:Exception exceptionCode="InvalidParameterValue" locator="outputFormat"><ows:ExceptionText>Unsupported outputFormat</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(query_param("outputFormat", "GML3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(GML))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let fc = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[tokio::test]
    async fn test_400_exception_report_keeps_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"<ows:ExceptionReport><ows:Exception exceptionCode="InvalidParameterValue" locator="typeName"><ows:ExceptionText>Unknown type</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let err = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap_err();
        assert_eq!(err.status, 502);
        assert_eq!(err.message, "Upstream WFS exception");
        assert_eq!(err.details["exceptionCode"], "InvalidParameterValue");
        assert_eq!(err.details["exceptionText"], "Unknown type");
    }

    #[tokio::test]
    async fn test_other_exception_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ServiceExceptionReport><ServiceException code="LayerNotDefined">no such type</ServiceException></ServiceExceptionReport>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let err = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap_err();
        assert_eq!(err.status, 502);
        assert_eq!(err.message, "Upstream WFS exception");
        assert_eq!(err.details["exceptionCode"], "LayerNotDefined");
    }

    #[tokio::test]
    async fn test_oauth2_401_refreshes_token_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok"})),
            )
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(GML))
            .expect(1)
            .mount(&server)
            .await;

        let token_url = format!("{}/token", server.uri());
        let fx = fixture(&server, |config| {
            config.auth = AuthConfig::OAuth2(OAuth2Config {
                token_url,
                client_id: "gateway".into(),
                client_secret: "secret".into(),
                scope: None,
                fail_closed: false,
            });
        });
        let fc = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[tokio::test]
    async fn test_response_byte_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wfs"))
            .respond_with(ResponseTemplate::new(200).set_body_string(GML))
            .mount(&server)
            .await;

        let fx = fixture(&server, |config| config.max_response_bytes = 64);
        let err = fx
            .gateway
            .get_features(GetFeaturesRequest::new("roads"))
            .await
            .unwrap_err();
        assert_eq!(err.status, 413);
    }

    #[tokio::test]
    async fn test_washing_hides_restricted_layers() {
        let server = MockServer::start().await;
        let fx = fixture_with_access(&server, planners(), |_| {});

        let all = fx
            .gateway
            .list_layers(&ListLayersParams::default())
            .await
            .unwrap();
        assert_eq!(all.count, 2);

        let bob = fx
            .gateway
            .list_layers(&ListLayersParams {
                user: Some("bob".into()),
                wash_content: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(bob.count, 1);
        assert_eq!(bob.layers[0]["id"], "roads");

        let alice = fx
            .gateway
            .list_layers(&ListLayersParams {
                user: Some("alice".into()),
                wash_content: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alice.count, 2);

        let hidden = fx
            .gateway
            .get_features(GetFeaturesRequest {
                user: Some("bob".into()),
                wash_content: true,
                ..GetFeaturesRequest::new("parcels")
            })
            .await
            .unwrap_err();
        assert!(hidden.is_not_found());
    }

    #[tokio::test]
    async fn test_field_projection() {
        let server = MockServer::start().await;
        let fx = fixture(&server, |_| {});

        let listing = fx
            .gateway
            .list_layers(&ListLayersParams {
                fields: vec!["id".into(), "caption".into(), "owner".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listing.layers[0], serde_json::json!({"id": "roads", "caption": "Roads"}));
        assert_eq!(
            listing.layers[1],
            serde_json::json!({"id": "parcels", "caption": "Parcels", "owner": "lantmateriet"})
        );

        let unknown = fx
            .gateway
            .list_layers(&ListLayersParams {
                fields: vec!["nonexistent".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unknown.layers[0]["url"], "/wfs");
        assert_eq!(unknown.layers[0]["layers"][1], "app:bridges");
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let gateway = WfsGateway::new(
            GatewayConfig {
                base_url: server.uri(),
                ..Default::default()
            },
            Box::new(FileLayerSource::new(dir.path().join("missing.json"))),
            Arc::new(AnonymousAccess),
            Arc::new(MetricsRegistry::new()),
        )
        .unwrap();

        let err = gateway.list_layers(&ListLayersParams::default()).await.unwrap_err();
        assert_eq!(err.status, 500);

        let err = gateway
            .list_layers(&ListLayersParams {
                wash_content: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.status, 500);
    }

    #[tokio::test]
    async fn test_transaction_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wfs"))
            .and(header("Content-Type", "text/xml"))
            .and(body_string_contains("wfs:Insert"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<wfs:TransactionResponse><wfs:totalInserted>1</wfs:totalInserted></wfs:TransactionResponse>",
                    "application/xml",
                ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, |_| {});
        let response = fx
            .gateway
            .transaction(TransactionRequest {
                id: "roads".into(),
                body: Bytes::from_static(
                    br#"<wfs:Transaction service="WFS" version="1.1.0"><wfs:Insert><app:roads/></wfs:Insert></wfs:Transaction>"#,
                ),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/xml");
        assert!(response.body.contains("totalInserted"));
    }

    #[tokio::test]
    async fn test_transaction_rejected_before_network() {
        let server = MockServer::start().await;
        let fx = fixture(&server, |config| config.max_transaction_bytes = 64);

        let too_large = fx
            .gateway
            .transaction(TransactionRequest {
                id: "roads".into(),
                body: Bytes::from(format!("<wfs:Transaction>{}</wfs:Transaction>", "x".repeat(100))),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(too_large.is_validation());
        assert_eq!(too_large.details["maxBytes"], 64);

        let wrong_root = fx
            .gateway
            .transaction(TransactionRequest {
                id: "roads".into(),
                body: Bytes::from_static(b"<wfs:GetFeature/>"),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(wrong_root.is_validation());

        let malformed = fx
            .gateway
            .transaction(TransactionRequest {
                id: "roads".into(),
                body: Bytes::from_static(b"<wfs:Transaction>"),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(malformed.is_validation());

        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
