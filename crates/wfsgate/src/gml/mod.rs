//! GML → GeoJSON translation.
//!
//! The response text is parsed once into a [`tree::Element`] tree, then
//! converted into the typed GeoJSON model. OWS exception reports are
//! recognized and surfaced as [`GmlError::Exception`]; a body that is already
//! JSON is accepted as GeoJSON.

pub mod feature;
pub mod geometry;
pub mod tree;

use thiserror::Error;

use crate::error::ServiceError;
use crate::geojson::FeatureCollection;

pub use feature::{translate_collection, translate_feature};
pub use geometry::{is_epsg_4326, translate_geometry, CrsContext};
pub use tree::{parse_document, Element};

/// Translation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GmlError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("empty document")]
    Empty,

    #[error("document nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("invalid GeoJSON: {0}")]
    Json(String),

    /// The upstream answered with an OWS / WFS exception report.
    #[error("upstream exception {code:?}: {text}")]
    Exception { code: Option<String>, text: String },
}

impl GmlError {
    /// `true` when an exception report complains about the output format,
    /// which is worth one retry with the fallback format.
    pub fn mentions_output_format(&self) -> bool {
        match self {
            GmlError::Exception { code, text } => {
                let text = text.to_lowercase();
                let locator_hint = code
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case("InvalidFormat"));
                locator_hint || text.contains("outputformat") || text.contains("output format")
            }
            _ => false,
        }
    }
}

impl From<GmlError> for ServiceError {
    fn from(err: GmlError) -> Self {
        match err {
            GmlError::Exception { code, text } => {
                let mut error = ServiceError::upstream("Upstream WFS exception", 502)
                    .with_detail("exceptionText", text);
                if let Some(code) = code {
                    error = error.with_detail("exceptionCode", code);
                }
                error
            }
            _ => ServiceError::upstream("Failed to parse GML response", 502),
        }
    }
}

/// Translate an upstream GetFeature body into a FeatureCollection.
pub fn translate_response(body: &str) -> Result<FeatureCollection, GmlError> {
    let trimmed = body.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|e| GmlError::Json(e.to_string()));
    }

    let root = parse_document(trimmed)?;
    if let Some(exception) = exception_from(&root) {
        return Err(exception);
    }
    translate_collection(&root)
}

/// OWS 1.1 `ExceptionReport` or WFS 1.0 `ServiceExceptionReport`.
fn exception_from(root: &Element) -> Option<GmlError> {
    match root.local_name() {
        "ExceptionReport" => {
            let exception = root.child("Exception");
            let code = exception
                .and_then(|e| e.attr("exceptionCode"))
                .map(str::to_string);
            let text = exception
                .map(|e| {
                    e.children_named("ExceptionText")
                        .map(Element::text)
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .unwrap_or_default();
            Some(GmlError::Exception { code, text })
        }
        "ServiceExceptionReport" => {
            let exception = root.child("ServiceException");
            Some(GmlError::Exception {
                code: exception.and_then(|e| e.attr("code")).map(str::to_string),
                text: exception.map(|e| e.text().to_string()).unwrap_or_default(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson::Geometry;

    #[test]
    fn test_translate_point_response() {
        let fc = translate_response(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" numberMatched="1" numberReturned="1">
              <wfs:member>
                <app:poi gml:id="poi.1">
                  <app:name>Slottet</app:name>
                  <app:geom><gml:Point srsName="EPSG:4326"><gml:pos>59.3 18.0</gml:pos></gml:Point></app:geom>
                </app:poi>
              </wfs:member>
            </wfs:FeatureCollection>"#,
        )
        .unwrap();

        assert_eq!(fc.number_matched, Some(1));
        assert_eq!(
            fc.features[0].geometry,
            Some(Geometry::Point {
                coordinates: vec![18.0, 59.3]
            })
        );
    }

    #[test]
    fn test_exception_report() {
        let err = translate_response(
            r#"<ows:ExceptionReport version="2.0.0">
                 <ows:Exception exceptionCode="InvalidParameterValue" locator="outputFormat">
                   <ows:ExceptionText>Unknown outputFormat: application/gml+xml; version=3.2</ows:ExceptionText>
                 </ows:Exception>
               </ows:ExceptionReport>"#,
        )
        .unwrap_err();

        assert!(err.mentions_output_format());
        match err {
            GmlError::Exception { code, text } => {
                assert_eq!(code.as_deref(), Some("InvalidParameterValue"));
                assert!(text.starts_with("Unknown outputFormat"));
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[test]
    fn test_service_exception_report() {
        let err = translate_response(
            r#"<ServiceExceptionReport version="1.2.0"><ServiceException code="LayerNotDefined">Unknown type roads</ServiceException></ServiceExceptionReport>"#,
        )
        .unwrap_err();
        assert!(!err.mentions_output_format());
        let service: ServiceError = err.into();
        assert_eq!(service.status, 502);
        assert_eq!(service.details["exceptionCode"], "LayerNotDefined");
    }

    #[test]
    fn test_json_pass_through() {
        let fc = translate_response(
            r#"  {"type":"FeatureCollection","features":[{"type":"Feature","id":1,"geometry":null,"properties":{}}]}"#,
        )
        .unwrap();
        assert_eq!(fc.features[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_failure_maps_to_502() {
        let err = translate_response("<wfs:FeatureCollection><unclosed>").unwrap_err();
        let service: ServiceError = err.into();
        assert_eq!(service.status, 502);
        assert_eq!(service.message, "Failed to parse GML response");
    }
}
