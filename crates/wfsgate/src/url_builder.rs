//! Version-correct WFS GetFeature URL construction.

use std::fmt;

use url::Url;

use crate::error::{Result, ServiceError};
use crate::validate::{is_internal_path, RequestValidator};

/// Supported WFS protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WfsVersion {
    V1_0_0,
    V1_1_0,
    V2_0_0,
    V2_0_2,
}

impl WfsVersion {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.0.0" => Some(Self::V1_0_0),
            "1.1.0" => Some(Self::V1_1_0),
            "2.0.0" => Some(Self::V2_0_0),
            "2.0.2" => Some(Self::V2_0_2),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_0_0 => "1.0.0",
            Self::V1_1_0 => "1.1.0",
            Self::V2_0_0 => "2.0.0",
            Self::V2_0_2 => "2.0.2",
        }
    }

    pub fn is_v2(self) -> bool {
        matches!(self, Self::V2_0_0 | Self::V2_0_2)
    }

    /// Output format requested when the caller does not name one.
    pub fn default_output_format(self) -> &'static str {
        match self {
            Self::V1_0_0 => "GML2",
            Self::V1_1_0 => "text/xml; subtype=gml/3.1.1",
            Self::V2_0_0 | Self::V2_0_2 => "application/gml+xml; version=3.2",
        }
    }

    /// Alternate spelling tried when an upstream rejects the default format.
    pub fn fallback_output_format(self) -> &'static str {
        match self {
            Self::V1_0_0 => "text/xml; subtype=gml/2.1.2",
            Self::V1_1_0 => "GML3",
            Self::V2_0_0 | Self::V2_0_2 => "text/xml; subtype=gml/3.2",
        }
    }
}

impl fmt::Display for WfsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a GetFeature request.
#[derive(Debug, Clone)]
pub struct GetFeatureParams {
    /// Layer URL: absolute, or an internal path resolved against the base URL.
    pub base_url: String,
    pub version: WfsVersion,
    pub type_name: String,
    pub srs_name: Option<String>,
    pub bbox: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub output_format: Option<String>,
    /// XML filter, passed through verbatim.
    pub filter: Option<String>,
    /// CQL filter, passed through verbatim.
    pub cql_filter: Option<String>,
}

impl GetFeatureParams {
    pub fn new(
        base_url: impl Into<String>,
        version: WfsVersion,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            version,
            type_name: type_name.into(),
            srs_name: None,
            bbox: None,
            limit: None,
            offset: None,
            output_format: None,
            filter: None,
            cql_filter: None,
        }
    }
}

const OUTPUT_FORMAT_KEYS: [&str; 3] = ["outputFormat", "OUTPUTFORMAT", "outputformat"];

/// Keys owned by the builder; existing occurrences are dropped (case-insensitive).
const MANAGED_KEYS: &[&str] = &[
    "service",
    "request",
    "version",
    "typename",
    "typenames",
    "maxfeatures",
    "count",
    "startindex",
    "outputformat",
    "srsname",
    "bbox",
    "filter",
    "cql_filter",
];

/// Builds GetFeature URLs.
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    base_url: String,
    validator: RequestValidator,
    compat_params: bool,
}

impl UrlBuilder {
    pub fn new(
        base_url: impl Into<String>,
        validator: RequestValidator,
        compat_params: bool,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            validator,
            compat_params,
        }
    }

    /// Resolve `raw` to an absolute URL. Internal paths are joined onto the
    /// configured base; absolute URLs must pass the SSRF policy.
    pub fn resolve(&self, raw: &str) -> Result<Url> {
        if !self.validator.is_valid_url(raw, true) {
            return Err(ServiceError::validation("Invalid or unsafe WFS URL"));
        }
        let absolute = if is_internal_path(raw) {
            format!("{}{}", self.base_url.trim_end_matches('/'), raw)
        } else {
            raw.to_string()
        };
        Url::parse(&absolute).map_err(|_| ServiceError::validation("Invalid or unsafe WFS URL"))
    }

    pub fn build_get_feature_url(&self, params: &GetFeatureParams) -> Result<String> {
        let mut url = self.resolve(&params.base_url)?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !MANAGED_KEYS.contains(&k.to_lowercase().as_str()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let output_format = params
            .output_format
            .as_deref()
            .unwrap_or_else(|| params.version.default_output_format());

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));

            query.append_pair("SERVICE", "WFS");
            query.append_pair("REQUEST", "GetFeature");
            query.append_pair("VERSION", params.version.as_str());
            for key in OUTPUT_FORMAT_KEYS {
                query.append_pair(key, output_format);
            }

            let v2 = params.version.is_v2();
            if v2 || self.compat_params {
                query.append_pair("TYPENAMES", &params.type_name);
            }
            if !v2 || self.compat_params {
                query.append_pair("TYPENAME", &params.type_name);
            }

            if let Some(limit) = params.limit {
                let limit = limit.to_string();
                if v2 || self.compat_params {
                    query.append_pair("COUNT", &limit);
                }
                if !v2 || self.compat_params {
                    query.append_pair("MAXFEATURES", &limit);
                }
            }

            if let Some(offset) = params.offset {
                let key = if v2 || self.compat_params {
                    "startIndex"
                } else {
                    "STARTINDEX"
                };
                query.append_pair(key, &offset.to_string());
            }

            if let Some(srs) = &params.srs_name {
                query.append_pair("SRSNAME", srs);
            }

            if let Some(bbox) = &params.bbox {
                match &params.srs_name {
                    Some(srs) if bbox.split(',').count() == 4 => {
                        query.append_pair("BBOX", &format!("{bbox},{srs}"));
                    }
                    _ => {
                        query.append_pair("BBOX", bbox);
                    }
                }
            }

            if let Some(filter) = &params.filter {
                query.append_pair("FILTER", filter);
            }
            if let Some(cql) = &params.cql_filter {
                query.append_pair("CQL_FILTER", cql);
            }
        }

        Ok(url.into())
    }
}

/// Replace every output-format parameter variant in `url` with `format`.
pub fn rewrite_output_format(url: &str, format: &str) -> Result<String> {
    let mut parsed =
        Url::parse(url).map_err(|_| ServiceError::validation("Invalid or unsafe WFS URL"))?;

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            if k.eq_ignore_ascii_case("outputformat") {
                (k.into_owned(), format.to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();

    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    Ok(parsed.into())
}
