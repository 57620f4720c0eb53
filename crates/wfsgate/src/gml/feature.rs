//! Feature and collection assembly.

use serde_json::{Map, Value};

use super::geometry::{is_geometry, translate_geometry, CrsContext};
use super::tree::Element;
use super::GmlError;
use crate::geojson::{Feature, FeatureCollection, Geometry};

/// How deep below a feature element geometries are searched for.
pub const MAX_GEOMETRY_DEPTH: usize = 10;

/// Assemble a FeatureCollection from a parsed WFS response root.
pub fn translate_collection(root: &Element) -> Result<FeatureCollection, GmlError> {
    let ctx = CrsContext::default().descend(root);

    let mut features = Vec::new();
    for element in feature_elements(root) {
        if let Some(feature) = translate_feature(element, &ctx)? {
            features.push(feature);
        }
    }

    let mut collection = FeatureCollection::new(features);
    collection.number_matched = root.attr("numberMatched").and_then(parse_count);
    collection.number_returned = root
        .attr("numberReturned")
        .or_else(|| root.attr("numberOfFeatures"))
        .and_then(parse_count);
    collection.time_stamp = root.attr("timeStamp").map(str::to_string);
    Ok(collection)
}

/// `"unknown"` and other non-numeric counters are dropped.
fn parse_count(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

/// Feature elements under `member` (WFS 2.0), else `featureMember`, else
/// `featureMembers`.
fn feature_elements(root: &Element) -> Vec<&Element> {
    for wrapper in ["member", "featureMember"] {
        let found: Vec<&Element> = root
            .children_named(wrapper)
            .filter_map(|member| member.children.first())
            .collect();
        if !found.is_empty() || root.child(wrapper).is_some() {
            return found;
        }
    }
    root.children_named("featureMembers")
        .flat_map(|members| members.children.iter())
        .collect()
}

/// Translate one feature element. `None` for members that carry nothing.
pub fn translate_feature(
    element: &Element,
    inherited: &CrsContext,
) -> Result<Option<Feature>, GmlError> {
    let ctx = inherited.descend(element);

    let mut geometries = Vec::new();
    collect_geometries(element, &ctx, 0, &mut geometries)?;
    let geometry = match geometries.len() {
        0 => None,
        1 => geometries.pop(),
        _ => Some(Geometry::GeometryCollection { geometries }),
    };

    let properties = properties_of(element);

    let id = element
        .attr("id")
        .or_else(|| element.attr("fid"))
        .map(str::to_string)
        .or_else(|| match properties.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        });

    if id.is_none() && geometry.is_none() && properties.is_empty() {
        return Ok(None);
    }
    Ok(Some(Feature::new(id, geometry, properties)))
}

/// Depth-first search for geometry elements; does not descend into a
/// geometry once found.
fn collect_geometries(
    element: &Element,
    ctx: &CrsContext,
    depth: usize,
    out: &mut Vec<Geometry>,
) -> Result<(), GmlError> {
    if depth >= MAX_GEOMETRY_DEPTH {
        return Ok(());
    }
    for child in &element.children {
        if is_geometry(child) {
            if let Some(geometry) = translate_geometry(child, ctx)? {
                out.push(geometry);
            }
        } else {
            collect_geometries(child, &ctx.descend(child), depth + 1, out)?;
        }
    }
    Ok(())
}

fn contains_geometry(element: &Element, depth: usize) -> bool {
    if is_geometry(element) {
        return true;
    }
    depth < MAX_GEOMETRY_DEPTH
        && element
            .children
            .iter()
            .any(|child| contains_geometry(child, depth + 1))
}

/// Non-geometry, non-`gml:` children keyed by local name; first occurrence wins.
fn properties_of(element: &Element) -> Map<String, Value> {
    let mut properties = Map::new();
    for child in &element.children {
        if child.prefix() == Some("gml") || contains_geometry(child, 0) {
            continue;
        }
        let key = child.local_name();
        if properties.contains_key(key) {
            continue;
        }
        properties.insert(key.to_string(), property_value(child));
    }
    properties
}

fn property_value(element: &Element) -> Value {
    if element
        .attr("nil")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    {
        return Value::Null;
    }
    if element.children.is_empty() {
        return Value::String(element.text().to_string());
    }
    Value::Object(properties_of(element))
}
