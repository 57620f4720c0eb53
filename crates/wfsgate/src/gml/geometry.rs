//! GML geometry → GeoJSON geometry.
//!
//! Handles GML 2 (`coordinates`, `outerBoundaryIs`) and GML 3 (`pos`,
//! `posList`, `exterior`) encodings. Axis order follows the nearest
//! `srsName`: EPSG:4326 is written lat/lon and gets swapped to lon/lat,
//! every other CRS is passed through.

use super::tree::Element;
use super::GmlError;
use crate::geojson::{Geometry, Position};

/// Geometry element names recognized by the dispatcher.
pub const GEOMETRY_TYPES: &[&str] = &[
    "Point",
    "LineString",
    "LinearRing",
    "Polygon",
    "MultiPoint",
    "MultiLineString",
    "MultiCurve",
    "MultiPolygon",
    "MultiSurface",
    "MultiGeometry",
    "GeometryCollection",
];

pub fn is_geometry(element: &Element) -> bool {
    GEOMETRY_TYPES.contains(&element.local_name())
}

/// CRS settings inherited from ancestors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrsContext {
    pub srs_name: Option<String>,
    pub srs_dimension: Option<usize>,
}

impl CrsContext {
    /// Context for `element`: its own attributes override the inherited ones.
    pub fn descend(&self, element: &Element) -> CrsContext {
        CrsContext {
            srs_name: element
                .attr("srsName")
                .map(str::to_string)
                .or_else(|| self.srs_name.clone()),
            srs_dimension: dimension_attr(element).or(self.srs_dimension),
        }
    }

    fn swap_axes(&self) -> bool {
        self.srs_name.as_deref().is_some_and(is_epsg_4326)
    }
}

fn dimension_attr(element: &Element) -> Option<usize> {
    element
        .attr("srsDimension")
        .or_else(|| element.attr("dimension"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|d| (2..=3).contains(d))
}

/// `true` for every common spelling of EPSG:4326: `EPSG:4326`,
/// `urn:ogc:def:crs:EPSG::4326`, `http://www.opengis.net/def/crs/EPSG/0/4326`
/// and `http://www.opengis.net/gml/srs/epsg.xml#4326`.
pub fn is_epsg_4326(srs: &str) -> bool {
    let srs = srs.trim();
    if !srs.to_ascii_lowercase().contains("epsg") {
        return false;
    }
    srs.rsplit([':', '/', '#'])
        .find(|segment| !segment.is_empty())
        .is_some_and(|code| code == "4326")
}

/// Translate a geometry element. `Ok(None)` for unknown elements and for
/// geometries without coordinates.
pub fn translate_geometry(
    element: &Element,
    inherited: &CrsContext,
) -> Result<Option<Geometry>, GmlError> {
    let ctx = inherited.descend(element);
    match element.local_name() {
        "Point" => Ok(point(element, &ctx)?.map(|coordinates| Geometry::Point { coordinates })),
        "LineString" => {
            let coordinates = positions(element, &ctx)?;
            Ok((!coordinates.is_empty()).then_some(Geometry::LineString { coordinates }))
        }
        "LinearRing" => Ok(ring(element, &ctx)?.map(|ring| Geometry::Polygon {
            coordinates: vec![ring],
        })),
        "Polygon" => {
            Ok(polygon(element, &ctx)?.map(|coordinates| Geometry::Polygon { coordinates }))
        }
        "MultiPoint" => multi(element, &ctx, MultiKind::Point),
        "MultiLineString" | "MultiCurve" => multi(element, &ctx, MultiKind::Line),
        "MultiPolygon" | "MultiSurface" => multi(element, &ctx, MultiKind::Polygon),
        "MultiGeometry" | "GeometryCollection" => multi(element, &ctx, MultiKind::Any),
        _ => Ok(None),
    }
}

fn point(element: &Element, ctx: &CrsContext) -> Result<Option<Position>, GmlError> {
    if let Some(pos) = element.child("pos") {
        let pos_ctx = ctx.descend(pos);
        let values = parse_numbers(pos.text())?;
        if values.is_empty() {
            return Ok(None);
        }
        if values.len() < 2 {
            return Err(GmlError::InvalidCoordinates(pos.text().to_string()));
        }
        let dim = pos_ctx.srs_dimension.unwrap_or(values.len()).min(values.len());
        return Ok(Some(orient(values[..dim].to_vec(), &pos_ctx)));
    }
    Ok(positions(element, ctx)?.into_iter().next())
}

/// Positions of a LineString, LinearRing or Point, whichever encoding is used.
fn positions(element: &Element, ctx: &CrsContext) -> Result<Vec<Position>, GmlError> {
    if let Some(list) = element.child("posList") {
        let list_ctx = ctx.descend(list);
        let dim = list_ctx.srs_dimension.unwrap_or(2);
        let values = parse_numbers(list.text())?;
        if values.len() % dim != 0 {
            return Err(GmlError::InvalidCoordinates(format!(
                "{} ordinates do not divide into {dim}-d positions",
                values.len()
            )));
        }
        return Ok(values
            .chunks(dim)
            .map(|chunk| orient(chunk.to_vec(), &list_ctx))
            .collect());
    }

    if let Some(coords) = element.child("coordinates") {
        return parse_coordinates(coords, ctx);
    }

    let mut out = Vec::new();
    for pos in element.children_named("pos") {
        if let Some(p) = point_from_pos(pos, ctx)? {
            out.push(p);
        }
    }
    for coord in element.children_named("coord") {
        out.push(parse_coord(coord, ctx)?);
    }
    Ok(out)
}

fn point_from_pos(pos: &Element, ctx: &CrsContext) -> Result<Option<Position>, GmlError> {
    let wrapper = Element {
        name: "Point".to_string(),
        children: vec![pos.clone()],
        ..Element::default()
    };
    point(&wrapper, ctx)
}

/// GML 2 `<coordinates>` honoring its `cs`, `ts` and `decimal` attributes.
fn parse_coordinates(coords: &Element, ctx: &CrsContext) -> Result<Vec<Position>, GmlError> {
    let cs = coords.attr("cs").unwrap_or(",");
    let ts = coords.attr("ts").unwrap_or(" ");
    let decimal = coords.attr("decimal").unwrap_or(".");

    let text = coords.text();
    let tuples: Vec<&str> = if ts.trim().is_empty() {
        text.split_whitespace().collect()
    } else {
        text.split(ts).map(str::trim).filter(|t| !t.is_empty()).collect()
    };

    tuples
        .into_iter()
        .map(|tuple| {
            let values = tuple
                .split(cs)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    let normalized = if decimal == "." {
                        v.to_string()
                    } else {
                        v.replace(decimal, ".")
                    };
                    parse_number(&normalized)
                })
                .collect::<Result<Vec<f64>, GmlError>>()?;
            if !(2..=3).contains(&values.len()) {
                return Err(GmlError::InvalidCoordinates(tuple.to_string()));
            }
            Ok(orient(values, ctx))
        })
        .collect()
}

/// GML 2 `<coord><X/><Y/>[<Z/>]</coord>`.
fn parse_coord(coord: &Element, ctx: &CrsContext) -> Result<Position, GmlError> {
    let axis = |name: &str| coord.child(name).map(|e| parse_number(e.text())).transpose();
    let x = axis("X")?.ok_or_else(|| GmlError::InvalidCoordinates("coord without X".into()))?;
    let y = axis("Y")?.ok_or_else(|| GmlError::InvalidCoordinates("coord without Y".into()))?;
    let mut position = vec![x, y];
    if let Some(z) = axis("Z")? {
        position.push(z);
    }
    Ok(orient(position, ctx))
}

fn parse_numbers(text: &str) -> Result<Vec<f64>, GmlError> {
    text.split_whitespace().map(parse_number).collect()
}

fn parse_number(raw: &str) -> Result<f64, GmlError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GmlError::InvalidCoordinates(raw.to_string()))
}

fn orient(mut position: Position, ctx: &CrsContext) -> Position {
    if ctx.swap_axes() && position.len() >= 2 {
        position.swap(0, 1);
    }
    position
}

/// Ring coordinates, force-closed.
fn ring(element: &Element, ctx: &CrsContext) -> Result<Option<Vec<Position>>, GmlError> {
    let mut coordinates = positions(element, ctx)?;
    if coordinates.is_empty() {
        return Ok(None);
    }
    if coordinates.first() != coordinates.last() {
        let first = coordinates[0].clone();
        coordinates.push(first);
    }
    Ok(Some(coordinates))
}

/// The LinearRing inside an `exterior`/`interior` wrapper.
fn boundary_ring(
    boundary: &Element,
    ctx: &CrsContext,
) -> Result<Option<Vec<Position>>, GmlError> {
    let boundary_ctx = ctx.descend(boundary);
    match boundary.child("LinearRing") {
        Some(linear) => ring(linear, &boundary_ctx.descend(linear)),
        None => Ok(None),
    }
}

fn polygon(element: &Element, ctx: &CrsContext) -> Result<Option<Vec<Vec<Position>>>, GmlError> {
    let exterior = element
        .child("exterior")
        .or_else(|| element.child("outerBoundaryIs"));
    let exterior = match exterior {
        Some(exterior) => exterior,
        None => return Ok(None),
    };
    let shell = match boundary_ring(exterior, ctx)? {
        Some(shell) => shell,
        None => return Ok(None),
    };

    let mut rings = vec![shell];
    for hole in element
        .children
        .iter()
        .filter(|c| c.is("interior") || c.is("innerBoundaryIs"))
    {
        if let Some(ring) = boundary_ring(hole, ctx)? {
            rings.push(ring);
        }
    }
    Ok(Some(rings))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultiKind {
    Point,
    Line,
    Polygon,
    Any,
}

/// Member geometries of a multi-geometry: children of every `*Member` and
/// `*Members` wrapper, translated recursively.
fn members(element: &Element, ctx: &CrsContext) -> Result<Vec<Geometry>, GmlError> {
    let mut out = Vec::new();
    for wrapper in element
        .children
        .iter()
        .filter(|c| c.local_name().ends_with("Member") || c.local_name().ends_with("Members"))
    {
        let wrapper_ctx = ctx.descend(wrapper);
        for inner in wrapper.children.iter().filter(|c| is_geometry(c)) {
            if let Some(geometry) = translate_geometry(inner, &wrapper_ctx)? {
                out.push(geometry);
            }
        }
    }
    Ok(out)
}

fn multi(
    element: &Element,
    ctx: &CrsContext,
    kind: MultiKind,
) -> Result<Option<Geometry>, GmlError> {
    let parts = members(element, ctx)?;
    if parts.is_empty() {
        return Ok(None);
    }

    let aggregated = match kind {
        MultiKind::Point => {
            collect_points(&parts).map(|coordinates| Geometry::MultiPoint { coordinates })
        }
        MultiKind::Line => {
            collect_lines(&parts).map(|coordinates| Geometry::MultiLineString { coordinates })
        }
        MultiKind::Polygon => {
            collect_polygons(&parts).map(|coordinates| Geometry::MultiPolygon { coordinates })
        }
        MultiKind::Any => None,
    };
    if aggregated.is_some() {
        return Ok(aggregated);
    }

    // Heterogeneous members (or MultiGeometry): a flattened collection.
    let mut geometries = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            Geometry::GeometryCollection { geometries: nested } => geometries.extend(nested),
            other => geometries.push(other),
        }
    }
    if geometries.len() == 1 {
        return Ok(geometries.pop());
    }
    Ok(Some(Geometry::GeometryCollection { geometries }))
}

fn collect_points(parts: &[Geometry]) -> Option<Vec<Position>> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Geometry::Point { coordinates } => out.push(coordinates.clone()),
            Geometry::MultiPoint { coordinates } => out.extend(coordinates.iter().cloned()),
            _ => return None,
        }
    }
    Some(out)
}

fn collect_lines(parts: &[Geometry]) -> Option<Vec<Vec<Position>>> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Geometry::LineString { coordinates } => out.push(coordinates.clone()),
            Geometry::MultiLineString { coordinates } => out.extend(coordinates.iter().cloned()),
            _ => return None,
        }
    }
    Some(out)
}

fn collect_polygons(parts: &[Geometry]) -> Option<Vec<Vec<Vec<Position>>>> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Geometry::Polygon { coordinates } => out.push(coordinates.clone()),
            Geometry::MultiPolygon { coordinates } => out.extend(coordinates.iter().cloned()),
            _ => return None,
        }
    }
    Some(out)
}
