//! Geometry helpers: CRS handles, WKT in and out, polygon union and the
//! in-process relationship test.
//!
//! WKT is written in the host's mixed-case style
//! (`MultiPolygon (((0 0, 0 5, 5 5, 5 0, 0 0)))`) because generated filters
//! embed it verbatim and are compared as text.

use crate::error::{FilterError, FilterResult};
use geo::{BooleanOps, Centroid, Relate};
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use geoacl_config::SpatialRelationship;
use std::fmt;

/// Coordinate reference system, identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    pub srid: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { srid: 4326 };

    pub fn epsg(srid: u32) -> Self {
        Self { srid }
    }

    /// `EPSG:<srid>`
    pub fn auth_id(&self) -> String {
        format!("EPSG:{}", self.srid)
    }

    /// An SRID of zero means the host could not resolve the CRS.
    pub fn is_valid(&self) -> bool {
        self.srid != 0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.srid)
    }
}

/// Transforms geometries between coordinate reference systems.
pub trait Reprojector: Send + Sync {
    fn reproject(&self, geometry: Geometry<f64>, from: Crs, to: Crs) -> FilterResult<Geometry<f64>>;
}

/// Reprojector for hosts without a transformation engine: identical CRSs
/// pass through, anything else is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReprojection;

impl Reprojector for NoReprojection {
    fn reproject(
        &self,
        geometry: Geometry<f64>,
        from: Crs,
        to: Crs,
    ) -> FilterResult<Geometry<f64>> {
        if from == to {
            Ok(geometry)
        } else {
            Err(FilterError::Crs(format!(
                "no transformation available from {from} to {to}"
            )))
        }
    }
}

/// Parse a WKT string.
pub fn parse_wkt(text: &str) -> FilterResult<Geometry<f64>> {
    use std::str::FromStr;
    wkt::Wkt::from_str(text)
        .map_err(|e| FilterError::WktParse(format!("{:?}", e)))
        .and_then(|w| {
            w.try_into()
                .map_err(|e: wkt::conversion::Error| FilterError::WktParse(format!("{:?}", e)))
        })
}

/// Host-style WKT of a geometry.
pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    let mut out = String::new();
    write_geometry(&mut out, geometry);
    out
}

/// `SRID=<srid>;<wkt>`
pub fn to_ewkt(crs: Crs, geometry: &Geometry<f64>) -> String {
    format!("SRID={};{}", crs.srid, to_wkt(geometry))
}

fn number(value: f64) -> String {
    // -0 prints as "-0"
    if value == 0.0 {
        "0".to_string()
    } else {
        format!("{value}")
    }
}

fn write_coord(out: &mut String, coord: &Coord<f64>) {
    out.push_str(&number(coord.x));
    out.push(' ');
    out.push_str(&number(coord.y));
}

fn write_coords(out: &mut String, line: &LineString<f64>) {
    out.push('(');
    for (i, coord) in line.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, coord);
    }
    out.push(')');
}

fn write_rings(out: &mut String, polygon: &Polygon<f64>) {
    out.push('(');
    write_coords(out, polygon.exterior());
    for interior in polygon.interiors() {
        out.push(',');
        write_coords(out, interior);
    }
    out.push(')');
}

fn write_list<T>(out: &mut String, items: &[T], mut write: impl FnMut(&mut String, &T)) {
    out.push('(');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write(out, item);
    }
    out.push(')');
}

fn write_geometry(out: &mut String, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(Point(coord)) => {
            out.push_str("Point (");
            write_coord(out, coord);
            out.push(')');
        }
        Geometry::LineString(line) if line.0.is_empty() => out.push_str("LineString EMPTY"),
        Geometry::LineString(line) => {
            out.push_str("LineString ");
            write_coords(out, line);
        }
        Geometry::Polygon(polygon) if polygon.exterior().0.is_empty() => {
            out.push_str("Polygon EMPTY")
        }
        Geometry::Polygon(polygon) => {
            out.push_str("Polygon ");
            write_rings(out, polygon);
        }
        Geometry::MultiPoint(MultiPoint(points)) if points.is_empty() => {
            out.push_str("MultiPoint EMPTY")
        }
        Geometry::MultiPoint(MultiPoint(points)) => {
            out.push_str("MultiPoint ");
            write_list(out, points, |out, point| {
                out.push('(');
                write_coord(out, &point.0);
                out.push(')');
            });
        }
        Geometry::MultiLineString(MultiLineString(lines)) if lines.is_empty() => {
            out.push_str("MultiLineString EMPTY")
        }
        Geometry::MultiLineString(MultiLineString(lines)) => {
            out.push_str("MultiLineString ");
            write_list(out, lines, write_coords);
        }
        Geometry::MultiPolygon(MultiPolygon(polygons)) if polygons.is_empty() => {
            out.push_str("MultiPolygon EMPTY")
        }
        Geometry::MultiPolygon(MultiPolygon(polygons)) => {
            out.push_str("MultiPolygon ");
            write_list(out, polygons, write_rings);
        }
        Geometry::GeometryCollection(GeometryCollection(items)) if items.is_empty() => {
            out.push_str("GeometryCollection EMPTY")
        }
        Geometry::GeometryCollection(GeometryCollection(items)) => {
            out.push_str("GeometryCollection (");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_geometry(out, item);
            }
            out.push(')');
        }
        Geometry::Line(line) => {
            write_geometry(out, &Geometry::LineString(LineString::from(vec![line.start, line.end])))
        }
        Geometry::Rect(rect) => write_geometry(out, &Geometry::Polygon(rect.to_polygon())),
        Geometry::Triangle(triangle) => {
            write_geometry(out, &Geometry::Polygon(triangle.to_polygon()))
        }
    }
}

/// Polygonal parts of a geometry; `None` for non-polygonal input.
fn polygon_parts(geometry: &Geometry<f64>) -> Option<Vec<Polygon<f64>>> {
    match geometry {
        Geometry::Polygon(p) => Some(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => Some(mp.0.clone()),
        Geometry::Rect(r) => Some(vec![r.to_polygon()]),
        Geometry::Triangle(t) => Some(vec![t.to_polygon()]),
        Geometry::GeometryCollection(gc) => {
            let mut parts = Vec::new();
            for item in gc.iter() {
                parts.extend(polygon_parts(item)?);
            }
            Some(parts)
        }
        _ => None,
    }
}

/// Interiors of the two polygons share at least one point.
fn interiors_overlap(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    a.relate(b).matches("T********").unwrap_or(false)
}

/// Accumulates group polygons in scan order.
///
/// Parts that only touch or are disjoint stay separate members of the
/// result; parts whose interiors overlap are merged.
#[derive(Debug, Clone, Default)]
pub struct PolygonUnion {
    parts: Vec<Polygon<f64>>,
}

impl PolygonUnion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a geometry. Returns `false` when it has no polygonal part.
    pub fn add(&mut self, geometry: &Geometry<f64>) -> bool {
        let Some(parts) = polygon_parts(geometry) else {
            return false;
        };
        for polygon in parts {
            self.add_polygon(polygon);
        }
        true
    }

    fn add_polygon(&mut self, polygon: Polygon<f64>) {
        let overlapping: Vec<usize> = self
            .parts
            .iter()
            .enumerate()
            .filter(|(_, part)| interiors_overlap(part, &polygon))
            .map(|(i, _)| i)
            .collect();

        let Some(&first) = overlapping.first() else {
            self.parts.push(polygon);
            return;
        };

        let mut merged = MultiPolygon(vec![polygon]);
        for &i in overlapping.iter().rev() {
            let part = self.parts.remove(i);
            merged = MultiPolygon(vec![part]).union(&merged);
        }
        for (offset, part) in merged.0.into_iter().enumerate() {
            self.parts.insert(first + offset, part);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn into_multi_polygon(self) -> MultiPolygon<f64> {
        MultiPolygon(self.parts)
    }
}

/// Whether `relationship` holds between the group area and a feature.
///
/// With `use_centroid` the feature is reduced to its centroid first; a
/// feature without a centroid (empty geometry) never matches.
pub fn relationship_holds(
    relationship: SpatialRelationship,
    area: &Geometry<f64>,
    feature: &Geometry<f64>,
    use_centroid: bool,
) -> FilterResult<bool> {
    let centroid;
    let feature = if use_centroid {
        match feature.centroid() {
            Some(point) => {
                centroid = Geometry::Point(point);
                &centroid
            }
            None => return Ok(false),
        }
    } else {
        feature
    };

    let matrix = area.relate(feature);
    match relationship {
        SpatialRelationship::Intersects => Ok(matrix.is_intersects()),
        SpatialRelationship::Contains => Ok(matrix.is_contains()),
        SpatialRelationship::Unknown => Err(FilterError::Geometry(
            "unknown spatial relationship".to_string(),
        )),
    }
}
