use geojson::{feature::Id, FeatureCollection, JsonObject, JsonValue, Value};
use std::fmt;

/// Feature identifier normalized to its string form, so numeric ids from the
/// API and path segments from the route compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Id> for FeatureId {
    fn from(id: &Id) -> Self {
        match id {
            Id::String(s) => Self(s.clone()),
            Id::Number(n) => Self(n.to_string()),
        }
    }
}

/// Geometry flattened into lon/lat tuples
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Point((f64, f64)),
    Line(Vec<(f64, f64)>),
    /// Exterior ring first, holes after
    Polygon(Vec<Vec<(f64, f64)>>),
}

/// A source feature ready for styling, rendering and hit testing
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: Option<FeatureId>,
    pub properties: Option<JsonObject>,
    pub shapes: Vec<Shape>,
}

fn position(coords: &[f64]) -> Option<(f64, f64)> {
    match coords {
        [lon, lat, ..] => Some((*lon, *lat)),
        _ => None,
    }
}

fn ring(coords: &[Vec<f64>]) -> Vec<(f64, f64)> {
    coords.iter().filter_map(|c| position(c)).collect()
}

fn collect_shapes(value: &Value, shapes: &mut Vec<Shape>) {
    match value {
        Value::Point(c) => shapes.extend(position(c).map(Shape::Point)),
        Value::MultiPoint(points) => shapes.extend(points.iter().filter_map(|c| position(c)).map(Shape::Point)),
        Value::LineString(coords) => shapes.push(Shape::Line(ring(coords))),
        Value::MultiLineString(lines) => shapes.extend(lines.iter().map(|l| Shape::Line(ring(l)))),
        Value::Polygon(rings) => shapes.push(Shape::Polygon(rings.iter().map(|r| ring(r)).collect())),
        Value::MultiPolygon(polygons) => shapes.extend(
            polygons
                .iter()
                .map(|rings| Shape::Polygon(rings.iter().map(|r| ring(r)).collect())),
        ),
        Value::GeometryCollection(geometries) => {
            for g in geometries {
                collect_shapes(&g.value, shapes);
            }
        }
    }
}

impl Feature {
    pub fn from_geojson(feature: &geojson::Feature) -> Self {
        let mut shapes = Vec::new();
        if let Some(geometry) = &feature.geometry {
            collect_shapes(&geometry.value, &mut shapes);
        }
        Self {
            id: feature.id.as_ref().map(FeatureId::from),
            properties: feature.properties.clone(),
            shapes,
        }
    }

    pub fn property(&self, key: &str) -> Option<&JsonValue> {
        self.properties.as_ref()?.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.property(key)?.as_f64()
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.property(key)?.as_str()
    }

    /// First point geometry, used to pan to clicked markers
    pub fn point(&self) -> Option<(f64, f64)> {
        self.shapes.iter().find_map(|s| match s {
            Shape::Point(p) => Some(*p),
            _ => None,
        })
    }

    /// Lon/lat bounding box over every shape
    pub fn bbox(&self) -> Option<[f64; 4]> {
        let points = self.shapes.iter().flat_map(|shape| -> Box<dyn Iterator<Item = &(f64, f64)> + '_> {
            match shape {
                Shape::Point(p) => Box::new(std::iter::once(p)),
                Shape::Line(line) => Box::new(line.iter()),
                Shape::Polygon(rings) => Box::new(rings.iter().flatten()),
            }
        });
        crate::engine::geometry::bbox(points)
    }
}

pub fn features_from_collection(fc: &FeatureCollection) -> Vec<Feature> {
    fc.features.iter().map(Feature::from_geojson).collect()
}

/// Bounding box of a whole collection, `None` when nothing has geometry
pub fn collection_bbox(features: &[Feature]) -> Option<[f64; 4]> {
    features.iter().filter_map(Feature::bbox).reduce(|a, b| {
        [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])]
    })
}
