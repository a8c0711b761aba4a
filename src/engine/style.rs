use crate::braille::Rgb;
use crate::engine::expr::{EvalContext, Expr};
use crate::engine::feature::{features_from_collection, Feature};
use crate::engine::spatial::{FeatureGrid, DEFAULT_CELL_SIZE};
use geojson::FeatureCollection;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Base map palette
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MapStyle {
    #[default]
    Dark,
    Light,
}

impl MapStyle {
    pub fn background(self) -> Rgb {
        match self {
            MapStyle::Dark => Rgb(16, 18, 24),
            MapStyle::Light => Rgb(235, 235, 228),
        }
    }

    pub fn chrome(self) -> Rgb {
        match self {
            MapStyle::Dark => Rgb(90, 90, 100),
            MapStyle::Light => Rgb(120, 120, 120),
        }
    }
}

/// What a `set_data` call points a GeoJSON source at
#[derive(Clone, Debug, PartialEq)]
pub enum SourceData {
    Empty,
    Features(FeatureCollection),
    /// Fetched asynchronously through the map's loader
    Url(String),
}

/// A GeoJSON source: the features currently shown plus the state of the
/// most recent URL request.
#[derive(Debug)]
pub struct Source {
    features: Vec<Feature>,
    grid: FeatureGrid,
    /// Bumped on every `set_data`; responses for older generations are dropped
    pub(crate) generation: u64,
    pub(crate) url: Option<String>,
    pub(crate) loading: bool,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            features: Vec::new(),
            grid: FeatureGrid::new(DEFAULT_CELL_SIZE),
            generation: 0,
            url: None,
            loading: false,
        }
    }
}

impl Source {
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub(crate) fn replace(&mut self, features: Vec<Feature>) {
        self.grid = FeatureGrid::build(features.iter().map(Feature::bbox), DEFAULT_CELL_SIZE);
        self.features = features;
    }

    pub(crate) fn replace_with_collection(&mut self, fc: &FeatureCollection) {
        self.replace(features_from_collection(fc));
    }

    /// Indices of features that may lie within `radius` degrees of a point
    pub(crate) fn candidates(&self, lon: f64, lat: f64, radius: f64) -> Vec<usize> {
        self.grid.query(lon, lat, radius)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Fill,
    Line,
    Symbol,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Layout,
    Paint,
}

/// A styled view over one source
#[derive(Clone, Debug)]
pub struct Layer {
    pub id: String,
    pub kind: LayerKind,
    pub source: String,
    layout: BTreeMap<String, Expr>,
    paint: BTreeMap<String, Expr>,
}

impl Layer {
    pub fn new(id: &str, kind: LayerKind, source: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            source: source.to_string(),
            layout: BTreeMap::new(),
            paint: BTreeMap::new(),
        }
    }

    pub fn layout(mut self, name: &str, value: Expr) -> Self {
        self.layout.insert(name.to_string(), value);
        self
    }

    pub fn paint(mut self, name: &str, value: Expr) -> Self {
        self.paint.insert(name.to_string(), value);
        self
    }

    pub fn property(&self, kind: PropertyKind, name: &str) -> Option<&Expr> {
        match kind {
            PropertyKind::Layout => self.layout.get(name),
            PropertyKind::Paint => self.paint.get(name),
        }
    }

    /// `None` removes the property so the renderer falls back to its default
    pub fn set_property(&mut self, kind: PropertyKind, name: &str, value: Option<Expr>) {
        let props = match kind {
            PropertyKind::Layout => &mut self.layout,
            PropertyKind::Paint => &mut self.paint,
        };
        match value {
            Some(v) => {
                props.insert(name.to_string(), v);
            }
            None => {
                props.remove(name);
            }
        }
    }

    pub fn number(&self, kind: PropertyKind, name: &str, ctx: &EvalContext, default: f64) -> f64 {
        self.property(kind, name)
            .and_then(|e| e.eval(ctx).as_number())
            .unwrap_or(default)
    }

    pub fn color(&self, kind: PropertyKind, name: &str, ctx: &EvalContext, default: Rgb) -> Rgb {
        self.property(kind, name)
            .and_then(|e| e.eval(ctx).as_color())
            .unwrap_or(default)
    }
}
