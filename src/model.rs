use crate::engine::feature::{features_from_collection, Feature, FeatureId};
use geojson::FeatureCollection;
use serde::Deserialize;

/// Capacity used for occupancy options when a venue does not report one
pub const DEFAULT_MAX_CAPACITY: f64 = 10000.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Venue {
    pub id: FeatureId,
    pub name: String,
    pub description: String,
    pub max_capacity: Option<f64>,
    pub location: Option<(f64, f64)>,
}

impl Venue {
    /// `None` for features without an id, which cannot be routed to
    pub fn from_feature(feature: &Feature) -> Option<Self> {
        Some(Self {
            id: feature.id.clone()?,
            name: feature.text("name").unwrap_or_default().to_string(),
            description: feature.text("description").unwrap_or_default().to_string(),
            max_capacity: feature.number("max_capacity"),
            location: feature.point(),
        })
    }

    pub fn capacity_or_default(&self) -> f64 {
        self.max_capacity.unwrap_or(DEFAULT_MAX_CAPACITY)
    }
}

/// The venue collection as fetched, kept whole for the map source and
/// indexed for the panel.
#[derive(Clone, Debug)]
pub struct Venues {
    pub collection: FeatureCollection,
    pub features: Vec<Feature>,
    pub list: Vec<Venue>,
}

impl Venues {
    pub fn new(collection: FeatureCollection) -> Self {
        let features = features_from_collection(&collection);
        let list = features.iter().filter_map(Venue::from_feature).collect();
        Self {
            collection,
            features,
            list,
        }
    }

    pub fn find(&self, id: &str) -> Option<&Venue> {
        self.list.iter().find(|v| v.id.as_str() == id)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EventType {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub occupancy_factor: f64,
}
