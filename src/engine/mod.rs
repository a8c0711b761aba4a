pub mod events;
pub mod expr;
pub mod feature;
pub mod geometry;
pub mod map;
pub mod projection;
pub mod render;
pub mod spatial;
pub mod style;

pub use events::{EventKind, ListenerId, MapEvent};
pub use expr::{Expr, Value};
pub use feature::{Feature, FeatureId, Shape};
pub use map::{Cursor, LoadRequest, LoadResponse, Map, MapError, MapOptions, Popup, SourceLoader};
pub use style::{Layer, LayerKind, MapStyle, PropertyKind, Source, SourceData};
