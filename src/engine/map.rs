use crate::engine::events::{Callback, EventKind, ListenerId, Listeners, MapEvent};
use crate::engine::expr::{EvalContext, Expr};
use crate::engine::feature::{Feature, Shape};
use crate::engine::geometry::{distance_to_polyline, point_in_rings};
use crate::engine::projection::{Bounds, Viewport};
use crate::engine::render::{line_width_px, marker_radius};
use crate::engine::style::{Layer, LayerKind, MapStyle, PropertyKind, Source, SourceData};
use geojson::FeatureCollection;
use glam::DVec2;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Default duration of animated camera moves without an explicit duration
pub const DEFAULT_EASE: Duration = Duration::from_millis(500);

/// Construction options for a [`Map`]
#[derive(Clone, Debug)]
pub struct MapOptions {
    pub style: MapStyle,
    pub zoom: f64,
    pub center: (f64, f64),
    pub max_pitch: f64,
    /// Mirror the camera into the location hash
    pub hash: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            style: MapStyle::Dark,
            zoom: 10.0,
            center: (0.0, 0.0),
            max_pitch: 75.0,
            hash: true,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MapError {
    #[error("source \"{0}\" already exists")]
    DuplicateSource(String),
    #[error("layer \"{0}\" already exists")]
    DuplicateLayer(String),
    #[error("layer \"{layer}\" references missing source \"{source_id}\"")]
    MissingSource { layer: String, source_id: String },
}

/// A URL fetch requested by `set_data`
#[derive(Clone, Debug, PartialEq)]
pub struct LoadRequest {
    pub source: String,
    pub generation: u64,
    pub url: String,
}

#[derive(Debug)]
pub struct LoadResponse {
    pub source: String,
    pub generation: u64,
    pub result: Result<FeatureCollection, String>,
}

/// Fetches GeoJSON for URL-backed sources off the UI thread
pub trait SourceLoader {
    fn request(&mut self, request: LoadRequest);
    /// Completed loads since the last poll
    fn poll(&mut self) -> Vec<LoadResponse>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Popup {
    pub lnglat: (f64, f64),
    pub text: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cursor {
    #[default]
    Default,
    Pointer,
}

type Deferred = Box<dyn FnOnce(&mut Map)>;

#[derive(Clone, Copy, Debug)]
struct Camera {
    lon: f64,
    lat: f64,
    zoom: f64,
}

struct Animation {
    from: Camera,
    to: Camera,
    duration: Duration,
    elapsed: Duration,
}

fn ease(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// The map engine instance: sources, layers, camera, listeners and the
/// pointer state needed to emit layer-scoped mouse events.
pub struct Map {
    viewport: Viewport,
    options: MapOptions,
    sources: HashMap<String, Source>,
    layers: Vec<Layer>,
    listeners: Listeners,
    loader: Box<dyn SourceLoader>,
    waiting_for_source: Vec<(String, Deferred)>,
    next_tick: Vec<Deferred>,
    animation: Option<Animation>,
    gesture: bool,
    pointer: Option<(i32, i32)>,
    hovered_layers: HashSet<String>,
    popup: Option<Popup>,
    cursor: Cursor,
    dirty: bool,
}

impl Map {
    pub fn new(options: MapOptions, width: usize, height: usize, loader: Box<dyn SourceLoader>) -> Self {
        let (lon, lat) = options.center;
        Self {
            viewport: Viewport::new(lon, lat, options.zoom, width, height),
            options,
            sources: HashMap::new(),
            layers: Vec::new(),
            listeners: Listeners::default(),
            loader,
            waiting_for_source: Vec::new(),
            next_tick: Vec::new(),
            animation: None,
            gesture: false,
            pointer: None,
            hovered_layers: HashSet::new(),
            popup: None,
            cursor: Cursor::Default,
            dirty: true,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    /// Update the canvas size in braille pixels
    pub fn resize(&mut self, width: usize, height: usize) {
        self.viewport.width = width;
        self.viewport.height = height;
        self.dirty = true;
    }

    // ---- listeners ----

    pub fn on(&mut self, kind: EventKind, callback: impl FnMut(&mut Map, &MapEvent) + 'static) -> ListenerId {
        self.listeners.add(kind, None, false, Box::new(callback))
    }

    pub fn on_layer(
        &mut self,
        kind: EventKind,
        layer: &str,
        callback: impl FnMut(&mut Map, &MapEvent) + 'static,
    ) -> ListenerId {
        log::trace!("listen {:?} on layer {}", kind, layer);
        self.listeners.add(kind, Some(layer), false, Box::new(callback))
    }

    pub fn once(&mut self, kind: EventKind, callback: impl FnOnce(&mut Map, &MapEvent) + 'static) -> ListenerId {
        let mut slot = Some(callback);
        let wrapper: Callback = Box::new(move |map, event| {
            if let Some(cb) = slot.take() {
                cb(map, event);
            }
        });
        self.listeners.add(kind, None, true, wrapper)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self, kind: EventKind, layer: Option<&str>) -> usize {
        self.listeners.count(kind, layer)
    }

    pub fn fire(&mut self, event: &MapEvent) {
        for id in self.listeners.matching(event.kind, event.layer.as_deref()) {
            if let Some(mut callback) = self.listeners.take(id) {
                callback(self, event);
                self.listeners.restore(id, callback);
            }
        }
    }

    // ---- sources ----

    pub fn add_source(&mut self, id: &str, data: SourceData) -> Result<(), MapError> {
        if self.sources.contains_key(id) {
            return Err(MapError::DuplicateSource(id.to_string()));
        }
        self.sources.insert(id.to_string(), Source::default());
        self.set_data(id, data);

        // Commands that were waiting for this source run in the order they were queued
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiting_for_source)
            .into_iter()
            .partition(|(source, _)| source == id);
        self.waiting_for_source = waiting;
        for (_, command) in ready {
            command(self);
        }
        Ok(())
    }

    pub fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.get(id)
    }

    /// Replace a source's data. Returns false when the source does not exist.
    pub fn set_data(&mut self, id: &str, data: SourceData) -> bool {
        let Some(source) = self.sources.get_mut(id) else {
            return false;
        };
        source.generation += 1;
        self.dirty = true;
        match data {
            SourceData::Empty => {
                source.replace(Vec::new());
                source.url = None;
                source.loading = false;
            }
            SourceData::Features(fc) => {
                source.replace_with_collection(&fc);
                source.url = None;
                source.loading = false;
            }
            SourceData::Url(url) => {
                log::debug!("source {} loading {}", id, url);
                source.url = Some(url.clone());
                source.loading = true;
                let generation = source.generation;
                self.loader.request(LoadRequest {
                    source: id.to_string(),
                    generation,
                    url,
                });
                return true;
            }
        }
        self.fire(&MapEvent::source_data(id));
        true
    }

    /// Run `command` once the source exists: immediately if it already does,
    /// otherwise right after `add_source` creates it.
    pub fn when_source(&mut self, id: &str, command: impl FnOnce(&mut Map) + 'static) {
        if self.has_source(id) {
            command(self);
        } else {
            self.waiting_for_source.push((id.to_string(), Box::new(command)));
        }
    }

    pub fn pending_for_source(&self, id: &str) -> usize {
        self.waiting_for_source.iter().filter(|(s, _)| s == id).count()
    }

    // ---- layers ----

    pub fn add_layer(&mut self, layer: Layer) -> Result<(), MapError> {
        if self.has_layer(&layer.id) {
            return Err(MapError::DuplicateLayer(layer.id));
        }
        if !self.has_source(&layer.source) {
            return Err(MapError::MissingSource {
                layer: layer.id,
                source_id: layer.source,
            });
        }
        self.layers.push(layer);
        self.dirty = true;
        self.fire(&MapEvent::new(EventKind::StyleData));
        Ok(())
    }

    pub fn has_layer(&self, id: &str) -> bool {
        self.layers.iter().any(|l| l.id == id)
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Current value of a layout or paint property, `None` while the layer
    /// does not exist or the property was never set
    pub fn get_property(&self, layer: &str, kind: PropertyKind, name: &str) -> Option<Expr> {
        self.layer(layer)?.property(kind, name).cloned()
    }

    pub fn set_property(&mut self, layer: &str, kind: PropertyKind, name: &str, value: Option<Expr>) -> bool {
        let Some(target) = self.layers.iter_mut().find(|l| l.id == layer) else {
            return false;
        };
        target.set_property(kind, name, value);
        self.dirty = true;
        true
    }

    // ---- popup & cursor ----

    pub fn set_popup(&mut self, popup: Option<Popup>) {
        self.popup = popup;
    }

    pub fn popup(&self) -> Option<&Popup> {
        self.popup.as_ref()
    }

    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    // ---- camera ----

    fn camera(&self) -> Camera {
        Camera {
            lon: self.viewport.center_lon,
            lat: self.viewport.center_lat,
            zoom: self.viewport.zoom,
        }
    }

    fn apply_camera(&mut self, camera: Camera) {
        self.viewport.center_lon = camera.lon;
        self.viewport.center_lat = camera.lat;
        self.viewport.set_zoom(camera.zoom);
        self.dirty = true;
    }

    pub fn is_moving(&self) -> bool {
        self.animation.is_some() || self.gesture
    }

    /// Animate the camera to `center`/`zoom` over `duration`. Fires `movestart`
    /// now, `move` on every tick and `moveend` when the animation finishes.
    pub fn ease_to(&mut self, center: (f64, f64), zoom: f64, duration: Duration) {
        let was_moving = self.is_moving();
        let to = Camera {
            lon: center.0,
            lat: center.1,
            zoom,
        };
        if duration.is_zero() {
            self.animation = None;
            if !was_moving {
                self.fire(&MapEvent::new(EventKind::MoveStart));
            }
            self.apply_camera(to);
            self.fire(&MapEvent::new(EventKind::Move));
            if !self.gesture {
                self.fire(&MapEvent::new(EventKind::MoveEnd));
            }
            return;
        }
        self.animation = Some(Animation {
            from: self.camera(),
            to,
            duration,
            elapsed: Duration::ZERO,
        });
        if !was_moving {
            self.fire(&MapEvent::new(EventKind::MoveStart));
        }
    }

    pub fn pan_to(&mut self, center: (f64, f64), duration: Duration) {
        let zoom = self.viewport.zoom;
        self.ease_to(center, zoom, duration);
    }

    pub fn zoom_to(&mut self, zoom: f64) {
        let center = (self.viewport.center_lon, self.viewport.center_lat);
        self.ease_to(center, zoom, DEFAULT_EASE);
    }

    /// Move the camera so `bounds` is fully visible, never past `max_zoom`
    pub fn fit_bounds(&mut self, bounds: Bounds, max_zoom: f64) {
        let (lon, lat, zoom) = self.viewport.fitted(bounds, 0.0, max_zoom);
        self.ease_to((lon, lat), zoom, DEFAULT_EASE);
    }

    /// Start a user pan/zoom gesture (drag, keys, scroll)
    pub fn begin_gesture(&mut self) {
        if !self.is_moving() {
            self.fire(&MapEvent::new(EventKind::MoveStart));
        }
        self.animation = None;
        self.gesture = true;
    }

    pub fn end_gesture(&mut self) {
        if self.gesture {
            self.gesture = false;
            self.fire(&MapEvent::new(EventKind::MoveEnd));
        }
    }

    /// Pan by a pixel delta as part of a gesture
    pub fn pan_by(&mut self, dx: i32, dy: i32) {
        self.viewport.pan(dx, dy);
        self.dirty = true;
        self.fire(&MapEvent::new(EventKind::Move));
    }

    /// Zoom by `delta` levels around a pixel as part of a gesture
    pub fn zoom_by_at(&mut self, px: i32, py: i32, delta: f64) {
        self.viewport.zoom_at(px, py, delta);
        self.dirty = true;
        self.fire(&MapEvent::new(EventKind::Move));
    }

    pub fn set_pitch(&mut self, pitch: f64) {
        self.viewport.set_pitch(pitch, self.options.max_pitch);
        self.dirty = true;
    }

    /// Camera in `zoom/lat/lon[/bearing/pitch]` form
    pub fn url_hash(&self) -> String {
        self.viewport.to_hash()
    }

    pub fn apply_hash(&mut self, hash: &str) -> bool {
        let max_pitch = self.options.max_pitch;
        let applied = self.viewport.apply_hash(hash, max_pitch);
        if applied {
            self.dirty = true;
        }
        applied
    }

    // ---- pointer ----

    /// Features of `layer` under a pixel, topmost first
    pub fn query_rendered_features(&self, layer_id: &str, px: i32, py: i32) -> Vec<Feature> {
        let Some(layer) = self.layer(layer_id) else {
            return Vec::new();
        };
        let Some(source) = self.sources.get(&layer.source) else {
            return Vec::new();
        };
        let (lon, lat) = self.viewport.unproject(px, py);
        let pointer = DVec2::new(px as f64, py as f64);
        let zoom = self.viewport.zoom;

        // Pixel tolerance per layer kind, converted to degrees for the grid lookup
        let tolerance = |feature: &Feature| -> f64 {
            let ctx = EvalContext {
                zoom,
                feature: Some(feature),
            };
            match layer.kind {
                LayerKind::Fill => 0.0,
                LayerKind::Line => (line_width_px(layer.number(PropertyKind::Paint, "line-width", &ctx, 1.0)) as f64 / 2.0).max(2.0),
                LayerKind::Symbol => marker_radius(layer.number(PropertyKind::Layout, "icon-size", &ctx, 1.0)) as f64 + 2.0,
            }
        };
        let search_radius = self.viewport.degrees_per_pixel() * 2.0 * 12.0;

        let mut hits: Vec<Feature> = source
            .candidates(lon, lat, search_radius)
            .into_iter()
            .filter_map(|idx| source.features().get(idx))
            .filter(|feature| {
                let tol = tolerance(feature);
                feature.shapes.iter().any(|shape| match (layer.kind, shape) {
                    (LayerKind::Fill, Shape::Polygon(rings)) => point_in_rings((lon, lat), rings),
                    (LayerKind::Line, Shape::Line(line)) => self.pixel_distance(pointer, line) <= tol,
                    (LayerKind::Line, Shape::Polygon(rings)) => {
                        rings.iter().any(|ring| self.pixel_distance(pointer, ring) <= tol)
                    }
                    (LayerKind::Symbol, Shape::Point(p)) => {
                        let (x, y) = self.viewport.project_f64(p.0, p.1);
                        pointer.distance(DVec2::new(x, y)) <= tol
                    }
                    _ => false,
                })
            })
            .cloned()
            .collect();
        hits.reverse();
        hits
    }

    fn pixel_distance(&self, pointer: DVec2, line: &[(f64, f64)]) -> f64 {
        let projected: Vec<(f64, f64)> = line.iter().map(|&(lon, lat)| self.viewport.project_f64(lon, lat)).collect();
        distance_to_polyline(pointer, &projected)
    }

    /// Layers that have listeners for `kind`, bottom to top
    fn layers_listening(&self, kind: EventKind) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| self.listeners.count(kind, Some(&l.id)) > 0)
            .map(|l| l.id.clone())
            .collect()
    }

    pub fn pointer(&self) -> Option<(i32, i32)> {
        self.pointer
    }

    /// Pointer moved to a pixel: fires `mousemove` and layer `mouseenter`/`mouseleave`
    pub fn pointer_move(&mut self, px: i32, py: i32) {
        self.pointer = Some((px, py));
        let lnglat = self.viewport.unproject(px, py);
        let mut event = MapEvent::new(EventKind::MouseMove);
        event.lnglat = Some(lnglat);
        self.fire(&event);

        let mut layers = self.layers_listening(EventKind::MouseEnter);
        for layer in self.layers_listening(EventKind::MouseLeave) {
            if !layers.contains(&layer) {
                layers.push(layer);
            }
        }
        for layer in layers {
            let hits = self.query_rendered_features(&layer, px, py);
            let was_hovered = self.hovered_layers.contains(&layer);
            if !hits.is_empty() && !was_hovered {
                self.hovered_layers.insert(layer.clone());
                self.fire(&MapEvent::on_layer(EventKind::MouseEnter, &layer, hits, lnglat));
            } else if hits.is_empty() && was_hovered {
                self.hovered_layers.remove(&layer);
                self.fire(&MapEvent::on_layer(EventKind::MouseLeave, &layer, Vec::new(), lnglat));
            }
        }
    }

    /// Pointer left the map area
    pub fn pointer_leave(&mut self) {
        let lnglat = self
            .pointer
            .take()
            .map(|(px, py)| self.viewport.unproject(px, py))
            .unwrap_or((self.viewport.center_lon, self.viewport.center_lat));
        let mut hovered: Vec<String> = self.hovered_layers.drain().collect();
        hovered.sort();
        for layer in hovered {
            self.fire(&MapEvent::on_layer(EventKind::MouseLeave, &layer, Vec::new(), lnglat));
        }
    }

    /// Click at a pixel: fires `click` and a layer `click` for each layer with hits
    pub fn click(&mut self, px: i32, py: i32) {
        let lnglat = self.viewport.unproject(px, py);
        let mut event = MapEvent::new(EventKind::Click);
        event.lnglat = Some(lnglat);
        self.fire(&event);

        for layer in self.layers_listening(EventKind::Click) {
            let hits = self.query_rendered_features(&layer, px, py);
            if !hits.is_empty() {
                self.fire(&MapEvent::on_layer(EventKind::Click, &layer, hits, lnglat));
            }
        }
    }

    // ---- frame loop ----

    /// Request another frame, so the next settled tick emits `idle` again
    pub fn trigger_repaint(&mut self) {
        self.dirty = true;
    }

    /// Run `command` at the start of the next tick
    pub fn next_tick(&mut self, command: impl FnOnce(&mut Map) + 'static) {
        self.next_tick.push(Box::new(command));
    }

    fn has_loading_sources(&self) -> bool {
        self.sources.values().any(Source::is_loading)
    }

    /// Advance the map by `dt`: deferred commands, camera animation, finished
    /// source loads, and finally `idle` once nothing is pending.
    pub fn tick(&mut self, dt: Duration) {
        for command in std::mem::take(&mut self.next_tick) {
            command(self);
        }

        if let Some(mut animation) = self.animation.take() {
            animation.elapsed += dt;
            let t = if animation.duration.is_zero() {
                1.0
            } else {
                animation.elapsed.as_secs_f64() / animation.duration.as_secs_f64()
            };
            let finished = t >= 1.0;
            let (from, to) = (animation.from, animation.to);
            if finished {
                self.apply_camera(to);
            } else {
                let k = ease(t);
                self.apply_camera(Camera {
                    lon: from.lon + (to.lon - from.lon) * k,
                    lat: from.lat + (to.lat - from.lat) * k,
                    zoom: from.zoom + (to.zoom - from.zoom) * k,
                });
            }
            if !finished {
                self.animation = Some(animation);
            }
            self.fire(&MapEvent::new(EventKind::Move));
            if finished && self.animation.is_none() && !self.gesture {
                self.fire(&MapEvent::new(EventKind::MoveEnd));
            }
        }

        for response in self.loader.poll() {
            self.finish_load(response);
        }

        if self.dirty && !self.is_moving() && !self.has_loading_sources() && self.next_tick.is_empty() {
            self.dirty = false;
            self.fire(&MapEvent::new(EventKind::Idle));
        }
    }

    fn finish_load(&mut self, response: LoadResponse) {
        let Some(source) = self.sources.get_mut(&response.source) else {
            return;
        };
        if source.generation != response.generation {
            log::debug!("dropping superseded load for source {}", response.source);
            return;
        }
        source.loading = false;
        match response.result {
            Ok(fc) => source.replace_with_collection(&fc),
            Err(err) => {
                log::warn!("source {} failed to load: {}", response.source, err);
                source.replace(Vec::new());
            }
        }
        self.dirty = true;
        self.fire(&MapEvent::source_data(&response.source));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Loader fake that records requests and hands back queued responses
    #[derive(Clone, Default)]
    pub struct RecordingLoader {
        pub requests: Rc<RefCell<Vec<LoadRequest>>>,
        pub responses: Rc<RefCell<Vec<LoadResponse>>>,
    }

    impl SourceLoader for RecordingLoader {
        fn request(&mut self, request: LoadRequest) {
            self.requests.borrow_mut().push(request);
        }

        fn poll(&mut self) -> Vec<LoadResponse> {
            std::mem::take(&mut *self.responses.borrow_mut())
        }
    }

    pub fn test_map() -> (Map, RecordingLoader) {
        let loader = RecordingLoader::default();
        let options = MapOptions {
            center: (0.0, 0.0),
            zoom: 14.0,
            ..MapOptions::default()
        };
        (Map::new(options, 200, 120, Box::new(loader.clone())), loader)
    }

    pub fn collection(json: &str) -> FeatureCollection {
        json.parse::<geojson::GeoJson>()
            .ok()
            .and_then(|g| FeatureCollection::try_from(g).ok())
            .expect("valid collection")
    }

    pub fn point_collection() -> FeatureCollection {
        collection(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":42,"properties":{"name":"Arena"},"geometry":{"type":"Point","coordinates":[0.0,0.0]}},
                {"type":"Feature","id":7,"properties":{"name":"Dome"},"geometry":{"type":"Point","coordinates":[0.01,0.0]}}
            ]}"#,
        )
    }

    fn counter() -> (Rc<RefCell<Vec<EventKind>>>, impl FnMut(&mut Map, &MapEvent) + Clone) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |_: &mut Map, e: &MapEvent| sink.borrow_mut().push(e.kind))
    }

    #[test]
    fn test_trigger_repaint_emits_idle_again() {
        let (mut map, _) = test_map();
        map.tick(Duration::from_millis(16));
        let (seen, cb) = counter();
        map.once(EventKind::Idle, cb);
        map.tick(Duration::from_millis(16));
        assert!(seen.borrow().is_empty());

        map.trigger_repaint();
        map.tick(Duration::from_millis(16));
        map.tick(Duration::from_millis(16));
        assert_eq!(*seen.borrow(), vec![EventKind::Idle]);
    }

    #[test]
    fn test_first_tick_emits_idle_once() {
        let (mut map, _) = test_map();
        let (seen, cb) = counter();
        map.on(EventKind::Idle, cb);
        map.tick(Duration::from_millis(16));
        map.tick(Duration::from_millis(16));
        assert_eq!(*seen.borrow(), vec![EventKind::Idle]);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let (mut map, _) = test_map();
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        map.once(EventKind::Idle, move |_, _| *h.borrow_mut() += 1);
        map.tick(Duration::ZERO);
        map.set_pitch(10.0);
        map.tick(Duration::ZERO);
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(map.listener_count(EventKind::Idle, None), 0);
    }

    #[test]
    fn test_duplicate_source_and_layer_rejected() {
        let (mut map, _) = test_map();
        map.add_source("venues", SourceData::Empty).unwrap();
        assert_eq!(
            map.add_source("venues", SourceData::Empty),
            Err(MapError::DuplicateSource("venues".into()))
        );
        map.add_layer(Layer::new("venues", LayerKind::Symbol, "venues")).unwrap();
        assert!(matches!(
            map.add_layer(Layer::new("venues", LayerKind::Symbol, "venues")),
            Err(MapError::DuplicateLayer(_))
        ));
        assert!(matches!(
            map.add_layer(Layer::new("x", LayerKind::Fill, "nowhere")),
            Err(MapError::MissingSource { .. })
        ));
    }

    #[test]
    fn test_when_source_defers_until_created() {
        let (mut map, loader) = test_map();
        map.when_source("parking", |m| {
            m.set_data("parking", SourceData::Url("/api/parking-lots-occupancy?a=1".into()));
        });
        assert_eq!(map.pending_for_source("parking"), 1);
        assert!(loader.requests.borrow().is_empty());

        map.add_source("parking", SourceData::Empty).unwrap();
        assert_eq!(map.pending_for_source("parking"), 0);
        assert_eq!(loader.requests.borrow().len(), 1);
        assert_eq!(map.source("parking").and_then(Source::url), Some("/api/parking-lots-occupancy?a=1"));
    }

    #[test]
    fn test_superseded_load_is_dropped() {
        let (mut map, loader) = test_map();
        map.add_source("parking", SourceData::Empty).unwrap();
        map.set_data("parking", SourceData::Url("/a".into()));
        map.set_data("parking", SourceData::Url("/b".into()));
        let requests = loader.requests.borrow().clone();
        assert_eq!(requests.len(), 2);

        loader.responses.borrow_mut().push(LoadResponse {
            source: "parking".into(),
            generation: requests[0].generation,
            result: Ok(point_collection()),
        });
        map.tick(Duration::ZERO);
        assert!(map.source("parking").unwrap().is_loading());
        assert!(map.source("parking").unwrap().features().is_empty());

        loader.responses.borrow_mut().push(LoadResponse {
            source: "parking".into(),
            generation: requests[1].generation,
            result: Ok(point_collection()),
        });
        map.tick(Duration::ZERO);
        assert!(!map.source("parking").unwrap().is_loading());
        assert_eq!(map.source("parking").unwrap().features().len(), 2);
    }

    #[test]
    fn test_failed_load_leaves_source_empty() {
        let (mut map, loader) = test_map();
        map.add_source("parking", SourceData::Features(point_collection())).unwrap();
        map.set_data("parking", SourceData::Url("/a".into()));
        let generation = loader.requests.borrow()[0].generation;
        loader.responses.borrow_mut().push(LoadResponse {
            source: "parking".into(),
            generation,
            result: Err("connection refused".into()),
        });
        map.tick(Duration::ZERO);
        assert!(map.source("parking").unwrap().features().is_empty());
    }

    #[test]
    fn test_idle_waits_for_loads_and_animations() {
        let (mut map, loader) = test_map();
        map.tick(Duration::ZERO); // initial idle
        let (seen, cb) = counter();
        map.on(EventKind::Idle, cb);

        map.add_source("parking", SourceData::Empty).unwrap();
        map.set_data("parking", SourceData::Url("/a".into()));
        map.tick(Duration::ZERO);
        assert!(seen.borrow().is_empty());

        let generation = loader.requests.borrow()[0].generation;
        loader.responses.borrow_mut().push(LoadResponse {
            source: "parking".into(),
            generation,
            result: Ok(point_collection()),
        });
        map.tick(Duration::ZERO);
        assert_eq!(seen.borrow().len(), 1);

        map.pan_to((1.0, 1.0), Duration::from_millis(100));
        map.tick(Duration::from_millis(50));
        assert_eq!(seen.borrow().len(), 1);
        map.tick(Duration::from_millis(60));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_pan_to_fires_move_events_and_arrives() {
        let (mut map, _) = test_map();
        let (seen, cb) = counter();
        map.on(EventKind::MoveStart, cb.clone());
        map.on(EventKind::MoveEnd, cb);
        map.pan_to((2.0, 1.0), Duration::from_millis(1000));
        assert_eq!(*seen.borrow(), vec![EventKind::MoveStart]);
        map.tick(Duration::from_millis(500));
        assert_eq!(seen.borrow().len(), 1);
        map.tick(Duration::from_millis(500));
        assert_eq!(*seen.borrow(), vec![EventKind::MoveStart, EventKind::MoveEnd]);
        assert!((map.viewport().center_lon - 2.0).abs() < 1e-9);
        assert!((map.viewport().center_lat - 1.0).abs() < 1e-9);
        assert_eq!(map.viewport().zoom, 14.0);
    }

    #[test]
    fn test_hover_enter_and_leave_on_layer() {
        let (mut map, _) = test_map();
        map.add_source("venues", SourceData::Features(point_collection())).unwrap();
        map.add_layer(Layer::new("venues", LayerKind::Symbol, "venues").layout("icon-size", Expr::number(2.0)))
            .unwrap();
        let entered = Rc::new(RefCell::new(Vec::new()));
        let sink = entered.clone();
        map.on_layer(EventKind::MouseEnter, "venues", move |_, e| {
            sink.borrow_mut().extend(e.features.iter().filter_map(|f| f.id.clone()));
        });
        let (left, cb) = counter();
        map.on_layer(EventKind::MouseLeave, "venues", cb);

        // Viewport center (100, 60) is the Arena at 0,0
        map.pointer_move(100, 60);
        map.pointer_move(101, 60); // still inside: no second enter
        assert_eq!(entered.borrow().len(), 1);
        assert_eq!(entered.borrow()[0].as_str(), "42");

        map.pointer_move(0, 0);
        assert_eq!(left.borrow().len(), 1);
    }

    #[test]
    fn test_click_forwards_hit_features_only_on_hit() {
        let (mut map, _) = test_map();
        map.add_source("venues", SourceData::Features(point_collection())).unwrap();
        map.add_layer(Layer::new("venues", LayerKind::Symbol, "venues")).unwrap();
        let clicked = Rc::new(RefCell::new(0));
        let c = clicked.clone();
        map.on_layer(EventKind::Click, "venues", move |_, e| {
            assert!(!e.features.is_empty());
            *c.borrow_mut() += 1;
        });
        map.click(0, 0);
        assert_eq!(*clicked.borrow(), 0);
        map.click(100, 60);
        assert_eq!(*clicked.borrow(), 1);
    }

    #[test]
    fn test_fill_hit_test() {
        let (mut map, _) = test_map();
        map.add_source(
            "parking",
            SourceData::Features(collection(
                r#"{"type":"FeatureCollection","features":[
                    {"type":"Feature","id":1,"properties":{"name":"Lot A","occupancy":45,"capacity":60},
                     "geometry":{"type":"Polygon","coordinates":[[[-0.001,-0.001],[0.001,-0.001],[0.001,0.001],[-0.001,0.001],[-0.001,-0.001]]]}}
                ]}"#,
            )),
        )
        .unwrap();
        map.add_layer(Layer::new("parking", LayerKind::Fill, "parking")).unwrap();
        assert_eq!(map.query_rendered_features("parking", 100, 60).len(), 1);
        assert!(map.query_rendered_features("parking", 10, 10).is_empty());
        assert!(map.query_rendered_features("missing", 100, 60).is_empty());
    }

    #[test]
    fn test_listener_can_remove_itself() {
        let (mut map, _) = test_map();
        let slot: Rc<RefCell<Option<ListenerId>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let id = map.on(EventKind::Idle, move |m, _| {
            if let Some(id) = s.borrow_mut().take() {
                m.off(id);
            }
        });
        *slot.borrow_mut() = Some(id);
        map.tick(Duration::ZERO);
        assert_eq!(map.listener_count(EventKind::Idle, None), 0);
    }

    #[test]
    fn test_gesture_brackets_moves() {
        let (mut map, _) = test_map();
        let (seen, cb) = counter();
        map.on(EventKind::MoveStart, cb.clone());
        map.on(EventKind::MoveEnd, cb);
        map.begin_gesture();
        map.pan_by(5, 0);
        map.pan_by(5, 0);
        map.end_gesture();
        assert_eq!(*seen.borrow(), vec![EventKind::MoveStart, EventKind::MoveEnd]);
    }
}
