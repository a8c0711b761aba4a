use crate::api::{CONGESTION_PATH, PARKING_PATH};
use crate::config::Config;
use crate::content::{install_content, CONGESTION, PARKING, VENUES};
use crate::engine::events::{EventKind, ListenerId};
use crate::engine::feature::{collection_bbox, FeatureId};
use crate::engine::map::{Map, MapOptions, SourceLoader};
use crate::engine::style::{PropertyKind, SourceData};
use crate::interaction::{Attachment, ClickForward, HoverHighlight, HoverValue};
use crate::engine::expr::Expr;
use crate::model::{EventType, Venue, Venues};
use crate::panel::{parse_date_input, VenuePanel, DAY_MS};
use crate::scenario::{venue_path, Fields, Location, Scenario, ScenarioPatch, ScenarioStore};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// How long a click on a venue pans before zooming in
pub const VENUE_PAN_DURATION: Duration = Duration::from_millis(1000);
pub const VENUE_ZOOM: f64 = 13.0;
pub const FIT_MAX_ZOOM: f64 = 15.0;
const HOVER_SCALE: f64 = 1.5;

/// Requests raised from inside map callbacks
#[derive(Clone, Debug, PartialEq)]
pub enum ViewAction {
    Navigate(FeatureId),
}

/// State observers work on
pub struct MapContext {
    map: Option<Map>,
    venues: Option<Venues>,
    congestion: bool,
    install_scheduled: bool,
    /// Last value of "map and venues ready with no venue selected"
    fit_armed: bool,
    attachments: Vec<Attachment>,
    installed_listeners: Rc<RefCell<Vec<ListenerId>>>,
    actions: Rc<RefCell<Vec<ViewAction>>>,
}

impl MapContext {
    fn maybe_install(&mut self) {
        let (Some(map), Some(venues)) = (self.map.as_mut(), self.venues.as_ref()) else {
            return;
        };
        if map.has_layer(VENUES) || self.install_scheduled {
            return;
        }
        self.install_scheduled = true;
        let collection = venues.collection.clone();
        let installed = self.installed_listeners.clone();
        map.once(EventKind::Idle, move |map, _| {
            if map.has_layer(VENUES) {
                return;
            }
            match install_content(map, &collection) {
                Ok(ids) => installed.borrow_mut().extend(ids),
                Err(err) => log::error!("installing map content failed: {}", err),
            }
        });
        // The map may have gone idle before venues arrived
        map.trigger_repaint();
    }

    fn update_fit(&mut self, scenario: &Scenario) {
        let armed = self.map.is_some() && self.venues.is_some() && scenario.venue_id.is_none();
        if armed && !self.fit_armed {
            let bounds = self.venues.as_ref().and_then(|v| collection_bbox(&v.features));
            if let (Some(map), Some(bounds)) = (self.map.as_mut(), bounds) {
                // Let layout settle for one tick after the next idle
                map.once(EventKind::Idle, move |map, _| {
                    map.next_tick(move |map| map.fit_bounds(bounds, FIT_MAX_ZOOM));
                });
                map.trigger_repaint();
            }
        }
        self.fit_armed = armed;
    }

    fn sync_overlays(&mut self, scenario: &Scenario) {
        let Some(map) = self.map.as_mut() else {
            return;
        };
        let mut overlays = vec![(PARKING, PARKING_PATH)];
        if self.congestion {
            overlays.push((CONGESTION, CONGESTION_PATH));
        }
        let query = scenario.overlay_query();
        for (source, path) in overlays {
            let data = match &query {
                Some(query) => SourceData::Url(format!("{}?{}", path, query)),
                None => SourceData::Empty,
            };
            map.when_source(source, move |map| {
                map.set_data(source, data);
            });
        }
    }
}

pub struct VenueMapView {
    store: ScenarioStore<MapContext>,
    ctx: MapContext,
    options: MapOptions,
    panel: VenuePanel,
    event_types: Option<Vec<EventType>>,
    clock: fn() -> i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl VenueMapView {
    pub fn new(config: &Config, location: Location) -> Self {
        let mut store = ScenarioStore::new(location);
        store.subscribe(Fields::ALL, |scenario, ctx: &mut MapContext| ctx.sync_overlays(scenario));
        store.subscribe(Fields::VENUE, |scenario, ctx: &mut MapContext| ctx.update_fit(scenario));

        let options = MapOptions {
            style: config.map.style,
            zoom: config.map.zoom,
            max_pitch: config.map.max_pitch,
            hash: config.map.hash,
            ..MapOptions::default()
        };
        Self {
            store,
            ctx: MapContext {
                map: None,
                venues: None,
                congestion: config.map.congestion,
                install_scheduled: false,
                fit_armed: false,
                attachments: Vec::new(),
                installed_listeners: Rc::new(RefCell::new(Vec::new())),
                actions: Rc::new(RefCell::new(Vec::new())),
            },
            options,
            panel: VenuePanel::new(config.panel.clone()),
            event_types: None,
            clock: now_ms,
        }
    }

    /// Replace the wall clock, in epoch milliseconds
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Create the map for a canvas of `width` x `height` pixels. Only the
    /// first call has an effect.
    pub fn mount(&mut self, width: usize, height: usize, loader: Box<dyn SourceLoader>) {
        if self.ctx.map.is_some() {
            return;
        }
        let mut map = Map::new(self.options.clone(), width, height, loader);
        let hash = self.store.location().hash.clone();
        if self.options.hash && !hash.is_empty() && !map.apply_hash(&hash) {
            log::warn!("ignoring malformed map hash {:?}", hash);
        }
        self.ctx.attachments = Self::attach_interactions(&mut map, self.ctx.actions.clone());
        self.ctx.map = Some(map);

        self.ctx.maybe_install();
        self.store.refresh(Fields::ALL, &mut self.ctx);
    }

    fn attach_interactions(map: &mut Map, actions: Rc<RefCell<Vec<ViewAction>>>) -> Vec<Attachment> {
        let scale = HoverHighlight::attach(
            map,
            VENUES,
            PropertyKind::Layout,
            "icon-size",
            HoverValue::scale(HOVER_SCALE),
        );
        let label = HoverHighlight::attach(
            map,
            VENUES,
            PropertyKind::Paint,
            "text-opacity",
            HoverValue::Fixed(Expr::number(1.0)),
        );
        let click = ClickForward::attach(map, VENUES, move |map, features| {
            let Some(feature) = features.first() else {
                return;
            };
            let Some(id) = feature.id.clone() else {
                return;
            };
            if let Some(point) = feature.point() {
                map.pan_to(point, VENUE_PAN_DURATION);
                map.once(EventKind::MoveEnd, |map, _| map.zoom_to(VENUE_ZOOM));
            }
            actions.borrow_mut().push(ViewAction::Navigate(id));
        });
        vec![Attachment::Hover(scale), Attachment::Hover(label), Attachment::Click(click)]
    }

    /// Remove every listener the view attached and drop the map
    pub fn unmount(&mut self) {
        let Some(mut map) = self.ctx.map.take() else {
            return;
        };
        for attachment in self.ctx.attachments.drain(..) {
            attachment.detach(&mut map);
        }
        for id in self.ctx.installed_listeners.borrow_mut().drain(..) {
            map.off(id);
        }
        self.ctx.install_scheduled = false;
        self.ctx.fit_armed = false;
    }

    pub fn set_venues(&mut self, venues: Venues) {
        self.ctx.venues = Some(venues);
        self.ctx.maybe_install();
        self.ctx.update_fit(self.store.scenario());
        self.sync_panel();
    }

    pub fn set_event_types(&mut self, event_types: Vec<EventType>) {
        self.event_types = Some(event_types);
        self.sync_panel();
    }

    /// Merge a patch into the scenario
    pub fn update(&mut self, patch: ScenarioPatch) {
        if patch.is_empty() {
            return;
        }
        self.store.update(patch, &mut self.ctx);
        self.sync_panel();
    }

    pub fn navigate(&mut self, location: Location) {
        self.store.navigate(location, &mut self.ctx);
        self.sync_panel();
    }

    /// Open the detail route for a venue, keeping query and hash
    pub fn select_venue(&mut self, id: &FeatureId) {
        let target = self.store.location().with_path(&venue_path(id.as_str()));
        self.navigate(target);
    }

    pub fn deselect_venue(&mut self) {
        self.panel.close();
        let target = self.store.location().with_path("/");
        self.navigate(target);
    }

    fn sync_panel(&mut self) {
        let scenario = self.store.scenario().clone();
        let venue = scenario
            .venue_id
            .as_deref()
            .and_then(|id| self.ctx.venues.as_ref()?.find(id));
        let patch = self
            .panel
            .sync(&scenario, venue, self.event_types.as_deref(), (self.clock)());
        if !patch.is_empty() {
            self.store.update(patch, &mut self.ctx);
        }
    }

    fn apply_actions(&mut self) {
        let actions: Vec<ViewAction> = self.ctx.actions.borrow_mut().drain(..).collect();
        for action in actions {
            match action {
                ViewAction::Navigate(id) => self.select_venue(&id),
            }
        }
    }

    /// Advance the map and apply whatever its callbacks requested
    pub fn tick(&mut self, dt: Duration) {
        if let Some(map) = self.ctx.map.as_mut() {
            map.tick(dt);
        }
        self.apply_actions();
        self.mirror_hash();
    }

    fn mirror_hash(&mut self) {
        let Some(map) = self.ctx.map.as_ref() else {
            return;
        };
        if !self.options.hash || map.is_moving() {
            return;
        }
        let hash = map.url_hash();
        if self.store.location().hash != hash {
            self.store.set_hash(hash);
        }
    }

    /// Run a pointer or camera operation on the map, then apply its actions
    pub fn with_map(&mut self, f: impl FnOnce(&mut Map)) {
        if let Some(map) = self.ctx.map.as_mut() {
            f(map);
        }
        self.apply_actions();
    }

    // ---- panel ----

    pub fn panel_toggle(&mut self) {
        self.panel.toggle();
    }

    pub fn panel_focus_next(&mut self) {
        self.panel.focus_next();
    }

    /// Move the focused panel field up or down by `delta`
    pub fn panel_step(&mut self, delta: i64) {
        let now = (self.clock)();
        let patch = self.panel.step(delta, self.store.scenario(), now);
        self.update(patch);
    }

    /// Shift the event start by `delta_ms`, never before the minimum
    pub fn shift_event_time(&mut self, delta_ms: i64) {
        let now = (self.clock)();
        let Some(current) = self.store.scenario().event_time else {
            return;
        };
        let patch = self.panel.set_event_time(current + delta_ms, now);
        self.update(patch);
    }

    /// Set the event start from a typed `YYYY-MM-DDTHH:MM` value. Returns
    /// false, leaving the scenario alone, when the input does not parse.
    pub fn set_event_time_input(&mut self, input: &str) -> bool {
        let Some(ms) = parse_date_input(input) else {
            return false;
        };
        let patch = self.panel.set_event_time(ms, (self.clock)());
        self.update(patch);
        true
    }

    pub fn shift_event_days(&mut self, days: i64) {
        self.shift_event_time(days * DAY_MS);
    }

    // ---- accessors for drawing ----

    pub fn map(&self) -> Option<&Map> {
        self.ctx.map.as_ref()
    }

    pub fn panel(&self) -> &VenuePanel {
        &self.panel
    }

    pub fn location(&self) -> &Location {
        self.store.location()
    }

    pub fn scenario(&self) -> &Scenario {
        self.store.scenario()
    }

    pub fn venues(&self) -> Option<&Venues> {
        self.ctx.venues.as_ref()
    }

    pub fn selected_venue(&self) -> Option<&Venue> {
        let id = self.store.scenario().venue_id.as_deref()?;
        self.ctx.venues.as_ref()?.find(id)
    }

    pub fn congestion_enabled(&self) -> bool {
        self.ctx.congestion
    }

    pub fn now_ms(&self) -> i64 {
        (self.clock)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::map::tests::{collection, RecordingLoader};
    use crate::engine::style::Source;

    const NOW: i64 = 1_700_000_000_000;

    fn clock() -> i64 {
        NOW
    }

    fn venues() -> Venues {
        Venues::new(collection(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":42,"properties":{"name":"Arena","description":"Indoor","max_capacity":10000},
                 "geometry":{"type":"Point","coordinates":[0.0,0.0]}}
            ]}"#,
        ))
    }

    fn event_types() -> Vec<EventType> {
        vec![EventType {
            id: 1,
            name: "Concert".into(),
            occupancy_factor: 1.0,
        }]
    }

    fn view(url: &str, hash: bool) -> (VenueMapView, RecordingLoader) {
        let mut config = Config::default();
        config.map.hash = hash;
        let mut view = VenueMapView::new(&config, Location::parse(url)).with_clock(clock);
        let loader = RecordingLoader::default();
        view.mount(200, 120, Box::new(loader.clone()));
        (view, loader)
    }

    fn urls(loader: &RecordingLoader, source: &str) -> Vec<String> {
        loader
            .requests
            .borrow()
            .iter()
            .filter(|r| r.source == source)
            .map(|r| r.url.clone())
            .collect()
    }

    fn parking(view: &VenueMapView) -> &Source {
        view.map().and_then(|m| m.source(PARKING)).expect("parking source")
    }

    #[test]
    fn test_install_runs_at_most_once() {
        let (mut view, _) = view("/", false);
        view.set_venues(venues());
        view.set_venues(venues());
        view.ctx.maybe_install();
        assert_eq!(view.map().unwrap().listener_count(EventKind::Idle, None), 2); // install + fit

        view.tick(Duration::from_millis(16));
        assert_eq!(view.map().unwrap().layers().len(), 6);

        view.ctx.maybe_install();
        view.set_venues(venues());
        view.tick(Duration::from_millis(16));
        assert_eq!(view.map().unwrap().layers().len(), 6);
        assert_eq!(view.map().unwrap().listener_count(EventKind::Idle, None), 0);
    }

    #[test]
    fn test_deferred_overlay_runs_once_source_exists() {
        let url = "/venue/42/?eventTime=1700086400000&offset=0&occupancy=1000&eventType=1";
        let (mut view, loader) = view(url, false);
        assert_eq!(view.map().unwrap().pending_for_source(PARKING), 1);
        assert_eq!(view.map().unwrap().pending_for_source(CONGESTION), 1);

        view.set_event_types(event_types());
        view.set_venues(venues());
        // Scenario already complete and matching: the panel writes nothing back
        assert_eq!(view.location().to_string(), url);
        assert!(loader.requests.borrow().is_empty());

        view.tick(Duration::ZERO);
        let query = "venue_id=42&event_start_ms=1700086400000&event_end_ms=1700090000000\
                     &actual_occupancy=1000&time_to_check_ms=1700086400000&event_type=1";
        assert_eq!(urls(&loader, PARKING), vec![format!("/api/parking-lots-occupancy?{}", query)]);
        assert_eq!(urls(&loader, CONGESTION), vec![format!("/api/congestion?{}", query)]);
        assert!(parking(&view).is_loading());
    }

    #[test]
    fn test_incomplete_scenario_clears_overlay() {
        let (mut view, loader) = view("/venue/42/", false);
        view.set_venues(venues());
        view.tick(Duration::ZERO);
        // Panel filled time, offset and occupancy; event type is still unknown
        let scenario = view.scenario().clone();
        assert_eq!(scenario.event_time, Some(NOW + DAY_MS));
        assert_eq!(scenario.offset, Some(0));
        assert_eq!(scenario.occupancy, Some(1000));
        assert_eq!(scenario.event_type, None);
        assert!(urls(&loader, PARKING).is_empty());
        assert_eq!(parking(&view).url(), None);

        view.set_event_types(event_types());
        assert_eq!(view.scenario().event_type, Some(1));
        assert_eq!(urls(&loader, PARKING).len(), 1);
        assert!(parking(&view).url().is_some());

        view.deselect_venue();
        assert_eq!(view.location().pathname, "/");
        assert_eq!(parking(&view).url(), None);
        assert!(!parking(&view).is_loading());
        assert!(view.map().unwrap().source(CONGESTION).unwrap().url().is_none());
    }

    #[test]
    fn test_congestion_can_be_disabled() {
        let mut config = Config::default();
        config.map.congestion = false;
        let mut view = VenueMapView::new(&config, Location::parse("/")).with_clock(clock);
        view.mount(200, 120, Box::new(RecordingLoader::default()));
        assert_eq!(view.map().unwrap().pending_for_source(PARKING), 1);
        assert_eq!(view.map().unwrap().pending_for_source(CONGESTION), 0);
    }

    #[test]
    fn test_venue_click_navigates_and_zooms() {
        let (mut view, _) = view("/?utm=x#keep", false);
        view.set_venues(venues());
        view.tick(Duration::from_millis(16));
        assert!(view.map().unwrap().has_layer(VENUES));

        view.with_map(|map| map.click(100, 60));
        let location = view.location();
        assert_eq!(location.pathname, "/venue/42/");
        assert_eq!(location.param("utm"), Some("x"));
        assert_eq!(location.hash, "keep");
        assert_eq!(view.selected_venue().map(|v| v.name.as_str()), Some("Arena"));

        for _ in 0..200 {
            view.tick(Duration::from_millis(16));
        }
        assert!(!view.map().unwrap().is_moving());
        assert_eq!(view.map().unwrap().viewport().zoom, VENUE_ZOOM);
    }

    #[test]
    fn test_fit_bounds_after_idle_when_nothing_selected() {
        let (mut view, _) = view("/", false);
        view.set_venues(venues());
        view.tick(Duration::ZERO); // idle: install, fit queued for the next tick
        assert!(!view.map().unwrap().is_moving());
        view.tick(Duration::ZERO);
        assert!(view.map().unwrap().is_moving());
        for _ in 0..60 {
            view.tick(Duration::from_millis(16));
        }
        assert_eq!(view.map().unwrap().viewport().zoom, FIT_MAX_ZOOM);
    }

    #[test]
    fn test_no_fit_with_selected_venue() {
        let (mut view, _) = view("/venue/42/", false);
        view.set_venues(venues());
        for _ in 0..5 {
            view.tick(Duration::from_millis(16));
        }
        assert_eq!(view.map().unwrap().viewport().zoom, 10.0);
    }

    #[test]
    fn test_typed_event_time_is_clamped() {
        let (mut view, _) = view("/venue/42/", false);
        view.set_event_types(event_types());
        view.set_venues(venues());

        assert!(!view.set_event_time_input("tomorrow"));
        assert_eq!(view.scenario().event_time, Some(NOW + DAY_MS));

        assert!(view.set_event_time_input("2099-01-02T03:05"));
        let typed = parse_date_input("2099-01-02T03:05").unwrap();
        assert_eq!(view.scenario().event_time, Some(typed));
        assert!(view.location().to_string().contains(&format!("eventTime={}", typed)));

        assert!(view.set_event_time_input("2000-01-01T00:00"));
        assert_eq!(view.scenario().event_time, Some(NOW + DAY_MS));
    }

    #[test]
    fn test_hash_is_mirrored_and_restored() {
        let (mut view, _) = view("/#12/51.5/-0.1", true);
        let viewport = view.map().unwrap().viewport();
        assert_eq!(viewport.zoom, 12.0);
        assert!((viewport.center_lat - 51.5).abs() < 1e-9);

        view.with_map(|map| {
            map.begin_gesture();
            map.pan_by(10, 0);
            map.end_gesture();
        });
        view.tick(Duration::ZERO);
        assert_ne!(view.location().hash, "12/51.5/-0.1");
        assert!(view.location().hash.starts_with("12/51.5/"));
    }

    #[test]
    fn test_unmount_detaches_everything() {
        let (mut view, _) = view("/", false);
        view.set_venues(venues());
        view.tick(Duration::ZERO);
        view.unmount();
        assert!(view.map().is_none());
        assert!(view.ctx.attachments.is_empty());
        assert!(view.ctx.installed_listeners.borrow().is_empty());
    }
}
