use std::fmt;
use std::ops::BitOr;

/// Length of the event window that starts at `eventTime`
pub const EVENT_DURATION_MS: i64 = 60 * 60 * 1000;

pub const EVENT_TIME_PARAM: &str = "eventTime";
pub const OFFSET_PARAM: &str = "offset";
pub const OCCUPANCY_PARAM: &str = "occupancy";
pub const EVENT_TYPE_PARAM: &str = "eventType";

/// A path with its query pairs (in order) and fragment, without `?`/`#`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub pathname: String,
    pub query: Vec<(String, String)>,
    pub hash: String,
}

impl Location {
    pub fn parse(input: &str) -> Self {
        let (rest, hash) = match input.split_once('#') {
            Some((rest, hash)) => (rest, hash.to_string()),
            None => (input, String::new()),
        };
        let (path, search) = rest.split_once('?').unwrap_or((rest, ""));
        let query = search
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key.to_string(), value.to_string())
            })
            .collect();
        let pathname = if path.is_empty() { "/".to_string() } else { path.to_string() };
        Self { pathname, query, hash }
    }

    pub fn search(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Replace the first occurrence of `key` or append it
    pub fn set_param(&mut self, key: &str, value: String) {
        match self.query.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.query.push((key.to_string(), value)),
        }
    }

    /// Same search and hash under a different path
    pub fn with_path(&self, pathname: &str) -> Self {
        Self {
            pathname: pathname.to_string(),
            ..self.clone()
        }
    }

    /// Id from a `/venue/:id` path, trailing slash optional
    pub fn venue_id(&self) -> Option<&str> {
        let rest = self.pathname.strip_prefix("/venue/")?;
        let id = rest.strip_suffix('/').unwrap_or(rest);
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pathname)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.search())?;
        }
        if !self.hash.is_empty() {
            write!(f, "#{}", self.hash)?;
        }
        Ok(())
    }
}

/// Path of the detail view for a venue
pub fn venue_path(id: &str) -> String {
    format!("/venue/{}/", id)
}

fn number_param(location: &Location, key: &str) -> Option<i64> {
    let value: f64 = location.param(key)?.parse().ok()?;
    value.is_finite().then(|| value.round() as i64)
}

/// Set of scenario fields, used to declare observer dependencies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fields(u8);

impl Fields {
    pub const NONE: Fields = Fields(0);
    pub const VENUE: Fields = Fields(1);
    pub const EVENT_TIME: Fields = Fields(1 << 1);
    pub const OFFSET: Fields = Fields(1 << 2);
    pub const OCCUPANCY: Fields = Fields(1 << 3);
    pub const EVENT_TYPE: Fields = Fields(1 << 4);
    pub const ALL: Fields = Fields(0b1_1111);

    pub fn intersects(self, other: Fields) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Fields {
    type Output = Fields;

    fn bitor(self, rhs: Fields) -> Fields {
        Fields(self.0 | rhs.0)
    }
}

/// The event a user is planning for, as encoded in the location
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scenario {
    pub venue_id: Option<String>,
    /// Event start, epoch milliseconds
    pub event_time: Option<i64>,
    /// Signed offset from the event start at which occupancy is checked
    pub offset: Option<i64>,
    pub occupancy: Option<i64>,
    pub event_type: Option<i64>,
}

impl Scenario {
    pub fn from_location(location: &Location) -> Self {
        Self {
            venue_id: location.venue_id().map(str::to_string),
            event_time: number_param(location, EVENT_TIME_PARAM),
            offset: number_param(location, OFFSET_PARAM),
            occupancy: number_param(location, OCCUPANCY_PARAM),
            event_type: number_param(location, EVENT_TYPE_PARAM),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.venue_id.is_some()
            && self.event_time.is_some()
            && self.offset.is_some()
            && self.occupancy.is_some()
            && self.event_type.is_some()
    }

    pub fn event_end_ms(&self) -> Option<i64> {
        Some(self.event_time? + EVENT_DURATION_MS)
    }

    pub fn check_time_ms(&self) -> Option<i64> {
        Some(self.event_time? + self.offset?)
    }

    /// Query string for the occupancy and congestion endpoints, `None`
    /// until every field is known
    pub fn overlay_query(&self) -> Option<String> {
        let venue_id = self.venue_id.as_deref()?;
        let event_start = self.event_time?;
        Some(format!(
            "venue_id={}&event_start_ms={}&event_end_ms={}&actual_occupancy={}&time_to_check_ms={}&event_type={}",
            venue_id,
            event_start,
            self.event_end_ms()?,
            self.occupancy?,
            self.check_time_ms()?,
            self.event_type?,
        ))
    }

    fn changed(&self, other: &Scenario) -> Fields {
        let mut fields = Fields::NONE;
        if self.venue_id != other.venue_id {
            fields = fields | Fields::VENUE;
        }
        if self.event_time != other.event_time {
            fields = fields | Fields::EVENT_TIME;
        }
        if self.offset != other.offset {
            fields = fields | Fields::OFFSET;
        }
        if self.occupancy != other.occupancy {
            fields = fields | Fields::OCCUPANCY;
        }
        if self.event_type != other.event_type {
            fields = fields | Fields::EVENT_TYPE;
        }
        fields
    }
}

/// Partial update merged into the current scenario; `None` leaves a field alone
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScenarioPatch {
    pub event_time: Option<i64>,
    pub offset: Option<i64>,
    pub occupancy: Option<i64>,
    pub event_type: Option<i64>,
}

impl ScenarioPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Later values win
    pub fn merge(&mut self, other: ScenarioPatch) {
        self.event_time = other.event_time.or(self.event_time);
        self.offset = other.offset.or(self.offset);
        self.occupancy = other.occupancy.or(self.occupancy);
        self.event_type = other.event_type.or(self.event_type);
    }
}

pub type Observer<C> = Box<dyn FnMut(&Scenario, &mut C)>;

/// Owner of the location. Observers get the context `C` the caller passes
/// into each update.
pub struct ScenarioStore<C> {
    location: Location,
    scenario: Scenario,
    observers: Vec<(Fields, Observer<C>)>,
}

impl<C> ScenarioStore<C> {
    pub fn new(location: Location) -> Self {
        let scenario = Scenario::from_location(&location);
        Self {
            location,
            scenario,
            observers: Vec::new(),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn subscribe(&mut self, fields: Fields, observer: impl FnMut(&Scenario, &mut C) + 'static) {
        self.observers.push((fields, Box::new(observer)));
    }

    /// Merge a patch into the query; returns the fields that changed
    pub fn update(&mut self, patch: ScenarioPatch, ctx: &mut C) -> Fields {
        let mut location = self.location.clone();
        let params = [
            (EVENT_TIME_PARAM, patch.event_time),
            (OFFSET_PARAM, patch.offset),
            (OCCUPANCY_PARAM, patch.occupancy),
            (EVENT_TYPE_PARAM, patch.event_type),
        ];
        for (key, value) in params {
            if let Some(value) = value {
                location.set_param(key, value.to_string());
            }
        }
        self.replace(location, ctx)
    }

    /// Move to another location, e.g. a venue detail path
    pub fn navigate(&mut self, location: Location, ctx: &mut C) -> Fields {
        log::info!("navigate to {}", location);
        self.replace(location, ctx)
    }

    /// Mirror the camera into the fragment; no scenario field depends on it
    pub fn set_hash(&mut self, hash: String) {
        self.location.hash = hash;
    }

    /// Run observers depending on `fields` without a change, e.g. when
    /// something else they read became available
    pub fn refresh(&mut self, fields: Fields, ctx: &mut C) {
        self.notify(fields, ctx);
    }

    fn replace(&mut self, location: Location, ctx: &mut C) -> Fields {
        let scenario = Scenario::from_location(&location);
        let changed = scenario.changed(&self.scenario);
        self.location = location;
        self.scenario = scenario;
        if !changed.is_empty() {
            self.notify(changed, ctx);
        }
        changed
    }

    fn notify(&mut self, changed: Fields, ctx: &mut C) {
        for (fields, observer) in self.observers.iter_mut() {
            if fields.intersects(changed) {
                observer(&self.scenario, ctx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Scenario {
        Scenario {
            venue_id: Some("42".into()),
            event_time: Some(1_700_000_000_000),
            offset: Some(-900_000),
            occupancy: Some(5000),
            event_type: Some(2),
        }
    }

    #[test]
    fn test_location_round_trip() {
        let raw = "/venue/42/?eventTime=1700000000000&offset=0&utm=x#13/51.5/-0.1";
        let location = Location::parse(raw);
        assert_eq!(location.pathname, "/venue/42/");
        assert_eq!(location.param("utm"), Some("x"));
        assert_eq!(location.hash, "13/51.5/-0.1");
        assert_eq!(location.to_string(), raw);
        assert_eq!(Location::parse("").to_string(), "/");
    }

    #[test]
    fn test_venue_route() {
        assert_eq!(Location::parse("/venue/42/").venue_id(), Some("42"));
        assert_eq!(Location::parse("/venue/42?x=1").venue_id(), Some("42"));
        assert_eq!(Location::parse("/venue/").venue_id(), None);
        assert_eq!(Location::parse("/venue/1/2").venue_id(), None);
        assert_eq!(Location::parse("/").venue_id(), None);
    }

    #[test]
    fn test_scenario_from_location() {
        let location = Location::parse("/venue/42/?eventTime=1700000000000&offset=-900000&occupancy=5000&eventType=2");
        assert_eq!(Scenario::from_location(&location), complete());

        let partial = Location::parse("/venue/42/?eventTime=abc&occupancy=12.4");
        let scenario = Scenario::from_location(&partial);
        assert_eq!(scenario.event_time, None);
        assert_eq!(scenario.occupancy, Some(12));
        assert!(!scenario.is_complete());
    }

    #[test]
    fn test_derived_timestamps() {
        let scenario = complete();
        assert_eq!(scenario.event_end_ms(), Some(1_700_000_000_000 + 3_600_000));
        assert_eq!(scenario.check_time_ms(), Some(1_700_000_000_000 - 900_000));
    }

    #[test]
    fn test_overlay_query_requires_every_field() {
        assert_eq!(
            complete().overlay_query().unwrap(),
            "venue_id=42&event_start_ms=1700000000000&event_end_ms=1700003600000&actual_occupancy=5000\
             &time_to_check_ms=1699999100000&event_type=2"
        );
        let mut missing = complete();
        missing.event_type = None;
        assert_eq!(missing.overlay_query(), None);
        let mut no_venue = complete();
        no_venue.venue_id = None;
        assert_eq!(no_venue.overlay_query(), None);
    }

    #[test]
    fn test_observers_run_only_for_declared_fields() {
        let mut store: ScenarioStore<Vec<&'static str>> = ScenarioStore::new(Location::parse("/?utm=x"));
        store.subscribe(Fields::VENUE, |_, log| log.push("venue"));
        store.subscribe(Fields::OCCUPANCY | Fields::OFFSET, |_, log| log.push("overlay"));

        let mut log = Vec::new();
        let changed = store.update(
            ScenarioPatch {
                occupancy: Some(100),
                ..Default::default()
            },
            &mut log,
        );
        assert_eq!(changed, Fields::OCCUPANCY);
        assert_eq!(log, vec!["overlay"]);

        // Same value again: nothing changes, nobody runs
        store.update(
            ScenarioPatch {
                occupancy: Some(100),
                ..Default::default()
            },
            &mut log,
        );
        assert_eq!(log.len(), 1);

        let target = store.location().with_path(&venue_path("42"));
        store.navigate(target, &mut log);
        assert_eq!(log, vec!["overlay", "venue"]);
        assert_eq!(store.location().to_string(), "/venue/42/?utm=x&occupancy=100");
    }

    #[test]
    fn test_set_hash_does_not_notify() {
        let mut store: ScenarioStore<u32> = ScenarioStore::new(Location::parse("/"));
        store.subscribe(Fields::ALL, |_, calls| *calls += 1);
        let mut calls = 0;
        store.set_hash("10/1/2".into());
        assert_eq!(calls, 0);
        assert_eq!(store.location().to_string(), "/#10/1/2");
        store.refresh(Fields::VENUE, &mut calls);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_patch_merge() {
        let mut patch = ScenarioPatch {
            occupancy: Some(1),
            offset: Some(5),
            ..Default::default()
        };
        patch.merge(ScenarioPatch {
            occupancy: Some(2),
            ..Default::default()
        });
        assert_eq!(patch.occupancy, Some(2));
        assert_eq!(patch.offset, Some(5));
        assert!(ScenarioPatch::default().is_empty());
    }
}
