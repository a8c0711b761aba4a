use crate::config::PanelSettings;
use crate::model::{EventType, Venue};
use crate::scenario::{Scenario, ScenarioPatch};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const HOUR_MS: i64 = 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;
const DATE_INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// One entry of a drop-down
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Choice {
    pub value: i64,
    pub label: String,
}

/// `75` -> `1h 15m`, `120` -> `2h`, `30` -> `30m`
pub fn readable_minutes(minutes: i64) -> String {
    let (hours, minutes) = (minutes / 60, minutes % 60);
    match (hours, minutes) {
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}m", h, m),
    }
}

/// Offset at ladder position `index`; position `steps_count` is the event start
pub fn offset_option(step_minutes: i64, steps_count: usize, index: usize) -> Choice {
    let minutes = (index as i64 - steps_count as i64) * step_minutes;
    let label = match minutes {
        0 => "at the event start".to_string(),
        m if m > 0 => format!("{} after", readable_minutes(m)),
        m => format!("{} before", readable_minutes(-m)),
    };
    Choice {
        value: minutes * MINUTE_MS,
        label,
    }
}

pub fn offset_options(step_minutes: i64, steps_count: usize) -> Vec<Choice> {
    (0..=steps_count * 2)
        .map(|i| offset_option(step_minutes, steps_count, i))
        .collect()
}

/// Evenly spaced occupancy levels up to `max_capacity`
pub fn occupancy_options(max_capacity: f64, steps: usize) -> Vec<Choice> {
    (1..=steps)
        .map(|i| {
            let fraction = i as f64 / steps as f64;
            let value = (max_capacity * fraction).round() as i64;
            Choice {
                value,
                label: format!("{}% [{}]", (100.0 * fraction).round() as i64, value),
            }
        })
        .collect()
}

pub fn event_type_options(event_types: &[EventType]) -> Vec<Choice> {
    event_types
        .iter()
        .map(|t| Choice {
            value: t.id,
            label: t.name.clone(),
        })
        .collect()
}

/// `YYYY-MM-DDTHH:MM` in local time
pub fn date_input_string(time: DateTime<Local>) -> String {
    time.format(DATE_INPUT_FORMAT).to_string()
}

pub fn date_input_from_ms(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(date_input_string)
        .unwrap_or_default()
}

/// Epoch milliseconds for a local `YYYY-MM-DDTHH:MM` string
pub fn parse_date_input(input: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(input.trim(), DATE_INPUT_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.timestamp_millis())
}

/// Earliest selectable event start, also the default when none is set
pub fn min_event_time(now_ms: i64) -> i64 {
    now_ms + DAY_MS
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanelField {
    EventTime,
    EventType,
    Occupancy,
    Offset,
}

impl PanelField {
    const ORDER: [PanelField; 4] = [
        PanelField::EventTime,
        PanelField::EventType,
        PanelField::Occupancy,
        PanelField::Offset,
    ];

    fn next(self) -> Self {
        let idx = Self::ORDER.iter().position(|f| *f == self).unwrap_or(0);
        Self::ORDER[(idx + 1) % Self::ORDER.len()]
    }
}

pub struct VenuePanel {
    settings: PanelSettings,
    /// Collapsed until the name bar is activated
    pub open: bool,
    pub focus: PanelField,
    venue_id: Option<String>,
    max_capacity: f64,
    offsets: Vec<Choice>,
    occupancies: Vec<Choice>,
    event_types: Vec<Choice>,
    selected_offset: Option<usize>,
    selected_occupancy: Option<usize>,
    selected_event_type: Option<usize>,
}

impl VenuePanel {
    pub fn new(settings: PanelSettings) -> Self {
        let offsets = offset_options(settings.step_minutes, settings.steps_count);
        Self {
            settings,
            open: false,
            focus: PanelField::EventTime,
            venue_id: None,
            max_capacity: 0.0,
            offsets,
            occupancies: Vec::new(),
            event_types: Vec::new(),
            selected_offset: None,
            selected_occupancy: None,
            selected_event_type: None,
        }
    }

    pub fn toggle(&mut self) {
        self.open = !self.open;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn focus_next(&mut self) {
        self.focus = self.focus.next();
    }

    pub fn max_capacity(&self) -> f64 {
        self.max_capacity
    }

    pub fn options(&self, field: PanelField) -> &[Choice] {
        match field {
            PanelField::EventTime => &[],
            PanelField::EventType => &self.event_types,
            PanelField::Occupancy => &self.occupancies,
            PanelField::Offset => &self.offsets,
        }
    }

    pub fn selected(&self, field: PanelField) -> Option<usize> {
        match field {
            PanelField::EventTime => None,
            PanelField::EventType => self.selected_event_type,
            PanelField::Occupancy => self.selected_occupancy,
            PanelField::Offset => self.selected_offset,
        }
    }

    pub fn selected_choice(&self, field: PanelField) -> Option<&Choice> {
        self.options(field).get(self.selected(field)?)
    }

    /// Re-derive options for the current venue and fill in defaults. The
    /// returned patch writes back every field whose selection differs from
    /// the scenario, plus a default event time when none is set.
    pub fn sync(
        &mut self,
        scenario: &Scenario,
        venue: Option<&Venue>,
        event_types: Option<&[EventType]>,
        now_ms: i64,
    ) -> ScenarioPatch {
        let Some(venue) = venue else {
            return ScenarioPatch::default();
        };

        if self.venue_id.as_deref() != Some(venue.id.as_str()) {
            log::debug!("panel now shows venue {}", venue.id);
            self.venue_id = Some(venue.id.to_string());
            self.max_capacity = venue.capacity_or_default();
            self.occupancies = occupancy_options(self.max_capacity, self.settings.occupancy_steps);
            self.selected_occupancy = None;
            self.selected_offset = None;
        }
        if let Some(types) = event_types {
            if self.event_types.is_empty() {
                self.event_types = event_type_options(types);
                self.selected_event_type = None;
            }
        }

        let matching = |options: &[Choice], value: Option<i64>| options.iter().position(|c| Some(c.value) == value);
        if self.selected_event_type.is_none() && !self.event_types.is_empty() {
            self.selected_event_type = matching(&self.event_types, scenario.event_type).or(Some(0));
        }
        if self.selected_occupancy.is_none() && !self.occupancies.is_empty() {
            self.selected_occupancy = matching(&self.occupancies, scenario.occupancy).or(Some(0));
        }
        if self.selected_offset.is_none() {
            self.selected_offset = matching(&self.offsets, scenario.offset).or(Some(self.settings.steps_count));
        }

        let differs = |choice: Option<&Choice>, current: Option<i64>| {
            choice.map(|c| c.value).filter(|value| Some(*value) != current)
        };
        ScenarioPatch {
            event_time: scenario.event_time.is_none().then(|| min_event_time(now_ms)),
            offset: differs(self.selected_choice(PanelField::Offset), scenario.offset),
            occupancy: differs(self.selected_choice(PanelField::Occupancy), scenario.occupancy),
            event_type: differs(self.selected_choice(PanelField::EventType), scenario.event_type),
        }
    }

    /// Pick option `index` of a drop-down field
    pub fn choose(&mut self, field: PanelField, index: usize) -> ScenarioPatch {
        let Some(choice) = self.options(field).get(index).cloned() else {
            return ScenarioPatch::default();
        };
        match field {
            PanelField::EventTime => ScenarioPatch::default(),
            PanelField::EventType => {
                self.selected_event_type = Some(index);
                ScenarioPatch {
                    event_type: Some(choice.value),
                    ..Default::default()
                }
            }
            PanelField::Occupancy => {
                self.selected_occupancy = Some(index);
                ScenarioPatch {
                    occupancy: Some(choice.value),
                    ..Default::default()
                }
            }
            PanelField::Offset => {
                self.selected_offset = Some(index);
                ScenarioPatch {
                    offset: Some(choice.value),
                    ..Default::default()
                }
            }
        }
    }

    /// Set the event start, never earlier than the minimum
    pub fn set_event_time(&self, ms: i64, now_ms: i64) -> ScenarioPatch {
        ScenarioPatch {
            event_time: Some(ms.max(min_event_time(now_ms))),
            ..Default::default()
        }
    }

    /// Move the focused field by `delta` steps: hours for the event time,
    /// options for the drop-downs
    pub fn step(&mut self, delta: i64, scenario: &Scenario, now_ms: i64) -> ScenarioPatch {
        match self.focus {
            PanelField::EventTime => {
                let current = scenario.event_time.unwrap_or_else(|| min_event_time(now_ms));
                self.set_event_time(current + delta * HOUR_MS, now_ms)
            }
            field => {
                let len = self.options(field).len();
                if len == 0 {
                    return ScenarioPatch::default();
                }
                let current = self.selected(field).unwrap_or(0) as i64;
                let index = (current + delta).clamp(0, len as i64 - 1) as usize;
                self.choose(field, index)
            }
        }
    }
}
