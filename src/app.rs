use crate::api::Startup;
use crate::config::Config;
use crate::engine::map::SourceLoader;
use crate::engine::MapStyle;
use crate::model::Venues;
use crate::panel::{PanelField, HOUR_MS};
use crate::scenario::Location;
use crate::ui::{map_pixel, screen_layout, ScreenLayout};
use crate::view::VenueMapView;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

/// Braille pixels moved per pan key press
const KEY_PAN: (i32, i32) = (20, 12);
/// Zoom levels per scroll wheel notch
const SCROLL_ZOOM: f64 = 0.5;

/// Application state
pub struct App {
    pub view: VenueMapView,
    pub style: MapStyle,
    pub should_quit: bool,
    /// Last mouse position for drag tracking
    pub last_mouse: Option<(u16, u16)>,
    /// Current mouse position for cursor marker
    pub mouse_pos: Option<(u16, u16)>,
    /// Event time being typed into the focused panel field
    pub time_input: Option<String>,
    /// Set once a press has moved, so release is not a click
    dragged: bool,
    layout: Option<ScreenLayout>,
    loader: Option<Box<dyn SourceLoader>>,
    startup: Option<Receiver<Startup>>,
}

impl App {
    pub fn new(config: &Config, location: Location, loader: Box<dyn SourceLoader>, startup: Receiver<Startup>) -> Self {
        Self {
            view: VenueMapView::new(config, location),
            style: config.map.style,
            should_quit: false,
            last_mouse: None,
            mouse_pos: None,
            time_input: None,
            dragged: false,
            layout: None,
            loader: Some(loader),
            startup: Some(startup),
        }
    }

    /// Recompute screen regions for the terminal `area`, mounting the map on
    /// first use and resizing it when the map region changes
    pub fn sync_layout(&mut self, area: Rect) {
        let layout = screen_layout(area, self.view.panel().open);
        if self.layout == Some(layout) {
            return;
        }
        // Braille gives 2x4 resolution per character
        let (width, height) = (layout.map.width as usize * 2, layout.map.height as usize * 4);
        match self.loader.take() {
            Some(loader) => self.view.mount(width, height, loader),
            None => self.view.with_map(|map| map.resize(width, height)),
        }
        self.layout = Some(layout);
    }

    /// Apply reference data once the background fetch finishes
    pub fn poll_startup(&mut self) {
        let Some(rx) = &self.startup else {
            return;
        };
        let startup = match rx.try_recv() {
            Ok(startup) => startup,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                log::warn!("startup fetch ended without a result");
                self.startup = None;
                return;
            }
        };
        self.startup = None;

        match startup.venues {
            Ok(collection) => self.view.set_venues(Venues::new(collection)),
            Err(e) => log::warn!("failed to load venues: {}", e),
        }
        match startup.event_types {
            Ok(event_types) => self.view.set_event_types(event_types),
            Err(e) => log::warn!("failed to load event types: {}", e),
        }
    }

    pub fn tick(&mut self, dt: Duration) {
        self.poll_startup();
        self.view.tick(dt);
    }

    /// Pan the map as a short gesture
    pub fn pan(&mut self, dx: i32, dy: i32) {
        self.view.with_map(|map| {
            map.begin_gesture();
            map.pan_by(dx, dy);
            map.end_gesture();
        });
    }

    pub fn zoom(&mut self, delta: f64) {
        self.view.with_map(|map| {
            let zoom = map.viewport().zoom + delta;
            map.zoom_to(zoom);
        });
    }

    fn pixel(&self, col: u16, row: u16) -> Option<(i32, i32)> {
        map_pixel(self.layout?.map, col, row)
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        // Only handle key press events (not release)
        if key.kind != KeyEventKind::Press {
            return;
        }
        if self.time_input.is_some() {
            self.edit_time_input(key.code);
            return;
        }
        let panel_open = self.view.panel().open;
        match key.code {
            // Digits typed on the focused event time start a date entry
            KeyCode::Char(c)
                if c.is_ascii_digit() && panel_open && self.view.panel().focus == PanelField::EventTime =>
            {
                self.time_input = Some(c.to_string());
            }
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => {
                if self.view.scenario().venue_id.is_some() {
                    self.view.deselect_venue();
                }
            }

            // Up/Down choose in the open panel, pan otherwise
            KeyCode::Up if panel_open => self.view.panel_step(-1),
            KeyCode::Down if panel_open => self.view.panel_step(1),

            KeyCode::Left | KeyCode::Char('h') => self.pan(-KEY_PAN.0, 0),
            KeyCode::Right | KeyCode::Char('l') => self.pan(KEY_PAN.0, 0),
            KeyCode::Up | KeyCode::Char('k') => self.pan(0, -KEY_PAN.1),
            KeyCode::Down | KeyCode::Char('j') => self.pan(0, KEY_PAN.1),

            KeyCode::Char('+') | KeyCode::Char('=') => self.zoom(1.0),
            KeyCode::Char('-') | KeyCode::Char('_') => self.zoom(-1.0),

            KeyCode::Enter | KeyCode::Char(' ') => {
                if self.view.selected_venue().is_some() {
                    self.view.panel_toggle();
                }
            }
            KeyCode::Tab => self.view.panel_focus_next(),
            KeyCode::Char('[') => self.view.shift_event_time(-HOUR_MS),
            KeyCode::Char(']') => self.view.shift_event_time(HOUR_MS),
            KeyCode::Char('{') => self.view.shift_event_days(-1),
            KeyCode::Char('}') => self.view.shift_event_days(1),
            _ => {}
        }
    }

    fn edit_time_input(&mut self, code: KeyCode) {
        let Some(input) = self.time_input.as_mut() else {
            return;
        };
        match code {
            KeyCode::Char(c) if c.is_ascii_digit() || matches!(c, '-' | 'T' | ':') => input.push(c),
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Enter => {
                if let Some(input) = self.time_input.take() {
                    if !self.view.set_event_time_input(&input) {
                        log::debug!("ignoring malformed event time {:?}", input);
                    }
                }
            }
            KeyCode::Esc => self.time_input = None,
            _ => {}
        }
    }

    /// Handle mouse events for hover, click, panning and zooming
    pub fn handle_mouse(&mut self, mouse: MouseEvent) {
        // Always track mouse position for cursor marker
        self.mouse_pos = Some((mouse.column, mouse.row));
        let pixel = self.pixel(mouse.column, mouse.row);

        match mouse.kind {
            MouseEventKind::Moved => self.view.with_map(|map| match pixel {
                Some((px, py)) => map.pointer_move(px, py),
                None => map.pointer_leave(),
            }),
            // Scroll wheel for zooming towards mouse position
            MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
                let Some((px, py)) = pixel else {
                    return;
                };
                let delta = if mouse.kind == MouseEventKind::ScrollUp {
                    SCROLL_ZOOM
                } else {
                    -SCROLL_ZOOM
                };
                self.view.with_map(|map| {
                    map.begin_gesture();
                    map.zoom_by_at(px, py, delta);
                    map.end_gesture();
                });
            }
            // Horizontal scroll for panning (trackpad two-finger swipe)
            MouseEventKind::ScrollLeft => self.pan(-KEY_PAN.0, 0),
            MouseEventKind::ScrollRight => self.pan(KEY_PAN.0, 0),
            MouseEventKind::Down(MouseButton::Left) => {
                self.last_mouse = pixel.map(|_| (mouse.column, mouse.row));
                self.dragged = false;
            }
            MouseEventKind::Drag(MouseButton::Left) => self.handle_drag(mouse.column, mouse.row),
            MouseEventKind::Up(MouseButton::Left) => {
                if self.dragged {
                    self.view.with_map(|map| map.end_gesture());
                } else if let (Some(_), Some((px, py))) = (self.last_mouse, pixel) {
                    self.view.with_map(|map| map.click(px, py));
                }
                self.last_mouse = None;
                self.dragged = false;
            }
            _ => {}
        }
    }

    fn handle_drag(&mut self, x: u16, y: u16) {
        let Some((last_x, last_y)) = self.last_mouse else {
            return;
        };
        // Drag moves the map with the pointer, one cell is 2x4 pixels
        let dx = (last_x as i32 - x as i32) * 2;
        let dy = (last_y as i32 - y as i32) * 4;
        let starting = !self.dragged;
        self.dragged = true;
        self.view.with_map(|map| {
            if starting {
                map.begin_gesture();
            }
            map.pan_by(dx, dy);
        });
        self.last_mouse = Some((x, y));
    }
}
