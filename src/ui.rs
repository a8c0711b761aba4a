use crate::braille::Rgb;
use crate::content::occupancy_color;
use crate::engine::map::{Cursor, Map};
use crate::engine::render::{render as render_layers, RenderedMap};
use crate::engine::style::MapStyle;
use crate::panel::{date_input_from_ms, min_event_time, PanelField, VenuePanel};
use crate::view::VenueMapView;
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Widget, Wrap},
    Frame,
};

const PANEL_WIDTH: u16 = 38;

/// Screen regions, shared by drawing and mouse hit testing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenLayout {
    pub header: Rect,
    /// Inside of the map border
    pub map: Rect,
    pub panel: Option<Rect>,
    pub status: Rect,
}

pub fn screen_layout(area: Rect, panel_open: bool) -> ScreenLayout {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Venue name bar
            Constraint::Min(3),    // Map and panel
            Constraint::Length(1), // Status bar
        ])
        .split(area);

    let (map_outer, panel) = if panel_open {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(10), Constraint::Length(PANEL_WIDTH)])
            .split(rows[1]);
        (cols[0], Some(cols[1]))
    } else {
        (rows[1], None)
    };

    ScreenLayout {
        header: rows[0],
        map: Block::default().borders(Borders::ALL).inner(map_outer),
        panel,
        status: rows[2],
    }
}

/// Braille pixel under a terminal cell of the map area, if inside it
pub fn map_pixel(map_area: Rect, column: u16, row: u16) -> Option<(i32, i32)> {
    let inside = column >= map_area.x
        && column < map_area.x + map_area.width
        && row >= map_area.y
        && row < map_area.y + map_area.height;
    inside.then(|| {
        (
            (column - map_area.x) as i32 * 2 + 1,
            (row - map_area.y) as i32 * 4 + 2,
        )
    })
}

fn color(rgb: Rgb) -> Color {
    Color::Rgb(rgb.0, rgb.1, rgb.2)
}

/// Render the UI
pub fn render(
    frame: &mut Frame,
    view: &VenueMapView,
    style: MapStyle,
    mouse: Option<(u16, u16)>,
    time_input: Option<&str>,
) {
    let layout = screen_layout(frame.area(), view.panel().open);

    render_header(frame, view, layout.header);
    render_map(frame, view, style, &layout, mouse);
    if let Some(area) = layout.panel {
        render_panel(frame, view, area, time_input);
    }
    render_status_bar(frame, view, layout.status);
}

fn render_header(frame: &mut Frame, view: &VenueMapView, area: Rect) {
    let text = match (view.scenario().venue_id.as_ref(), view.selected_venue()) {
        (None, _) => Span::styled(" Venues ", Style::default().fg(Color::Cyan)),
        (Some(_), None) => Span::styled("Loading...", Style::default().fg(Color::DarkGray)),
        (Some(_), Some(venue)) => Span::styled(
            format!(" {} ", venue.name),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
    };
    frame.render_widget(Paragraph::new(Line::from(text)).centered(), area);
}

fn render_map(frame: &mut Frame, view: &VenueMapView, style: MapStyle, layout: &ScreenLayout, mouse: Option<(u16, u16)>) {
    let outer = Rect {
        x: layout.map.x.saturating_sub(1),
        y: layout.map.y.saturating_sub(1),
        width: layout.map.width + 2,
        height: layout.map.height + 2,
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color(style.chrome())))
        .style(Style::default().bg(color(style.background())))
        .title(Span::styled(
            " Parking & Congestion ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
    frame.render_widget(block, outer);

    let Some(map) = view.map() else {
        return;
    };
    let inner = layout.map;
    let rendered = render_layers(map, inner.width as usize, inner.height as usize);

    let cursor_pos = mouse.filter(|&(col, row)| map_pixel(inner, col, row).is_some());

    frame.render_widget(
        MapWidget {
            rendered,
            map,
            cursor_pos,
        },
        inner,
    );
}

/// Custom widget that renders the braille map with labels and popup on top
struct MapWidget<'a> {
    rendered: RenderedMap,
    map: &'a Map,
    cursor_pos: Option<(u16, u16)>,
}

impl MapWidget<'_> {
    fn put_text(text: &str, x: i32, y: i32, style: Style, area: Rect, buf: &mut Buffer) {
        if y < 0 || y >= area.height as i32 {
            return;
        }
        for (i, ch) in text.chars().enumerate() {
            let cx = x + i as i32;
            if cx < 0 {
                continue;
            }
            if cx >= area.width as i32 {
                break;
            }
            buf[(area.x + cx as u16, area.y + y as u16)].set_char(ch).set_style(style);
        }
    }
}

impl Widget for MapWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let canvas = &self.rendered.canvas;
        for row in 0..area.height as usize {
            for col in 0..area.width as usize {
                // Empty cells keep the block background
                let Some((ch, rgb)) = canvas.cell(col, row) else {
                    continue;
                };
                buf[(area.x + col as u16, area.y + row as u16)]
                    .set_char(ch)
                    .set_fg(color(rgb));
            }
        }

        for label in &self.rendered.labels {
            let style = Style::default().fg(color(label.color)).add_modifier(Modifier::BOLD);
            Self::put_text(&label.text, label.col, label.row, style, area, buf);
        }

        if let Some(popup) = self.map.popup() {
            let (px, py) = self.map.viewport().project(popup.lnglat.0, popup.lnglat.1);
            let text = format!(" {} ", popup.text);
            let style = Style::default()
                .fg(Color::Black)
                .bg(Color::White)
                .add_modifier(Modifier::BOLD);
            let width = text.chars().count() as i32;
            let x = (px / 2 - width / 2).clamp(0, (area.width as i32 - width).max(0));
            Self::put_text(&text, x, py / 4 - 2, style, area, buf);
        }

        // Render cursor marker
        if let Some((cx, cy)) = self.cursor_pos {
            let marker = match self.map.cursor() {
                Cursor::Pointer => ('◉', Color::Yellow),
                Cursor::Default => ('╋', Color::Red),
            };
            buf[(cx, cy)].set_char(marker.0).set_fg(marker.1);
        }
    }
}

fn field_line<'a>(panel: &VenuePanel, field: PanelField, label: &'a str, value: String) -> Vec<Line<'a>> {
    let focused = panel.focus == field;
    let marker = if focused { "▶ " } else { "  " };
    let value_style = if focused {
        Style::default().fg(Color::Black).bg(Color::Cyan)
    } else {
        Style::default().fg(Color::White)
    };
    vec![
        Line::from(Span::styled(format!("{}{}", marker, label), Style::default().fg(Color::DarkGray))),
        Line::from(vec![Span::raw("  "), Span::styled(format!(" {} ▾ ", value), value_style)]),
        Line::from(""),
    ]
}

fn render_panel(frame: &mut Frame, view: &VenueMapView, area: Rect, time_input: Option<&str>) {
    frame.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .style(Style::default().bg(Color::Rgb(45, 55, 72)));

    let Some(venue) = view.selected_venue() else {
        frame.render_widget(Paragraph::new("Loading...").centered().block(block), area);
        return;
    };
    let panel = view.panel();
    let scenario = view.scenario();
    let choice = |field| {
        panel
            .selected_choice(field)
            .map(|c| c.label.clone())
            .unwrap_or_else(|| "…".to_string())
    };

    let mut lines = vec![
        Line::from(vec![
            Span::styled(venue.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
            Span::styled("  [Esc] ✕", Style::default().fg(Color::DarkGray)),
        ]),
        Line::from(venue.description.clone()),
        Line::from(""),
    ];
    let event_time = match time_input {
        Some(input) => format!("{}_", input),
        None => scenario.event_time.map(date_input_from_ms).unwrap_or_default(),
    };
    lines.extend(field_line(panel, PanelField::EventTime, "Event time:", event_time));
    lines.push(Line::from(Span::styled(
        format!("  min {}", date_input_from_ms(min_event_time(view.now_ms()))),
        Style::default().fg(Color::DarkGray),
    )));
    lines.extend(field_line(panel, PanelField::EventType, "Event type:", choice(PanelField::EventType)));
    let occupancy_label = format!("Occupancy (max: {}):", panel.max_capacity().round() as i64);
    lines.extend(field_line(panel, PanelField::Occupancy, &occupancy_label, choice(PanelField::Occupancy)));
    lines.extend(field_line(panel, PanelField::Offset, "Check at:", choice(PanelField::Offset)));

    let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_status_bar(frame: &mut Frame, view: &VenueMapView, area: Rect) {
    let (zoom, center) = view
        .map()
        .map(|m| {
            let v = m.viewport();
            (format!("{:.1}", v.zoom), format!("{:.4}, {:.4}", v.center_lat, v.center_lon))
        })
        .unwrap_or_default();
    let overlay = if view.scenario().is_complete() {
        Span::styled("overlay ●", Style::default().fg(Color::Green))
    } else {
        Span::styled("overlay ○", Style::default().fg(Color::DarkGray))
    };

    let mut legend: Vec<Span> = (0..=4)
        .map(|i| Span::styled("█", Style::default().fg(color(occupancy_color(i as f64 / 4.0)))))
        .collect();
    if view.congestion_enabled() {
        legend.push(Span::styled(" +traffic", Style::default().fg(Color::DarkGray)));
    }

    let mut spans = vec![
        Span::styled(" Zoom: ", Style::default().fg(Color::DarkGray)),
        Span::styled(zoom, Style::default().fg(Color::Yellow)),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(center, Style::default().fg(Color::Cyan)),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        overlay,
        Span::raw(" "),
    ];
    spans.extend(legend);
    spans.extend([
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(view.location().to_string(), Style::default().fg(Color::Magenta)),
        Span::styled(
            " | hjkl:pan +/-:zoom enter:panel tab:field ↑↓:choose 0-9:type time []:±1h {}:±1d esc:back q:quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
