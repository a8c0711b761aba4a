use crate::braille::Rgb;
use crate::engine::events::{EventKind, ListenerId};
use crate::engine::expr::{parse_color, Expr, Value};
use crate::engine::feature::Feature;
use crate::engine::map::{Cursor, Map, MapError, Popup};
use crate::engine::style::{Layer, LayerKind, SourceData};
use geojson::FeatureCollection;

pub const VENUES: &str = "venues";
pub const PARKING: &str = "parking";
pub const PARKING_TEXT: &str = "parking-text";
pub const PARKING_OUTLINE_BIG: &str = "parking-outline-big";
pub const PARKING_OUTLINE: &str = "parking-outline";
pub const CONGESTION: &str = "congestion";

const GREEN: &str = "hsl(120, 100%, 50%)";
const ORANGE: &str = "hsl(20, 100%, 50%)";
const RED: &str = "hsl(0, 100%, 50%)";
const LABEL_YELLOW: &str = "#ffff00";

fn color(s: &str) -> Value {
    parse_color(s).map(Value::Color).unwrap_or(Value::Null)
}

/// Green at 0, red at full
fn occupancy_ramp() -> Expr {
    Expr::interpolate(
        Expr::div(Expr::get("occupancy"), Expr::get("capacity")),
        vec![(0.0, color(GREEN)), (1.0, color(RED))],
    )
}

fn zoom_ramp(stops: &[(f64, f64)]) -> Expr {
    Expr::interpolate(Expr::Zoom, stops.iter().map(|&(z, v)| (z, Value::Number(v))).collect())
}

pub fn layers() -> Vec<Layer> {
    vec![
        Layer::new(CONGESTION, LayerKind::Line, CONGESTION)
            .paint(
                "line-color",
                Expr::interpolate(
                    Expr::get("congestion"),
                    vec![(0.0, color(GREEN)), (0.2, color(ORANGE)), (1.0, color(RED))],
                ),
            )
            .paint("line-width", Expr::number(4.0))
            .paint("line-opacity", Expr::number(0.7)),
        Layer::new(PARKING, LayerKind::Fill, PARKING).paint("fill-color", occupancy_ramp()),
        Layer::new(PARKING_TEXT, LayerKind::Symbol, PARKING)
            .layout("icon-size", Expr::number(1.0))
            .layout("text-field", Expr::text("{name}"))
            .layout("text-anchor", Expr::text("left"))
            .layout("text-offset", Expr::numbers(&[0.0, -1.5]))
            .paint("text-color", Expr::color(LABEL_YELLOW)),
        Layer::new(PARKING_OUTLINE_BIG, LayerKind::Line, PARKING)
            .paint("line-color", occupancy_ramp())
            .paint("line-width", zoom_ramp(&[(12.0, 2.0), (18.0, 30.0)]))
            .paint("line-offset", zoom_ramp(&[(12.0, 0.0), (18.0, -4.0)]))
            .paint("line-blur", zoom_ramp(&[(10.0, 2.0), (18.0, 15.0)])),
        Layer::new(PARKING_OUTLINE, LayerKind::Line, PARKING)
            .paint("line-color", Expr::color("#ffffff"))
            .paint("line-width", Expr::number(2.0)),
        Layer::new(VENUES, LayerKind::Symbol, VENUES)
            .layout("icon-size", Expr::number(2.0))
            .layout("text-field", Expr::text("{name}"))
            .layout("text-anchor", Expr::text("center"))
            .layout("text-offset", Expr::numbers(&[0.0, -2.5]))
            .paint("text-color", Expr::color(LABEL_YELLOW))
            .paint("text-opacity", Expr::number(0.0)),
    ]
}

/// Add the venue, parking and congestion sources with their layers and the
/// parking popup. Overlay sources start empty.
pub fn install_content(map: &mut Map, venues: &FeatureCollection) -> Result<Vec<ListenerId>, MapError> {
    map.add_source(VENUES, SourceData::Features(venues.clone()))?;
    map.add_source(PARKING, SourceData::Empty)?;
    map.add_source(CONGESTION, SourceData::Empty)?;
    for layer in layers() {
        map.add_layer(layer)?;
    }
    log::info!("installed map content for {} venues", venues.features.len());
    Ok(add_popup(map, PARKING))
}

fn rounded(value: Option<f64>) -> String {
    value.map(|v| (v.round() as i64).to_string()).unwrap_or_else(|| "?".to_string())
}

/// `name: occupancy/capacity [pct%]`, or `no info` without properties
pub fn popup_text(feature: Option<&Feature>) -> String {
    let Some(feature) = feature.filter(|f| f.properties.is_some()) else {
        return "no info".to_string();
    };
    let occupancy = feature.number("occupancy");
    let capacity = feature.number("capacity");
    let percent = match (occupancy, capacity) {
        (Some(o), Some(c)) if c != 0.0 => Some(100.0 * o / c),
        _ => None,
    };
    format!(
        "{}: {}/{} [{}%]",
        feature.text("name").unwrap_or_default(),
        rounded(occupancy),
        rounded(capacity),
        rounded(percent)
    )
}

/// Show a popup and pointer cursor while hovering `layer`
pub fn add_popup(map: &mut Map, layer: &str) -> Vec<ListenerId> {
    let enter = map.on_layer(EventKind::MouseEnter, layer, |map, event| {
        map.set_cursor(Cursor::Pointer);
        let lnglat = event.lnglat.unwrap_or_default();
        map.set_popup(Some(Popup {
            lnglat,
            text: popup_text(event.features.first()),
        }));
    });
    let leave = map.on_layer(EventKind::MouseLeave, layer, |map, _| {
        map.set_cursor(Cursor::Default);
        map.set_popup(None);
    });
    vec![enter, leave]
}

/// Color used for a parking lot at `ratio` occupancy, for legends
pub fn occupancy_color(ratio: f64) -> Rgb {
    let green = parse_color(GREEN).unwrap_or(Rgb(0, 255, 0));
    let red = parse_color(RED).unwrap_or(Rgb(255, 0, 0));
    green.lerp(red, ratio.clamp(0.0, 1.0))
}
