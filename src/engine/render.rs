use crate::braille::{BrailleCanvas, Rgb};
use crate::engine::expr::EvalContext;
use crate::engine::feature::{Feature, Shape};
use crate::engine::geometry::{draw_circle, draw_thick_line, fill_polygon, offset_line};
use crate::engine::map::Map;
use crate::engine::projection::Viewport;
use crate::engine::style::{Layer, LayerKind, PropertyKind};

const DEFAULT_FILL: Rgb = Rgb(128, 128, 128);

/// Marker radius in braille pixels for an `icon-size`
pub fn marker_radius(icon_size: f64) -> i32 {
    (icon_size * 1.5).round().max(1.0) as i32
}

/// Stroke width in braille pixels for a `line-width` given in screen pixels
pub fn line_width_px(width: f64) -> i32 {
    (width / 2.0).round().clamp(1.0, 8.0) as i32
}

/// A text label in character cell coordinates
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub col: i32,
    pub row: i32,
    pub text: String,
    pub color: Rgb,
}

/// A frame of the map: one colored braille canvas plus labels drawn on top
pub struct RenderedMap {
    pub canvas: BrailleCanvas,
    pub labels: Vec<Label>,
}

/// Draw every layer of the map in order onto a canvas of `cols` x `rows` characters
pub fn render(map: &Map, cols: usize, rows: usize) -> RenderedMap {
    let mut viewport = map.viewport().clone();
    // Braille gives 2x4 resolution per character
    viewport.width = cols * 2;
    viewport.height = rows * 4;

    let mut canvas = BrailleCanvas::new(cols, rows);
    let mut labels = Vec::new();

    for layer in map.layers() {
        let Some(source) = map.source(&layer.source) else {
            continue;
        };
        for feature in source.features() {
            let ctx = EvalContext {
                zoom: viewport.zoom,
                feature: Some(feature),
            };
            match layer.kind {
                LayerKind::Fill => draw_fill(&mut canvas, layer, feature, &ctx, &viewport),
                LayerKind::Line => draw_outline(&mut canvas, layer, feature, &ctx, &viewport),
                LayerKind::Symbol => draw_symbol(&mut canvas, &mut labels, layer, feature, &ctx, &viewport),
            }
        }
    }

    RenderedMap { canvas, labels }
}

fn project_line(line: &[(f64, f64)], viewport: &Viewport) -> Vec<(f64, f64)> {
    line.iter().map(|&(lon, lat)| viewport.project_f64(lon, lat)).collect()
}

fn draw_fill(canvas: &mut BrailleCanvas, layer: &Layer, feature: &Feature, ctx: &EvalContext, viewport: &Viewport) {
    let opacity = layer.number(PropertyKind::Paint, "fill-opacity", ctx, 1.0);
    let color = layer.color(PropertyKind::Paint, "fill-color", ctx, DEFAULT_FILL).dim(opacity);
    for shape in &feature.shapes {
        if let Shape::Polygon(rings) = shape {
            let projected: Vec<Vec<(f64, f64)>> = rings.iter().map(|r| project_line(r, viewport)).collect();
            fill_polygon(canvas, &projected, color);
        }
    }
}

fn draw_outline(canvas: &mut BrailleCanvas, layer: &Layer, feature: &Feature, ctx: &EvalContext, viewport: &Viewport) {
    let opacity = layer.number(PropertyKind::Paint, "line-opacity", ctx, 1.0);
    let color = layer.color(PropertyKind::Paint, "line-color", ctx, Rgb::WHITE).dim(opacity);
    let width = line_width_px(layer.number(PropertyKind::Paint, "line-width", ctx, 1.0));
    let offset = layer.number(PropertyKind::Paint, "line-offset", ctx, 0.0) / 2.0;

    let lines: Vec<&[(f64, f64)]> = feature
        .shapes
        .iter()
        .flat_map(|shape| -> Vec<&[(f64, f64)]> {
            match shape {
                Shape::Line(line) => vec![line.as_slice()],
                Shape::Polygon(rings) => rings.iter().map(Vec::as_slice).collect(),
                Shape::Point(_) => Vec::new(),
            }
        })
        .collect();

    for line in lines {
        let projected = offset_line(&project_line(line, viewport), offset);
        draw_linestring(canvas, &projected, viewport, width, color);
    }
}

/// Draw a linestring with viewport culling
fn draw_linestring(canvas: &mut BrailleCanvas, line: &[(f64, f64)], viewport: &Viewport, width: i32, color: Rgb) {
    if line.len() < 2 {
        return;
    }

    let mut prev: Option<(i32, i32)> = None;

    for &(x, y) in line {
        let (px, py) = (x.round() as i32, y.round() as i32);

        if let Some((prev_x, prev_y)) = prev {
            if viewport.line_might_be_visible((prev_x, prev_y), (px, py)) {
                draw_thick_line(canvas, prev_x, prev_y, px, py, width, color);
            }
        }

        prev = Some((px, py));
    }
}

/// Anchor point of a feature for labels: the point itself, or the bbox center
fn anchor(feature: &Feature) -> Option<(f64, f64)> {
    feature
        .point()
        .or_else(|| feature.bbox().map(|[a, b, c, d]| ((a + c) / 2.0, (b + d) / 2.0)))
}

/// Substitute `{property}` tokens in a `text-field` template
pub fn format_text_field(template: &str, feature: &Feature) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                let key = &rest[start + 1..start + end];
                if let Some(value) = feature.property(key) {
                    match value.as_str() {
                        Some(s) => out.push_str(s),
                        None if !value.is_null() => out.push_str(&value.to_string()),
                        None => {}
                    }
                }
                rest = &rest[start + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn draw_symbol(
    canvas: &mut BrailleCanvas,
    labels: &mut Vec<Label>,
    layer: &Layer,
    feature: &Feature,
    ctx: &EvalContext,
    viewport: &Viewport,
) {
    let Some((lon, lat)) = anchor(feature) else {
        return;
    };
    let (px, py) = viewport.project(lon, lat);
    if !viewport.is_visible(px, py) {
        return;
    }

    if let Some(point) = feature.point() {
        let (mx, my) = viewport.project(point.0, point.1);
        let icon_size = layer.number(PropertyKind::Layout, "icon-size", ctx, 1.0);
        let icon_color = layer.color(PropertyKind::Paint, "icon-color", ctx, Rgb::WHITE);
        draw_circle(canvas, mx, my, marker_radius(icon_size), icon_color);
    }

    let opacity = layer.number(PropertyKind::Paint, "text-opacity", ctx, 1.0);
    let template = layer
        .property(PropertyKind::Layout, "text-field")
        .and_then(|e| e.eval(ctx).as_text().map(str::to_string));
    let Some(template) = template else {
        return;
    };
    if opacity < 0.5 {
        return;
    }
    let text = format_text_field(&template, feature);
    if text.is_empty() {
        return;
    }

    let offset = layer
        .property(PropertyKind::Layout, "text-offset")
        .and_then(|e| e.eval(ctx).as_numbers().map(<[f64]>::to_vec))
        .unwrap_or_default();
    let (dx, dy) = (offset.first().copied().unwrap_or(0.0), offset.get(1).copied().unwrap_or(0.0));
    let anchor_mode = layer
        .property(PropertyKind::Layout, "text-anchor")
        .and_then(|e| e.eval(ctx).as_text().map(str::to_string))
        .unwrap_or_else(|| "center".to_string());

    let mut col = px / 2 + dx.round() as i32;
    let row = py / 4 + dy.round() as i32;
    if anchor_mode == "center" {
        col -= text.chars().count() as i32 / 2;
    }

    labels.push(Label {
        col,
        row,
        text,
        color: layer.color(PropertyKind::Paint, "text-color", ctx, Rgb::WHITE),
    });
}
