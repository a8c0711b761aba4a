use crate::braille::Rgb;
use crate::engine::feature::{Feature, FeatureId};

/// Result of evaluating an expression
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    Color(Rgb),
    Text(String),
    Numbers(Vec<f64>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Rgb> {
        match self {
            Value::Color(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_numbers(&self) -> Option<&[f64]> {
        match self {
            Value::Numbers(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Feature property lookup
    Get(String),
    /// Current camera zoom
    Zoom,
    Div(Box<Expr>, Box<Expr>),
    /// Linear interpolation between `(input, output)` stops sorted by input
    Interpolate { input: Box<Expr>, stops: Vec<(f64, Value)> },
    /// `then` for features whose id is in `ids`, `otherwise` for the rest
    IdCase {
        ids: Vec<FeatureId>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Inputs available while evaluating an expression
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub zoom: f64,
    pub feature: Option<&'a Feature>,
}

impl Expr {
    pub fn number(n: f64) -> Self {
        Expr::Literal(Value::Number(n))
    }

    pub fn text(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }

    pub fn numbers(v: &[f64]) -> Self {
        Expr::Literal(Value::Numbers(v.to_vec()))
    }

    /// Color literal from `#rrggbb` or `hsl(h, s%, l%)`; unparseable input yields null
    pub fn color(s: &str) -> Self {
        Expr::Literal(parse_color(s).map(Value::Color).unwrap_or(Value::Null))
    }

    pub fn get(key: &str) -> Self {
        Expr::Get(key.to_string())
    }

    pub fn div(a: Expr, b: Expr) -> Self {
        Expr::Div(Box::new(a), Box::new(b))
    }

    pub fn interpolate(input: Expr, stops: Vec<(f64, Value)>) -> Self {
        Expr::Interpolate {
            input: Box::new(input),
            stops,
        }
    }

    pub fn id_case(ids: Vec<FeatureId>, then: Expr, otherwise: Expr) -> Self {
        Expr::IdCase {
            ids,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Literal number, if this expression is one
    pub fn as_number_literal(&self) -> Option<f64> {
        match self {
            Expr::Literal(v) => v.as_number(),
            _ => None,
        }
    }

    pub fn eval(&self, ctx: &EvalContext) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Get(key) => ctx
                .feature
                .and_then(|f| f.property(key))
                .map(json_to_value)
                .unwrap_or(Value::Null),
            Expr::Zoom => Value::Number(ctx.zoom),
            Expr::Div(a, b) => match (a.eval(ctx).as_number(), b.eval(ctx).as_number()) {
                (Some(a), Some(b)) if b != 0.0 => Value::Number(a / b),
                _ => Value::Null,
            },
            Expr::Interpolate { input, stops } => match input.eval(ctx).as_number() {
                Some(x) => interpolate(x, stops),
                None => Value::Null,
            },
            Expr::IdCase { ids, then, otherwise } => {
                let hit = ctx
                    .feature
                    .and_then(|f| f.id.as_ref())
                    .is_some_and(|id| ids.contains(id));
                if hit {
                    then.eval(ctx)
                } else {
                    otherwise.eval(ctx)
                }
            }
        }
    }
}

fn json_to_value(json: &geojson::JsonValue) -> Value {
    match json {
        geojson::JsonValue::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        geojson::JsonValue::String(s) => Value::Text(s.clone()),
        geojson::JsonValue::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
        _ => Value::Null,
    }
}

fn interpolate(x: f64, stops: &[(f64, Value)]) -> Value {
    let Some((first, last)) = stops.first().zip(stops.last()) else {
        return Value::Null;
    };
    if x <= first.0 {
        return first.1.clone();
    }
    if x >= last.0 {
        return last.1.clone();
    }
    for pair in stops.windows(2) {
        let (x0, lo) = (pair[0].0, &pair[0].1);
        let (x1, hi) = (pair[1].0, &pair[1].1);
        if x >= x0 && x <= x1 {
            let t = if x1 > x0 { (x - x0) / (x1 - x0) } else { 0.0 };
            return match (lo, hi) {
                (Value::Number(a), Value::Number(b)) => Value::Number(a + (b - a) * t),
                (Value::Color(a), Value::Color(b)) => Value::Color(a.lerp(*b, t)),
                _ => lo.clone(),
            };
        }
    }
    last.1.clone()
}

/// Parse `#rrggbb` or `hsl(h, s%, l%)`
pub fn parse_color(s: &str) -> Option<Rgb> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return Some(Rgb(channel(0)?, channel(2)?, channel(4)?));
    }
    let inner = s.strip_prefix("hsl(")?.strip_suffix(')')?;
    let mut parts = inner.split(',').map(|p| p.trim().trim_end_matches('%').parse::<f64>());
    let h = parts.next()?.ok()?;
    let sat = parts.next()?.ok()? / 100.0;
    let light = parts.next()?.ok()? / 100.0;
    Some(hsl_to_rgb(h, sat, light))
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> Rgb {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let to_u8 = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb(to_u8(r), to_u8(g), to_u8(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(id: &str, props: serde_json::Value) -> Feature {
        Feature {
            id: Some(FeatureId::new(id)),
            properties: props.as_object().cloned(),
            shapes: Vec::new(),
        }
    }

    #[test]
    fn test_parse_colors() {
        assert_eq!(parse_color("hsl(120, 100%, 50%)"), Some(Rgb(0, 255, 0)));
        assert_eq!(parse_color("hsl(0, 100%, 50%)"), Some(Rgb(255, 0, 0)));
        assert_eq!(parse_color("hsl(20, 100%, 50%)"), Some(Rgb(255, 85, 0)));
        assert_eq!(parse_color("#ffff00"), Some(Rgb(255, 255, 0)));
        assert_eq!(parse_color("blue"), None);
        // Six bytes but not six hex digits
        assert_eq!(parse_color("#ffé00"), None);
        assert_eq!(parse_color("#€ff0"), None);
    }

    #[test]
    fn test_ratio_ramp() {
        let ramp = Expr::interpolate(
            Expr::div(Expr::get("occupancy"), Expr::get("capacity")),
            vec![(0.0, Value::Color(Rgb(0, 255, 0))), (1.0, Value::Color(Rgb(255, 0, 0)))],
        );
        let lot = feature("1", json!({"occupancy": 30, "capacity": 60}));
        let ctx = EvalContext { zoom: 12.0, feature: Some(&lot) };
        assert_eq!(ramp.eval(&ctx), Value::Color(Rgb(128, 128, 0)));

        let full = feature("2", json!({"occupancy": 90, "capacity": 60}));
        let ctx = EvalContext { zoom: 12.0, feature: Some(&full) };
        assert_eq!(ramp.eval(&ctx), Value::Color(Rgb(255, 0, 0)));

        let unknown = feature("3", json!({}));
        let ctx = EvalContext { zoom: 12.0, feature: Some(&unknown) };
        assert_eq!(ramp.eval(&ctx), Value::Null);
    }

    #[test]
    fn test_zoom_interpolation() {
        let width = Expr::interpolate(Expr::Zoom, vec![(12.0, Value::Number(2.0)), (18.0, Value::Number(30.0))]);
        let at = |zoom| width.eval(&EvalContext { zoom, feature: None }).as_number();
        assert_eq!(at(10.0), Some(2.0));
        assert_eq!(at(15.0), Some(16.0));
        assert_eq!(at(20.0), Some(30.0));
    }

    #[test]
    fn test_id_case() {
        let expr = Expr::id_case(vec![FeatureId::new("7")], Expr::number(3.0), Expr::number(2.0));
        let hovered = feature("7", json!({}));
        let other = feature("8", json!({}));
        assert_eq!(expr.eval(&EvalContext { zoom: 0.0, feature: Some(&hovered) }), Value::Number(3.0));
        assert_eq!(expr.eval(&EvalContext { zoom: 0.0, feature: Some(&other) }), Value::Number(2.0));
        assert_eq!(expr.eval(&EvalContext { zoom: 0.0, feature: None }), Value::Number(2.0));
    }
}
