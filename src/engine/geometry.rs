use crate::braille::{BrailleCanvas, Rgb};
use glam::DVec2;

/// Draw a line using Bresenham's algorithm
pub fn draw_line(canvas: &mut BrailleCanvas, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut x = x0;
    let mut y = y0;

    loop {
        canvas.set_pixel_signed(x, y, color);

        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;

        if e2 >= dy {
            if x == x1 {
                break;
            }
            err += dy;
            x += sx;
        }

        if e2 <= dx {
            if y == y1 {
                break;
            }
            err += dx;
            y += sy;
        }
    }
}

/// Draw a line `width` pixels wide by stamping parallel Bresenham lines
pub fn draw_thick_line(canvas: &mut BrailleCanvas, x0: i32, y0: i32, x1: i32, y1: i32, width: i32, color: Rgb) {
    if width <= 1 {
        draw_line(canvas, x0, y0, x1, y1, color);
        return;
    }
    let steep = (y1 - y0).abs() > (x1 - x0).abs();
    let start = -(width - 1) / 2;
    for k in start..start + width {
        if steep {
            draw_line(canvas, x0 + k, y0, x1 + k, y1, color);
        } else {
            draw_line(canvas, x0, y0 + k, x1, y1 + k, color);
        }
    }
}

/// Draw a filled circle (for venue markers)
pub fn draw_circle(canvas: &mut BrailleCanvas, cx: i32, cy: i32, radius: i32, color: Rgb) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                canvas.set_pixel_signed(cx + dx, cy + dy, color);
            }
        }
    }
}

/// Scanline fill with the even-odd rule, so inner rings punch holes.
/// Rings are in sub-pixel canvas coordinates.
pub fn fill_polygon(canvas: &mut BrailleCanvas, rings: &[Vec<(f64, f64)>], color: Rgb) {
    let max_y = (canvas.height() * 4) as i32;
    let max_x = (canvas.width() * 2) as i32;

    let (min_ry, max_ry) = rings
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| (lo.min(y), hi.max(y)));
    if !min_ry.is_finite() {
        return;
    }

    let y_start = (min_ry.floor() as i32).max(0);
    let y_end = (max_ry.ceil() as i32).min(max_y - 1);
    let mut crossings: Vec<f64> = Vec::new();

    for y in y_start..=y_end {
        let scan = y as f64 + 0.5;
        crossings.clear();
        for ring in rings {
            if ring.len() < 3 {
                continue;
            }
            for i in 0..ring.len() {
                let (ax, ay) = ring[i];
                let (bx, by) = ring[(i + 1) % ring.len()];
                if (ay <= scan && by > scan) || (by <= scan && ay > scan) {
                    crossings.push(ax + (scan - ay) / (by - ay) * (bx - ax));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            let x_from = (pair[0].round() as i32).max(0);
            let x_to = (pair[1].round() as i32).min(max_x);
            for x in x_from..x_to {
                canvas.set_pixel(x as usize, y as usize, color);
            }
        }
    }
}

/// Even-odd point in polygon test over all rings
pub fn point_in_rings(point: (f64, f64), rings: &[Vec<(f64, f64)>]) -> bool {
    let (px, py) = point;
    let mut inside = false;
    for ring in rings {
        let n = ring.len();
        if n < 3 {
            continue;
        }
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = ring[i];
            let (xj, yj) = ring[j];
            if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
    }
    inside
}

/// Shortest distance from `p` to the segment `a`-`b`
pub fn distance_to_segment(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f64::EPSILON {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Shortest distance from `p` to a polyline
pub fn distance_to_polyline(p: DVec2, line: &[(f64, f64)]) -> f64 {
    match line {
        [] => f64::INFINITY,
        [only] => p.distance(DVec2::new(only.0, only.1)),
        _ => line
            .windows(2)
            .map(|w| distance_to_segment(p, DVec2::new(w[0].0, w[0].1), DVec2::new(w[1].0, w[1].1)))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Shift every segment of a ring `offset` pixels along its left normal
/// (negative values move to the right, i.e. inside a clockwise ring on screen).
pub fn offset_line(line: &[(f64, f64)], offset: f64) -> Vec<(f64, f64)> {
    if offset.abs() < f64::EPSILON || line.len() < 2 {
        return line.to_vec();
    }
    let normal_at = |i: usize| {
        let a = DVec2::new(line[i].0, line[i].1);
        let b = DVec2::new(line[i + 1].0, line[i + 1].1);
        let dir = (b - a).normalize_or_zero();
        DVec2::new(dir.y, -dir.x)
    };
    (0..line.len())
        .map(|i| {
            let n = match i {
                0 => normal_at(0),
                i if i == line.len() - 1 => normal_at(i - 1),
                i => (normal_at(i - 1) + normal_at(i)).normalize_or_zero(),
            };
            let p = DVec2::new(line[i].0, line[i].1) + n * offset;
            (p.x, p.y)
        })
        .collect()
}

/// Bounding box `[min_x, min_y, max_x, max_y]` of a set of points
pub fn bbox<'a>(points: impl IntoIterator<Item = &'a (f64, f64)>) -> Option<[f64; 4]> {
    points.into_iter().fold(None, |acc, &(x, y)| {
        Some(match acc {
            None => [x, y, x, y],
            Some([a, b, c, d]) => [a.min(x), b.min(y), c.max(x), d.max(y)],
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: Rgb = Rgb(1, 2, 3);

    fn square(x0: f64, y0: f64, size: f64) -> Vec<(f64, f64)> {
        vec![(x0, y0), (x0 + size, y0), (x0 + size, y0 + size), (x0, y0 + size), (x0, y0)]
    }

    #[test]
    fn test_horizontal_line() {
        let mut canvas = BrailleCanvas::new(5, 1);
        draw_line(&mut canvas, 0, 0, 9, 0, C);
        assert_eq!(canvas.to_string(), "⠉⠉⠉⠉⠉");
    }

    #[test]
    fn test_thick_line_covers_rows() {
        let mut canvas = BrailleCanvas::new(1, 1);
        draw_thick_line(&mut canvas, 0, 1, 1, 1, 3, C);
        // rows 0..=2 on both columns
        assert_eq!(canvas.to_string(), "⠿");
    }

    #[test]
    fn test_fill_polygon_fills_interior() {
        let mut canvas = BrailleCanvas::new(4, 2);
        fill_polygon(&mut canvas, &[square(0.0, 0.0, 8.0)], C);
        assert_eq!(canvas.to_string(), "⣿⣿⣿⣿\n⣿⣿⣿⣿");
    }

    #[test]
    fn test_fill_polygon_hole() {
        let mut canvas = BrailleCanvas::new(4, 2);
        fill_polygon(&mut canvas, &[square(0.0, 0.0, 8.0), square(2.0, 0.0, 4.0)], C);
        assert!(canvas.cell(1, 0).is_none());
        assert!(canvas.cell(0, 0).is_some());
    }

    #[test]
    fn test_point_in_rings() {
        let outer = square(0.0, 0.0, 10.0);
        assert!(point_in_rings((5.0, 5.0), &[outer.clone()]));
        assert!(!point_in_rings((15.0, 5.0), &[outer.clone()]));
        assert!(!point_in_rings((5.0, 5.0), &[outer, square(4.0, 4.0, 2.0)]));
    }

    #[test]
    fn test_distance_to_polyline() {
        let line = [(0.0, 0.0), (10.0, 0.0)];
        assert_eq!(distance_to_polyline(DVec2::new(5.0, 3.0), &line), 3.0);
        assert_eq!(distance_to_polyline(DVec2::new(13.0, 4.0), &line), 5.0);
    }

    #[test]
    fn test_offset_line_moves_along_normal() {
        let shifted = offset_line(&[(0.0, 0.0), (10.0, 0.0)], 2.0);
        assert_eq!(shifted, vec![(0.0, -2.0), (10.0, -2.0)]);
    }

    #[test]
    fn test_bbox() {
        let pts = [(1.0, 5.0), (-2.0, 3.0), (4.0, -1.0)];
        assert_eq!(bbox(&pts), Some([-2.0, -1.0, 4.0, 5.0]));
        assert_eq!(bbox(&[]), None);
    }
}
