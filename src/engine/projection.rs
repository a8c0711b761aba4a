use std::f64::consts::{LN_10, LN_2, PI};

/// Pixel size of zoom level 0 (the whole world) in braille pixels.
pub const TILE_SIZE: f64 = 256.0;
pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 22.0;
/// Web Mercator latitude limit.
const MAX_LAT: f64 = 85.051129;

/// Geographic bounding box `[min_lon, min_lat, max_lon, max_lat]`.
pub type Bounds = [f64; 4];

/// Viewport representing the visible map area, zoom level and pitch
#[derive(Clone, Debug)]
pub struct Viewport {
    /// Center longitude (-180 to 180)
    pub center_lon: f64,
    /// Center latitude (-85 to 85)
    pub center_lat: f64,
    /// Zoom level, world is `TILE_SIZE * 2^zoom` pixels wide
    pub zoom: f64,
    /// Camera pitch in degrees, applied as vertical foreshortening
    pub pitch: f64,
    /// Canvas pixel width
    pub width: usize,
    /// Canvas pixel height
    pub height: usize,
}

fn mercator_x(lon: f64) -> f64 {
    (lon + 180.0) / 360.0
}

fn mercator_y(lat: f64) -> f64 {
    let lat_rad = lat.clamp(-MAX_LAT, MAX_LAT) * PI / 180.0;
    (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0
}

fn lon_from_x(x: f64) -> f64 {
    x * 360.0 - 180.0
}

fn lat_from_y(y: f64) -> f64 {
    (PI * (1.0 - 2.0 * y)).sinh().atan() * 180.0 / PI
}

impl Viewport {
    pub fn new(center_lon: f64, center_lat: f64, zoom: f64, width: usize, height: usize) -> Self {
        Self {
            center_lon,
            center_lat,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            pitch: 0.0,
            width,
            height,
        }
    }

    fn world_size(&self) -> f64 {
        TILE_SIZE * 2f64.powf(self.zoom)
    }

    /// Degrees of longitude covered by one pixel
    pub fn degrees_per_pixel(&self) -> f64 {
        360.0 / self.world_size()
    }

    fn vertical_scale(&self) -> f64 {
        self.world_size() * self.pitch.to_radians().cos().max(0.2)
    }

    /// Pan the viewport by pixel delta
    pub fn pan(&mut self, dx: i32, dy: i32) {
        let x = mercator_x(self.center_lon) + dx as f64 / self.world_size();
        let y = mercator_y(self.center_lat) + dy as f64 / self.vertical_scale();
        self.center_lon = lon_from_x(x);
        self.center_lat = lat_from_y(y.clamp(0.0, 1.0)).clamp(-MAX_LAT, MAX_LAT);

        // Wrap longitude
        if self.center_lon > 180.0 {
            self.center_lon -= 360.0;
        } else if self.center_lon < -180.0 {
            self.center_lon += 360.0;
        }
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn set_pitch(&mut self, pitch: f64, max_pitch: f64) {
        self.pitch = pitch.clamp(0.0, max_pitch);
    }

    /// Zoom by `delta` levels keeping the pixel under the pointer fixed
    pub fn zoom_at(&mut self, px: i32, py: i32, delta: f64) {
        // Get the geographic coordinates under the mouse
        let (lon, lat) = self.unproject(px, py);

        self.set_zoom(self.zoom + delta);

        // Calculate where that point would now project to
        let (new_px, new_py) = self.project(lon, lat);

        // Pan to compensate
        self.pan(new_px - px, new_py - py);
    }

    /// Unproject pixel coordinates back to geographic coordinates (lon, lat)
    pub fn unproject(&self, px: i32, py: i32) -> (f64, f64) {
        let x = (px as f64 - self.width as f64 / 2.0) / self.world_size() + mercator_x(self.center_lon);
        let y = (py as f64 - self.height as f64 / 2.0) / self.vertical_scale() + mercator_y(self.center_lat);
        (lon_from_x(x), lat_from_y(y))
    }

    /// Project a geographic coordinate (lon, lat) to pixel coordinates
    pub fn project(&self, lon: f64, lat: f64) -> (i32, i32) {
        let (x, y) = self.project_f64(lon, lat);
        (x.round() as i32, y.round() as i32)
    }

    /// Sub-pixel projection used by polygon rasterization
    pub fn project_f64(&self, lon: f64, lat: f64) -> (f64, f64) {
        let px = (mercator_x(lon) - mercator_x(self.center_lon)) * self.world_size() + self.width as f64 / 2.0;
        let py = (mercator_y(lat) - mercator_y(self.center_lat)) * self.vertical_scale() + self.height as f64 / 2.0;
        (px, py)
    }

    /// Check if a projected point is visible in the viewport
    pub fn is_visible(&self, px: i32, py: i32) -> bool {
        px >= -10
            && px < self.width as i32 + 10
            && py >= -10
            && py < self.height as i32 + 10
    }

    /// Check if a line segment might be visible (rough bounding box check)
    pub fn line_might_be_visible(&self, p1: (i32, i32), p2: (i32, i32)) -> bool {
        let min_x = p1.0.min(p2.0);
        let max_x = p1.0.max(p2.0);
        let min_y = p1.1.min(p2.1);
        let max_y = p1.1.max(p2.1);

        max_x >= 0
            && min_x < self.width as i32
            && max_y >= 0
            && min_y < self.height as i32
    }

    /// Camera that shows `bounds` with `padding` pixels on each side, never
    /// zooming past `max_zoom`.
    pub fn fitted(&self, bounds: Bounds, padding: f64, max_zoom: f64) -> (f64, f64, f64) {
        let [min_lon, min_lat, max_lon, max_lat] = bounds;
        let x0 = mercator_x(min_lon);
        let x1 = mercator_x(max_lon);
        let y0 = mercator_y(max_lat);
        let y1 = mercator_y(min_lat);

        let avail_w = (self.width as f64 - 2.0 * padding).max(1.0);
        let avail_h = (self.height as f64 - 2.0 * padding).max(1.0);
        let pitch_scale = self.pitch.to_radians().cos().max(0.2);

        let zoom_for = |span: f64, avail: f64| {
            if span <= f64::EPSILON {
                f64::INFINITY
            } else {
                (avail / (span * TILE_SIZE)).log2()
            }
        };
        let zoom = zoom_for(x1 - x0, avail_w)
            .min(zoom_for((y1 - y0) * pitch_scale, avail_h))
            .min(max_zoom)
            .clamp(MIN_ZOOM, MAX_ZOOM);

        let center_lon = lon_from_x((x0 + x1) / 2.0);
        let center_lat = lat_from_y((y0 + y1) / 2.0);
        (center_lon, center_lat, zoom)
    }

    /// View state in the `#zoom/lat/lon[/bearing/pitch]` form used in shareable URLs
    pub fn to_hash(&self) -> String {
        let precision = ((self.zoom * LN_2 + (512.0 / 360.0 / 0.5f64).ln()) / LN_10)
            .ceil()
            .max(0.0) as usize;
        let mut hash = format!(
            "{}/{}/{}",
            trim_number(format!("{:.2}", self.zoom)),
            trim_number(format!("{:.*}", precision, self.center_lat)),
            trim_number(format!("{:.*}", precision, self.center_lon)),
        );
        if self.pitch != 0.0 {
            hash.push_str(&format!("/0/{}", trim_number(format!("{:.0}", self.pitch))));
        }
        hash
    }

    /// Restore center, zoom and pitch from a hash produced by [`Viewport::to_hash`].
    /// Returns false and leaves the viewport untouched when the hash is malformed.
    pub fn apply_hash(&mut self, hash: &str, max_pitch: f64) -> bool {
        let parts: Vec<f64> = match hash
            .trim_start_matches('#')
            .split('/')
            .map(|p| p.parse::<f64>())
            .collect::<Result<_, _>>()
        {
            Ok(parts) => parts,
            Err(_) => return false,
        };
        if parts.len() < 3 || parts.iter().any(|v| !v.is_finite()) {
            return false;
        }
        self.set_zoom(parts[0]);
        self.center_lat = parts[1].clamp(-MAX_LAT, MAX_LAT);
        self.center_lon = parts[2];
        if let Some(pitch) = parts.get(4) {
            self.set_pitch(*pitch, max_pitch);
        }
        true
    }
}

/// Drop trailing zeros the way JavaScript prints numbers
fn trim_number(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_center() {
        let vp = Viewport::new(0.0, 0.0, 1.0, 100, 100);
        let (x, y) = vp.project(0.0, 0.0);
        assert_eq!(x, 50);
        assert_eq!(y, 50);
    }

    #[test]
    fn test_pan() {
        let mut vp = Viewport::new(0.0, 0.0, 1.0, 100, 100);
        vp.pan(10, 0);
        assert!(vp.center_lon > 0.0);
        vp.pan(0, 10);
        assert!(vp.center_lat < 0.0);
    }

    #[test]
    fn test_unproject_inverts_project() {
        let vp = Viewport::new(-0.12, 51.5, 13.0, 200, 120);
        let (px, py) = vp.project_f64(-0.1, 51.51);
        let (lon, lat) = vp.unproject(px.round() as i32, py.round() as i32);
        assert!((lon + 0.1).abs() < 1e-3);
        assert!((lat - 51.51).abs() < 1e-3);
    }

    #[test]
    fn test_zoom_at_keeps_point_under_cursor() {
        let mut vp = Viewport::new(10.0, 45.0, 8.0, 200, 120);
        let before = vp.unproject(40, 30);
        vp.zoom_at(40, 30, 1.0);
        let after = vp.unproject(40, 30);
        assert!((before.0 - after.0).abs() < 0.01);
        assert!((before.1 - after.1).abs() < 0.01);
        assert_eq!(vp.zoom, 9.0);
    }

    #[test]
    fn test_fitted_contains_bounds_and_respects_max_zoom() {
        let vp = Viewport::new(0.0, 0.0, 2.0, 200, 120);
        let bounds = [-0.2, 51.4, 0.1, 51.6];
        let (lon, lat, zoom) = vp.fitted(bounds, 10.0, 15.0);
        let fitted = Viewport::new(lon, lat, zoom, 200, 120);
        let (x0, y0) = fitted.project(bounds[0], bounds[3]);
        let (x1, y1) = fitted.project(bounds[2], bounds[1]);
        assert!(x0 >= 0 && y0 >= 0 && x1 <= 200 && y1 <= 120);
        assert!(zoom <= 15.0);

        // A single point fits at max zoom
        let (_, _, zoom) = vp.fitted([1.0, 1.0, 1.0, 1.0], 10.0, 15.0);
        assert_eq!(zoom, 15.0);
    }

    #[test]
    fn test_hash_round_trip() {
        let mut vp = Viewport::new(-0.1278, 51.5074, 10.0, 200, 120);
        assert_eq!(vp.to_hash(), "10/51.5074/-0.1278");
        vp.pitch = 30.0;
        let hash = vp.to_hash();
        assert!(hash.ends_with("/0/30"));

        let mut restored = Viewport::new(0.0, 0.0, 1.0, 200, 120);
        assert!(restored.apply_hash(&format!("#{hash}"), 75.0));
        assert_eq!(restored.zoom, 10.0);
        assert_eq!(restored.pitch, 30.0);
        assert!((restored.center_lat - 51.5074).abs() < 1e-9);
    }

    #[test]
    fn test_apply_hash_rejects_garbage() {
        let mut vp = Viewport::new(1.0, 2.0, 3.0, 10, 10);
        assert!(!vp.apply_hash("#abc/1/2", 75.0));
        assert!(!vp.apply_hash("#1/2", 75.0));
        assert_eq!(vp.zoom, 3.0);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut vp = Viewport::new(0.0, 0.0, 1.0, 10, 10);
        vp.set_pitch(90.0, 75.0);
        assert_eq!(vp.pitch, 75.0);
    }
}
