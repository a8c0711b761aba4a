use std::collections::HashMap;

/// Cell size in degrees. Parking lots and road segments around a venue are
/// a few hundred meters across, so this keeps candidate lists short.
pub const DEFAULT_CELL_SIZE: f64 = 0.01;

/// Spatial index for source features using conservative approximation.
/// Each feature's bounding box is indexed into every cell it overlaps,
/// guaranteeing no false negatives while allowing false positives
/// (eliminated by the exact hit test in the map).
#[derive(Debug)]
pub struct FeatureGrid {
    cells: HashMap<(i32, i32), Vec<usize>>,
    cell_size: f64,
}

impl FeatureGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cells: HashMap::new(),
            cell_size,
        }
    }

    #[inline(always)]
    fn to_cell(&self, lon: f64, lat: f64) -> (i32, i32) {
        let x = (lon / self.cell_size).floor() as i32;
        let y = (lat / self.cell_size).floor() as i32;
        (x, y)
    }

    /// Build from feature bounding boxes `(min_lon, min_lat, max_lon, max_lat)`.
    /// Features without geometry pass `None` and are skipped but keep their index.
    pub fn build(bboxes: impl Iterator<Item = Option<[f64; 4]>>, cell_size: f64) -> Self {
        let mut grid = Self::new(cell_size);
        for (idx, bbox) in bboxes.enumerate() {
            let Some([min_lon, min_lat, max_lon, max_lat]) = bbox else {
                continue;
            };
            let min_cell = grid.to_cell(min_lon, min_lat);
            let max_cell = grid.to_cell(max_lon, max_lat);
            for y in min_cell.1..=max_cell.1 {
                for x in min_cell.0..=max_cell.0 {
                    grid.cells.entry((x, y)).or_default().push(idx);
                }
            }
        }
        grid
    }

    /// Feature indices whose bbox may lie within `radius` degrees of the point,
    /// sorted and deduplicated.
    pub fn query(&self, lon: f64, lat: f64, radius: f64) -> Vec<usize> {
        let min_cell = self.to_cell(lon - radius, lat - radius);
        let max_cell = self.to_cell(lon + radius, lat + radius);
        let mut results = Vec::new();
        for y in min_cell.1..=max_cell.1 {
            for x in min_cell.0..=max_cell.0 {
                if let Some(indices) = self.cells.get(&(x, y)) {
                    results.extend_from_slice(indices);
                }
            }
        }
        results.sort_unstable();
        results.dedup();
        results
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
