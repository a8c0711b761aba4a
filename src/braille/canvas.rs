/// 24-bit color carried per character cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const WHITE: Rgb = Rgb(255, 255, 255);

    /// Blend towards `other` by `t` in [0, 1].
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }

    /// Scale brightness, used for opacity against the dark background.
    pub fn dim(self, opacity: f64) -> Rgb {
        Rgb(0, 0, 0).lerp(self, opacity)
    }
}

/// Dot bit for pixel `(x % 2, y % 4)` inside a character, indexed `[x][y]`.
///
/// ```text
/// (0,0) (1,0)   0x01 0x08
/// (0,1) (1,1)   0x02 0x10
/// (0,2) (1,2)   0x04 0x20
/// (0,3) (1,3)   0x40 0x80
/// ```
const DOT_BITS: [[u8; 4]; 2] = [[0x01, 0x02, 0x04, 0x40], [0x08, 0x10, 0x20, 0x80]];

const BRAILLE_BLANK: u32 = 0x2800;

#[derive(Clone, Copy, Default)]
struct Cell {
    dots: u8,
    color: Option<Rgb>,
}

/// Braille canvas where each character cell is a 2x4 dot grid tinted with
/// the color of the last layer that drew into it.
pub struct BrailleCanvas {
    cols: usize,
    rows: usize,
    cells: Vec<Cell>,
}

impl BrailleCanvas {
    /// Canvas of `cols` x `rows` characters, i.e. `cols*2` x `rows*4` pixels
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            cells: vec![Cell::default(); cols * rows],
        }
    }

    pub fn width(&self) -> usize {
        self.cols
    }

    pub fn height(&self) -> usize {
        self.rows
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, color: Rgb) {
        let (col, row) = (x / 2, y / 4);
        if col >= self.cols || row >= self.rows {
            return;
        }
        let cell = &mut self.cells[row * self.cols + col];
        cell.dots |= DOT_BITS[x % 2][y % 4];
        cell.color = Some(color);
    }

    /// Like [`set_pixel`](Self::set_pixel), dropping negative coordinates
    pub fn set_pixel_signed(&mut self, x: i32, y: i32, color: Rgb) {
        if x >= 0 && y >= 0 {
            self.set_pixel(x as usize, y as usize, color);
        }
    }

    /// Braille glyph and color of a character cell, `None` when the cell is empty.
    pub fn cell(&self, col: usize, row: usize) -> Option<(char, Rgb)> {
        if col >= self.cols {
            return None;
        }
        let cell = self.cells.get(row * self.cols + col)?;
        if cell.dots == 0 {
            return None;
        }
        let ch = char::from_u32(BRAILLE_BLANK + cell.dots as u32)?;
        Some((ch, cell.color.unwrap_or(Rgb::WHITE)))
    }

    #[cfg(test)]
    pub fn to_string(&self) -> String {
        self.cells
            .chunks(self.cols.max(1))
            .map(|row| {
                row.iter()
                    .map(|c| char::from_u32(BRAILLE_BLANK + c.dots as u32).unwrap_or(' '))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
