//! Indexed-colour frame buffer
//!
//! 160×160 pixels, one palette index (0..=3) per pixel. Drawing outside the
//! screen is clipped silently.

use serde::{Deserialize, Serialize};

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 160;

/// Number of palette entries
pub const PALETTE_SIZE: usize = 4;

/// Four RGB colours (`0xRRGGBB`), lightest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette(pub [u32; PALETTE_SIZE]);

impl Default for Palette {
    fn default() -> Self {
        Palette([0xe0f8cf, 0x86c06c, 0x306850, 0x071821])
    }
}

impl Palette {
    /// RGB bytes of a palette index (masked to 0..=3)
    pub fn rgb(&self, index: u8) -> [u8; 3] {
        let c = self.0[(index & 0x03) as usize];
        [(c >> 16) as u8, (c >> 8) as u8, c as u8]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Framebuffer {
    pixels: Vec<u8>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framebuffer {
    pub fn new() -> Self {
        Self {
            pixels: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }

    /// Row-major palette indices
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn get(&self, x: i32, y: i32) -> Option<u8> {
        index(x, y).map(|i| self.pixels[i])
    }

    pub fn clear(&mut self, color: u8) {
        self.pixels.fill(color & 0x03);
    }

    pub fn pixel(&mut self, x: i32, y: i32, color: u8) {
        if let Some(i) = index(x, y) {
            self.pixels[i] = color & 0x03;
        }
    }

    /// Bresenham line, both endpoints inclusive
    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u8) {
        let Some((x0, y0, x1, y1)) = clip_segment(x0.into(), y0.into(), x1.into(), y1.into())
        else {
            return;
        };
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y) = (x0, y0);
        let mut err = dx + dy;
        loop {
            self.plot(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    pub fn hline(&mut self, x: i32, y: i32, width: i32, color: u8) {
        let x = i64::from(x);
        self.span(x, x + i64::from(width) - 1, y.into(), color);
    }

    pub fn vline(&mut self, x: i32, y: i32, height: i32, color: u8) {
        let y = i64::from(y);
        self.column(x.into(), y, y + i64::from(height) - 1, color);
    }

    /// Outline of a `width × height` rectangle
    pub fn rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: u8) {
        if width <= 0 || height <= 0 {
            return;
        }
        let (x0, y0) = (i64::from(x), i64::from(y));
        let (x1, y1) = (x0 + i64::from(width) - 1, y0 + i64::from(height) - 1);
        self.span(x0, x1, y0, color);
        self.span(x0, x1, y1, color);
        self.column(x0, y0, y1, color);
        self.column(x1, y0, y1, color);
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: u8) {
        if width <= 0 || height <= 0 {
            return;
        }
        let (x0, y0) = (i64::from(x), i64::from(y));
        let x1 = x0 + i64::from(width) - 1;
        let rows = y0.max(0)..(y0 + i64::from(height)).min(SCREEN_HEIGHT as i64);
        for row in rows {
            self.span(x0, x1, row, color);
        }
    }

    /// Circle outline. Midpoint algorithm for radii that fit the screen, a
    /// row and column scan of the visible part for larger ones.
    pub fn circle(&mut self, cx: i32, cy: i32, radius: i32, color: u8) {
        let (cx, cy, r) = (i64::from(cx), i64::from(cy), i64::from(radius));
        if r < 0 || !box_visible(cx, cy, r) {
            return;
        }
        if r > MIDPOINT_RADIUS_LIMIT {
            self.scan_circle(cx, cy, r, color);
            return;
        }
        let (mut x, mut y) = (r, 0);
        let mut err = 1 - r;
        while x >= y {
            for (px, py) in [
                (x, y),
                (y, x),
                (-y, x),
                (-x, y),
                (-x, -y),
                (-y, -x),
                (y, -x),
                (x, -y),
            ] {
                self.plot(cx + px, cy + py, color);
            }
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
    }

    pub fn fill_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u8) {
        let (cx, cy, r) = (i64::from(cx), i64::from(cy), i64::from(radius));
        if r < 0 || !box_visible(cx, cy, r) {
            return;
        }
        let rows = (cy - r).max(0)..=(cy + r).min(SCREEN_HEIGHT as i64 - 1);
        for row in rows {
            let half = chord_half(r, row - cy);
            self.span(cx - half, cx + half, row, color);
        }
    }

    /// Both crossings of the circle on every visible row and column
    fn scan_circle(&mut self, cx: i64, cy: i64, r: i64, color: u8) {
        for row in (cy - r).max(0)..=(cy + r).min(SCREEN_HEIGHT as i64 - 1) {
            let half = chord_half(r, row - cy);
            self.plot(cx - half, row, color);
            self.plot(cx + half, row, color);
        }
        for col in (cx - r).max(0)..=(cx + r).min(SCREEN_WIDTH as i64 - 1) {
            let half = chord_half(r, col - cx);
            self.plot(col, cy - half, color);
            self.plot(col, cy + half, color);
        }
    }

    fn plot(&mut self, x: i64, y: i64, color: u8) {
        if let Some(i) = index_wide(x, y) {
            self.pixels[i] = color & 0x03;
        }
    }

    /// Inclusive horizontal run clipped to the screen
    fn span(&mut self, x0: i64, x1: i64, y: i64, color: u8) {
        if !(0..SCREEN_HEIGHT as i64).contains(&y) {
            return;
        }
        for x in x0.max(0)..=x1.min(SCREEN_WIDTH as i64 - 1) {
            self.plot(x, y, color);
        }
    }

    /// Inclusive vertical run clipped to the screen
    fn column(&mut self, x: i64, y0: i64, y1: i64, color: u8) {
        if !(0..SCREEN_WIDTH as i64).contains(&x) {
            return;
        }
        for y in y0.max(0)..=y1.min(SCREEN_HEIGHT as i64 - 1) {
            self.plot(x, y, color);
        }
    }

    /// Expand to packed RGB bytes
    pub fn to_rgb(&self, palette: &Palette) -> Vec<u8> {
        self.pixels.iter().flat_map(|&p| palette.rgb(p)).collect()
    }
}

fn index(x: i32, y: i32) -> Option<usize> {
    index_wide(x.into(), y.into())
}

fn index_wide(x: i64, y: i64) -> Option<usize> {
    if x < 0 || y < 0 || x >= SCREEN_WIDTH as i64 || y >= SCREEN_HEIGHT as i64 {
        return None;
    }
    Some(y as usize * SCREEN_WIDTH + x as usize)
}

/// Radius above which the midpoint loop would mostly walk off-screen
const MIDPOINT_RADIUS_LIMIT: i64 = 2 * SCREEN_WIDTH as i64;

/// Whether the circle's bounding box touches the screen
fn box_visible(cx: i64, cy: i64, r: i64) -> bool {
    cx + r >= 0 && cx - r < SCREEN_WIDTH as i64 && cy + r >= 0 && cy - r < SCREEN_HEIGHT as i64
}

/// Half-width of the chord at offset `d` from the centre, `d` within `r`
fn chord_half(r: i64, d: i64) -> i64 {
    let sq = (r * r - d * d).max(0) as f64;
    sq.sqrt() as i64
}

/// Liang-Barsky clip of a segment to the screen. Segments already on screen
/// pass through untouched.
fn clip_segment(x0: i64, y0: i64, x1: i64, y1: i64) -> Option<(i64, i64, i64, i64)> {
    if index_wide(x0, y0).is_some() && index_wide(x1, y1).is_some() {
        return Some((x0, y0, x1, y1));
    }
    let max_x = (SCREEN_WIDTH - 1) as f64;
    let max_y = (SCREEN_HEIGHT - 1) as f64;
    let (fx, fy) = (x0 as f64, y0 as f64);
    let (dx, dy) = ((x1 - x0) as f64, (y1 - y0) as f64);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dx, fx), (dx, max_x - fx), (-dy, fy), (dy, max_y - fy)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    let at = |t: f64| {
        (
            (fx + t * dx).round().clamp(0.0, max_x) as i64,
            (fy + t * dy).round().clamp(0.0, max_y) as i64,
        )
    };
    let (ax, ay) = at(t0);
    let (bx, by) = at(t1);
    Some((ax, ay, bx, by))
}
