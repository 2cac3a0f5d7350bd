/// Raster erasure buffer behind a scratch card.
///
/// Coordinates are in buffer space. Callers map pointer positions from the
/// displayed element with a [`DisplayMapping`] first, so the mask does not
/// depend on how large the card is rendered.
pub trait RasterMask: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Clear every cell whose centre lies within `radius` of `(cx, cy)`.
    /// Out-of-bounds parts of the brush are clipped. Returns the number of
    /// cells that went from opaque to transparent.
    fn erase(&mut self, cx: f32, cy: f32, radius: f32) -> usize;

    /// Fraction of fully transparent cells, in `[0, 1]`. Full scan.
    fn reveal_fraction(&self) -> f64;

    /// Restore full opacity.
    fn reset(&mut self);
}

pub const OPAQUE: u8 = u8::MAX;

/// Plain in-memory alpha buffer, one byte per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMask {
    width: u32,
    height: u32,
    alpha: Vec<u8>,
}

impl PixelMask {
    /// A fully opaque mask. Zero dimensions are raised to 1.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            alpha: vec![OPAQUE; width as usize * height as usize],
        }
    }

    pub fn alpha_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.alpha
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn alpha(&self) -> &[u8] {
        &self.alpha
    }
}

impl RasterMask for PixelMask {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn erase(&mut self, cx: f32, cy: f32, radius: f32) -> usize {
        if !radius.is_finite() || radius <= 0.0 || !cx.is_finite() || !cy.is_finite() {
            return 0;
        }

        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x0 = (cx - radius).floor().max(0.0);
        let x1 = (cx + radius).ceil().min(max_x);
        let y0 = (cy - radius).floor().max(0.0);
        let y1 = (cy + radius).ceil().min(max_y);
        if x0 > x1 || y0 > y1 {
            return 0;
        }

        let r2 = radius * radius;
        let width = self.width as usize;
        let mut cleared = 0;

        for y in y0 as usize..=y1 as usize {
            let dy = y as f32 + 0.5 - cy;
            let row = y * width;
            for x in x0 as usize..=x1 as usize {
                let dx = x as f32 + 0.5 - cx;
                if dx * dx + dy * dy > r2 {
                    continue;
                }
                let cell = &mut self.alpha[row + x];
                if *cell != 0 {
                    *cell = 0;
                    cleared += 1;
                }
            }
        }

        cleared
    }

    fn reveal_fraction(&self) -> f64 {
        let transparent = self.alpha.iter().filter(|&&a| a == 0).count();
        transparent as f64 / self.alpha.len() as f64
    }

    fn reset(&mut self) {
        self.alpha.fill(OPAQUE);
    }
}

/// Scale from displayed element coordinates to buffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMapping {
    scale_x: f32,
    scale_y: f32,
}

impl DisplayMapping {
    /// `buffer` is the mask size, `displayed` the on-screen size of the
    /// element. Degenerate display sizes are clamped to 1.
    pub fn new(buffer: (u32, u32), displayed: (f32, f32)) -> Self {
        let clamp = |size: f32| if size.is_finite() { size.max(1.0) } else { 1.0 };
        Self {
            scale_x: buffer.0 as f32 / clamp(displayed.0),
            scale_y: buffer.1 as f32 / clamp(displayed.1),
        }
    }

    pub fn identity() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    pub fn to_buffer(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale_x, y * self.scale_y)
    }
}
