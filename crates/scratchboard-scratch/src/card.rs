use std::time::Duration;

use tracing::debug;

use scratchboard_shared::constants::{
    DEFAULT_BRUSH_RADIUS, DEFAULT_MASK_HEIGHT, DEFAULT_MASK_WIDTH, REVEAL_THRESHOLD,
};
use scratchboard_shared::CatalogItem;

use crate::mask::{PixelMask, RasterMask};
use crate::session::CardRecord;
use crate::throttle::ScanThrottle;

/// Per-card geometry and scan throttling.
#[derive(Debug, Clone, PartialEq)]
pub struct CardSettings {
    pub mask_width: u32,
    pub mask_height: u32,
    /// Brush radius in buffer pixels.
    pub brush_radius: f32,
    pub scan_every: u32,
    pub scan_interval: Duration,
}

impl Default for CardSettings {
    fn default() -> Self {
        Self {
            mask_width: DEFAULT_MASK_WIDTH,
            mask_height: DEFAULT_MASK_HEIGHT,
            brush_radius: DEFAULT_BRUSH_RADIUS,
            scan_every: 8,
            scan_interval: Duration::from_millis(16),
        }
    }
}

impl CardSettings {
    fn throttle(&self) -> ScanThrottle {
        ScanThrottle::new(self.scan_every, self.scan_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Unscratched,
    Scratching,
    Revealed,
}

/// A state change produced by stroke handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First pixels were erased.
    Started,
    /// The reveal threshold was crossed. Fires once per card.
    Revealed,
}

pub struct ScratchCard {
    id: String,
    content: Option<CatalogItem>,
    mask: Box<dyn RasterMask>,
    state: CardState,
    progress: f64,
    brush_radius: f32,
    stroke: Option<(f32, f32)>,
    throttle: ScanThrottle,
}

impl ScratchCard {
    pub fn new(
        id: impl Into<String>,
        content: Option<CatalogItem>,
        mask: Box<dyn RasterMask>,
        settings: &CardSettings,
    ) -> Self {
        Self {
            id: id.into(),
            content,
            mask,
            state: CardState::Unscratched,
            progress: 0.0,
            brush_radius: settings.brush_radius,
            stroke: None,
            throttle: settings.throttle(),
        }
    }

    /// A card over a fresh [`PixelMask`] sized from `settings`.
    pub fn with_pixel_mask(
        id: impl Into<String>,
        content: Option<CatalogItem>,
        settings: &CardSettings,
    ) -> Self {
        let mask = PixelMask::new(settings.mask_width, settings.mask_height);
        Self::new(id, content, Box::new(mask), settings)
    }

    /// Rebuild a card from its saved record.
    ///
    /// The mask is new and opaque; progress and the revealed flag come from
    /// the record since there is nothing to recompute them from.
    pub fn restore(
        record: &CardRecord,
        content: Option<CatalogItem>,
        settings: &CardSettings,
    ) -> Self {
        let mut card = Self::with_pixel_mask(record.id.clone(), content, settings);
        card.progress = if record.progress.is_finite() {
            record.progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
        card.state = if record.revealed {
            CardState::Revealed
        } else if card.progress > 0.0 {
            CardState::Scratching
        } else {
            CardState::Unscratched
        };
        card
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> Option<&CatalogItem> {
        self.content.as_ref()
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    /// Percentage of the mask erased, in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_revealed(&self) -> bool {
        self.state == CardState::Revealed
    }

    /// Cards without content and revealed cards ignore strokes.
    pub fn is_scratchable(&self) -> bool {
        self.content.is_some() && self.state != CardState::Revealed
    }

    pub fn stroke_active(&self) -> bool {
        self.stroke.is_some()
    }

    pub fn mask(&self) -> &dyn RasterMask {
        self.mask.as_ref()
    }

    /// Start a drag at `(x, y)`, in buffer coordinates. Erases nothing.
    pub fn begin_stroke(&mut self, x: f32, y: f32) -> bool {
        if !self.is_scratchable() {
            return false;
        }
        self.stroke = Some((x, y));
        true
    }

    /// Move the active stroke to `(x, y)`, erasing along the way.
    pub fn continue_stroke(&mut self, x: f32, y: f32) -> Option<Transition> {
        let (from_x, from_y) = self.stroke?;
        if !self.is_scratchable() {
            self.stroke = None;
            return None;
        }

        let cleared = self.erase_segment(from_x, from_y, x, y);
        self.stroke = Some((x, y));

        let mut transition = None;
        if cleared > 0 && self.state == CardState::Unscratched {
            self.state = CardState::Scratching;
            transition = Some(Transition::Started);
        }

        if self.throttle.record_erase() {
            if let Some(revealed) = self.scan() {
                transition = Some(revealed);
            }
        }

        transition
    }

    /// Finish the active stroke. Always rescans if anything was erased since
    /// the last scan, so progress is never left stale.
    pub fn end_stroke(&mut self) -> Option<Transition> {
        self.stroke.take()?;
        if self.throttle.has_pending() {
            return self.scan();
        }
        None
    }

    /// Pointer left the element or the gesture was cancelled. Partial erasure
    /// is kept.
    pub fn cancel_stroke(&mut self) -> Option<Transition> {
        self.end_stroke()
    }

    pub fn serialize(&self) -> CardRecord {
        CardRecord {
            id: self.id.clone(),
            progress: self.progress,
            revealed: self.is_revealed(),
        }
    }

    // Stamp the brush along the segment, spaced by half the radius. Only the
    // part of the segment within brush reach of the buffer is walked.
    fn erase_segment(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) -> usize {
        let radius = self.brush_radius;
        if ![x0, y0, x1, y1, radius].iter().all(|v| v.is_finite()) {
            return 0;
        }
        let reach_min = (-radius, -radius);
        let reach_max = (
            self.mask.width() as f32 + radius,
            self.mask.height() as f32 + radius,
        );
        let Some(((x0, y0), (x1, y1))) = clip_segment((x0, y0), (x1, y1), reach_min, reach_max)
        else {
            return 0;
        };

        let spacing = (radius / 2.0).max(0.25);
        let distance = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        let steps = (distance / spacing).ceil().max(1.0) as usize;

        let mut cleared = 0;
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            cleared += self
                .mask
                .erase(x0 + (x1 - x0) * t, y0 + (y1 - y0) * t, radius);
        }
        cleared
    }

    fn scan(&mut self) -> Option<Transition> {
        self.throttle.mark_scanned();
        let fraction = self.mask.reveal_fraction();
        self.progress = self.progress.max(fraction * 100.0).min(100.0);

        if self.state != CardState::Revealed && fraction >= REVEAL_THRESHOLD {
            self.state = CardState::Revealed;
            self.stroke = None;
            debug!(card = %self.id, progress = self.progress, "Card revealed");
            return Some(Transition::Revealed);
        }
        None
    }
}

/// Clip the segment `from -> to` to the rectangle `min..=max`
/// (Liang-Barsky). `None` when the segment misses the rectangle.
fn clip_segment(
    from: (f32, f32),
    to: (f32, f32),
    min: (f32, f32),
    max: (f32, f32),
) -> Option<((f32, f32), (f32, f32))> {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let mut t0 = 0.0_f32;
    let mut t1 = 1.0_f32;

    for (p, q) in [
        (-dx, from.0 - min.0),
        (dx, max.0 - from.0),
        (-dy, from.1 - min.1),
        (dy, max.1 - from.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    Some((
        (from.0 + dx * t0, from.1 + dy * t0),
        (from.0 + dx * t1, from.1 + dy * t1),
    ))
}

impl std::fmt::Debug for ScratchCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchCard")
            .field("id", &self.id)
            .field("content", &self.content.as_ref().map(|item| &item.id))
            .field("state", &self.state)
            .field("progress", &self.progress)
            .finish()
    }
}
