//! Scratch-reveal engine.
//!
//! A [`PixelMask`] is a raster of opacity values erased by a circular brush.
//! A [`ScratchCard`] wraps one mask with the `Unscratched -> Scratching ->
//! Revealed` state machine, and a [`CardCollection`] owns a fixed-size sample
//! of cards drawn from the catalog, persisting their progress as a session.

pub mod card;
pub mod collection;
pub mod mask;
pub mod session;
pub mod throttle;

pub use card::{CardSettings, CardState, ScratchCard, Transition};
pub use collection::CardCollection;
pub use mask::{DisplayMapping, PixelMask, RasterMask};
pub use session::{CardRecord, SessionRecord};
pub use throttle::ScanThrottle;
