/// Channel name shared by every publisher and subscriber of catalog updates.
pub const SYNC_CHANNEL: &str = "positions-sync";

/// Storage key holding the materialized catalog snapshot.
pub const CATALOG_KEY: &str = "positions";

/// Storage key the bus writes each envelope to (storage-change fallback path).
pub const SYNC_STORAGE_KEY: &str = "positions-sync";

/// Storage key holding the scratch session (per-card progress).
pub const SCRATCH_SESSION_KEY: &str = "scratch-session";

/// Fraction of erased pixels at which a card flips to revealed.
pub const REVEAL_THRESHOLD: f64 = 0.30;

/// Default number of cards in a collection.
pub const DEFAULT_SAMPLE_SIZE: usize = 6;

/// Default logical raster size of a scratch canvas.
pub const DEFAULT_MASK_WIDTH: u32 = 300;
pub const DEFAULT_MASK_HEIGHT: u32 = 200;

/// Default brush radius, in buffer pixels.
pub const DEFAULT_BRUSH_RADIUS: f32 = 20.0;

/// How many remotely delivered envelope versions a bus remembers for dedupe.
pub const RECENT_VERSION_CAPACITY: usize = 64;

/// Capacity of the in-memory broadcast channels backing cross-context paths.
pub const BROADCAST_CAPACITY: usize = 256;
