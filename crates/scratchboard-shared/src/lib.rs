//! Types shared by every scratchboard crate: the catalog item model, the
//! sync envelope carried over the bus, and the well-known constants that
//! publishers and subscribers agree on out-of-band.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use protocol::SyncEnvelope;
pub use types::{CatalogItem, ContextId, MediaKind};
