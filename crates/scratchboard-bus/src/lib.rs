//! Catalog synchronization bus: in-process fan-out, cross-context broadcast
//! and a storage-change fallback, deduplicated by envelope version.

pub mod bus;
pub mod error;
pub mod listener;
pub mod recent;
pub mod transport;

pub use bus::{Handler, Subscription, SyncBus};
pub use error::{BusError, Result};
pub use recent::RecentVersions;
pub use transport::{BroadcastChannel, BroadcastHub, Frame, NoopTransport, SyncTransport};
