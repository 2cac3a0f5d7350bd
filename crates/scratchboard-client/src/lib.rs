//! Host-facing wiring for the scratch board.
//!
//! An [`Origin`] owns what every tab of one origin shares (the storage area
//! and the broadcast hub). Each [`ClientContext`] opened from it is one tab
//! with its own sync bus, [`CatalogStore`] and card collection.

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod state;

pub use catalog::{CatalogStore, ConflictPolicy, ListenerId};
pub use config::ClientConfig;
pub use error::CatalogError;
pub use events::{CatalogChange, ChangeOrigin};
pub use state::{ClientContext, Origin};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "scratchboard_client=debug,scratchboard_bus=debug,scratchboard_store=info,scratchboard_scratch=info,warn",
        )
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Scratchboard tracing initialised");
    }
}
