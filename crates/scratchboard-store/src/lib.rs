//! # scratchboard-store
//!
//! Durable key/value persistence shared by the scratch engine and the
//! catalog.
//!
//! Values are whole JSON blobs: every write replaces the stored value, there
//! are no field-level updates. Two backends are provided, an in-memory map
//! (optionally quota-limited) and a SQLite file. Reads that fail to decode
//! and writes that fail for any reason degrade to "as if never persisted";
//! they are logged and never surface to callers.

pub mod backend;
pub mod database;
pub mod durable;
pub mod migrations;

mod error;

pub use backend::{KvBackend, MemoryBackend};
pub use database::SqliteBackend;
pub use durable::{DurableStore, StorageChange};
pub use error::{Result, StoreError};
