//! Persistence for sync definitions, runs and records.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemorySyncStore;
pub use sqlite::SqliteSyncStore;
pub use traits::SyncStore;
