//! Delivery of persisted SyncRecords to the destination.

pub mod loader;

pub use loader::Loader;
