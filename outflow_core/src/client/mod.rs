//! Connector client contract.
//!
//! Implementations satisfy capability traits and may fail freely; the engine
//! only talks to them through [`GuardedSource`]/[`GuardedDestination`], which
//! turn every failure into a protocol message.

pub mod boundary;
pub mod rate_limit;
pub mod registry;
pub mod traits;

pub use boundary::{GuardedDestination, GuardedSource};
pub use rate_limit::RateLimitedWriter;
pub use registry::ClientRegistry;
pub use traits::{ConnectionChecker, DestinationClient, Discoverer, Reader, SourceClient, Writer};
