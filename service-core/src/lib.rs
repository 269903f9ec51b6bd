//! service-core: Shared infrastructure for the import workspace.
pub mod error;
pub mod observability;

pub use tracing;
