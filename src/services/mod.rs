//! Business logic services.
//!
//! Services orchestrate storage backends and provide high-level operations.

mod dedup;

pub use dedup::{DEFAULT_RETENTION, DedupService};
