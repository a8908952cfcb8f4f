//! Data models for dedup records.

mod key;
mod snapshot;

pub use key::{KEY_PREFIX, SUB_PREFIX_SEPARATOR, StorageKey};
pub use snapshot::RequestSnapshot;
