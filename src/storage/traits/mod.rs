//! Storage backend traits.

mod key_value;

pub use key_value::{KeyValueStore, Lookup, Removal, SetIfAbsent};
