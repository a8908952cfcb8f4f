//! Namespaced store keys.

use crate::{Error, Result};
use std::fmt;

/// Fixed prefix of every key written by this crate.
pub const KEY_PREFIX: &str = "ref_so_";

/// Separator between a sub-prefix and the request identifier.
pub const SUB_PREFIX_SEPARATOR: char = '_';

/// Fully-qualified store key: `ref_so_[<sub_prefix>_]<request_id>`.
///
/// Sub-prefixes may not contain the separator, so keys built from different
/// sub-prefixes can never address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Builds the key for a request identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `request_id` is empty, or if
    /// `sub_prefix` is empty or contains the `_` separator.
    pub fn new(sub_prefix: Option<&str>, request_id: &str) -> Result<Self> {
        if request_id.is_empty() {
            return Err(Error::InvalidInput(
                "request id cannot be empty".to_string(),
            ));
        }

        match sub_prefix {
            None => Ok(Self(format!("{KEY_PREFIX}{request_id}"))),
            Some("") => Err(Error::InvalidInput(
                "sub-prefix cannot be empty".to_string(),
            )),
            Some(sub) if sub.contains(SUB_PREFIX_SEPARATOR) => Err(Error::InvalidInput(format!(
                "sub-prefix '{sub}' cannot contain '{SUB_PREFIX_SEPARATOR}'"
            ))),
            Some(sub) => Ok(Self(format!(
                "{KEY_PREFIX}{sub}{SUB_PREFIX_SEPARATOR}{request_id}"
            ))),
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}
