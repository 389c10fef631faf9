// SPDX-License-Identifier: Apache-2.0
//! Time-ordered 128-bit identifier for artifacts and runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A time-ordered 128-bit identifier.
///
/// Backed by a version-7 UUID (48-bit millisecond timestamp prefix, random
/// tail) so that ids minted close together sort close together, preserving
/// insertion locality on the primary-key index. [`Id::new`] is the only
/// constructor that mints a fresh id; [`Id::from_uuid`] exists for
/// round-tripping ids already stored in the catalog and does not validate
/// that the wrapped `Uuid` is actually version 7 — callers that need that
/// guarantee should check `Uuid::get_version()` themselves.
///
/// Plain `Uuid::new_v4()` must never be used for artifact or run ids: random
/// ids scatter writes across the primary-key index at the insert rates this
/// engine expects.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Id(pub uuid::Uuid);

impl Id {
    /// Mint a fresh, time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Wrap an existing `Uuid` (e.g. one read back from the catalog).
    #[must_use]
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner `Uuid`.
    #[must_use]
    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

impl From<uuid::Uuid> for Id {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct_and_monotonic_ish() {
        let a = Id::new();
        let b = Id::new();
        assert_ne!(a, b);
        // v7 ids minted in sequence should not sort backwards.
        assert!(a <= b);
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = Id::new();
        let text = id.to_string();
        let parsed: Id = text.parse().expect("parse");
        assert_eq!(id, parsed);
    }
}
