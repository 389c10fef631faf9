// SPDX-License-Identifier: Apache-2.0
//! Validated `Username` and `TagName` newtypes (spec §4.4).
//!
//! Validation happens once, at construction — downstream code works with
//! already-valid values instead of re-checking invariants at every call
//! site, the same "error-for-control-flow" simplification spec §9 asks for
//! applied to input shaping rather than lookups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved username that holds system-wide ("global") tags.
pub const GLOBAL_USERNAME: &str = "_global_";

const MAX_USERNAME_LEN: usize = 100;
const MAX_TAG_NAME_LEN: usize = 200;

/// Why a username or tag name was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// The value was empty.
    #[error("name must not be empty")]
    Empty,
    /// The value exceeded the maximum allowed length.
    #[error("name exceeds maximum length of {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The value contained a character outside the allowed set.
    #[error("name contains disallowed character {ch:?}")]
    InvalidCharacter {
        /// The offending character.
        ch: char,
    },
    /// A non-system caller tried to use the reserved `_global_` username.
    #[error("username `_global_` is reserved for system-wide tags")]
    ReservedUsername,
    /// A non-system caller tried to create a tag name under the reserved
    /// `_global_` prefix.
    #[error("tag name prefix `_global_` is reserved")]
    ReservedTagPrefix,
}

/// A validated, non-reserved username.
///
/// Allowed characters: alphanumerics plus `-` and `_`, up to 100 characters.
/// The literal value `_global_` is rejected by [`Username::new`] (it is
/// reserved for system-wide tags); [`Username::global`] constructs it
/// directly for internal use by the tag registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    /// Validate and wrap a caller-supplied username.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] if the value is empty, too long, contains a
    /// disallowed character, or equals the reserved `_global_` username.
    pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
        let value = value.into();
        if value.is_empty() {
            return Err(NameError::Empty);
        }
        if value.len() > MAX_USERNAME_LEN {
            return Err(NameError::TooLong {
                max: MAX_USERNAME_LEN,
            });
        }
        if value == GLOBAL_USERNAME {
            return Err(NameError::ReservedUsername);
        }
        if let Some(ch) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(NameError::InvalidCharacter { ch });
        }
        Ok(Self(value))
    }

    /// The reserved username holding system-wide tags.
    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL_USERNAME.to_string())
    }

    /// Returns `true` if this is the reserved global-tag username.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_USERNAME
    }

    /// Returns the username as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated tag name.
///
/// Allowed characters: any non-empty string up to 200 characters; `/` is
/// permitted (tag names may be hierarchical, e.g. `team/pipeline/main`).
/// Names beginning with the reserved `_global_` prefix are rejected by
/// [`TagName::new`] for ordinary callers — use [`TagName::new_unchecked`]
/// only from code paths that are themselves implementing the system
/// (global-tag) namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagName(String);

impl TagName {
    /// Validate and wrap a caller-supplied tag name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] if the value is empty, too long, or begins with
    /// the reserved `_global_` prefix.
    pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
        let value = value.into();
        if value.is_empty() {
            return Err(NameError::Empty);
        }
        if value.len() > MAX_TAG_NAME_LEN {
            return Err(NameError::TooLong {
                max: MAX_TAG_NAME_LEN,
            });
        }
        if value.starts_with(GLOBAL_USERNAME) {
            return Err(NameError::ReservedTagPrefix);
        }
        Ok(Self(value))
    }

    /// Wrap a tag name without the reserved-prefix check, for system code
    /// paths that legitimately operate under the `_global_` namespace.
    #[must_use]
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the tag name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
