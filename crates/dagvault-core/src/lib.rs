// SPDX-License-Identifier: Apache-2.0
//! Shared primitives for the DagVault workflow storage engine: time-ordered
//! ids, the semantic error taxonomy every crate returns, canonical JSON
//! hashing, the validated `Username`/`TagName` newtypes the tag registry
//! keys on, and the cooperative `CancellationToken` service methods thread
//! through their calls.
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod canonical;
mod cancel;
mod error;
mod id;
mod naming;

pub use canonical::{canonical_json_bytes, version_hash};
pub use cancel::CancellationToken;
pub use error::Error;
pub use id::Id;
pub use naming::{NameError, TagName, Username, GLOBAL_USERNAME};
