//! Data model for build submissions.
//!
//! A [Build] is transported by value between the lifecycle phases; each
//! phase returns an updated copy. Inputs and outputs carry the opaque
//! `source`/`params` documents understood by their resource scripts,
//! plus the `version`/`metadata` pair resolved by those scripts.

mod build;
mod config;
mod input;
mod output;

pub use build::*;
pub use config::*;
pub use input::*;
pub use output::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque resource source description, e.g. a repository URI and branch.
pub type Source = serde_json::Map<String, serde_json::Value>;

/// Opaque per-operation resource parameters.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A resolved resource version. Ordered so that version lists compare
/// and render deterministically.
pub type Version = BTreeMap<String, String>;

/// A single human-readable field attached to a fetched or published
/// version, e.g. `{name: "commit", value: "abc1234"}`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

impl MetadataField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
