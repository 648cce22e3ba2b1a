use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a build runs: the script path and its arguments, relative to the
/// build's working directory inside the container.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// An explicit input declaration inside a build config. When a config
/// names inputs, only those are streamed into the build container, at
/// `path` (falling back to the build-level path remap, then the name).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// The build configuration: which image to run in, the environment
/// params, the run descriptor, and the input placement rules.
///
/// A config can also arrive embedded in a fetched input, in which case
/// it is merged *under* the build's own config (see [Config::merge]).
#[derive(Builder, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
pub struct Config {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    image: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,

    #[serde(default)]
    run: RunConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<InputConfig>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    paths: BTreeMap<String, String>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        Default::default()
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn run(&self) -> &RunConfig {
        &self.run
    }

    pub fn inputs(&self) -> &[InputConfig] {
        &self.inputs
    }

    pub fn paths(&self) -> &BTreeMap<String, String> {
        &self.paths
    }

    /// Merge a config fetched along with an input under this one.
    ///
    /// Fields already set here win; fields absent here are taken from
    /// `under`. Params are unioned, with this config's values winning
    /// on key collision.
    pub fn merge(mut self, under: Config) -> Config {
        if self.image.is_empty() {
            self.image = under.image;
        }

        if self.run.path.is_empty() {
            self.run = under.run;
        }

        if self.inputs.is_empty() {
            self.inputs = under.inputs;
        }

        if self.paths.is_empty() {
            self.paths = under.paths;
        }

        let mut params = under.params;
        params.extend(std::mem::take(&mut self.params));
        self.params = params;

        self
    }
}
