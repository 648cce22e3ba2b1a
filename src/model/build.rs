use super::{Config, Input, Output};
use serde::{Deserialize, Serialize};

/// A single execution of a user's declared job: inputs, script,
/// outputs.
///
/// The build value travels through the lifecycle phases by value; each
/// phase hands back an updated copy (inputs with resolved versions, a
/// merged config, performed outputs).
#[derive(Builder, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
pub struct Build {
    guid: String,

    #[serde(default)]
    config: Config,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<Input>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<Output>,

    #[serde(default)]
    privileged: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    events_callback: String,
}

impl Build {
    pub fn builder() -> BuildBuilder {
        Default::default()
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    pub fn events_callback(&self) -> &str {
        &self.events_callback
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn set_inputs(&mut self, inputs: Vec<Input>) {
        self.inputs = inputs;
    }

    pub fn set_outputs(&mut self, outputs: Vec<Output>) {
        self.outputs = outputs;
    }
}
