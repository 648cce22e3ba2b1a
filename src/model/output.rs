use super::{Input, MetadataField, Params, Source, Version};
use serde::{Deserialize, Serialize};

/// When an output should be performed, relative to the build's exit
/// status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCondition {
    Success,
    Failure,
}

/// A resource produced from the build's filesystem after the script
/// exits, conditional on the exit status.
///
/// `version` and `metadata` on a performed output fully supersede the
/// submitted values.
#[derive(Builder, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
pub struct Output {
    name: String,

    #[serde(rename = "type")]
    resource_type: String,

    #[serde(default, skip_serializing_if = "Source::is_empty")]
    source: Source,

    #[serde(default, skip_serializing_if = "Params::is_empty")]
    params: Params,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    on: Vec<OutputCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    version: Option<Version>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    metadata: Vec<MetadataField>,
}

impl Output {
    pub fn builder() -> OutputBuilder {
        Default::default()
    }

    /// The pass-through output synthesized for an input that no explicit
    /// output overrides.
    pub fn passthrough(input: &Input) -> Output {
        Output {
            name: input.name().to_string(),
            resource_type: input.resource_type().to_string(),
            source: input.source().clone(),
            params: Params::new(),
            on: vec![],
            version: input.version().cloned(),
            metadata: input.metadata().to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn on(&self) -> &[OutputCondition] {
        &self.on
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn metadata(&self) -> &[MetadataField] {
        &self.metadata
    }

    pub fn set_version(&mut self, version: Option<Version>) {
        self.version = version;
    }

    pub fn set_metadata(&mut self, metadata: Vec<MetadataField>) {
        self.metadata = metadata;
    }

    /// Whether this output should be performed for the given exit
    /// status. An empty condition set means success-only.
    pub fn performs_on(&self, exit_status: i32) -> bool {
        if self.on.is_empty() {
            return exit_status == 0;
        }

        let condition = if exit_status == 0 {
            OutputCondition::Success
        } else {
            OutputCondition::Failure
        };

        self.on.contains(&condition)
    }
}
