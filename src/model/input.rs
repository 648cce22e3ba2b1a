use super::{MetadataField, Params, Source, Version};
use serde::{Deserialize, Serialize};

/// A resource materialized into the build's filesystem before the
/// script runs.
///
/// `version` and `metadata` are absent at submission time and filled in
/// by the fetcher from the resource script's response. When
/// `config_path` is set, the fetcher also extracts a build [Config]
/// from that file inside the fetched tree.
///
/// [Config]: super::Config
#[derive(Builder, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
pub struct Input {
    name: String,

    #[serde(rename = "type")]
    resource_type: String,

    #[serde(default, skip_serializing_if = "Source::is_empty")]
    source: Source,

    #[serde(default, skip_serializing_if = "Params::is_empty")]
    params: Params,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    config_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(into, strip_option))]
    version: Option<Version>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    metadata: Vec<MetadataField>,
}

impl Input {
    pub fn builder() -> InputBuilder {
        Default::default()
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

    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn metadata(&self) -> &[MetadataField] {
        &self.metadata
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = Some(version);
    }

    pub fn set_metadata(&mut self, metadata: Vec<MetadataField>) {
        self.metadata = metadata;
    }
}
