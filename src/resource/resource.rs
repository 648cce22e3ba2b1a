use super::ResourceError;
use crate::events::LogWriter;
use crate::model::{Config, Input, MetadataField, Output, Params, Source, Version};
use crate::runtime::{Container, LogSink, ProcessIo, ProcessSpec, TarStream};
use anyhow::anyhow;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const IN_SCRIPT: &str = "/opt/resource/in";
const OUT_SCRIPT: &str = "/opt/resource/out";
const CHECK_SCRIPT: &str = "/opt/resource/check";

/// Conventional working tree inside a resource container. `in` scripts
/// populate it; `out` scripts consume it.
pub const RESOURCE_WORK_DIR: &str = "/tmp/build/src";

#[derive(Serialize)]
struct InRequest<'a> {
    source: &'a Source,
    params: &'a Params,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a Version>,
}

#[derive(Serialize)]
struct OutRequest<'a> {
    source: &'a Source,
    params: &'a Params,
}

#[derive(Serialize)]
struct CheckRequest<'a> {
    source: &'a Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a Version>,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: Version,
    #[serde(default)]
    metadata: Vec<MetadataField>,
}

/// A handle onto one throwaway resource container, obtained from the
/// [Tracker](super::Tracker) and returned to it exactly once.
pub struct Resource {
    container: Arc<dyn Container>,
    logs: Arc<Mutex<LogWriter>>,
    abort: CancellationToken,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("handle", &self.container.handle())
            .finish_non_exhaustive()
    }
}

impl Resource {
    pub(crate) fn new(
        container: Arc<dyn Container>,
        logs: LogWriter,
        abort: CancellationToken,
    ) -> Self {
        Self {
            container,
            logs: Arc::new(Mutex::new(logs)),
            abort,
        }
    }

    pub fn container_handle(&self) -> &str {
        self.container.handle()
    }

    pub(crate) fn into_parts(self) -> (Arc<dyn Container>, Arc<Mutex<LogWriter>>) {
        (self.container, self.logs)
    }

    /// Materialize `input`: run the `in` script, resolve
    /// version/metadata from its response, extract the embedded build
    /// config when the input names one, and stream the produced tree
    /// out as a tar.
    #[tracing::instrument(name = "Resource::fetch", skip(self, input), fields(input = input.name()))]
    pub async fn fetch(
        &mut self,
        mut input: Input,
    ) -> Result<(TarStream, Input, Option<Config>), ResourceError> {
        let request = InRequest {
            source: input.source(),
            params: input.params(),
            version: input.version(),
        };

        let response: VersionResponse = self
            .run_script(IN_SCRIPT, &[RESOURCE_WORK_DIR], &request)
            .await?;

        input.set_version(response.version);
        input.set_metadata(response.metadata);

        let config = match input.config_path() {
            Some(path) if !path.is_empty() => Some(self.extract_config(path).await?),
            _ => None,
        };

        let stream = self
            .container
            .stream_out(&format!("{RESOURCE_WORK_DIR}/"))
            .await?;

        Ok((stream, input, config))
    }

    /// Publish `output`: stream the build's tree into the container,
    /// run the `out` script against it, and resolve version/metadata
    /// from its response.
    #[tracing::instrument(name = "Resource::publish", skip(self, source, output), fields(output = output.name()))]
    pub async fn publish(
        &mut self,
        source: TarStream,
        mut output: Output,
    ) -> Result<Output, ResourceError> {
        self.container.stream_in(RESOURCE_WORK_DIR, source).await?;

        let request = OutRequest {
            source: output.source(),
            params: output.params(),
        };

        let response: VersionResponse = self
            .run_script(OUT_SCRIPT, &[RESOURCE_WORK_DIR], &request)
            .await?;

        output.set_version(Some(response.version));
        output.set_metadata(response.metadata);

        Ok(output)
    }

    /// List versions of `input`'s source newer than its current one,
    /// ascending. With no current version, the script reports only the
    /// latest.
    #[tracing::instrument(name = "Resource::check", skip(self, input), fields(input = input.name()))]
    pub async fn check(&mut self, input: &Input) -> Result<Vec<Version>, ResourceError> {
        let request = CheckRequest {
            source: input.source(),
            version: input.version(),
        };

        self.run_script(CHECK_SCRIPT, &[], &request).await
    }

    async fn run_script<R: DeserializeOwned>(
        &self,
        path: &str,
        args: &[&str],
        request: &impl Serialize,
    ) -> Result<R, ResourceError> {
        let request = serde_json::to_vec(request).map_err(|err| ResourceError::MalformedResponse {
            path: path.to_string(),
            err,
        })?;

        let stdout = Collector::default();
        let stderr = Collector::default();

        let io = ProcessIo {
            stdin: Some(Box::new(std::io::Cursor::new(request))),
            stdout: Some(Box::new(stdout.clone())),
            stderr: Some(Box::new(TeeSink {
                logs: self.logs.clone(),
                captured: stderr.clone(),
            })),
        };

        let spec = ProcessSpec {
            path: path.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: vec![],
            dir: String::new(),
            privileged: true,
            tty: None,
        };

        let mut process = self.container.run(spec, io).await?;

        let status = tokio::select! {
            result = process.wait() => result?,
            _ = self.abort.cancelled() => {
                debug!(script = path, "aborting resource script");

                let _ = self.container.stop(false).await;

                return Err(ResourceError::Aborted);
            }
        };

        if status != 0 {
            return Err(ResourceError::ScriptFailed {
                path: path.to_string(),
                status,
                stdout: stdout.into_string(),
                stderr: stderr.into_string(),
            });
        }

        serde_json::from_slice(&stdout.bytes()).map_err(|err| ResourceError::MalformedResponse {
            path: path.to_string(),
            err,
        })
    }

    /// The embedded config travels as a single-entry tar of the file at
    /// `path` inside the fetched tree.
    async fn extract_config(&self, path: &str) -> Result<Config, ResourceError> {
        let mut tar = self
            .container
            .stream_out(&format!("{RESOURCE_WORK_DIR}/{path}"))
            .await?;

        let mut bytes = Vec::new();
        tar.read_to_end(&mut bytes)
            .await
            .map_err(|err| ResourceError::MalformedConfig {
                path: path.to_string(),
                err: err.into(),
            })?;

        let mut archive = tar::Archive::new(&bytes[..]);

        let entry = archive
            .entries()
            .and_then(|mut entries| {
                entries
                    .next()
                    .ok_or_else(|| std::io::Error::other("empty archive"))?
            })
            .map_err(|err| ResourceError::MalformedConfig {
                path: path.to_string(),
                err: err.into(),
            })?;

        let contents: Vec<u8> = entry
            .bytes()
            .collect::<Result<_, _>>()
            .map_err(|err| ResourceError::MalformedConfig {
                path: path.to_string(),
                err: err.into(),
            })?;

        serde_json::from_slice(&contents).map_err(|err| ResourceError::MalformedConfig {
            path: path.to_string(),
            err: anyhow!(err),
        })
    }
}

/// Accumulates script output so failures can quote it back.
#[derive(Clone, Default)]
struct Collector {
    buf: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl Collector {
    fn bytes(&self) -> Vec<u8> {
        self.buf.lock().expect("collector lock poisoned").clone()
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }
}

#[async_trait]
impl LogSink for Collector {
    async fn write(&mut self, data: &[u8]) {
        self.buf
            .lock()
            .expect("collector lock poisoned")
            .extend_from_slice(data);
    }
}

/// Script stderr both surfaces live through the build's log stream and
/// is captured for the failure message.
struct TeeSink {
    logs: Arc<Mutex<LogWriter>>,
    captured: Collector,
}

#[async_trait]
impl LogSink for TeeSink {
    async fn write(&mut self, data: &[u8]) {
        self.captured.write(data).await;
        self.logs.lock().await.write(data).await;
    }
}
