//! The build lifecycle state machine.
//!
//! A build moves through three phases, each handed the previous phase's
//! value:
//!
//! ```text
//!           start                 attach                finish
//! Submitted ────► Running ──────────► Exited ──────────► Completed
//!                   │ abort             │ abort
//!                   ▼                   ▼
//!                 Failed              Failed
//! ```
//!
//! [RunningBuild] and [ExitedBuild] carry both live handles and the
//! primitive identifiers to re-derive them, so a supervisor can persist
//! the primitives across a worker restart and resume with `attach`.

mod error;
mod inputs;
mod outputs;

pub use error::*;
pub use inputs::*;
pub use outputs::*;

use crate::events::{Event, LogWriter, Origin, SharedEmitter};
use crate::model::{Build, Output};
use crate::runtime::{
    Container, ContainerSpec, Process, ProcessIo, ProcessSpec, RuntimeClient, TarStream, TtySpec,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where input trees land inside the build container, and the build
/// script's working directory.
pub const BUILD_SRC_DIR: &str = "/tmp/build/src";

/// Creates the emitter for a build's events-callback URL. `start`
/// invokes it once per build; `attach`/`finish` invoke it again only
/// when resuming from persisted primitives.
pub type EmitterFactory = Box<dyn Fn(&str) -> SharedEmitter + Send + Sync>;

/// A build whose script is running. `container` and `process` are
/// caches; when absent they are re-derived from `container_handle` and
/// `process_id`.
pub struct RunningBuild {
    pub build: Build,

    pub container_handle: String,
    pub container: Option<Arc<dyn Container>>,

    pub process_id: u32,
    pub process: Option<Box<dyn Process>>,

    pub emitter: Option<SharedEmitter>,
}

impl std::fmt::Debug for RunningBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningBuild")
            .field("build", &self.build)
            .field("container_handle", &self.container_handle)
            .field("process_id", &self.process_id)
            .finish_non_exhaustive()
    }
}

/// A build whose script has exited, ready for its outputs to be
/// performed.
pub struct ExitedBuild {
    pub build: Build,

    pub container: Arc<dyn Container>,

    pub exit_status: i32,

    pub emitter: Option<SharedEmitter>,
}

impl std::fmt::Debug for ExitedBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitedBuild")
            .field("build", &self.build)
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

pub struct Builder {
    runtime: Arc<dyn RuntimeClient>,
    fetcher: Arc<dyn Fetcher>,
    performer: Arc<dyn Performer>,
    create_emitter: EmitterFactory,
}

impl Builder {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        fetcher: Arc<dyn Fetcher>,
        performer: Arc<dyn Performer>,
        create_emitter: EmitterFactory,
    ) -> Self {
        Self {
            runtime,
            fetcher,
            performer,
            create_emitter,
        }
    }

    /// Fetch the build's inputs, create its container, seed the source
    /// tree, and kick off the script.
    ///
    /// The returned build carries resolved inputs and the merged
    /// config. Fetched-input resource containers are released before
    /// this returns, success or not.
    #[tracing::instrument(name = "Builder::start", skip_all, fields(build = build.guid()))]
    pub async fn start(
        &self,
        build: Build,
        abort: CancellationToken,
    ) -> Result<RunningBuild, BuildError> {
        let emitter = (self.create_emitter)(build.events_callback());

        match self.try_start(build, &emitter, &abort).await {
            Ok(mut running) => {
                running.emitter = Some(emitter);
                Ok(running)
            }
            Err(err) => {
                emitter.close().await;
                Err(err)
            }
        }
    }

    /// Wait for the script to exit. Idempotent re-entry point: absent
    /// handles are looked up again, so this also resumes builds started
    /// by an earlier worker process.
    #[tracing::instrument(name = "Builder::attach", skip_all, fields(build = running.build.guid()))]
    pub async fn attach(
        &self,
        mut running: RunningBuild,
        abort: CancellationToken,
    ) -> Result<ExitedBuild, BuildError> {
        let emitter = running
            .emitter
            .take()
            .unwrap_or_else(|| (self.create_emitter)(running.build.events_callback()));

        match self.try_attach(running, &emitter, &abort).await {
            Ok(mut exited) => {
                exited.emitter = Some(emitter);
                Ok(exited)
            }
            Err(err) => {
                emitter.close().await;
                Err(err)
            }
        }
    }

    /// Report the exit status, perform the outputs selected by it, and
    /// return the completed build. The emitter is closed on the way
    /// out, whatever happens.
    #[tracing::instrument(name = "Builder::finish", skip_all, fields(build = exited.build.guid()))]
    pub async fn finish(
        &self,
        mut exited: ExitedBuild,
        abort: CancellationToken,
    ) -> Result<Build, BuildError> {
        let emitter = exited
            .emitter
            .take()
            .unwrap_or_else(|| (self.create_emitter)(exited.build.events_callback()));

        let result = self.try_finish(exited, &emitter, &abort).await;

        emitter.close().await;

        result
    }

    /// Run an ad-hoc process in a build's container with
    /// operator-provided io, for debugging a live build.
    #[tracing::instrument(name = "Builder::hijack", skip(self, spec, io))]
    pub async fn hijack(
        &self,
        handle: &str,
        spec: ProcessSpec,
        io: ProcessIo,
    ) -> Result<Box<dyn Process>, BuildError> {
        let container = self
            .runtime
            .lookup(handle)
            .await?
            .ok_or_else(|| BuildError::ContainerNotFound(handle.to_string()))?;

        Ok(container.run(spec, io).await?)
    }

    async fn try_start(
        &self,
        mut build: Build,
        emitter: &SharedEmitter,
        abort: &CancellationToken,
    ) -> Result<RunningBuild, BuildError> {
        let mut streams = Vec::new();
        let mut releasers = Vec::new();

        if !build.inputs().is_empty() {
            let fetched = self
                .fetcher
                .fetch(build.inputs().to_vec(), emitter.clone(), abort.clone())
                .await?;

            let mut config = build.config().clone();
            let mut inputs = Vec::with_capacity(fetched.len());
            for fetched_input in &fetched {
                if let Some(embedded) = fetched_input.config() {
                    config = config.merge(embedded.clone());
                }
                inputs.push(fetched_input.input().clone());
            }
            build.set_config(config);
            build.set_inputs(inputs);

            for fetched_input in fetched {
                let (input, stream, releaser) = fetched_input.into_parts();
                streams.push((input.name().to_string(), stream));
                releasers.push(releaser);
            }
        }

        let result = self.create_and_populate(&build, streams, emitter).await;

        // the input trees are in the container (or the build is dead);
        // their resource containers go back either way
        for releaser in releasers {
            releaser.release().await;
        }

        let container = result?;

        emitter
            .emit(Event::Start {
                time: Utc::now().timestamp(),
            })
            .await;

        let process = match self.run_build(&container, &build, emitter).await {
            Ok(process) => process,
            Err(err) => {
                let _ = container.stop(false).await;
                return Err(err);
            }
        };

        Ok(RunningBuild {
            container_handle: container.handle().to_string(),
            container: Some(container),
            process_id: process.id(),
            process: Some(process),
            build,
            emitter: None,
        })
    }

    async fn create_and_populate(
        &self,
        build: &Build,
        streams: Vec<(String, TarStream)>,
        emitter: &SharedEmitter,
    ) -> Result<Arc<dyn Container>, BuildError> {
        if build.config().image().is_empty() {
            emitter
                .emit(Event::error("failed to create container: no image specified"))
                .await;
            return Err(BuildError::NoImageSpecified);
        }

        emitter
            .emit(Event::Initialize {
                config: build.config().clone(),
            })
            .await;

        let spec = ContainerSpec {
            handle: build.guid().to_string(),
            rootfs: build.config().image().to_string(),
            privileged: build.privileged(),
        };

        let container = match self.runtime.create(spec).await {
            Ok(container) => container,
            Err(err) => {
                emitter
                    .emit(Event::error(format!("failed to create container: {err}")))
                    .await;
                return Err(BuildError::Runtime(err));
            }
        };

        if let Err(err) = self.stream_in_inputs(&container, build, streams).await {
            emitter
                .emit(Event::error(format!("failed to stream in resources: {err}")))
                .await;
            let _ = container.stop(false).await;
            return Err(err);
        }

        Ok(container)
    }

    async fn stream_in_inputs(
        &self,
        container: &Arc<dyn Container>,
        build: &Build,
        streams: Vec<(String, TarStream)>,
    ) -> Result<(), BuildError> {
        if streams.is_empty() {
            // no inputs; seed the source path so it exists
            return Ok(container.stream_in(BUILD_SRC_DIR, empty_tar()).await?);
        }

        let config = build.config();
        let mut by_name: BTreeMap<String, TarStream> = streams.into_iter().collect();

        if config.inputs().is_empty() {
            for (name, stream) in by_name {
                let dest = config.paths().get(&name).cloned().unwrap_or(name);
                container
                    .stream_in(&format!("{BUILD_SRC_DIR}/{dest}"), stream)
                    .await?;
            }

            return Ok(());
        }

        // the config names its inputs explicitly: stream exactly those
        for declared in config.inputs() {
            let stream = by_name
                .remove(&declared.name)
                .ok_or_else(|| BuildError::UnsatisfiedInput(declared.name.clone()))?;

            let dest = if declared.path.is_empty() {
                config
                    .paths()
                    .get(&declared.name)
                    .cloned()
                    .unwrap_or_else(|| declared.name.clone())
            } else {
                declared.path.clone()
            };

            container
                .stream_in(&format!("{BUILD_SRC_DIR}/{dest}"), stream)
                .await?;
        }

        Ok(())
    }

    async fn run_build(
        &self,
        container: &Arc<dyn Container>,
        build: &Build,
        emitter: &SharedEmitter,
    ) -> Result<Box<dyn Process>, BuildError> {
        let config = build.config();

        let env = config
            .params()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        let dir = if build.inputs().is_empty() {
            String::new()
        } else {
            BUILD_SRC_DIR.to_string()
        };

        let spec = ProcessSpec {
            path: config.run().path.clone(),
            args: config.run().args.clone(),
            env,
            dir,
            privileged: build.privileged(),
            tty: Some(TtySpec::default()),
        };

        debug!(path = %spec.path, "running build script");

        match container.run(spec, emitter_io(emitter)).await {
            Ok(process) => Ok(process),
            Err(err) => {
                emitter
                    .emit(Event::error(format!("failed to run: {err}")))
                    .await;
                Err(BuildError::Runtime(err))
            }
        }
    }

    async fn try_attach(
        &self,
        running: RunningBuild,
        emitter: &SharedEmitter,
        abort: &CancellationToken,
    ) -> Result<ExitedBuild, BuildError> {
        let RunningBuild {
            build,
            container_handle,
            container,
            process_id,
            process,
            ..
        } = running;

        let container = match container {
            Some(container) => container,
            None => match self.runtime.lookup(&container_handle).await {
                Ok(Some(container)) => container,
                Ok(None) => {
                    emitter.emit(Event::error("failed to lookup container")).await;
                    return Err(BuildError::ContainerNotFound(container_handle));
                }
                Err(err) => {
                    emitter.emit(Event::error("failed to lookup container")).await;
                    return Err(BuildError::Runtime(err));
                }
            },
        };

        let mut process = match process {
            Some(process) => process,
            None => match container.attach(process_id, emitter_io(emitter)).await {
                Ok(process) => process,
                Err(err) => {
                    emitter
                        .emit(Event::error(format!("failed to attach to process: {err}")))
                        .await;
                    return Err(BuildError::Runtime(err));
                }
            },
        };

        tokio::select! {
            result = process.wait() => match result {
                Ok(exit_status) => Ok(ExitedBuild {
                    build,
                    container,
                    exit_status,
                    emitter: None,
                }),
                Err(err) => {
                    emitter
                        .emit(Event::error(format!("running failed: {err}")))
                        .await;
                    Err(BuildError::Runtime(err))
                }
            },
            _ = abort.cancelled() => {
                let _ = container.stop(false).await;

                emitter
                    .emit(Event::error("running failed: build aborted"))
                    .await;

                Err(BuildError::Aborted)
            }
        }
    }

    async fn try_finish(
        &self,
        exited: ExitedBuild,
        emitter: &SharedEmitter,
        abort: &CancellationToken,
    ) -> Result<Build, BuildError> {
        let ExitedBuild {
            mut build,
            container,
            exit_status,
            ..
        } = exited;

        emitter
            .emit(Event::Finish {
                time: Utc::now().timestamp(),
                exit_status,
            })
            .await;

        // every input passes through as an output unless a performed
        // output of the same name overrides it
        let mut all_outputs: BTreeMap<String, Output> = build
            .inputs()
            .iter()
            .map(|input| (input.name().to_string(), Output::passthrough(input)))
            .collect();

        let to_perform: Vec<Output> = build
            .outputs()
            .iter()
            .filter(|output| output.performs_on(exit_status))
            .cloned()
            .map(|mut output| {
                if let Some(implicit) = all_outputs.get(output.name()) {
                    output.set_version(implicit.version().cloned());
                }
                output
            })
            .collect();

        if !to_perform.is_empty() {
            let performed = self
                .performer
                .perform(container, to_perform, emitter.clone(), abort.clone())
                .await?;

            for output in performed {
                all_outputs.insert(output.name().to_string(), output);
            }
        }

        build.set_outputs(all_outputs.into_values().collect());

        Ok(build)
    }
}

fn emitter_io(emitter: &SharedEmitter) -> ProcessIo {
    ProcessIo {
        stdin: None,
        stdout: Some(Box::new(LogWriter::new(
            emitter.clone(),
            Origin::run("stdout"),
        ))),
        stderr: Some(Box::new(LogWriter::new(
            emitter.clone(),
            Origin::run("stderr"),
        ))),
    }
}

fn empty_tar() -> TarStream {
    let archive = tar::Builder::new(Vec::new());
    let bytes = archive.into_inner().unwrap_or_default();
    Box::new(std::io::Cursor::new(bytes))
}
