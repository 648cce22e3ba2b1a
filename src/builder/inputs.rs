use crate::events::{Event, LogWriter, Origin, SharedEmitter};
use crate::model::{Config, Input};
use crate::resource::{Resource, ResourceError, Tracker};
use crate::runtime::TarStream;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("build aborted")]
    Aborted,

    #[error(transparent)]
    Resource(ResourceError),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<ResourceError> for FetchError {
    fn from(value: ResourceError) -> Self {
        match value {
            ResourceError::Aborted => FetchError::Aborted,
            other => FetchError::Resource(other),
        }
    }
}

/// Returns a fetched input's resource to the tracker. Runs exactly
/// once, after the input's tar stream has been fully consumed.
#[async_trait]
pub trait Release: Send {
    async fn release(self: Box<Self>);
}

struct TrackerReleaser {
    tracker: Arc<Tracker>,
    resource: Resource,
}

#[async_trait]
impl Release for TrackerReleaser {
    async fn release(self: Box<Self>) {
        self.tracker.release(self.resource).await;
    }
}

/// One materialized input: the resolved input value, the tar of its
/// tree, the build config embedded in that tree (if any), and the
/// releaser for its resource container.
pub struct FetchedInput {
    input: Input,
    stream: TarStream,
    config: Option<Config>,
    releaser: Box<dyn Release>,
}

impl std::fmt::Debug for FetchedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedInput")
            .field("input", &self.input)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FetchedInput {
    pub fn new(
        input: Input,
        stream: TarStream,
        config: Option<Config>,
        releaser: Box<dyn Release>,
    ) -> Self {
        Self {
            input,
            stream,
            config,
            releaser,
        }
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn into_parts(self) -> (Input, TarStream, Box<dyn Release>) {
        (self.input, self.stream, self.releaser)
    }

    /// Discard the stream and return the resource.
    pub async fn release(self) {
        self.releaser.release().await;
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        inputs: Vec<Input>,
        emitter: SharedEmitter,
        abort: CancellationToken,
    ) -> Result<Vec<FetchedInput>, FetchError>;
}

/// Fetches every input concurrently, one resource container each.
///
/// Results come back in input order. The first failure interrupts the
/// in-flight fetches, but the fetcher always waits for all of them and
/// returns every obtained resource before reporting the error.
pub struct ParallelFetcher {
    tracker: Arc<Tracker>,
}

impl ParallelFetcher {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Fetcher for ParallelFetcher {
    #[tracing::instrument(name = "ParallelFetcher::fetch", skip_all, fields(inputs = inputs.len()))]
    async fn fetch(
        &self,
        inputs: Vec<Input>,
        emitter: SharedEmitter,
        abort: CancellationToken,
    ) -> Result<Vec<FetchedInput>, FetchError> {
        let interrupt = abort.child_token();

        let mut handles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let tracker = self.tracker.clone();
            let emitter = emitter.clone();
            let interrupt = interrupt.clone();

            handles.push(tokio::spawn(async move {
                let result = fetch_one(tracker, input, emitter, interrupt.clone()).await;

                // interrupt the siblings as soon as anything fails; the
                // collector below still waits for every task
                if result.is_err() {
                    interrupt.cancel();
                }

                result
            }));
        }

        let mut fetched = Vec::with_capacity(handles.len());
        let mut first_error = None;
        let mut failed = false;

        for joined in futures::future::join_all(handles).await {
            let result = match joined {
                Ok(result) => result,
                Err(err) => Err(FetchError::Other(err.into())),
            };

            match result {
                Ok(fetched_input) => fetched.push(fetched_input),
                Err(err) => {
                    failed = true;
                    if first_error.is_none() && !matches!(err, FetchError::Aborted) {
                        first_error = Some(err);
                    }
                }
            }
        }

        if !failed {
            return Ok(fetched);
        }

        debug!("fetch failed; returning obtained resources");

        for fetched_input in fetched {
            fetched_input.release().await;
        }

        Err(first_error.unwrap_or(FetchError::Aborted))
    }
}

async fn fetch_one(
    tracker: Arc<Tracker>,
    input: Input,
    emitter: SharedEmitter,
    abort: CancellationToken,
) -> Result<FetchedInput, FetchError> {
    let logs = LogWriter::new(emitter.clone(), Origin::input(input.name()));

    let mut resource = tracker
        .init(input.resource_type(), logs, abort.clone())
        .await?;

    match resource.fetch(input).await {
        Ok((stream, input, config)) => {
            emitter
                .emit(Event::Input {
                    input: input.clone(),
                })
                .await;

            let releaser = Box::new(TrackerReleaser { tracker, resource });
            Ok(FetchedInput::new(input, stream, config, releaser))
        }
        Err(err) => {
            tracker.release(resource).await;
            Err(err.into())
        }
    }
}
