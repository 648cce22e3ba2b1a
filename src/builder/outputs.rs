use crate::events::{Event, LogWriter, Origin, SharedEmitter};
use crate::model::Output;
use crate::resource::{ResourceError, Tracker, RESOURCE_WORK_DIR};
use crate::runtime::Container;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PerformError {
    #[error("build aborted")]
    Aborted,

    #[error(transparent)]
    Resource(ResourceError),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<ResourceError> for PerformError {
    fn from(value: ResourceError) -> Self {
        match value {
            ResourceError::Aborted => PerformError::Aborted,
            other => PerformError::Resource(other),
        }
    }
}

#[async_trait]
pub trait Performer: Send + Sync {
    async fn perform(
        &self,
        container: Arc<dyn Container>,
        outputs: Vec<Output>,
        emitter: SharedEmitter,
        abort: CancellationToken,
    ) -> Result<Vec<Output>, PerformError>;
}

/// Performs every output concurrently, one resource container each,
/// every task working from its own tar snapshot of the build's tree.
///
/// Result order is not guaranteed. Resources are released whether or
/// not their output succeeded; on any failure the whole call reports
/// the first non-abort error and no outputs.
pub struct ParallelPerformer {
    tracker: Arc<Tracker>,
}

impl ParallelPerformer {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Performer for ParallelPerformer {
    #[tracing::instrument(name = "ParallelPerformer::perform", skip_all, fields(outputs = outputs.len()))]
    async fn perform(
        &self,
        container: Arc<dyn Container>,
        outputs: Vec<Output>,
        emitter: SharedEmitter,
        abort: CancellationToken,
    ) -> Result<Vec<Output>, PerformError> {
        let mut handles = Vec::with_capacity(outputs.len());
        for output in outputs {
            let tracker = self.tracker.clone();
            let container = container.clone();
            let emitter = emitter.clone();
            let abort = abort.clone();

            handles.push(tokio::spawn(async move {
                perform_one(tracker, container, output, emitter, abort).await
            }));
        }

        let mut performed = Vec::with_capacity(handles.len());
        let mut first_error = None;
        let mut failed = false;

        for joined in futures::future::join_all(handles).await {
            let result = match joined {
                Ok(result) => result,
                Err(err) => Err(PerformError::Other(err.into())),
            };

            match result {
                Ok(output) => performed.push(output),
                Err(err) => {
                    failed = true;
                    if first_error.is_none() && !matches!(err, PerformError::Aborted) {
                        first_error = Some(err);
                    }
                }
            }
        }

        if failed {
            debug!("output perform failed; discarding partial results");
            return Err(first_error.unwrap_or(PerformError::Aborted));
        }

        Ok(performed)
    }
}

async fn perform_one(
    tracker: Arc<Tracker>,
    container: Arc<dyn Container>,
    output: Output,
    emitter: SharedEmitter,
    abort: CancellationToken,
) -> Result<Output, PerformError> {
    let source = container
        .stream_out(&format!("{RESOURCE_WORK_DIR}/"))
        .await
        .map_err(|err| PerformError::Resource(ResourceError::Runtime(err)))?;

    let logs = LogWriter::new(emitter.clone(), Origin::output(output.name()));

    let mut resource = tracker
        .init(output.resource_type(), logs, abort.clone())
        .await?;

    let name = output.name().to_string();
    let result = resource.publish(source, output).await;

    tracker.release(resource).await;

    match result {
        Ok(output) => {
            emitter
                .emit(Event::Output {
                    output: output.clone(),
                })
                .await;

            Ok(output)
        }
        Err(ResourceError::Aborted) => Err(PerformError::Aborted),
        Err(err) => {
            emitter
                .emit(Event::error(format!("{name} output failed: {err}")))
                .await;

            Err(err.into())
        }
    }
}
