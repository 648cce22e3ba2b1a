use super::{FetchError, PerformError};
use crate::runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("build aborted")]
    Aborted,

    #[error("no image specified")]
    NoImageSpecified,

    #[error("unsatisfied input: {0}")]
    UnsatisfiedInput(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Perform(PerformError),

    #[error(transparent)]
    Runtime(RuntimeError),
}

impl From<FetchError> for BuildError {
    fn from(value: FetchError) -> Self {
        match value {
            FetchError::Aborted => BuildError::Aborted,
            other => BuildError::Fetch(other),
        }
    }
}

impl From<PerformError> for BuildError {
    fn from(value: PerformError) -> Self {
        match value {
            PerformError::Aborted => BuildError::Aborted,
            other => BuildError::Perform(other),
        }
    }
}

impl From<RuntimeError> for BuildError {
    fn from(value: RuntimeError) -> Self {
        BuildError::Runtime(value)
    }
}
