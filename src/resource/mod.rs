//! Typed resources and the tracker that owns their containers.
//!
//! A resource type (`git`, `s3`, `raw`, ...) is an opaque script bundle
//! baked into an image at `/opt/resource/{in,out,check}`. The
//! [Tracker] spins up a throwaway container per obtained [Resource]
//! and tears it down on release; the resource drives the scripts over
//! the container runtime's process API.

mod resource;
mod tracker;

pub use resource::*;
pub use tracker::*;

use crate::runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("build aborted")]
    Aborted,

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error(
        "resource script {path} failed: exit status {status}\n\nstdout:\n\n{stdout}\n\nstderr:\n\n{stderr}"
    )]
    ScriptFailed {
        path: String,
        status: i32,
        stdout: String,
        stderr: String,
    },

    #[error("malformed response from resource script {path}: {err}")]
    MalformedResponse {
        path: String,
        err: serde_json::Error,
    },

    #[error("malformed build config {path}: {err}")]
    MalformedConfig { path: String, err: anyhow::Error },

    #[error(transparent)]
    Runtime(RuntimeError),
}

impl From<RuntimeError> for ResourceError {
    fn from(value: RuntimeError) -> Self {
        ResourceError::Runtime(value)
    }
}
