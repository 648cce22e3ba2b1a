//! Contract with the external container runtime.
//!
//! The core never talks to a container daemon directly; it drives these
//! traits, implemented by the worker binary against whatever runtime it
//! fronts. Byte content crosses the boundary as tar streams.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

/// A tar archive flowing in or out of a container.
pub type TarStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// `wait` on a process whose container was stopped resolves to
    /// this rather than an exit status.
    #[error("process terminated: container stopped")]
    Stopped,

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for RuntimeError {
    fn from(value: anyhow::Error) -> Self {
        RuntimeError::Other(value)
    }
}

#[derive(Builder, Clone, Debug, Default, Eq, PartialEq)]
#[builder(default, setter(into))]
pub struct ContainerSpec {
    pub handle: String,
    pub rootfs: String,
    pub privileged: bool,
}

impl ContainerSpec {
    pub fn builder() -> ContainerSpecBuilder {
        Default::default()
    }
}

/// Terminal dimensions for an interactively-run process. The defaults
/// let the runtime pick.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TtySpec {
    pub columns: Option<u32>,
    pub rows: Option<u32>,
}

#[derive(Builder, Clone, Debug, Default, Eq, PartialEq)]
#[builder(default, setter(into))]
pub struct ProcessSpec {
    pub path: String,
    pub args: Vec<String>,

    /// `NAME=value` pairs.
    pub env: Vec<String>,

    /// Working directory; empty leaves the runtime default.
    pub dir: String,

    pub privileged: bool,
    pub tty: Option<TtySpec>,
}

impl ProcessSpec {
    pub fn builder() -> ProcessSpecBuilder {
        Default::default()
    }
}

/// Where a process's streams go. Sinks receive raw bytes as the runtime
/// reads them; `None` discards.
#[derive(Default)]
pub struct ProcessIo {
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stdout: Option<Box<dyn LogSink>>,
    pub stderr: Option<Box<dyn LogSink>>,
}

/// Byte sink for process output. Delivery is best-effort from the
/// process's point of view; writes do not fail.
#[async_trait]
pub trait LogSink: Send {
    async fn write(&mut self, data: &[u8]);
}

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn create(&self, spec: ContainerSpec) -> Result<Arc<dyn Container>, RuntimeError>;

    async fn lookup(&self, handle: &str) -> Result<Option<Arc<dyn Container>>, RuntimeError>;

    async fn list(&self) -> Result<Vec<String>, RuntimeError>;

    async fn destroy(&self, handle: &str) -> Result<(), RuntimeError>;
}

#[async_trait]
pub trait Container: Send + Sync {
    fn handle(&self) -> &str;

    async fn stream_in(&self, dest: &str, tar: TarStream) -> Result<(), RuntimeError>;

    async fn stream_out(&self, src: &str) -> Result<TarStream, RuntimeError>;

    async fn run(&self, spec: ProcessSpec, io: ProcessIo) -> Result<Box<dyn Process>, RuntimeError>;

    async fn attach(&self, pid: u32, io: ProcessIo) -> Result<Box<dyn Process>, RuntimeError>;

    async fn stop(&self, kill: bool) -> Result<(), RuntimeError>;
}

#[async_trait]
pub trait Process: Send {
    fn id(&self) -> u32;

    async fn wait(&mut self) -> Result<i32, RuntimeError>;
}
