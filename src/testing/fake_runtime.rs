use crate::runtime::{
    Container, ContainerSpec, Process, ProcessIo, ProcessSpec, RuntimeClient, RuntimeError,
    TarStream,
};
use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

/// What a scripted process does when the container runs it.
pub(crate) enum ScriptedRun {
    Exit {
        status: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// Runs forever; `wait` resolves to an error once the container is
    /// stopped.
    Hang,
    /// `wait` itself fails.
    WaitError(String),
}

impl ScriptedRun {
    /// Exit 0 with the given bytes on stdout, the shape of a healthy
    /// resource script.
    pub(crate) fn responding(stdout: &str) -> Self {
        ScriptedRun::Exit {
            status: 0,
            stdout: stdout.as_bytes().to_vec(),
            stderr: vec![],
        }
    }

    pub(crate) fn exiting(status: i32) -> Self {
        ScriptedRun::Exit {
            status,
            stdout: vec![],
            stderr: vec![],
        }
    }

    pub(crate) fn failing(status: i32, stdout: &str, stderr: &str) -> Self {
        ScriptedRun::Exit {
            status,
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }
}

/// Decides a [ScriptedRun] from the process spec and its drained stdin,
/// for containers created behind the test's back (e.g. by the tracker).
pub(crate) type ScriptHandler = dyn Fn(&ProcessSpec, &[u8]) -> ScriptedRun + Send + Sync;

#[derive(Default)]
pub(crate) struct FakeRuntime {
    containers: DashMap<String, Arc<FakeContainer>>,
    created: Mutex<Vec<ContainerSpec>>,
    destroyed: Mutex<Vec<String>>,
    create_failures: Mutex<VecDeque<String>>,
    script_handler: Mutex<Option<Arc<ScriptHandler>>>,
    stream_out_template: Mutex<HashMap<String, Vec<u8>>>,
    stream_in_failure_template: Mutex<Option<String>>,
    run_failure_template: Mutex<Option<String>>,
}

impl FakeRuntime {
    pub(crate) fn shared() -> Arc<FakeRuntime> {
        Arc::new(FakeRuntime::default())
    }

    pub(crate) fn created_specs(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub(crate) fn container(&self, handle: &str) -> Arc<FakeContainer> {
        self.containers
            .get(handle)
            .map(|c| c.clone())
            .unwrap_or_else(|| panic!("no such fake container: {handle}"))
    }

    pub(crate) fn insert(&self, container: Arc<FakeContainer>) {
        self.containers
            .insert(container.handle().to_string(), container);
    }

    pub(crate) fn fail_next_create(&self, message: &str) {
        self.create_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    /// Fail the first `stream_in` of every container this runtime
    /// creates.
    pub(crate) fn fail_stream_ins(&self, message: &str) {
        *self.stream_in_failure_template.lock().unwrap() = Some(message.to_string());
    }

    /// Fail the first `run` of every container this runtime creates.
    pub(crate) fn fail_runs(&self, message: &str) {
        *self.run_failure_template.lock().unwrap() = Some(message.to_string());
    }

    /// Serve `bytes` for `src` from every container this runtime
    /// creates, including ones created behind the test's back.
    pub(crate) fn stream_out_everywhere(&self, src: &str, bytes: Vec<u8>) {
        self.stream_out_template
            .lock()
            .unwrap()
            .insert(src.to_string(), bytes);
    }

    /// Install the behavior for every script any created container
    /// runs.
    pub(crate) fn handle_scripts(
        &self,
        handler: impl Fn(&ProcessSpec, &[u8]) -> ScriptedRun + Send + Sync + 'static,
    ) {
        *self.script_handler.lock().unwrap() = Some(Arc::new(handler));
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn create(&self, spec: ContainerSpec) -> Result<Arc<dyn Container>, RuntimeError> {
        self.created.lock().unwrap().push(spec.clone());

        if let Some(message) = self.create_failures.lock().unwrap().pop_front() {
            return Err(RuntimeError::Other(anyhow!(message)));
        }

        let container = FakeContainer::new(spec);
        *container.script_handler.lock().unwrap() = self.script_handler.lock().unwrap().clone();
        container
            .stream_out_data
            .lock()
            .unwrap()
            .extend(self.stream_out_template.lock().unwrap().clone());
        if let Some(message) = self.stream_in_failure_template.lock().unwrap().as_ref() {
            container.fail_next_stream_in(message);
        }
        if let Some(message) = self.run_failure_template.lock().unwrap().as_ref() {
            container.fail_next_run(message);
        }

        self.insert(container.clone());
        Ok(container)
    }

    async fn lookup(&self, handle: &str) -> Result<Option<Arc<dyn Container>>, RuntimeError> {
        Ok(self
            .containers
            .get(handle)
            .map(|c| c.clone() as Arc<dyn Container>))
    }

    async fn list(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.containers.iter().map(|c| c.key().clone()).collect())
    }

    async fn destroy(&self, handle: &str) -> Result<(), RuntimeError> {
        self.destroyed.lock().unwrap().push(handle.to_string());
        self.containers.remove(handle);
        Ok(())
    }
}

pub(crate) struct FakeContainer {
    spec: ContainerSpec,
    script_handler: Mutex<Option<Arc<ScriptHandler>>>,

    runs: Mutex<VecDeque<ScriptedRun>>,
    attaches: Mutex<VecDeque<ScriptedRun>>,
    run_failures: Mutex<VecDeque<String>>,
    attach_failures: Mutex<VecDeque<String>>,

    run_specs: Mutex<Vec<ProcessSpec>>,
    run_requests: Mutex<Vec<Vec<u8>>>,
    attached_pids: Mutex<Vec<u32>>,

    streamed_in: Mutex<Vec<(String, Vec<u8>)>>,
    stream_in_failures: Mutex<VecDeque<String>>,
    stream_out_data: Mutex<HashMap<String, Vec<u8>>>,
    stream_out_failures: Mutex<VecDeque<String>>,

    stop_calls: Mutex<Vec<bool>>,
    stopped: watch::Sender<bool>,

    next_pid: AtomicU32,
}

impl FakeContainer {
    pub(crate) fn new(spec: ContainerSpec) -> Arc<FakeContainer> {
        let (stopped, _) = watch::channel(false);

        Arc::new(FakeContainer {
            spec,
            script_handler: Mutex::new(None),
            runs: Mutex::new(VecDeque::new()),
            attaches: Mutex::new(VecDeque::new()),
            run_failures: Mutex::new(VecDeque::new()),
            attach_failures: Mutex::new(VecDeque::new()),
            run_specs: Mutex::new(vec![]),
            run_requests: Mutex::new(vec![]),
            attached_pids: Mutex::new(vec![]),
            streamed_in: Mutex::new(vec![]),
            stream_in_failures: Mutex::new(VecDeque::new()),
            stream_out_data: Mutex::new(HashMap::new()),
            stream_out_failures: Mutex::new(VecDeque::new()),
            stop_calls: Mutex::new(vec![]),
            stopped,
            next_pid: AtomicU32::new(1),
        })
    }

    pub(crate) fn with_handle(handle: &str) -> Arc<FakeContainer> {
        FakeContainer::new(ContainerSpec {
            handle: handle.to_string(),
            ..Default::default()
        })
    }

    pub(crate) fn queue_run(&self, run: ScriptedRun) {
        self.runs.lock().unwrap().push_back(run);
    }

    pub(crate) fn queue_attach(&self, run: ScriptedRun) {
        self.attaches.lock().unwrap().push_back(run);
    }

    pub(crate) fn fail_next_run(&self, message: &str) {
        self.run_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub(crate) fn fail_next_attach(&self, message: &str) {
        self.attach_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub(crate) fn fail_next_stream_in(&self, message: &str) {
        self.stream_in_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub(crate) fn fail_next_stream_out(&self, message: &str) {
        self.stream_out_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub(crate) fn set_stream_out(&self, src: &str, bytes: Vec<u8>) {
        self.stream_out_data
            .lock()
            .unwrap()
            .insert(src.to_string(), bytes);
    }

    pub(crate) fn run_specs(&self) -> Vec<ProcessSpec> {
        self.run_specs.lock().unwrap().clone()
    }

    /// The stdin bytes drained by each run, in run order.
    pub(crate) fn run_requests(&self) -> Vec<Vec<u8>> {
        self.run_requests.lock().unwrap().clone()
    }

    pub(crate) fn attached_pids(&self) -> Vec<u32> {
        self.attached_pids.lock().unwrap().clone()
    }

    pub(crate) fn streamed_in(&self) -> Vec<(String, Vec<u8>)> {
        self.streamed_in.lock().unwrap().clone()
    }

    pub(crate) fn stop_calls(&self) -> Vec<bool> {
        self.stop_calls.lock().unwrap().clone()
    }

    async fn spawn(&self, scripted: ScriptedRun, io: ProcessIo) -> Box<dyn Process> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        match scripted {
            ScriptedRun::Exit {
                status,
                stdout,
                stderr,
            } => {
                if let Some(mut sink) = io.stdout {
                    if !stdout.is_empty() {
                        sink.write(&stdout).await;
                    }
                }
                if let Some(mut sink) = io.stderr {
                    if !stderr.is_empty() {
                        sink.write(&stderr).await;
                    }
                }

                Box::new(FakeProcess {
                    id: pid,
                    outcome: Some(Ok(status)),
                    stopped: self.stopped.subscribe(),
                })
            }
            ScriptedRun::Hang => Box::new(FakeProcess {
                id: pid,
                outcome: None,
                stopped: self.stopped.subscribe(),
            }),
            ScriptedRun::WaitError(message) => Box::new(FakeProcess {
                id: pid,
                outcome: Some(Err(RuntimeError::Other(anyhow!(message)))),
                stopped: self.stopped.subscribe(),
            }),
        }
    }
}

#[async_trait]
impl Container for FakeContainer {
    fn handle(&self) -> &str {
        &self.spec.handle
    }

    async fn stream_in(&self, dest: &str, mut tar: TarStream) -> Result<(), RuntimeError> {
        if let Some(message) = self.stream_in_failures.lock().unwrap().pop_front() {
            return Err(RuntimeError::Other(anyhow!(message)));
        }

        let mut bytes = Vec::new();
        tar.read_to_end(&mut bytes)
            .await
            .map_err(|err| RuntimeError::Other(err.into()))?;

        self.streamed_in
            .lock()
            .unwrap()
            .push((dest.to_string(), bytes));

        Ok(())
    }

    async fn stream_out(&self, src: &str) -> Result<TarStream, RuntimeError> {
        if let Some(message) = self.stream_out_failures.lock().unwrap().pop_front() {
            return Err(RuntimeError::Other(anyhow!(message)));
        }

        let bytes = self
            .stream_out_data
            .lock()
            .unwrap()
            .get(src)
            .cloned()
            .unwrap_or_default();

        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    async fn run(
        &self,
        spec: ProcessSpec,
        mut io: ProcessIo,
    ) -> Result<Box<dyn Process>, RuntimeError> {
        if let Some(message) = self.run_failures.lock().unwrap().pop_front() {
            return Err(RuntimeError::Other(anyhow!(message)));
        }

        let mut request = Vec::new();
        if let Some(mut stdin) = io.stdin.take() {
            stdin
                .read_to_end(&mut request)
                .await
                .map_err(|err| RuntimeError::Other(err.into()))?;
        }

        self.run_specs.lock().unwrap().push(spec.clone());
        self.run_requests.lock().unwrap().push(request.clone());

        let scripted = self.runs.lock().unwrap().pop_front();
        let scripted = match scripted {
            Some(scripted) => scripted,
            None => {
                let handler = self.script_handler.lock().unwrap().clone();
                match handler {
                    Some(handler) => handler(&spec, &request),
                    None => panic!("no scripted run for process: {}", spec.path),
                }
            }
        };

        Ok(self.spawn(scripted, io).await)
    }

    async fn attach(&self, pid: u32, io: ProcessIo) -> Result<Box<dyn Process>, RuntimeError> {
        if let Some(message) = self.attach_failures.lock().unwrap().pop_front() {
            return Err(RuntimeError::Other(anyhow!(message)));
        }

        self.attached_pids.lock().unwrap().push(pid);

        let scripted = self
            .attaches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted attach for pid {pid}"));

        Ok(self.spawn(scripted, io).await)
    }

    async fn stop(&self, kill: bool) -> Result<(), RuntimeError> {
        self.stop_calls.lock().unwrap().push(kill);
        let _ = self.stopped.send(true);
        Ok(())
    }
}

struct FakeProcess {
    id: u32,
    outcome: Option<Result<i32, RuntimeError>>,
    stopped: watch::Receiver<bool>,
}

#[async_trait]
impl Process for FakeProcess {
    fn id(&self) -> u32 {
        self.id
    }

    async fn wait(&mut self) -> Result<i32, RuntimeError> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }

        // hang until the container is stopped
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
        Err(RuntimeError::Stopped)
    }
}
