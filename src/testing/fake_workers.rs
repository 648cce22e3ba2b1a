use crate::builder::{FetchError, FetchedInput, Fetcher, PerformError, Performer, Release};
use crate::events::SharedEmitter;
use crate::model::{Input, Output};
use crate::runtime::Container;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Counts releases so tests can assert the exactly-once law without a
/// real tracker.
#[derive(Clone, Default)]
pub(crate) struct CountingReleaser(Arc<AtomicUsize>);

impl CountingReleaser {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Release for CountingReleaser {
    async fn release(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeFetcher {
    result: Mutex<Option<Result<Vec<FetchedInput>, FetchError>>>,
    fetched: Mutex<Vec<Vec<Input>>>,
}

impl FakeFetcher {
    pub(crate) fn shared() -> Arc<FakeFetcher> {
        Arc::new(FakeFetcher::default())
    }

    pub(crate) fn returns(&self, result: Result<Vec<FetchedInput>, FetchError>) {
        *self.result.lock().unwrap() = Some(result);
    }

    pub(crate) fn calls(&self) -> Vec<Vec<Input>> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        inputs: Vec<Input>,
        _emitter: SharedEmitter,
        _abort: CancellationToken,
    ) -> Result<Vec<FetchedInput>, FetchError> {
        self.fetched.lock().unwrap().push(inputs);

        self.result
            .lock()
            .unwrap()
            .take()
            .expect("FakeFetcher has no canned result")
    }
}

#[derive(Default)]
pub(crate) struct FakePerformer {
    result: Mutex<Option<Result<Vec<Output>, PerformError>>>,
    performed: Mutex<Vec<Vec<Output>>>,
}

impl FakePerformer {
    pub(crate) fn shared() -> Arc<FakePerformer> {
        Arc::new(FakePerformer::default())
    }

    pub(crate) fn returns(&self, result: Result<Vec<Output>, PerformError>) {
        *self.result.lock().unwrap() = Some(result);
    }

    pub(crate) fn calls(&self) -> Vec<Vec<Output>> {
        self.performed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Performer for FakePerformer {
    async fn perform(
        &self,
        _container: Arc<dyn Container>,
        outputs: Vec<Output>,
        _emitter: SharedEmitter,
        _abort: CancellationToken,
    ) -> Result<Vec<Output>, PerformError> {
        self.performed.lock().unwrap().push(outputs);

        self.result
            .lock()
            .unwrap()
            .take()
            .expect("FakePerformer has no canned result")
    }
}
