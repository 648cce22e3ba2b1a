use super::{Event, Message};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for TransportError {
    fn from(value: anyhow::Error) -> Self {
        TransportError::Other(value)
    }
}

/// Dials the remote event consumer. The concrete transport (a
/// websocket client in the worker binary) lives outside the core.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError>;
}

/// A single live connection to the consumer.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Delivers a build's events to its remote consumer.
///
/// `emit` returns only once the event is on the wire; delivery failures
/// are handled internally and never reach the caller.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, event: Event);

    async fn close(&self);
}

/// Shared handle passed to every producer of a build's events.
pub type SharedEmitter = Arc<dyn Emitter>;

/// [Emitter] over a dialed connection, with unbounded reconnect.
///
/// Event loss is worse than back-pressure on the producer, so a failed
/// write closes the connection, sleeps a second, redials, and tries the
/// same event again, indefinitely. The connection mutex serializes
/// producers, which preserves per-producer event order on the wire.
pub struct RemoteEmitter {
    url: Url,
    dialer: Arc<dyn Dialer>,
    conn: Mutex<Option<Box<dyn Connection>>>,
}

impl RemoteEmitter {
    pub fn new(dialer: Arc<dyn Dialer>, url: Url) -> Self {
        Self {
            url,
            dialer,
            conn: Mutex::new(None),
        }
    }

    pub fn shared(dialer: Arc<dyn Dialer>, url: Url) -> SharedEmitter {
        Arc::new(Self::new(dialer, url))
    }

    async fn connect(&self) -> Box<dyn Connection> {
        loop {
            match self.dialer.dial(&self.url).await {
                Ok(conn) => return conn,
                Err(err) => {
                    debug!(url = %self.url, "dial failed: {err}");
                    tokio::time::sleep(RECONNECT_PAUSE).await;
                }
            }
        }
    }
}

#[async_trait]
impl Emitter for RemoteEmitter {
    async fn emit(&self, event: Event) {
        let message = Message::new(event);
        let mut conn = self.conn.lock().await;

        loop {
            if conn.is_none() {
                *conn = Some(self.connect().await);
            }

            let Some(open) = conn.as_mut() else {
                continue;
            };

            match open.send(&message).await {
                Ok(()) => return,
                Err(err) => {
                    debug!(url = %self.url, "event write failed: {err}");

                    if let Some(mut broken) = conn.take() {
                        broken.close().await;
                    }

                    tokio::time::sleep(RECONNECT_PAUSE).await;
                }
            }
        }
    }

    async fn close(&self) {
        let mut conn = self.conn.lock().await;

        if let Some(mut open) = conn.take() {
            open.close().await;
        }
    }
}
