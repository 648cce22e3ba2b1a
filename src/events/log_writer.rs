use super::{Event, Origin, SharedEmitter};
use crate::runtime::LogSink;
use async_trait::async_trait;

/// Turns raw output bytes from one origin into [Event::Log]s.
///
/// Writes may split multi-byte characters anywhere, so the writer emits
/// the longest valid-UTF-8 prefix of what it has seen and buffers an
/// incomplete trailing codepoint (at most 3 bytes) for the next write.
/// Bytes that can never complete a codepoint become U+FFFD; a payload
/// is therefore always valid UTF-8.
pub struct LogWriter {
    emitter: SharedEmitter,
    origin: Origin,
    dangling: Vec<u8>,
}

impl LogWriter {
    pub fn new(emitter: SharedEmitter, origin: Origin) -> Self {
        Self {
            emitter,
            origin,
            dangling: Vec::new(),
        }
    }

    pub async fn write(&mut self, data: &[u8]) {
        self.dangling.extend_from_slice(data);

        let payload = split_complete(&mut self.dangling);
        if !payload.is_empty() {
            self.emit(payload).await;
        }
    }

    /// Flushes whatever is still buffered. An incomplete trailing
    /// codepoint at end-of-stream can no longer be completed, so it is
    /// emitted as replacement characters.
    pub async fn close(&mut self) {
        if self.dangling.is_empty() {
            return;
        }

        let remainder = String::from_utf8_lossy(&self.dangling).into_owned();
        self.dangling.clear();
        self.emit(remainder).await;
    }

    async fn emit(&self, payload: String) {
        self.emitter
            .emit(Event::Log {
                origin: self.origin.clone(),
                payload,
            })
            .await;
    }
}

#[async_trait]
impl LogSink for LogWriter {
    async fn write(&mut self, data: &[u8]) {
        LogWriter::write(self, data).await;
    }
}

/// Splits off the decodable prefix of `buf`, leaving at most an
/// incomplete trailing codepoint behind. Definitely-invalid sequences
/// are replaced with U+FFFD rather than held back.
fn split_complete(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut rest: &[u8] = buf;

    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                rest = &[];
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                out.push_str(String::from_utf8_lossy(valid).as_ref());

                match err.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[bad..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }

    *buf = rest.to_vec();
    out
}
