use super::{Event, EventType, Origin};
use crate::model::{Config, Input, Output};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("unknown event type: {0}")]
    UnknownEventType(u8),

    #[error(transparent)]
    Malformed(serde_json::Error),
}

impl From<serde_json::Error> for EventError {
    fn from(value: serde_json::Error) -> Self {
        EventError::Malformed(value)
    }
}

/// The wire envelope around an [Event]: `{"type": <tag>, "event":
/// <payload>}`. Encoding then decoding a message yields the original
/// event for every kind.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub event: Event,
}

impl Message {
    pub fn new(event: Event) -> Self {
        Self { event }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: u8,
    event: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct InitializeFields {
    config: Config,
}

#[derive(Serialize, Deserialize)]
struct StartFields {
    time: i64,
}

#[derive(Serialize, Deserialize)]
struct FinishFields {
    time: i64,
    exit_status: i32,
}

#[derive(Serialize, Deserialize)]
struct ErrorFields {
    message: String,
}

#[derive(Serialize, Deserialize)]
struct LogFields {
    origin: Origin,
    payload: String,
}

#[derive(Serialize, Deserialize)]
struct InputFields {
    input: Input,
}

#[derive(Serialize, Deserialize)]
struct OutputFields {
    output: Output,
}

fn payload(event: &Event) -> Result<serde_json::Value, serde_json::Error> {
    match event {
        Event::Initialize { config } => serde_json::to_value(InitializeFields {
            config: config.clone(),
        }),
        Event::Start { time } => serde_json::to_value(StartFields { time: *time }),
        Event::Finish { time, exit_status } => serde_json::to_value(FinishFields {
            time: *time,
            exit_status: *exit_status,
        }),
        Event::Error { message } => serde_json::to_value(ErrorFields {
            message: message.clone(),
        }),
        Event::Log { origin, payload } => serde_json::to_value(LogFields {
            origin: origin.clone(),
            payload: payload.clone(),
        }),
        Event::Input { input } => serde_json::to_value(InputFields {
            input: input.clone(),
        }),
        Event::Output { output } => serde_json::to_value(OutputFields {
            output: output.clone(),
        }),
    }
}

fn from_payload(event_type: EventType, value: serde_json::Value) -> Result<Event, EventError> {
    let event = match event_type {
        EventType::Initialize => {
            let fields: InitializeFields = serde_json::from_value(value)?;
            Event::Initialize {
                config: fields.config,
            }
        }
        EventType::Start => {
            let fields: StartFields = serde_json::from_value(value)?;
            Event::Start { time: fields.time }
        }
        EventType::Finish => {
            let fields: FinishFields = serde_json::from_value(value)?;
            Event::Finish {
                time: fields.time,
                exit_status: fields.exit_status,
            }
        }
        EventType::Error => {
            let fields: ErrorFields = serde_json::from_value(value)?;
            Event::Error {
                message: fields.message,
            }
        }
        EventType::Log => {
            let fields: LogFields = serde_json::from_value(value)?;
            Event::Log {
                origin: fields.origin,
                payload: fields.payload,
            }
        }
        EventType::Input => {
            let fields: InputFields = serde_json::from_value(value)?;
            Event::Input {
                input: fields.input,
            }
        }
        EventType::Output => {
            let fields: OutputFields = serde_json::from_value(value)?;
            Event::Output {
                output: fields.output,
            }
        }
    };

    Ok(event)
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let envelope = Envelope {
            tag: self.event.event_type().tag(),
            event: payload(&self.event).map_err(serde::ser::Error::custom)?,
        };

        envelope.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let envelope = Envelope::deserialize(deserializer)?;

        let event_type = EventType::from_tag(envelope.tag)
            .ok_or_else(|| D::Error::custom(EventError::UnknownEventType(envelope.tag)))?;

        let event = from_payload(event_type, envelope.event).map_err(D::Error::custom)?;

        Ok(Message { event })
    }
}
