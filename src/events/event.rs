use crate::model::{Config, Input, Output};
use serde::{Deserialize, Serialize};

/// The producer of a log event: the build script itself (`run`), or a
/// named input/output resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginType {
    Input,
    Output,
    Run,
}

/// The `{type, name}` tag identifying which stream a [Event::Log]
/// belongs to. Names are the input/output name, or `stdout`/`stderr`
/// for the build script.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    #[serde(rename = "type")]
    pub origin_type: OriginType,
    pub name: String,
}

impl Origin {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            origin_type: OriginType::Input,
            name: name.into(),
        }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self {
            origin_type: OriginType::Output,
            name: name.into(),
        }
    }

    pub fn run(name: impl Into<String>) -> Self {
        Self {
            origin_type: OriginType::Run,
            name: name.into(),
        }
    }
}

/// Stable numeric tags for the wire envelope, in event-declaration
/// order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EventType {
    Initialize,
    Start,
    Finish,
    Error,
    Log,
    Input,
    Output,
}

impl EventType {
    pub fn tag(self) -> u8 {
        match self {
            EventType::Initialize => 0,
            EventType::Start => 1,
            EventType::Finish => 2,
            EventType::Error => 3,
            EventType::Log => 4,
            EventType::Input => 5,
            EventType::Output => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<EventType> {
        match tag {
            0 => Some(EventType::Initialize),
            1 => Some(EventType::Start),
            2 => Some(EventType::Finish),
            3 => Some(EventType::Error),
            4 => Some(EventType::Log),
            5 => Some(EventType::Input),
            6 => Some(EventType::Output),
            _ => None,
        }
    }
}

/// A single event in a build's transcript. The consumer reconstructs
/// the whole build from this stream, so no event may be dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The build's effective config, after input-config merging.
    Initialize { config: Config },

    /// The build script is about to run. Unix seconds.
    Start { time: i64 },

    /// The build script exited. Unix seconds.
    Finish { time: i64, exit_status: i32 },

    /// A fatal, phase-ending condition, described for the consumer.
    Error { message: String },

    /// A chunk of output from one origin. Payload is always valid
    /// UTF-8.
    Log { origin: Origin, payload: String },

    /// An input resolved by its resource's `in` script.
    Input { input: Input },

    /// An output performed by its resource's `out` script.
    Output { output: Output },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Initialize { .. } => EventType::Initialize,
            Event::Start { .. } => EventType::Start,
            Event::Finish { .. } => EventType::Finish,
            Event::Error { .. } => EventType::Error,
            Event::Log { .. } => EventType::Log,
            Event::Input { .. } => EventType::Input,
            Event::Output { .. } => EventType::Output,
        }
    }

    pub fn error(message: impl Into<String>) -> Event {
        Event::Error {
            message: message.into(),
        }
    }
}
