//! Typed build events and their delivery path.
//!
//! Every observable moment of a build — initialization, script start,
//! log bytes, resolved inputs, performed outputs, errors, completion —
//! is an [Event]. Events are wrapped in a numeric-tagged [Message]
//! envelope and pushed to the remote consumer by an [Emitter], which
//! owns reconnection so producers never observe transport failures.

mod emitter;
mod event;
mod log_writer;
mod message;

pub use emitter::*;
pub use event::*;
pub use log_writer::*;
pub use message::*;
