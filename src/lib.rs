//! # Capstan
//!
//! The build-execution core of a CI worker. Given a declarative [Build],
//! the [builder::Builder] fetches typed inputs from external resources,
//! runs the build script inside a container provided by an external
//! runtime, and publishes typed outputs back through the same resource
//! types.
//!
//! The flow runs in three phases. `start` fans out the input fetches,
//! creates the build container and kicks off the script. `attach` waits
//! for the script to exit (and can re-derive its handles after a worker
//! restart). `finish` performs the outputs and returns the completed
//! [Build]. Every phase reports progress as a stream of typed [events]
//! delivered to a remote consumer, and honors a shared abort signal at
//! each suspension point.
//!

pub mod builder;
pub mod events;
pub mod model;
pub mod resource;
pub mod runtime;


pub use builder::{BuildError, Builder, ExitedBuild, RunningBuild};
pub use model::{Build, Config, Input, Output};

#[macro_use]
extern crate derive_builder;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
