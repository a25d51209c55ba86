//! Scenario testing with mandatory oracles.
//!
//! A scenario scripts a server and a sequence of session inputs, runs them
//! synchronously, and hands the final [`World`] to an oracle. There is no
//! way to run a scenario without one.
//!
//! ```text
//! Scenario::new(..).server(..).connect(..).submit(..)
//!     .oracle(..)   -> RunnableScenario
//!     .run()        -> Result<(), String>
//! ```

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario, Step};
pub use world::{World, WorldEvent};

/// Final-state check. Returns a description of the first violation.
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;
