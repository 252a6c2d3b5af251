//! Trial synchronization for a BCI experiment session
//!
//! This crate turns three independently running subsystems (a data source, a
//! stimulus controller and a trial processor) into a per-trial turn-taking
//! protocol. The [`TrialCoordinator`] owns the control loop, the
//! [`TrialProcessor`] classifies each trial, and every producer/consumer pair is
//! joined by a single-slot [`handshake`].

pub mod coordinator;
pub mod error;
pub mod handshake;
pub mod model;
pub mod ports;
pub mod processor;
pub mod status;
pub mod store;
pub mod subsystem;


// Re-export commonly used types
pub use coordinator::*;
pub use error::*;
pub use handshake::*;
pub use model::*;
pub use ports::*;
pub use processor::*;
pub use status::*;
pub use store::*;
pub use subsystem::*;
