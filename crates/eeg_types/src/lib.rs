//! Shared types for the BCI trial session
//!
//! This crate contains the data model, configuration and subsystem error used
//! by the coordinator, the trial processor and the external collaborators
//! (data source and stimulus controller).

pub mod config;
pub mod data;
pub mod trial;

// Re-export commonly used types
pub use config::*;
pub use data::*;
pub use trial::*;
