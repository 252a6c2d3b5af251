// Re-export modules for library use
pub mod app;
pub mod config;
pub mod stimulus;

pub use app::Session;
pub use stimulus::{FeedbackLog, ScriptedStimulus};
