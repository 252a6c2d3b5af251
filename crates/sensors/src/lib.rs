pub mod types;
pub mod ring_buffer;
pub mod mock_eeg;

// Re-export the main types that users need
pub use types::{AmplifierStatus, DriverError};
pub use ring_buffer::SampleRing;
pub use mock_eeg::driver::{AmplifierSource, MockAmplifier};
