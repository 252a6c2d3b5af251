use serde::{Deserialize, Serialize};

/// Represents an unrecoverable fault inside one subsystem.
///
/// A subsystem never returns these across its thread boundary; the runner turns
/// them into the subsystem's sticky `error_encountered` state, which the
/// coordinator observes on its next health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum SubsystemError {
    /// A hardware-related fault.
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    /// The peer on the other side of a link went away.
    #[error("disconnected: {0}")]
    Disconnected(String),
    /// The data source could not provide a full window.
    #[error("insufficient samples: requested {requested}, available {available}")]
    InsufficientSamples { requested: usize, available: usize },
    /// Data did not have the expected shape or range.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// Loading or running a model failed.
    #[error("model error: {0}")]
    Model(String),
    /// Trial numbering broke contiguity.
    #[error("trial {got} out of sequence, expected {expected}")]
    TrialOutOfSequence { expected: u64, got: u64 },
    /// A handshake was set again before its waiter consumed the previous signal.
    #[error("handshake overrun: {0}")]
    HandshakeOverrun(String),
    /// Filesystem failure while persisting artifacts.
    #[error("I/O error: {0}")]
    Io(String),
    /// The subsystem thread panicked.
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for SubsystemError {
    fn from(err: std::io::Error) -> Self {
        SubsystemError::Io(err.to_string())
    }
}

/// One trial's captured signal: `n_channels` × `n_samples`, stored channel-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EegWindow {
    n_channels: usize,
    n_samples: usize,
    data: Vec<f32>,
}

impl EegWindow {
    pub fn zeros(n_channels: usize, n_samples: usize) -> Self {
        Self {
            n_channels,
            n_samples,
            data: vec![0.0; n_channels * n_samples],
        }
    }

    /// Builds a window from one vector per channel. All channels must have the same length.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Result<Self, SubsystemError> {
        let n_channels = channels.len();
        let n_samples = channels.first().map_or(0, Vec::len);
        if let Some(bad) = channels.iter().position(|c| c.len() != n_samples) {
            return Err(SubsystemError::InvalidData(format!(
                "channel {} has {} samples, expected {}",
                bad,
                channels[bad].len(),
                n_samples
            )));
        }

        let data = channels.into_iter().flatten().collect();
        Ok(Self {
            n_channels,
            n_samples,
            data,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn channel(&self, idx: usize) -> Option<&[f32]> {
        if idx >= self.n_channels {
            return None;
        }
        let start = idx * self.n_samples;
        Some(&self.data[start..start + self.n_samples])
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on a zero chunk size
        self.data.chunks_exact(self.n_samples.max(1))
    }

    /// Returns the samples in `start..stop` of every channel as a new window.
    pub fn crop(&self, start: usize, stop: usize) -> Result<EegWindow, SubsystemError> {
        if start > stop || stop > self.n_samples {
            return Err(SubsystemError::InvalidData(format!(
                "crop {}..{} outside window of {} samples",
                start, stop, self.n_samples
            )));
        }

        let mut data = Vec::with_capacity(self.n_channels * (stop - start));
        for channel in self.channels() {
            data.extend_from_slice(&channel[start..stop]);
        }
        Ok(EegWindow {
            n_channels: self.n_channels,
            n_samples: stop - start,
            data,
        })
    }
}
