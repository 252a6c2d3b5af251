//! Fixed-capacity per-channel sample history.

use std::collections::VecDeque;

use eeg_types::EegWindow;

use crate::types::DriverError;

/// Keeps the most recent `capacity` samples of every channel.
///
/// Frames are pushed whole, so all channels always hold the same number of
/// samples.
#[derive(Debug, Clone)]
pub struct SampleRing {
    channels: Vec<VecDeque<f32>>,
    capacity: usize,
    total_pushed: u64,
}

impl SampleRing {
    pub fn new(n_channels: usize, capacity: usize) -> Self {
        Self {
            channels: (0..n_channels)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
            capacity,
            total_pushed: 0,
        }
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently buffered per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples pushed since creation, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Appends one sample per channel, evicting the oldest once full.
    pub fn push_frame(&mut self, frame: &[f32]) -> Result<(), DriverError> {
        if frame.len() != self.channels.len() {
            return Err(DriverError::AcquisitionError(format!(
                "frame has {} values for {} channels",
                frame.len(),
                self.channels.len()
            )));
        }
        if self.capacity == 0 {
            return Ok(());
        }
        for (channel, &value) in self.channels.iter_mut().zip(frame) {
            if channel.len() == self.capacity {
                channel.pop_front();
            }
            channel.push_back(value);
        }
        self.total_pushed += 1;
        Ok(())
    }

    /// Copies out the newest `n_samples` of every channel, oldest first.
    pub fn latest(&self, n_samples: usize) -> Result<EegWindow, DriverError> {
        let available = self.len();
        if n_samples > available {
            return Err(DriverError::InsufficientSamples {
                requested: n_samples,
                available,
            });
        }
        let channels = self
            .channels
            .iter()
            .map(|channel| channel.range(available - n_samples..).copied().collect())
            .collect();
        EegWindow::from_channels(channels)
            .map_err(|e| DriverError::AcquisitionError(e.to_string()))
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_returns_newest_samples_in_order() {
        let mut ring = SampleRing::new(2, 4);
        for i in 0..6 {
            ring.push_frame(&[i as f32, -(i as f32)]).unwrap();
        }
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.total_pushed(), 6);

        let window = ring.latest(3).unwrap();
        assert_eq!(window.channel(0).unwrap(), &[3.0, 4.0, 5.0]);
        assert_eq!(window.channel(1).unwrap(), &[-3.0, -4.0, -5.0]);
    }

    #[test]
    fn test_latest_rejects_request_beyond_buffer() {
        let mut ring = SampleRing::new(1, 10);
        ring.push_frame(&[1.0]).unwrap();
        assert_eq!(
            ring.latest(2).unwrap_err(),
            DriverError::InsufficientSamples {
                requested: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_push_frame_rejects_wrong_width() {
        let mut ring = SampleRing::new(3, 10);
        assert!(ring.push_frame(&[1.0, 2.0]).is_err());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_clear_keeps_shape() {
        let mut ring = SampleRing::new(2, 3);
        ring.push_frame(&[1.0, 2.0]).unwrap();
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.n_channels(), 2);
        assert_eq!(ring.capacity(), 3);
    }
}
