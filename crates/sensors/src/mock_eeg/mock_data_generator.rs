use std::f32::consts::PI;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::types::DriverError;

/// Amplitude of the per-channel sinusoid, in microvolts.
const SIGNAL_AMPLITUDE_UV: f32 = 20.0;
/// Standard deviation of the background noise, in microvolts.
const NOISE_STD_UV: f32 = 5.0;
const LINE_FREQ_HZ: f32 = 50.0;

/// Generates EEG-like frames sample by sample.
///
/// Channel `i` carries a sinusoid at `2 + 4*i` Hz with a random starting
/// phase, mixed with Gaussian noise and a little line noise.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    sample_rate: u32,
    phases: Vec<f32>,
    line_amplitude: Vec<f32>,
    noise: Normal<f32>,
    rng: StdRng,
    sample_index: u64,
}

impl SignalGenerator {
    pub fn new(sample_rate: u32, n_channels: usize) -> Result<Self, DriverError> {
        Self::with_rng(sample_rate, n_channels, StdRng::from_entropy())
    }

    /// A generator whose output is reproducible.
    pub fn seeded(sample_rate: u32, n_channels: usize, seed: u64) -> Result<Self, DriverError> {
        Self::with_rng(sample_rate, n_channels, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sample_rate: u32, n_channels: usize, mut rng: StdRng) -> Result<Self, DriverError> {
        if sample_rate == 0 {
            return Err(DriverError::ConfigurationError(
                "sample rate must be positive".to_string(),
            ));
        }
        let noise = Normal::new(0.0, NOISE_STD_UV)
            .map_err(|e| DriverError::ConfigurationError(e.to_string()))?;

        let phases = (0..n_channels).map(|_| rng.gen::<f32>() * 2.0 * PI).collect();
        // Different channels pick up different amounts of line noise
        let line_amplitude = (0..n_channels).map(|_| rng.gen_range(0.2..0.7)).collect();

        debug!(
            "Signal generator ready: {} channels at {} Hz",
            n_channels, sample_rate
        );
        Ok(Self {
            sample_rate,
            phases,
            line_amplitude,
            noise,
            rng,
            sample_index: 0,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.phases.len()
    }

    /// Frequency of the sinusoid on `channel`.
    pub fn channel_frequency(channel: usize) -> f32 {
        2.0 + 4.0 * channel as f32
    }

    /// Produces the next frame, one value per channel, in microvolts.
    pub fn next_frame(&mut self) -> Vec<f32> {
        let t_secs = self.sample_index as f32 / self.sample_rate as f32;
        trace!("Generating frame {} at t={} secs", self.sample_index, t_secs);
        self.sample_index += 1;

        let line = (2.0 * PI * LINE_FREQ_HZ * t_secs).sin();
        (0..self.phases.len())
            .map(|ch| {
                let angle = 2.0 * PI * Self::channel_frequency(ch) * t_secs + self.phases[ch];
                SIGNAL_AMPLITUDE_UV * angle.sin()
                    + self.line_amplitude[ch] * line
                    + self.noise.sample(&mut self.rng)
            })
            .collect()
    }
}
