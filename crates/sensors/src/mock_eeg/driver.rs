use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, info, warn};

use eeg_types::{AmplifierConfig, BciConfig, EegWindow, SubsystemError};
use session::{DataSource, RunOutcome, Subsystem, SubsystemContext};

use super::mock_data_generator::SignalGenerator;
use crate::ring_buffer::SampleRing;
use crate::types::{AmplifierStatus, DriverError};

/// How often the acquisition loop tops up the ring buffer.
const ACQUISITION_TICK: Duration = Duration::from_millis(10);

// Amplifier ids currently claimed, to simulate exclusive hardware access
lazy_static! {
    static ref CLAIMED_AMPLIFIERS: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

/// Acquisition state shared between the amplifier thread and its readers.
struct Acquisition {
    ring: SampleRing,
    generator: SignalGenerator,
    status: AmplifierStatus,
    started_at: Option<Instant>,
    produced: u64,
    sample_rate: u32,
}

impl Acquisition {
    /// Generates every sample that is due by wall-clock time.
    fn catch_up(&mut self) -> Result<usize, DriverError> {
        let Some(started_at) = self.started_at else {
            return Ok(0);
        };
        let due = (started_at.elapsed().as_secs_f64() * f64::from(self.sample_rate)) as u64;
        let mut generated = 0;
        while self.produced < due {
            let frame = self.generator.next_frame();
            self.ring.push_frame(&frame)?;
            self.produced += 1;
            generated += 1;
        }
        Ok(generated)
    }
}

fn lock(acq: &Mutex<Acquisition>) -> MutexGuard<'_, Acquisition> {
    acq.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A simulated amplifier that streams synthetic EEG into a ring buffer.
///
/// The amplifier runs as a session subsystem; the coordinator reads from it
/// through the [`AmplifierSource`] returned by [`MockAmplifier::data_source`].
pub struct MockAmplifier {
    config: AmplifierConfig,
    n_channels: usize,
    sample_rate: u32,
    shared: Arc<Mutex<Acquisition>>,
    claimed: bool,
}

impl MockAmplifier {
    pub fn new(config: &BciConfig) -> Result<Self, DriverError> {
        let n_channels = config.global.n_channels;
        let sample_rate = config.global.sample_rate;
        if n_channels == 0 {
            return Err(DriverError::ConfigurationError(
                "At least one channel must be configured".to_string(),
            ));
        }
        let generator = SignalGenerator::new(sample_rate, n_channels)?;
        Ok(Self::with_generator(config, generator))
    }

    /// Uses a caller-provided generator, e.g. a seeded one.
    pub fn with_generator(config: &BciConfig, generator: SignalGenerator) -> Self {
        let acquisition = Acquisition {
            ring: SampleRing::new(generator.n_channels(), config.ring_capacity()),
            generator,
            status: AmplifierStatus::NotInitialized,
            started_at: None,
            produced: 0,
            sample_rate: config.global.sample_rate,
        };
        Self {
            config: config.amplifier.clone(),
            n_channels: config.global.n_channels,
            sample_rate: config.global.sample_rate,
            shared: Arc::new(Mutex::new(acquisition)),
            claimed: false,
        }
    }

    /// The read side handed to the coordinator.
    pub fn data_source(&self) -> Arc<dyn DataSource> {
        Arc::new(AmplifierSource {
            shared: self.shared.clone(),
        })
    }

    pub fn get_status(&self) -> AmplifierStatus {
        lock(&self.shared).status.clone()
    }

    fn connect(&mut self) -> Result<(), DriverError> {
        let mut claimed = CLAIMED_AMPLIFIERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(self.config.amp_id) {
            return Err(DriverError::HardwareNotFound(format!(
                "Amplifier {} already in use by another driver instance",
                self.config.amp_id
            )));
        }
        self.claimed = true;

        info!(
            "Connected to {} amplifier #{} at {} (command {}, notification {}, data {})",
            self.config.amp_model,
            self.config.amp_id,
            self.config.socket_address,
            self.config.command_port,
            self.config.notification_port,
            self.config.data_port
        );
        info!(
            "Acquiring {} channels at {} Hz",
            self.n_channels, self.sample_rate
        );
        Ok(())
    }

    fn release(&mut self) {
        if self.claimed {
            CLAIMED_AMPLIFIERS
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.config.amp_id);
            self.claimed = false;
        }
    }
}

impl Subsystem for MockAmplifier {
    fn name(&self) -> &'static str {
        "data_source"
    }

    fn initialize(&mut self) -> Result<(), SubsystemError> {
        self.connect()?;
        lock(&self.shared).status = AmplifierStatus::Ok;
        Ok(())
    }

    fn run(&mut self, ctx: &SubsystemContext) -> Result<RunOutcome, SubsystemError> {
        {
            let mut acq = lock(&self.shared);
            if acq.status != AmplifierStatus::Ok {
                return Err(DriverError::NotInitialized.into());
            }
            acq.started_at = Some(Instant::now());
            acq.status = AmplifierStatus::Running;
        }
        info!("Amplifier acquisition started");

        loop {
            let result = lock(&self.shared).catch_up();
            if let Err(e) = result {
                lock(&self.shared).status = AmplifierStatus::Error(e.to_string());
                return Err(e.into());
            }
            if ctx.stop.wait_timeout(ACQUISITION_TICK) {
                break;
            }
        }

        let mut acq = lock(&self.shared);
        acq.status = AmplifierStatus::Stopped;
        info!(
            "Amplifier acquisition stopped after {} samples",
            acq.produced
        );
        Ok(RunOutcome::Stopped)
    }
}

impl Drop for MockAmplifier {
    fn drop(&mut self) {
        if self.get_status() == AmplifierStatus::Running {
            warn!("MockAmplifier dropped while acquiring.");
        }
        self.release();
    }
}

/// Read handle on a [`MockAmplifier`]'s ring buffer.
pub struct AmplifierSource {
    shared: Arc<Mutex<Acquisition>>,
}

impl DataSource for AmplifierSource {
    fn get_samples(&self, n_samples: usize) -> Result<(EegWindow, DateTime<Utc>), SubsystemError> {
        let mut acq = lock(&self.shared);
        match &acq.status {
            AmplifierStatus::Running => {}
            AmplifierStatus::Error(msg) => return Err(SubsystemError::Disconnected(msg.clone())),
            _ => return Err(DriverError::NotInitialized.into()),
        }
        acq.catch_up()?;
        let window = acq.ring.latest(n_samples)?;
        let fetched_at = Utc::now();
        debug!("Served {} samples per channel", n_samples);
        Ok((window, fetched_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(amp_id: u32) -> BciConfig {
        let mut config = BciConfig::default();
        config.global.n_channels = 3;
        config.global.sample_rate = 1000;
        config.amplifier.amp_id = amp_id;
        config
    }

    #[test]
    fn test_amplifier_id_is_exclusive() {
        let config = config(101);
        let mut first = MockAmplifier::new(&config).unwrap();
        first.initialize().unwrap();

        let mut second = MockAmplifier::new(&config).unwrap();
        assert!(matches!(
            second.initialize(),
            Err(SubsystemError::HardwareFault(_))
        ));

        drop(first);
        second.initialize().unwrap();
    }

    #[test]
    fn test_source_requires_running_amplifier() {
        let amp = MockAmplifier::new(&config(102)).unwrap();
        let source = amp.data_source();
        assert!(source.get_samples(1).is_err());
    }

    #[test]
    fn test_acquisition_fills_ring_until_stopped() {
        let config = config(103);
        let mut amp = MockAmplifier::with_generator(
            &config,
            SignalGenerator::seeded(1000, 3, 9).unwrap(),
        );
        amp.initialize().unwrap();
        let source = amp.data_source();
        let ctx = SubsystemContext::standalone("data_source");
        let stop = ctx.stop.clone();

        let handle = std::thread::spawn(move || {
            let outcome = amp.run(&ctx);
            (amp, outcome)
        });

        std::thread::sleep(Duration::from_millis(150));
        let (window, fetched_at) = source.get_samples(100).unwrap();
        assert_eq!(window.n_channels(), 3);
        assert_eq!(window.n_samples(), 100);
        assert!(fetched_at <= Utc::now());

        let err = source.get_samples(1_000_000).unwrap_err();
        assert!(matches!(err, SubsystemError::InsufficientSamples { .. }));

        stop.request();
        let (amp, outcome) = handle.join().unwrap();
        assert_eq!(outcome.unwrap(), RunOutcome::Stopped);
        assert_eq!(amp.get_status(), AmplifierStatus::Stopped);
    }
}
