//! Configuration types for the BCI session
//!
//! The configuration is read once at startup from a TOML file and shared as an
//! `Arc<BciConfig>` afterwards; nothing mutates it during a run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by every subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Number of EEG channels
    pub n_channels: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            n_channels: 8,
            sample_rate: 250,
        }
    }
}

/// Connection and buffering settings for the amplifier data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplifierConfig {
    pub socket_address: String,
    pub command_port: u16,
    pub notification_port: u16,
    pub data_port: u16,
    pub amp_id: u32,
    pub amp_model: String,
    /// Seconds of signal kept in the ring buffer
    pub ringbuffer_time_capacity: u32,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            socket_address: "127.0.0.1".to_string(),
            command_port: 9877,
            notification_port: 9878,
            data_port: 9879,
            amp_id: 0,
            amp_model: "mock".to_string(),
            ringbuffer_time_capacity: 10,
        }
    }
}

/// Connection settings for the stimulus controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusConfig {
    pub socket_address: String,
    pub port: u16,
    /// Trials emitted by the scripted controller before it reports completion
    pub n_trials: u32,
    /// Pause between receiving feedback and starting the next trial
    pub inter_trial_interval_ms: u64,
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            socket_address: "127.0.0.1".to_string(),
            port: 6789,
            n_trials: 10,
            inter_trial_interval_ms: 500,
        }
    }
}

/// Trial window and model settings for the trial processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Length of the captured window in seconds
    pub time_per_trial: u32,
    /// Start of the processed segment, milliseconds into the window
    pub time_start: u32,
    /// End of the processed segment, milliseconds into the window
    pub time_stop: u32,
    pub preprocessing_fname: PathBuf,
    pub classifier_fname: PathBuf,
    pub regressor_fname: PathBuf,
    pub experiment_fname: PathBuf,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            time_per_trial: 1,
            time_start: 0,
            time_stop: 1000,
            preprocessing_fname: PathBuf::new(),
            classifier_fname: PathBuf::new(),
            regressor_fname: PathBuf::new(),
            experiment_fname: PathBuf::new(),
        }
    }
}

/// Coordinator and persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on fault-detection latency while waiting on a handshake
    pub poll_interval_ms: u64,
    /// Parent directory for per-run artifact directories
    pub data_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Complete configuration of one BCI session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BciConfig {
    pub global: GlobalConfig,
    pub amplifier: AmplifierConfig,
    pub stimulus: StimulusConfig,
    pub processing: ProcessingConfig,
    pub session: SessionConfig,
}

impl BciConfig {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BciConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.global.n_channels == 0 {
            return invalid("n_channels must be greater than 0".into());
        }
        if self.global.sample_rate == 0 {
            return invalid("sample_rate must be greater than 0".into());
        }
        if self.processing.time_per_trial == 0 {
            return invalid("time_per_trial must be greater than 0".into());
        }
        if self.processing.time_start >= self.processing.time_stop {
            return invalid(format!(
                "time_start ({} ms) must be before time_stop ({} ms)",
                self.processing.time_start, self.processing.time_stop
            ));
        }
        if u64::from(self.processing.time_stop) > u64::from(self.processing.time_per_trial) * 1000 {
            return invalid(format!(
                "time_stop ({} ms) is past the end of the {} s trial window",
                self.processing.time_stop, self.processing.time_per_trial
            ));
        }
        if self.session.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be greater than 0".into());
        }
        if self.amplifier.ringbuffer_time_capacity < self.processing.time_per_trial {
            return invalid(format!(
                "ring buffer holds {} s, shorter than one {} s trial",
                self.amplifier.ringbuffer_time_capacity, self.processing.time_per_trial
            ));
        }
        Ok(())
    }

    /// Samples per channel in one trial window.
    pub fn samples_per_trial(&self) -> usize {
        self.processing.time_per_trial as usize * self.global.sample_rate as usize
    }

    /// The processed segment of a trial window as a sample range `(start, stop)`.
    pub fn processing_window(&self) -> (usize, usize) {
        let to_samples = |ms: u32| (u64::from(ms) * u64::from(self.global.sample_rate) / 1000) as usize;
        (
            to_samples(self.processing.time_start),
            to_samples(self.processing.time_stop),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }

    /// Samples per channel the amplifier ring buffer keeps.
    pub fn ring_capacity(&self) -> usize {
        self.amplifier.ringbuffer_time_capacity as usize * self.global.sample_rate as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BciConfig::default();
        config.validate().unwrap();
        assert_eq!(config.samples_per_trial(), 250);
        assert_eq!(config.processing_window(), (0, 250));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BciConfig::from_toml_str(
            r#"
            [global]
            n_channels = 4
            sample_rate = 500

            [processing]
            time_per_trial = 2
            time_start = 200
            time_stop = 1200

            [session]
            poll_interval_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.global.n_channels, 4);
        assert_eq!(config.samples_per_trial(), 1000);
        assert_eq!(config.processing_window(), (100, 600));
        assert_eq!(config.amplifier, AmplifierConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_inverted_processing_window() {
        let err = BciConfig::from_toml_str(
            r#"
            [processing]
            time_start = 800
            time_stop = 400
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_window_past_trial_end() {
        let mut config = BciConfig::default();
        config.processing.time_stop = 1500;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let mut config = BciConfig::default();
        config.session.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BciConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bci.toml");
        std::fs::write(&path, "[stimulus]\nn_trials = 3\n").unwrap();
        let config = BciConfig::load(&path).unwrap();
        assert_eq!(config.stimulus.n_trials, 3);
    }
}
