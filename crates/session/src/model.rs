//! The preprocessing / classification / regression seam of the trial processor.

use std::path::Path;

use eeg_types::{EegWindow, ProcessingConfig, SubsystemError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// Models applied to one trial, in order: `preprocess`, `classify`, `regress`.
pub trait TrialModel: Send {
    /// Loads whatever the models need before the first trial.
    fn load(&mut self, config: &ProcessingConfig) -> Result<(), SubsystemError>;

    /// Returns whether the trial should be discarded.
    fn preprocess(&mut self, window: &EegWindow) -> Result<bool, SubsystemError>;

    /// Returns the probability of the positive class, in `[0, 1]`.
    fn classify(&mut self, window: &EegWindow) -> Result<f64, SubsystemError>;

    /// Returns the latency estimate.
    fn regress(&mut self, window: &EegWindow) -> Result<f64, SubsystemError>;
}

/// Stand-in for the real models: uniformly random outputs.
pub struct PlaceholderModel {
    rng: StdRng,
}

impl PlaceholderModel {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for PlaceholderModel {
    fn default() -> Self {
        Self::new()
    }
}

fn check_model_file(kind: &str, path: &Path) -> Result<(), SubsystemError> {
    // An empty path means the model is not configured.
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    if !path.is_file() {
        return Err(SubsystemError::Model(format!(
            "{} model file {} not found",
            kind,
            path.display()
        )));
    }
    info!("Using {} model {}", kind, path.display());
    Ok(())
}

impl TrialModel for PlaceholderModel {
    fn load(&mut self, config: &ProcessingConfig) -> Result<(), SubsystemError> {
        check_model_file("preprocessing", &config.preprocessing_fname)?;
        check_model_file("classifier", &config.classifier_fname)?;
        check_model_file("regressor", &config.regressor_fname)?;
        check_model_file("experiment", &config.experiment_fname)?;
        Ok(())
    }

    fn preprocess(&mut self, _window: &EegWindow) -> Result<bool, SubsystemError> {
        // Roughly one trial in twenty is discarded.
        Ok(self.rng.gen_range(0..20) < 1)
    }

    fn classify(&mut self, _window: &EegWindow) -> Result<f64, SubsystemError> {
        Ok(f64::from(self.rng.gen_range(0..=100u32)) / 100.0)
    }

    fn regress(&mut self, _window: &EegWindow) -> Result<f64, SubsystemError> {
        Ok(-f64::from(self.rng.gen_range(400..1000u32)))
    }
}
