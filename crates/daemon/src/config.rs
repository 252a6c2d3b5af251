use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use eeg_types::BciConfig;
use tracing::info;

/// Settings given on the command line, applied on top of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub trials: Option<u32>,
    pub data_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut BciConfig) {
        if let Some(trials) = self.trials {
            config.stimulus.n_trials = trials;
        }
        if let Some(data_dir) = &self.data_dir {
            config.session.data_dir = data_dir.clone();
        }
        if let Some(poll_interval_ms) = self.poll_interval_ms {
            config.session.poll_interval_ms = poll_interval_ms;
        }
    }
}

/// Loads the session configuration, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Arc<BciConfig>> {
    let mut config = match path {
        Some(path) => BciConfig::load(path)
            .with_context(|| format!("Could not load configuration file at '{}'", path.display()))?,
        None => {
            info!("No configuration file given, using defaults");
            BciConfig::default()
        }
    };

    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(Arc::new(config))
}

/// Renders the effective configuration as TOML.
pub fn render_config(config: &BciConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).context("Could not serialize configuration")
}
