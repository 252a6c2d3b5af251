//! Per-run artifact directory: two files per trial.
//!
//! `trial{n}.csv` holds the raw EEG window, one row per channel.
//! `trial{n}results.json` holds the 4-field result record.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use eeg_types::{EegWindow, SubsystemError, TrialResult};
use rand::Rng;
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};

const MAX_RUN_ID: u32 = 10_000;
const CREATE_ATTEMPTS: usize = 32;

/// Durable storage for one run's trials.
#[derive(Debug, Clone)]
pub struct TrialStore {
    run_id: u32,
    dir: PathBuf,
}

impl TrialStore {
    /// Creates `<data_dir>/<run_id>` with a random numeric run id not yet in use.
    pub fn create(data_dir: &Path) -> SessionResult<Self> {
        fs::create_dir_all(data_dir)?;
        let mut rng = rand::thread_rng();

        for _ in 0..CREATE_ATTEMPTS {
            let run_id = rng.gen_range(0..MAX_RUN_ID);
            let dir = data_dir.join(run_id.to_string());
            match fs::create_dir(&dir) {
                Ok(()) => {
                    info!(run_id, "Recording trials to {}", dir.display());
                    return Ok(Self { run_id, dir });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(SessionError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free run id under {}", data_dir.display()),
        )))
    }

    pub fn run_id(&self) -> u32 {
        self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn window_path(&self, trial: u64) -> PathBuf {
        self.dir.join(format!("trial{}.csv", trial))
    }

    pub fn result_path(&self, trial: u64) -> PathBuf {
        self.dir.join(format!("trial{}results.json", trial))
    }

    /// Writes both artifacts of `trial`.
    pub fn save_trial(&self, trial: u64, window: &EegWindow, result: &TrialResult) -> SessionResult<()> {
        self.save_window(trial, window)?;
        self.save_result(trial, result)?;
        debug!(trial, "artifacts written");
        Ok(())
    }

    fn save_window(&self, trial: u64, window: &EegWindow) -> SessionResult<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(self.window_path(trial))?;
        for channel in window.channels() {
            writer.write_record(channel.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn save_result(&self, trial: u64, result: &TrialResult) -> SessionResult<()> {
        let mut writer = BufWriter::new(File::create(self.result_path(trial))?);
        serde_json::to_writer_pretty(&mut writer, result)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_window(&self, trial: u64) -> SessionResult<EegWindow> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(self.window_path(trial))?;

        let mut channels = Vec::new();
        for record in reader.records() {
            let record = record?;
            let channel = record
                .iter()
                .map(|field| {
                    field.parse::<f32>().map_err(|e| {
                        SubsystemError::InvalidData(format!("trial {} sample '{}': {}", trial, field, e))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            channels.push(channel);
        }
        Ok(EegWindow::from_channels(channels)?)
    }

    pub fn read_result(&self, trial: u64) -> SessionResult<TrialResult> {
        let reader = BufReader::new(File::open(self.result_path(trial))?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_makes_numeric_run_dir() {
        let data = tempfile::tempdir().unwrap();
        let store = TrialStore::create(&data.path().join("runs")).unwrap();
        assert!(store.run_id() < MAX_RUN_ID);
        assert!(store.dir().is_dir());
        assert_eq!(
            store.dir().file_name().unwrap().to_str().unwrap(),
            store.run_id().to_string()
        );
    }

    #[test]
    fn test_two_runs_get_distinct_dirs() {
        let data = tempfile::tempdir().unwrap();
        let a = TrialStore::create(data.path()).unwrap();
        let b = TrialStore::create(data.path()).unwrap();
        assert_ne!(a.dir(), b.dir());
    }

    #[test]
    fn test_save_trial_writes_two_named_artifacts() {
        let data = tempfile::tempdir().unwrap();
        let store = TrialStore::create(data.path()).unwrap();
        let window = EegWindow::from_channels(vec![vec![0.5, -1.25, 3.0], vec![1e-6, 2.0, -0.1]]).unwrap();
        let result = TrialResult::new(0.7, -650.0, false);

        store.save_trial(4, &window, &result).unwrap();

        assert!(store.window_path(4).ends_with("trial4.csv"));
        assert!(store.result_path(4).ends_with("trial4results.json"));
        assert_eq!(store.read_window(4).unwrap(), window);
        assert_eq!(store.read_result(4).unwrap(), result);
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 2);
    }

    #[test]
    fn test_read_missing_trial_fails() {
        let data = tempfile::tempdir().unwrap();
        let store = TrialStore::create(data.path()).unwrap();
        assert!(store.read_result(1).is_err());
        assert!(store.read_window(1).is_err());
    }
}
