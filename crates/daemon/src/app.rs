//! Assembles and runs one session: amplifier, stimulus, processor and coordinator.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use eeg_sensor::MockAmplifier;
use eeg_types::BciConfig;
use serde::Serialize;
use session::{
    wire, PlaceholderModel, SessionSummary, StopSignal, Subsystems, TrialCoordinator, TrialModel,
    TrialProcessor, TrialStore,
};
use tracing::{info, warn};

use crate::stimulus::{FeedbackLog, ScriptedStimulus};

/// File written next to the trial artifacts when a session ends.
pub const SESSION_RECORD: &str = "session.json";

#[derive(Debug, Serialize)]
struct SessionRecord<'a> {
    run_id: u32,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    mean_latency_ms: Option<f64>,
    #[serde(flatten)]
    summary: &'a SessionSummary,
}

pub struct Session {
    coordinator: TrialCoordinator,
    subsystems: Subsystems,
    store: TrialStore,
    feedback: FeedbackLog,
}

impl Session {
    /// Builds a session with the placeholder models.
    pub fn build(config: Arc<BciConfig>) -> anyhow::Result<Self> {
        Self::build_with_model(config, Box::new(PlaceholderModel::new()))
    }

    pub fn build_with_model(config: Arc<BciConfig>, model: Box<dyn TrialModel>) -> anyhow::Result<Self> {
        let store = TrialStore::create(&config.session.data_dir).with_context(|| {
            format!(
                "Could not create a run directory under '{}'",
                config.session.data_dir.display()
            )
        })?;

        let (coordinator_ports, stimulus_port, processor_port) = wire();

        let amplifier = MockAmplifier::new(&config).context("Could not create amplifier driver")?;
        let source = amplifier.data_source();
        let stimulus = ScriptedStimulus::new(&config, stimulus_port);
        let feedback = stimulus.feedback_log();
        let processor = TrialProcessor::new(config.clone(), model, processor_port, store.clone());

        let subsystems = Subsystems {
            data_source: Box::new(amplifier),
            stimulus: Box::new(stimulus),
            processor: Box::new(processor),
        };
        let coordinator = TrialCoordinator::new(config, source, coordinator_ports);

        Ok(Self {
            coordinator,
            subsystems,
            store,
            feedback,
        })
    }

    /// Requesting this stop ends the session at the coordinator's next health check.
    pub fn stop_handle(&self) -> StopSignal {
        self.coordinator.stop_handle()
    }

    pub fn store(&self) -> &TrialStore {
        &self.store
    }

    pub fn feedback(&self) -> FeedbackLog {
        self.feedback.clone()
    }

    /// Brings up every subsystem, runs trials until the session ends, and waits for shutdown.
    pub fn run(self) -> anyhow::Result<SessionSummary> {
        let Session {
            mut coordinator,
            subsystems,
            store,
            ..
        } = self;
        let started_at = Utc::now();

        coordinator
            .start(subsystems)
            .context("Session failed to start")?;
        let summary = coordinator.control_loop();
        coordinator.join();

        info!(
            trials = summary.trials_completed,
            error = summary.error,
            "Session ended; mean stimulus-to-data delay {:?} ms",
            summary.mean_latency_ms()
        );

        let record = SessionRecord {
            run_id: store.run_id(),
            started_at,
            ended_at: Utc::now(),
            mean_latency_ms: summary.mean_latency_ms(),
            summary: &summary,
        };
        if let Err(e) = write_record(&store, &record) {
            warn!("Could not write session record: {:#}", e);
        }

        Ok(summary)
    }
}

fn write_record(store: &TrialStore, record: &SessionRecord<'_>) -> anyhow::Result<()> {
    let path = store.dir().join(SESSION_RECORD);
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, record)?;
    Ok(())
}
