//! The trial processor: classifies each trial and persists it.
//!
//! The processor runs its own loop: wait for a trial window, process it, hand
//! feedback back to the coordinator, then persist the window and the result.
//! A stop request is only honored at the top of an iteration; a trial that has
//! started processing always runs to completion.

use std::sync::Arc;

use eeg_types::{BciConfig, Feedback, ResultHistory, SubsystemError, TrialData, TrialResult};
use tracing::{debug, info};

use crate::error::HandshakeError;
use crate::model::TrialModel;
use crate::ports::ProcessorPort;
use crate::status::StopSignal;
use crate::store::TrialStore;
use crate::subsystem::{RunOutcome, Subsystem, SubsystemContext};

/// Where the processor is in its per-trial cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    WaitingForData,
    Processing,
    Finalizing,
    Stopped,
}

pub struct TrialProcessor {
    config: Arc<BciConfig>,
    model: Box<dyn TrialModel>,
    port: ProcessorPort,
    store: TrialStore,
    state: ProcessorState,
    history: ResultHistory,
    current: Option<TrialData>,
    feedback_msg: Option<String>,
}

impl TrialProcessor {
    pub fn new(
        config: Arc<BciConfig>,
        model: Box<dyn TrialModel>,
        port: ProcessorPort,
        store: TrialStore,
    ) -> Self {
        Self {
            config,
            model,
            port,
            store,
            state: ProcessorState::WaitingForData,
            history: ResultHistory::default(),
            current: None,
            feedback_msg: None,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn history(&self) -> &ResultHistory {
        &self.history
    }

    pub fn store(&self) -> &TrialStore {
        &self.store
    }

    /// Text of the most recent feedback message.
    pub fn feedback_msg(&self) -> Option<&str> {
        self.feedback_msg.as_deref()
    }

    pub fn load_models(&mut self) -> Result<(), SubsystemError> {
        info!("classifier: loading models");
        self.model.load(&self.config.processing)
    }

    /// Blocks until the coordinator hands over a trial; `None` once stopped.
    pub fn wait_for_data(&mut self, stop: &StopSignal) -> Result<Option<TrialData>, SubsystemError> {
        self.state = ProcessorState::WaitingForData;
        info!("classifier: waiting for trial_data_ready");
        Ok(self.port.data_ready.wait_or_stop(stop)?)
    }

    /// Runs preprocessing, classification and regression on one trial and records the result.
    pub fn process(&mut self, trial: TrialData) -> Result<TrialResult, SubsystemError> {
        let expected = self.history.len() as u64 + 1;
        if trial.number != expected {
            return Err(SubsystemError::TrialOutOfSequence {
                expected,
                got: trial.number,
            });
        }

        self.state = ProcessorState::Processing;
        debug!(trial = trial.number, latency_ms = trial.latency_ms, "processing trial");

        let (start, stop) = self.config.processing_window();
        let segment = trial.window.crop(start, stop)?;

        let discard = self.model.preprocess(&segment)?;
        let y_prob = self.model.classify(&segment)?;
        if !(0.0..=1.0).contains(&y_prob) {
            return Err(SubsystemError::Model(format!(
                "classifier returned y_prob {} outside [0, 1]",
                y_prob
            )));
        }
        let t = self.model.regress(&segment)?;

        let result = TrialResult::new(y_prob, t, discard);
        self.history.push(result);
        self.current = Some(trial);
        Ok(result)
    }

    /// Formats feedback for the latest result and sets `trial_processed`.
    pub fn create_feedback_msg(&mut self, stop: &StopSignal) -> Result<(), SubsystemError> {
        self.state = ProcessorState::Finalizing;
        let (Some(trial), Some(result)) = (self.current.as_ref(), self.history.last()) else {
            return Err(SubsystemError::Other("no processed trial to report".into()));
        };

        let text = result.feedback_text();
        self.feedback_msg = Some(text.clone());
        info!("classifier: setting trial_processed");
        let feedback = Feedback {
            trial: trial.number,
            text,
        };
        match self.port.processed.set_until(feedback, stop) {
            Ok(()) | Err(HandshakeError::Stopped { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the raw window and the result of the current trial.
    pub fn dump_data(&mut self) -> Result<(), SubsystemError> {
        let (Some(trial), Some(result)) = (self.current.take(), self.history.last()) else {
            return Err(SubsystemError::Other("no processed trial to persist".into()));
        };
        self.store.save_trial(trial.number, &trial.window, &result)?;
        Ok(())
    }

    fn is_ok(&self, stop: &StopSignal) -> bool {
        !stop.is_requested()
    }
}

impl Subsystem for TrialProcessor {
    fn name(&self) -> &'static str {
        "trial_processor"
    }

    fn initialize(&mut self) -> Result<(), SubsystemError> {
        self.load_models()
    }

    fn run(&mut self, ctx: &SubsystemContext) -> Result<RunOutcome, SubsystemError> {
        while self.is_ok(&ctx.stop) {
            let Some(trial) = self.wait_for_data(&ctx.stop)? else {
                break;
            };
            self.process(trial)?;
            self.create_feedback_msg(&ctx.stop)?;
            self.dump_data()?;
        }
        self.state = ProcessorState::Stopped;
        info!("classifier: exiting main loop");
        Ok(RunOutcome::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{wire, CoordinatorPorts};
    use chrono::Utc;
    use eeg_types::{EegWindow, ProcessingConfig};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns fixed outputs and remembers the shape of every window it saw.
    struct FixedModel {
        y_prob: f64,
        discard: bool,
        seen: Arc<Mutex<Vec<(usize, usize)>>>,
    }

    impl TrialModel for FixedModel {
        fn load(&mut self, _config: &ProcessingConfig) -> Result<(), SubsystemError> {
            Ok(())
        }

        fn preprocess(&mut self, window: &EegWindow) -> Result<bool, SubsystemError> {
            self.seen.lock().unwrap().push((window.n_channels(), window.n_samples()));
            Ok(self.discard)
        }

        fn classify(&mut self, _window: &EegWindow) -> Result<f64, SubsystemError> {
            Ok(self.y_prob)
        }

        fn regress(&mut self, _window: &EegWindow) -> Result<f64, SubsystemError> {
            Ok(-500.0)
        }
    }

    fn config() -> Arc<BciConfig> {
        let mut config = BciConfig::default();
        config.global.n_channels = 2;
        config.global.sample_rate = 100;
        config.processing.time_start = 200;
        config.processing.time_stop = 700;
        Arc::new(config)
    }

    fn build_processor(
        y_prob: f64,
        discard: bool,
    ) -> (TrialProcessor, CoordinatorPorts, Arc<Mutex<Vec<(usize, usize)>>>, tempfile::TempDir) {
        let data = tempfile::tempdir().unwrap();
        let store = TrialStore::create(data.path()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let model = FixedModel {
            y_prob,
            discard,
            seen: seen.clone(),
        };
        let (coordinator, _stimulus, port) = wire();
        let processor = TrialProcessor::new(config(), Box::new(model), port, store);
        (processor, coordinator, seen, data)
    }

    fn trial(number: u64) -> TrialData {
        TrialData {
            number,
            window: EegWindow::zeros(2, 100),
            fetched_at: Utc::now(),
            latency_ms: 3.0,
        }
    }

    #[test]
    fn test_process_crops_to_processing_window() {
        let (mut processor, _ports, seen, _data) = build_processor(0.8, false);
        let result = processor.process(trial(1)).unwrap();

        assert_eq!(result.y, 1);
        assert_eq!(processor.state(), ProcessorState::Processing);
        // 200..700 ms at 100 Hz
        assert_eq!(seen.lock().unwrap().as_slice(), &[(2, 50)]);
    }

    #[test]
    fn test_process_rejects_out_of_sequence_trial() {
        let (mut processor, _ports, _seen, _data) = build_processor(0.8, false);
        let err = processor.process(trial(2)).unwrap_err();
        assert_eq!(err, SubsystemError::TrialOutOfSequence { expected: 1, got: 2 });
        assert!(processor.history().is_empty());
    }

    #[test]
    fn test_process_rejects_probability_out_of_range() {
        let (mut processor, _ports, _seen, _data) = build_processor(1.5, false);
        assert!(matches!(processor.process(trial(1)), Err(SubsystemError::Model(_))));

        let (mut processor, _ports, _seen, _data) = build_processor(f64::NAN, false);
        assert!(matches!(processor.process(trial(1)), Err(SubsystemError::Model(_))));
    }

    #[test]
    fn test_feedback_then_dump() {
        let (mut processor, ports, _seen, _data) = build_processor(0.25, true);
        let stop = StopSignal::new("trial_processor");

        processor.process(trial(1)).unwrap();
        processor.create_feedback_msg(&stop).unwrap();
        assert_eq!(processor.state(), ProcessorState::Finalizing);

        let feedback = ports.processed.wait(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(feedback.trial, 1);
        assert_eq!(feedback.text, "y = 0, y_prob = 0.25, t = -500, discard = 1");
        assert_eq!(processor.feedback_msg(), Some(feedback.text.as_str()));

        processor.dump_data().unwrap();
        let store = processor.store();
        assert!(store.window_path(1).is_file());
        assert_eq!(store.read_result(1).unwrap(), TrialResult::new(0.25, -500.0, true));
        assert!(processor.dump_data().is_err(), "a trial is persisted once");
    }

    #[test]
    fn test_run_exits_when_stopped_while_waiting() {
        let (mut processor, _ports, _seen, _data) = build_processor(0.5, false);
        let ctx = SubsystemContext::standalone("trial_processor");
        let stop = ctx.stop.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            stop.request();
        });

        assert_eq!(processor.run(&ctx).unwrap(), RunOutcome::Stopped);
        assert_eq!(processor.state(), ProcessorState::Stopped);
        stopper.join().unwrap();
    }

    #[test]
    fn test_run_processes_until_stopped() {
        let (processor, ports, _seen, _data) = build_processor(0.6, false);
        let ctx = SubsystemContext::standalone("trial_processor");
        let stop = ctx.stop.clone();
        let handle = std::thread::spawn(move || {
            let mut processor = processor;
            let outcome = processor.run(&ctx);
            (processor, outcome)
        });

        for number in 1..=2 {
            ports.data_ready.set(trial(number)).unwrap();
            let feedback = ports.processed.wait(Duration::from_secs(5)).unwrap().unwrap();
            assert_eq!(feedback.trial, number);
        }
        stop.request();

        let (processor, outcome) = handle.join().unwrap();
        assert_eq!(outcome.unwrap(), RunOutcome::Stopped);
        assert_eq!(processor.history().y, vec![1, 1]);
        assert!(processor.store().result_path(2).is_file());
    }

    proptest! {
        #[test]
        fn prop_decision_follows_probability(y_prob in 0.0f64..=1.0, discard in any::<bool>()) {
            let (mut processor, _ports, _seen, _data) = build_processor(y_prob, discard);
            let result = processor.process(trial(1)).unwrap();
            prop_assert_eq!(result.y == 1, y_prob >= 0.5);
            prop_assert_eq!(result.discard, discard);
            prop_assert_eq!(processor.history().y_prob[0], y_prob);
        }
    }
}
