//! A stimulus controller that presents a fixed number of timed trials.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eeg_types::{BciConfig, Feedback, StimulusConfig, SubsystemError, TrialFinished};
use session::{HandshakeError, RunOutcome, StimulusPort, Subsystem, SubsystemContext};
use tracing::info;

/// Feedback messages received by the stimulus controller, in order.
#[derive(Debug, Clone, Default)]
pub struct FeedbackLog(Arc<Mutex<Vec<Feedback>>>);

impl FeedbackLog {
    fn push(&self, feedback: Feedback) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(feedback);
    }

    pub fn snapshot(&self) -> Vec<Feedback> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Runs `n_trials` trials: a fixation pause, the trial itself, then feedback.
pub struct ScriptedStimulus {
    config: StimulusConfig,
    port: StimulusPort,
    trial_duration: Duration,
    inter_trial_interval: Duration,
    log: FeedbackLog,
}

impl ScriptedStimulus {
    pub fn new(config: &BciConfig, port: StimulusPort) -> Self {
        Self {
            config: config.stimulus.clone(),
            port,
            trial_duration: Duration::from_secs(u64::from(config.processing.time_per_trial)),
            inter_trial_interval: Duration::from_millis(config.stimulus.inter_trial_interval_ms),
            log: FeedbackLog::default(),
        }
    }

    pub fn feedback_log(&self) -> FeedbackLog {
        self.log.clone()
    }
}

impl Subsystem for ScriptedStimulus {
    fn name(&self) -> &'static str {
        "stimulus"
    }

    fn initialize(&mut self) -> Result<(), SubsystemError> {
        info!(
            "Stimulus controller at {}:{} ready for {} trials",
            self.config.socket_address, self.config.port, self.config.n_trials
        );
        Ok(())
    }

    fn run(&mut self, ctx: &SubsystemContext) -> Result<RunOutcome, SubsystemError> {
        for trial in 1..=u64::from(self.config.n_trials) {
            if ctx.stop.wait_timeout(self.inter_trial_interval) {
                return Ok(RunOutcome::Stopped);
            }
            info!(trial, "stimulus: trial started");
            if ctx.stop.wait_timeout(self.trial_duration) {
                return Ok(RunOutcome::Stopped);
            }

            info!(trial, "stimulus: setting trial_finished");
            match self.port.trial_finished.set_until(TrialFinished::now(), &ctx.stop) {
                Ok(()) => {}
                Err(HandshakeError::Stopped { .. }) => return Ok(RunOutcome::Stopped),
                Err(e) => return Err(e.into()),
            }

            let Some(feedback) = self.port.feedback.wait_or_stop(&ctx.stop)? else {
                return Ok(RunOutcome::Stopped);
            };
            info!(trial = feedback.trial, "stimulus: feedback {}", feedback.text);
            self.log.push(feedback);
        }

        info!("stimulus: all {} trials presented", self.config.n_trials);
        Ok(RunOutcome::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::wire;

    fn config(n_trials: u32) -> BciConfig {
        let mut config = BciConfig::default();
        config.stimulus.n_trials = n_trials;
        config.stimulus.inter_trial_interval_ms = 5;
        config
    }

    #[test]
    fn test_zero_trials_finishes_immediately() {
        let (_coordinator, port, _processor) = wire();
        let mut stimulus = ScriptedStimulus::new(&config(0), port);
        let ctx = SubsystemContext::standalone("stimulus");
        assert_eq!(stimulus.run(&ctx).unwrap(), RunOutcome::Finished);
    }

    #[test]
    fn test_stop_during_trial_returns_promptly() {
        let (_coordinator, port, _processor) = wire();
        let mut stimulus = ScriptedStimulus::new(&config(3), port);
        let ctx = SubsystemContext::standalone("stimulus");
        let stop = ctx.stop.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop.request();
        });

        let started = std::time::Instant::now();
        assert_eq!(stimulus.run(&ctx).unwrap(), RunOutcome::Stopped);
        assert!(started.elapsed() < Duration::from_millis(900));
        stopper.join().unwrap();
    }

    #[test]
    fn test_records_feedback_per_trial() {
        let mut config = config(2);
        config.processing.time_per_trial = 1;
        let (coordinator, port, _processor) = wire();
        let mut stimulus = ScriptedStimulus::new(&config, port);
        let log = stimulus.feedback_log();
        let ctx = SubsystemContext::standalone("stimulus");

        let peer = std::thread::spawn(move || {
            for trial in 1..=2 {
                coordinator
                    .trial_finished
                    .wait(Duration::from_secs(5))
                    .unwrap()
                    .unwrap();
                coordinator
                    .feedback
                    .set(Feedback {
                        trial,
                        text: format!("trial {}", trial),
                    })
                    .unwrap();
            }
            coordinator
        });

        assert_eq!(stimulus.run(&ctx).unwrap(), RunOutcome::Finished);
        let _coordinator = peer.join().unwrap();
        let trials: Vec<u64> = log.snapshot().iter().map(|f| f.trial).collect();
        assert_eq!(trials, vec![1, 2]);
    }
}
