//! The trial coordinator: owns the control loop of a session.
//!
//! Per trial the coordinator waits for the stimulus controller to report the
//! end of a trial, pulls the window from the data source, hands it to the
//! trial processor, waits for the result and relays the feedback text back to
//! the stimulus controller.
//!
//! Every wait is bounded by the poll interval and also wakes on a subsystem
//! health transition or a stop request. After every wake-up the coordinator
//! checks the health of all subsystems; the first time any of them has errored
//! or finished, it broadcasts a stop to all of them and leaves the loop.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use eeg_types::{BciConfig, Feedback, SubsystemError, TrialData, TrialFinished};
use flume::{Receiver, Selector, Sender};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{HandshakeError, SessionError, SessionResult};
use crate::handshake::HandshakeWaiter;
use crate::ports::CoordinatorPorts;
use crate::status::{Health, HealthEvent, StatusReporter, StopSignal, SubsystemStatus};
use crate::subsystem::{initialize_all, spawn_subsystem, DataSource, Subsystem, SubsystemContext};

/// The three subsystems a coordinator supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    DataSource,
    Stimulus,
    Processor,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::DataSource, Role::Stimulus, Role::Processor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::DataSource => "data_source",
            Role::Stimulus => "stimulus",
            Role::Processor => "trial_processor",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// The subsystem instances handed to [`TrialCoordinator::start`].
pub struct Subsystems {
    pub data_source: Box<dyn Subsystem>,
    pub stimulus: Box<dyn Subsystem>,
    pub processor: Box<dyn Subsystem>,
}

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// What the control loop did, returned when it exits.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub trials_completed: u64,
    /// Any subsystem raised `error_encountered`.
    pub error: bool,
    /// Any subsystem raised `task_finished`, or the coordinator was asked to stop.
    pub finished: bool,
    /// Stimulus-to-fetch delay of every trial handed to the processor.
    pub latencies_ms: Vec<f64>,
}

impl SessionSummary {
    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        Some(self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64)
    }
}

/// Coordinator-side view of one subsystem.
struct SubsystemMonitor {
    role: Role,
    reporter: StatusReporter,
    stop: StopSignal,
    error_logged: bool,
    finished_logged: bool,
}

enum Wake<T> {
    Fired(T),
    Interrupted,
    Broken(HandshakeError),
}

pub struct TrialCoordinator {
    config: Arc<BciConfig>,
    source: Arc<dyn DataSource>,
    ports: CoordinatorPorts,
    monitors: Vec<SubsystemMonitor>,
    health_rx: Receiver<HealthEvent>,
    stop: StopSignal,
    stop_logged: bool,
    handles: Vec<(Role, JoinHandle<()>)>,
    started: bool,
    error: bool,
    finished: bool,
    stop_broadcast: bool,
    next_trial: u64,
    summary: SessionSummary,
}

impl TrialCoordinator {
    pub fn new(config: Arc<BciConfig>, source: Arc<dyn DataSource>, ports: CoordinatorPorts) -> Self {
        let (health_tx, health_rx): (Sender<HealthEvent>, _) = flume::unbounded();
        let monitors = Role::ALL
            .iter()
            .map(|&role| SubsystemMonitor {
                role,
                reporter: StatusReporter::new(
                    Arc::new(SubsystemStatus::new(role.as_str())),
                    health_tx.clone(),
                ),
                stop: StopSignal::new(role.as_str()),
                error_logged: false,
                finished_logged: false,
            })
            .collect();

        Self {
            config,
            source,
            ports,
            monitors,
            health_rx,
            stop: StopSignal::new("coordinator"),
            stop_logged: false,
            handles: Vec::new(),
            started: false,
            error: false,
            finished: false,
            stop_broadcast: false,
            next_trial: 1,
            summary: SessionSummary::default(),
        }
    }

    /// Brings up every subsystem concurrently, then starts their main loops.
    ///
    /// Blocks until all bring-ups complete and returns the first failure, in
    /// which case no main loop is started.
    pub fn start(&mut self, mut subsystems: Subsystems) -> SessionResult<()> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        self.started = true;

        info!("coordinator: initializing subsystems");
        initialize_all(&mut [
            &mut subsystems.data_source,
            &mut subsystems.stimulus,
            &mut subsystems.processor,
        ])?;

        let Subsystems {
            data_source,
            stimulus,
            processor,
        } = subsystems;
        for (role, subsystem) in [
            (Role::DataSource, data_source),
            (Role::Stimulus, stimulus),
            (Role::Processor, processor),
        ] {
            let ctx = self.context(role);
            match spawn_subsystem(subsystem, ctx) {
                Ok(handle) => self.handles.push((role, handle)),
                Err(e) => {
                    // Do not leave the already running threads behind.
                    self.broadcast_stop();
                    self.join();
                    return Err(e);
                }
            }
        }
        info!("coordinator: all subsystems running");
        Ok(())
    }

    /// The context a subsystem in `role` runs with.
    pub fn context(&self, role: Role) -> SubsystemContext {
        let monitor = &self.monitors[role.index()];
        SubsystemContext::new(monitor.stop.clone(), monitor.reporter.clone())
    }

    /// A handle that asks the control loop to end at its next health check.
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn subsystem_status(&self, role: Role) -> &SubsystemStatus {
        self.monitors[role.index()].reporter.status()
    }

    pub fn subsystem_stop(&self, role: Role) -> &StopSignal {
        &self.monitors[role.index()].stop
    }

    /// Runs trials until a health check reports a stop condition.
    pub fn control_loop(&mut self) -> SessionSummary {
        info!("coordinator: entering control_loop");
        while !(self.error || self.finished) {
            let Some(trial_finished) = self.wait_for_trial_signal() else {
                continue;
            };
            let Some(number) = self.get_trial_eeg(trial_finished) else {
                continue;
            };
            if let Some(feedback) = self.wait_for_processing_signal(number) {
                self.send_feedback(feedback);
            }
        }
        info!("coordinator: exiting control_loop");
        self.summary()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            error: self.error,
            finished: self.finished,
            ..self.summary.clone()
        }
    }

    /// Waits for the stimulus controller to report the end of a trial.
    ///
    /// Returns `None` if a stop condition was observed, even when the signal also fired.
    pub fn wait_for_trial_signal(&mut self) -> Option<TrialFinished> {
        info!("coordinator: waiting for trial_finished");
        self.wait_on(Role::Stimulus, |ports| &ports.trial_finished)
    }

    /// Fetches the window for the trial that just ended and hands it to the processor.
    ///
    /// Returns the trial number on success.
    pub fn get_trial_eeg(&mut self, trial_finished: TrialFinished) -> Option<u64> {
        let n_samples = self.config.samples_per_trial();
        let (window, fetched_at) = match self.source.get_samples(n_samples) {
            Ok(fetched) => fetched,
            Err(e) => {
                self.fail(Role::DataSource, e);
                return None;
            }
        };

        if window.n_channels() != self.config.global.n_channels || window.n_samples() != n_samples {
            self.fail(
                Role::DataSource,
                SubsystemError::InvalidData(format!(
                    "expected {}x{} window, got {}x{}",
                    self.config.global.n_channels,
                    n_samples,
                    window.n_channels(),
                    window.n_samples()
                )),
            );
            return None;
        }

        let latency_ms = (fetched_at - trial_finished.at)
            .num_microseconds()
            .map_or(f64::INFINITY, |us| us as f64 / 1000.0);
        let number = self.next_trial;
        info!(
            trial = number,
            "Delay stimulus to data source: {:.2} milliseconds", latency_ms
        );

        let trial = TrialData {
            number,
            window,
            fetched_at,
            latency_ms,
        };
        info!("coordinator: setting trial_data_ready");
        if let Err(e) = self.ports.data_ready.try_set(trial) {
            self.fail(Role::Processor, e.into());
            return None;
        }

        self.next_trial += 1;
        self.summary.latencies_ms.push(latency_ms);
        Some(number)
    }

    /// Waits for the processor to finish trial `number`.
    pub fn wait_for_processing_signal(&mut self, number: u64) -> Option<Feedback> {
        info!("coordinator: waiting for trial_processed");
        let feedback = self.wait_on(Role::Processor, |ports| &ports.processed)?;
        if feedback.trial != number {
            self.fail(
                Role::Processor,
                SubsystemError::TrialOutOfSequence {
                    expected: number,
                    got: feedback.trial,
                },
            );
            return None;
        }
        Some(feedback)
    }

    /// Relays the processor's feedback to the stimulus controller.
    pub fn send_feedback(&mut self, feedback: Feedback) {
        let trial = feedback.trial;
        info!("coordinator: setting feedback_ready");
        match self.ports.feedback.try_set(feedback) {
            Ok(()) => self.summary.trials_completed = trial,
            Err(e) => self.fail(Role::Stimulus, e.into()),
        }
    }

    /// Reads every subsystem's status once and broadcasts a stop on the first error or completion.
    pub fn check_submodules(&mut self) -> LoopControl {
        for monitor in &mut self.monitors {
            let status = monitor.reporter.status();
            match status.health() {
                Health::Running => {}
                Health::Errored => {
                    if !monitor.error_logged {
                        monitor.error_logged = true;
                        let cause = status
                            .error()
                            .map_or_else(|| "unknown".to_string(), |e| e.to_string());
                        error!(
                            subsystem = monitor.role.as_str(),
                            error = %cause,
                            "coordinator: {} encountered an error",
                            monitor.role.as_str()
                        );
                    }
                    self.error = true;
                }
                Health::Finished => {
                    if !monitor.finished_logged {
                        monitor.finished_logged = true;
                        info!(
                            subsystem = monitor.role.as_str(),
                            "coordinator: {} finished its task",
                            monitor.role.as_str()
                        );
                    }
                    self.finished = true;
                }
            }
        }

        if self.stop.is_requested() {
            if !self.stop_logged {
                self.stop_logged = true;
                info!("coordinator: stop requested");
            }
            self.finished = true;
        }

        if !(self.error || self.finished) {
            return LoopControl::Continue;
        }
        self.broadcast_stop();
        LoopControl::Stop
    }

    /// Waits for all subsystem threads to exit.
    pub fn join(&mut self) {
        for (role, handle) in self.handles.drain(..) {
            info!("Waiting for {} to shut down...", role.as_str());
            if let Err(e) = handle.join() {
                error!("{} panicked during shutdown: {:?}", role.as_str(), e);
            }
        }
    }

    fn broadcast_stop(&mut self) {
        if self.stop_broadcast {
            return;
        }
        self.stop_broadcast = true;
        for monitor in &self.monitors {
            monitor.stop.request();
        }
        info!(
            error = self.error,
            finished = self.finished,
            "coordinator: stop sent to all subsystems"
        );
    }

    /// Records a fault the coordinator observed on behalf of a subsystem.
    fn fail(&mut self, role: Role, error: SubsystemError) {
        warn!(subsystem = role.as_str(), error = %error, "coordinator: link failure");
        self.monitors[role.index()].reporter.raise_error(error);
    }

    fn wait_on<T>(
        &mut self,
        peer: Role,
        waiter: fn(&CoordinatorPorts) -> &HandshakeWaiter<T>,
    ) -> Option<T> {
        let poll_interval = self.config.poll_interval();
        loop {
            let wake = select_wake(waiter(&self.ports), &self.health_rx, &self.stop, poll_interval);
            let fired = match wake {
                Wake::Fired(value) => Some(value),
                Wake::Interrupted => None,
                Wake::Broken(e) => {
                    self.fail(peer, e.into());
                    None
                }
            };

            if self.check_submodules() == LoopControl::Stop {
                return None;
            }
            if fired.is_some() {
                return fired;
            }
        }
    }
}

/// Blocks until the handshake fires, a health transition or stop request arrives, or the poll interval passes.
fn select_wake<T>(
    waiter: &HandshakeWaiter<T>,
    health_rx: &Receiver<HealthEvent>,
    stop: &StopSignal,
    poll_interval: Duration,
) -> Wake<T> {
    let name = waiter.name();
    Selector::new()
        .recv(waiter.receiver(), |res| match res {
            Ok(value) => Wake::Fired(value),
            Err(_) => Wake::Broken(HandshakeError::Disconnected { name }),
        })
        .recv(health_rx, |_| Wake::Interrupted)
        .recv(stop.receiver(), |_| Wake::Interrupted)
        .wait_timeout(poll_interval)
        .unwrap_or(Wake::Interrupted)
}

impl Drop for TrialCoordinator {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            warn!("TrialCoordinator dropped with running subsystems; stopping them.");
            self.broadcast_stop();
            self.join();
        }
    }
}
