//! Subsystem traits and the threads that run them.
//!
//! A subsystem is brought up once on a scoped thread, then runs its main loop on
//! its own named thread. Faults never cross the thread boundary: an `Err` or a
//! panic from `run` is recorded as the subsystem's sticky error, and a
//! `RunOutcome::Finished` as its sticky completion.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use eeg_types::{EegWindow, SubsystemError};
use tracing::{error, info};

use crate::error::{SessionError, SessionResult};
use crate::status::{StatusReporter, StopSignal, SubsystemStatus};

/// How a subsystem's main loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The subsystem completed its task; raises `task_finished`.
    Finished,
    /// The loop honored a stop request.
    Stopped,
}

/// What a running subsystem gets from the coordinator.
#[derive(Debug, Clone)]
pub struct SubsystemContext {
    /// Checked at loop-iteration boundaries.
    pub stop: StopSignal,
    pub status: StatusReporter,
}

impl SubsystemContext {
    pub fn new(stop: StopSignal, status: StatusReporter) -> Self {
        Self { stop, status }
    }

    /// A context that is not attached to any coordinator.
    pub fn standalone(name: &'static str) -> Self {
        let (events_tx, _) = flume::unbounded();
        Self {
            stop: StopSignal::new(name),
            status: StatusReporter::new(Arc::new(SubsystemStatus::new(name)), events_tx),
        }
    }
}

/// One of the independently running parts of a session.
pub trait Subsystem: Send {
    /// Unique name, also used as the thread name.
    fn name(&self) -> &'static str;

    /// Bring-up, run concurrently with the other subsystems before any main loop starts.
    fn initialize(&mut self) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Main loop. Must return promptly once `ctx.stop` is requested.
    fn run(&mut self, ctx: &SubsystemContext) -> Result<RunOutcome, SubsystemError>;
}

/// Continuous acquisition buffer queried by the coordinator.
pub trait DataSource: Send + Sync {
    /// Returns the most recent `n_samples` per channel and the time they were fetched.
    fn get_samples(&self, n_samples: usize) -> Result<(EegWindow, DateTime<Utc>), SubsystemError>;
}

/// Initializes every subsystem on its own scoped thread and waits for all of them.
///
/// Returns the first failure in declaration order after every bring-up has completed.
pub fn initialize_all(subsystems: &mut [&mut Box<dyn Subsystem>]) -> SessionResult<()> {
    thread::scope(|scope| {
        let mut pending = Vec::with_capacity(subsystems.len());
        for subsystem in subsystems.iter_mut() {
            let name = subsystem.name();
            let handle = thread::Builder::new()
                .name(format!("{}-init", name))
                .spawn_scoped(scope, move || subsystem.initialize())
                .map_err(|source| SessionError::Spawn { name, source })?;
            pending.push((name, handle));
        }

        let mut first_failure = None;
        for (name, handle) in pending {
            let result = handle
                .join()
                .unwrap_or_else(|payload| Err(SubsystemError::Panicked(panic_message(&*payload))));
            match result {
                Ok(()) => info!(subsystem = name, "initialized"),
                Err(e) => {
                    error!(subsystem = name, error = %e, "initialization failed");
                    first_failure.get_or_insert(SessionError::Init {
                        subsystem: name,
                        source: e,
                    });
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    })
}

/// Runs `subsystem` on a new named thread, translating its exit into its status.
pub fn spawn_subsystem(
    mut subsystem: Box<dyn Subsystem>,
    ctx: SubsystemContext,
) -> SessionResult<JoinHandle<()>> {
    let name = subsystem.name();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            info!(subsystem = name, "thread started");
            let result = panic::catch_unwind(AssertUnwindSafe(|| subsystem.run(&ctx)));
            match result {
                Ok(Ok(RunOutcome::Finished)) => {
                    info!(subsystem = name, "finished its task");
                    ctx.status.mark_finished();
                }
                Ok(Ok(RunOutcome::Stopped)) => {}
                Ok(Err(e)) => {
                    error!(subsystem = name, error = %e, "encountered an error");
                    ctx.status.raise_error(e);
                }
                Err(payload) => {
                    let message = panic_message(&*payload);
                    error!(subsystem = name, "panicked: {}", message);
                    ctx.status.raise_error(SubsystemError::Panicked(message));
                }
            }
            info!(subsystem = name, "thread finished");
        })
        .map_err(|source| SessionError::Spawn { name, source })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload".to_string()
    }
}
