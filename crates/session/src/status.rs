//! Subsystem health and stop signalling.
//!
//! Every subsystem owns one [`SubsystemStatus`], a one-shot state that moves
//! from `Running` to either `Errored` or `Finished` and never back. Transitions
//! are made through a [`StatusReporter`], which also wakes the coordinator so
//! that it does not have to wait for its next poll tick.
//!
//! A [`StopSignal`] is the cooperative stop request. It is backed by a channel
//! whose only sender is dropped on the first request, so any blocking wait can
//! select on it and observe the request immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eeg_types::SubsystemError;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

const RUNNING: u8 = 0;
const ERRORED: u8 = 1;
const FINISHED: u8 = 2;

/// The externally visible state of one subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Running,
    /// Sticky `error_encountered`.
    Errored,
    /// Sticky `task_finished`.
    Finished,
}

impl Health {
    fn from_u8(value: u8) -> Self {
        match value {
            ERRORED => Health::Errored,
            FINISHED => Health::Finished,
            _ => Health::Running,
        }
    }
}

/// Wake-up sent to the coordinator when a subsystem leaves `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthEvent {
    pub subsystem: &'static str,
    pub health: Health,
}

/// One-shot status of a subsystem.
#[derive(Debug)]
pub struct SubsystemStatus {
    name: &'static str,
    state: AtomicU8,
    error: Mutex<Option<SubsystemError>>,
}

impl SubsystemStatus {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: AtomicU8::new(RUNNING),
            error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn health(&self) -> Health {
        Health::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn error_encountered(&self) -> bool {
        self.health() == Health::Errored
    }

    pub fn task_finished(&self) -> bool {
        self.health() == Health::Finished
    }

    /// The error recorded with the `Errored` transition, if any.
    pub fn error(&self) -> Option<SubsystemError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(RUNNING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Write side of a [`SubsystemStatus`], handed to the subsystem and its runner.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    status: Arc<SubsystemStatus>,
    events: Sender<HealthEvent>,
}

impl StatusReporter {
    pub fn new(status: Arc<SubsystemStatus>, events: Sender<HealthEvent>) -> Self {
        Self { status, events }
    }

    pub fn status(&self) -> &Arc<SubsystemStatus> {
        &self.status
    }

    /// Moves the subsystem to `Errored`. Returns false if it already left `Running`.
    pub fn raise_error(&self, error: SubsystemError) -> bool {
        {
            // Readers of `error()` wait on this lock, so they never see Errored without its cause.
            let mut slot = self.status.error.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.status.transition(ERRORED) {
                return false;
            }
            *slot = Some(error);
        }
        self.notify(Health::Errored);
        true
    }

    /// Moves the subsystem to `Finished`. Returns false if it already left `Running`.
    pub fn mark_finished(&self) -> bool {
        {
            let _slot = self.status.error.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.status.transition(FINISHED) {
                return false;
            }
        }
        self.notify(Health::Finished);
        true
    }

    fn notify(&self, health: Health) {
        debug!(subsystem = self.status.name, ?health, "status transition");
        // The coordinator may already be gone during shutdown.
        let _ = self.events.send(HealthEvent {
            subsystem: self.status.name,
            health,
        });
    }
}

struct StopInner {
    name: &'static str,
    requested: AtomicBool,
    requests: AtomicUsize,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Cooperative, write-once stop request.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("name", &self.inner.name)
            .field("requested", &self.is_requested())
            .finish()
    }
}

impl StopSignal {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            inner: Arc::new(StopInner {
                name,
                requested: AtomicBool::new(false),
                requests: AtomicUsize::new(0),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Requests a stop. Returns true only for the call that actually set it.
    pub fn request(&self) -> bool {
        self.inner.requests.fetch_add(1, Ordering::AcqRel);
        if self.inner.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Dropping the only sender disconnects every receiver at once.
        self.inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(target_name = self.inner.name, "stop requested");
        true
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// How many times `request` has been called, including redundant calls.
    pub fn request_count(&self) -> usize {
        self.inner.requests.load(Ordering::Acquire)
    }

    /// Sleeps for up to `timeout`, returning early with `true` once a stop is requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_requested(),
        }
    }

    /// Receiver that disconnects when the stop is requested; for use in a `flume::Selector`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}
