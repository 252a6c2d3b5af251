//! The four handshakes of one session, grouped by the side that owns each half.

use eeg_types::{Feedback, TrialData, TrialFinished};

use crate::handshake::{handshake, HandshakeSetter, HandshakeWaiter};

/// Handshake halves owned by the stimulus controller.
#[derive(Debug)]
pub struct StimulusPort {
    /// Set when a trial ends.
    pub trial_finished: HandshakeSetter<TrialFinished>,
    /// Fires when feedback for the last trial is ready.
    pub feedback: HandshakeWaiter<Feedback>,
}

/// Handshake halves owned by the trial processor.
#[derive(Debug)]
pub struct ProcessorPort {
    pub data_ready: HandshakeWaiter<TrialData>,
    pub processed: HandshakeSetter<Feedback>,
}

/// Handshake halves owned by the coordinator.
#[derive(Debug)]
pub struct CoordinatorPorts {
    pub trial_finished: HandshakeWaiter<TrialFinished>,
    pub data_ready: HandshakeSetter<TrialData>,
    pub processed: HandshakeWaiter<Feedback>,
    pub feedback: HandshakeSetter<Feedback>,
}

/// Creates every handshake of a session and splits the halves between their owners.
pub fn wire() -> (CoordinatorPorts, StimulusPort, ProcessorPort) {
    let (trial_finished_tx, trial_finished_rx) = handshake("trial_finished");
    let (data_ready_tx, data_ready_rx) = handshake("trial_data_ready");
    let (processed_tx, processed_rx) = handshake("trial_processed");
    let (feedback_tx, feedback_rx) = handshake("feedback_ready");

    (
        CoordinatorPorts {
            trial_finished: trial_finished_rx,
            data_ready: data_ready_tx,
            processed: processed_rx,
            feedback: feedback_tx,
        },
        StimulusPort {
            trial_finished: trial_finished_tx,
            feedback: feedback_rx,
        },
        ProcessorPort {
            data_ready: data_ready_rx,
            processed: processed_tx,
        },
    )
}
