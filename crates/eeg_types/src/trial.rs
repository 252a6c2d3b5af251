//! Per-trial records exchanged between the coordinator and the subsystems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::EegWindow;

/// Decision threshold on `y_prob`.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Sent by the stimulus controller when a trial has ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialFinished {
    /// Wall-clock time at which the stimulus controller reported the trial end.
    pub at: DateTime<Utc>,
}

impl TrialFinished {
    pub fn now() -> Self {
        Self { at: Utc::now() }
    }
}

/// The data-ready payload: one trial's window, handed from the coordinator to the processor.
#[derive(Debug, Clone)]
pub struct TrialData {
    /// Sequence number, contiguous from 1.
    pub number: u64,
    pub window: EegWindow,
    pub fetched_at: DateTime<Utc>,
    /// Fetch time minus trial-finish time, in milliseconds. Advisory only.
    pub latency_ms: f64,
}

/// The 4-field result of processing one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub y: u8,
    pub y_prob: f64,
    pub t: f64,
    pub discard: bool,
}

impl TrialResult {
    /// Builds a result, deriving `y` from `y_prob`.
    pub fn new(y_prob: f64, t: f64, discard: bool) -> Self {
        Self {
            y: decide(y_prob),
            y_prob,
            t,
            discard,
        }
    }

    pub fn feedback_text(&self) -> String {
        format!(
            "y = {}, y_prob = {:.2}, t = {}, discard = {}",
            self.y,
            self.y_prob,
            self.t,
            u8::from(self.discard)
        )
    }
}

/// `1` if `y_prob >= 0.5`, else `0`.
pub fn decide(y_prob: f64) -> u8 {
    u8::from(y_prob >= DECISION_THRESHOLD)
}

/// Text relayed back to the stimulus controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub trial: u64,
    pub text: String,
}

/// Append-only result histories, one vector per field, indexed by `trial - 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultHistory {
    pub y: Vec<u8>,
    pub y_prob: Vec<f64>,
    pub t: Vec<f64>,
    pub discard: Vec<bool>,
}

impl ResultHistory {
    pub fn push(&mut self, result: TrialResult) {
        self.y.push(result.y);
        self.y_prob.push(result.y_prob);
        self.t.push(result.t);
        self.discard.push(result.discard);
    }

    /// Number of trials recorded so far.
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// The result recorded for trial `number` (1-based).
    pub fn get(&self, number: u64) -> Option<TrialResult> {
        let idx = usize::try_from(number.checked_sub(1)?).ok()?;
        Some(TrialResult {
            y: *self.y.get(idx)?,
            y_prob: *self.y_prob.get(idx)?,
            t: *self.t.get(idx)?,
            discard: *self.discard.get(idx)?,
        })
    }

    pub fn last(&self) -> Option<TrialResult> {
        self.get(self.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_is_inclusive_at_threshold() {
        assert_eq!(decide(0.30), 0);
        assert_eq!(decide(0.50), 1);
        assert_eq!(decide(0.70), 1);
        assert_eq!(decide(0.4999), 0);
    }

    #[test]
    fn test_feedback_text_rounds_probability() {
        let result = TrialResult::new(0.456, -512.0, true);
        assert_eq!(result.feedback_text(), "y = 0, y_prob = 0.46, t = -512, discard = 1");
    }

    #[test]
    fn test_history_is_indexed_by_trial_number() {
        let mut history = ResultHistory::default();
        assert!(history.last().is_none());
        history.push(TrialResult::new(0.3, -400.0, false));
        history.push(TrialResult::new(0.7, -900.0, true));

        assert_eq!(history.len(), 2);
        assert_eq!(history.get(0), None);
        assert_eq!(history.get(1).map(|r| r.y), Some(0));
        assert_eq!(history.get(2).map(|r| r.discard), Some(true));
        assert_eq!(history.last(), history.get(2));
        assert_eq!(history.get(3), None);
    }
}
