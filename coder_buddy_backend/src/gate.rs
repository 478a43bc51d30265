//! Admission check in front of the reasoning call.
//!
//! An evaluation passes only when the cooldown since the last accepted
//! evaluation has elapsed and the document length moved by at least the
//! configured delta. State changes on acceptance only, so a burst of small
//! edits never erases the last accepted baseline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GateConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    /// `None` until the first evaluation is accepted.
    pub last_accepted_at: Option<DateTime<Utc>>,
    /// Document length in Unicode scalar values (`str::chars`), not bytes or UTF-16 units.
    pub last_accepted_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Accepted,
    CoolingDown { remaining: Duration },
    BelowDelta { delta: usize },
}

impl GateDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GateDecision::Accepted)
    }
}

pub struct TriggerGate {
    cooldown: Duration,
    min_length_delta: usize,
    state: TriggerState,
}

impl TriggerGate {
    pub fn new(cooldown: Duration, min_length_delta: usize) -> Self {
        Self {
            cooldown,
            min_length_delta,
            state: TriggerState::default(),
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        let cooldown_ms = i64::try_from(config.cooldown_ms).unwrap_or(i64::MAX);
        Self::new(Duration::milliseconds(cooldown_ms), config.min_length_delta)
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    pub fn should_trigger(&mut self, current_text: &str) -> bool {
        self.should_trigger_at(current_text, Utc::now())
    }

    pub fn should_trigger_at(&mut self, current_text: &str, now: DateTime<Utc>) -> bool {
        self.evaluate_at(current_text, now).is_accepted()
    }

    pub fn evaluate_at(&mut self, current_text: &str, now: DateTime<Utc>) -> GateDecision {
        if let Some(last) = self.state.last_accepted_at {
            let elapsed = now.signed_duration_since(last);
            // Negative elapsed (clock went backwards) also lands here.
            if elapsed < self.cooldown {
                return GateDecision::CoolingDown {
                    remaining: self.cooldown - elapsed,
                };
            }
        }

        let length = current_text.chars().count();
        let delta = length.abs_diff(self.state.last_accepted_length);
        if delta < self.min_length_delta {
            return GateDecision::BelowDelta { delta };
        }

        self.state = TriggerState {
            last_accepted_at: Some(now),
            last_accepted_length: length,
        };
        GateDecision::Accepted
    }
}
