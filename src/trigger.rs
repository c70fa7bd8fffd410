// src/trigger.rs - When a classified gesture is allowed to fire its action
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::gesture::Gesture;

/// Firing policy applied on top of the per-frame classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Fire on every cycle that reports a gesture.
    #[default]
    EveryCycle,
    /// Fire once when the gesture differs from the previous cycle's.
    OnChange,
    /// Fire at most once per window, measured from the last fired action.
    Cooldown { cooldown_ms: u64 },
}

/// Loop-owned memory of the previous cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchState {
    pub last_gesture: Gesture,
    pub last_fired: Option<Instant>,
}

impl Default for DispatchState {
    fn default() -> Self {
        Self {
            last_gesture: Gesture::None,
            last_fired: None,
        }
    }
}

impl DispatchState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl TriggerPolicy {
    pub fn admits(&self, gesture: Gesture, state: &DispatchState, now: Instant) -> bool {
        if gesture.is_none() {
            return false;
        }

        match *self {
            TriggerPolicy::EveryCycle => true,
            TriggerPolicy::OnChange => gesture != state.last_gesture,
            TriggerPolicy::Cooldown { cooldown_ms } => match state.last_fired {
                Some(at) => now.saturating_duration_since(at) >= Duration::from_millis(cooldown_ms),
                None => true,
            },
        }
    }
}
