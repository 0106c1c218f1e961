//! 状态转换检测

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::status::ServiceStatus;

/// Outcome class of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// First observation, establishes the baseline
    Uninitialized,
    Changed,
    NoChange,
}

/// One tick's classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    /// `None` only for `Uninitialized`
    pub previous: Option<ServiceStatus>,
    pub current: ServiceStatus,
    pub kind: TransitionKind,
    pub timestamp: DateTime<Utc>,
}

impl Transition {
    pub fn is_reportable(&self) -> bool {
        self.kind == TransitionKind::Changed
    }
}

/// Detector memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    pub last_status: Option<ServiceStatus>,
    /// Monotonic: never goes back to false
    pub was_ever_active: bool,
}

impl ObservedState {
    /// Baseline restored from a last-known-value file
    pub fn seeded(last_status: ServiceStatus) -> Self {
        Self {
            last_status: Some(last_status),
            was_ever_active: last_status == ServiceStatus::Active,
        }
    }
}

/// Classifies samples against the last observed status
#[derive(Debug, Default)]
pub struct TransitionDetector {
    state: ObservedState,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: ObservedState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ObservedState {
        &self.state
    }

    pub fn was_ever_active(&self) -> bool {
        self.state.was_ever_active
    }

    pub fn observe(&mut self, status: ServiceStatus) -> Transition {
        self.observe_at(status, Utc::now())
    }

    /// Same as `observe` with an explicit timestamp (tests)
    pub fn observe_at(&mut self, status: ServiceStatus, timestamp: DateTime<Utc>) -> Transition {
        let previous = self.state.last_status;
        let kind = match previous {
            None => TransitionKind::Uninitialized,
            Some(last) if last == status => TransitionKind::NoChange,
            Some(_) => TransitionKind::Changed,
        };

        if kind != TransitionKind::NoChange {
            self.state.last_status = Some(status);
            if status == ServiceStatus::Active {
                self.state.was_ever_active = true;
            }
        }

        Transition {
            previous,
            current: status,
            kind,
            timestamp,
        }
    }
}
