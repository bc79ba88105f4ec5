//! Named scenario state shared by stub mappings.

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

/// State every scenario starts in, and returns to on reset.
pub const STARTED: &str = "Started";

/// A named state machine. Only the current state is kept.
///
/// Owned by the [`Registry`](crate::Registry) and shared through `Arc` with
/// every mapping that names it.
#[derive(Debug)]
pub struct Scenario {
    name: String,
    state: Mutex<String>,
}

/// Point-in-time copy of a scenario for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioSnapshot {
    pub name: String,
    pub state: String,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(STARTED.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> String {
        self.state.lock().clone()
    }

    pub fn set_state(&self, state: impl Into<String>) {
        *self.state.lock() = state.into();
    }

    pub fn reset(&self) {
        self.set_state(STARTED);
    }

    pub fn snapshot(&self) -> ScenarioSnapshot {
        ScenarioSnapshot {
            name: self.name.clone(),
            state: self.state(),
        }
    }

    /// Hold the state exclusively across a read-decide-write sequence.
    pub(crate) fn lock(&self) -> MutexGuard<'_, String> {
        self.state.lock()
    }
}
