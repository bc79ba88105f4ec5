//! Stub registry and the resolution algorithm.
//!
//! Resolution takes the candidates that matched a request, drops those whose
//! scenario is in the wrong state, picks the best remaining stub, builds its
//! response and advances its scenario.
//!
//! Two locks are involved:
//!
//! - the registry lock (`RwLock`): resolution reads, registration and resets
//!   write, so a resolution never sees half of a reset;
//! - one mutex per scenario, held from the eligibility check through the
//!   transition, so two requests cannot both pass the same gate.
//!
//! Among equal priorities, the most recently registered stub wins.

use crate::config::{GlobalSettings, ResolverConfig, StubDefinition};
use crate::error::Result;
use crate::mapping::{StubId, StubMapping};
use crate::matcher::Request;
use crate::response::Response;
use crate::scenario::{Scenario, ScenarioSnapshot};
use parking_lot::{MutexGuard, RwLock};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Holds the registered mappings and the scenarios they share.
pub struct Registry {
    settings: GlobalSettings,
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
    /// Total resolutions performed.
    requests_total: AtomicU64,
    /// Resolutions that selected a stub.
    requests_matched: AtomicU64,
    /// Resolutions that fell back to the not-configured response.
    requests_unmatched: AtomicU64,
}

#[derive(Default)]
struct RegistryState {
    mappings: Vec<Arc<StubMapping>>,
    scenarios: HashMap<String, Arc<Scenario>>,
}

/// Request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub stubs: usize,
    pub scenarios: usize,
    pub requests_total: u64,
    pub requests_matched: u64,
    pub requests_unmatched: u64,
}

/// Locks on every scenario touched by one resolution, acquired in a fixed
/// order.
struct LockedScenarios<'a> {
    guards: Vec<(&'a Scenario, MutexGuard<'a, String>)>,
}

impl<'a> LockedScenarios<'a> {
    fn acquire(candidates: &'a [Arc<StubMapping>]) -> Self {
        let mut scenarios: Vec<&'a Scenario> = candidates
            .iter()
            .filter_map(|m| m.scenario())
            .map(|s| &**s)
            .collect();

        // Name first, then address: mappings registered before a reset may
        // still point at an older scenario with the same name.
        scenarios.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| (*a as *const Scenario).cmp(&(*b as *const Scenario)))
        });
        scenarios.dedup_by(|a, b| std::ptr::eq(*a, *b));

        let guards = scenarios
            .into_iter()
            .map(|scenario| (scenario, scenario.lock()))
            .collect();
        Self { guards }
    }

    fn position(&self, mapping: &StubMapping) -> Option<usize> {
        let scenario = mapping.scenario()?;
        self.guards
            .iter()
            .position(|(s, _)| std::ptr::eq(*s, Arc::as_ptr(scenario)))
    }

    fn state_for(&self, mapping: &StubMapping) -> Option<&str> {
        self.position(mapping).map(|i| self.guards[i].1.as_str())
    }

    fn transition(&mut self, mapping: &StubMapping) {
        let Some(i) = self.position(mapping) else {
            return;
        };
        let (scenario, state) = &mut self.guards[i];
        if let Some(previous) = mapping.transition(state) {
            info!(
                scenario = %scenario.name(),
                from = %previous,
                to = %state.as_str(),
                stub_id = %mapping.id(),
                "Scenario state changed"
            );
        }
    }
}

/// Lower effective priority first; among equals, the later registration.
fn precedence(a: &StubMapping, b: &StubMapping) -> Ordering {
    a.compare_priority_with(b)
        .cmp(&0)
        .then_with(|| b.id().cmp(&a.id()))
}

impl Registry {
    pub fn new(settings: GlobalSettings) -> Self {
        Self {
            settings,
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    /// Create a registry and register every stub of the configuration in
    /// order.
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let registry = Self::new(config.settings.clone());
        for stub in &config.stubs {
            registry.register_stub(stub.clone())?;
        }
        info!(stubs = config.stubs.len(), "Registry initialized");
        Ok(registry)
    }

    /// Register a stub, binding it to its scenario (created on first use).
    ///
    /// A rejected definition leaves the registry untouched. File bodies are
    /// read here, before any lock is taken.
    pub fn register_stub(&self, definition: StubDefinition) -> Result<StubId> {
        let id = StubId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        let mut mapping = StubMapping::new(id, definition)?;

        let mut state = self.state.write();
        if let Some(name) = mapping.scenario_name() {
            let scenario = state
                .scenarios
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!(scenario = %name, "Scenario created");
                    Arc::new(Scenario::new(name))
                })
                .clone();
            mapping = mapping.bind_scenario(scenario);
        }

        debug!(
            stub_id = %id,
            priority = ?mapping.priority(),
            scenario = ?mapping.scenario_name(),
            "Stub registered"
        );
        state.mappings.push(Arc::new(mapping));
        Ok(id)
    }

    /// Remove one mapping. Its scenario, if any, is kept.
    pub fn remove_stub(&self, id: StubId) -> bool {
        let mut state = self.state.write();
        let before = state.mappings.len();
        state.mappings.retain(|m| m.id() != id);
        let removed = state.mappings.len() != before;
        if removed {
            debug!(stub_id = %id, "Stub removed");
        }
        removed
    }

    /// Drop every mapping and every scenario.
    pub fn reset_all(&self) {
        let mut state = self.state.write();
        let stubs = state.mappings.len();
        *state = RegistryState::default();
        info!(stubs, "Registry reset");
    }

    /// Put every scenario back in its start state, keeping the mappings.
    pub fn reset_scenarios(&self) {
        let state = self.state.read();
        for scenario in state.scenarios.values() {
            scenario.reset();
        }
        info!(scenarios = state.scenarios.len(), "Scenarios reset");
    }

    pub fn get_scenario(&self, name: &str) -> Option<ScenarioSnapshot> {
        self.state.read().scenarios.get(name).map(|s| s.snapshot())
    }

    /// All scenarios, sorted by name.
    pub fn scenarios(&self) -> Vec<ScenarioSnapshot> {
        let mut snapshots: Vec<_> = self
            .state
            .read()
            .scenarios
            .values()
            .map(|s| s.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Registered mappings in registration order.
    pub fn mappings(&self) -> Vec<Arc<StubMapping>> {
        self.state.read().mappings.clone()
    }

    /// Mappings whose request pattern matches, in registration order.
    pub fn find_candidates(&self, request: &Request) -> Vec<Arc<StubMapping>> {
        Self::candidates_in(&self.state.read(), request)
    }

    /// Match and resolve under one consistent view of the registry.
    pub fn serve(&self, request: &Request) -> Result<Response> {
        let state = self.state.read();
        let candidates = Self::candidates_in(&state, request);
        if candidates.is_empty() && self.settings.log_unmatched {
            warn!(method = %request.method, path = %request.path, "No stub matches request");
        }
        self.resolve_locked(&candidates)
    }

    /// Pick the applicable stub among `candidates` and build its response.
    ///
    /// Returns [`Response::not_configured`] when none is eligible. The
    /// winner's scenario transition runs only after its response was built.
    pub fn resolve(&self, candidates: &[Arc<StubMapping>]) -> Result<Response> {
        let _state = self.state.read();
        self.resolve_locked(candidates)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            stubs: state.mappings.len(),
            scenarios: state.scenarios.len(),
            requests_total: self.requests_total.load(AtomicOrdering::Relaxed),
            requests_matched: self.requests_matched.load(AtomicOrdering::Relaxed),
            requests_unmatched: self.requests_unmatched.load(AtomicOrdering::Relaxed),
        }
    }

    fn candidates_in(state: &RegistryState, request: &Request) -> Vec<Arc<StubMapping>> {
        state
            .mappings
            .iter()
            .filter(|m| m.matches(request))
            .cloned()
            .collect()
    }

    /// Caller holds the registry read lock.
    fn resolve_locked(&self, candidates: &[Arc<StubMapping>]) -> Result<Response> {
        self.requests_total.fetch_add(1, AtomicOrdering::Relaxed);

        let mut scenarios = LockedScenarios::acquire(candidates);

        let winner = candidates
            .iter()
            .filter(|m| m.is_eligible_in(scenarios.state_for(m)))
            .min_by(|a, b| precedence(a, b));

        let Some(winner) = winner else {
            self.requests_unmatched.fetch_add(1, AtomicOrdering::Relaxed);
            if self.settings.log_unmatched && !candidates.is_empty() {
                info!(
                    candidates = candidates.len(),
                    "No candidate eligible in current scenario state"
                );
            }
            return Ok(Response::not_configured());
        };

        let response = winner.response().materialize()?;
        scenarios.transition(winner);

        self.requests_matched.fetch_add(1, AtomicOrdering::Relaxed);
        if self.settings.log_matches {
            info!(
                stub_id = %winner.id(),
                priority = ?winner.priority(),
                status = response.status(),
                fault = ?response.fault(),
                "Request matched stub"
            );
        }

        Ok(response)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(GlobalSettings::default())
    }
}
