//! Registered stub mappings: priority ordering and scenario gating.

use crate::config::{PreparedResponse, StubDefinition};
use crate::error::Result;
use crate::matcher::{CompiledPattern, Request};
use crate::scenario::Scenario;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Priority used when a stub does not declare one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Registry identity of a mapping. Assigned in increasing order at
/// registration and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StubId(pub(crate) u64);

impl fmt::Display for StubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority with the default substituted.
pub fn effective_priority(priority: Option<i32>) -> i32 {
    priority.unwrap_or(DEFAULT_PRIORITY)
}

/// A stub definition bound into a registry.
///
/// Immutable once built. The only state reachable from here that changes is
/// the shared [`Scenario`].
pub struct StubMapping {
    id: StubId,
    definition: StubDefinition,
    pattern: CompiledPattern,
    response: PreparedResponse,
    scenario: Option<Arc<Scenario>>,
}

impl StubMapping {
    /// Validate and compile a definition and load its response body. The
    /// mapping is not bound to a scenario yet.
    pub(crate) fn new(id: StubId, definition: StubDefinition) -> Result<Self> {
        definition.validate()?;
        let pattern = CompiledPattern::compile(&definition.request)?;
        let response = definition.response.prepare()?;
        Ok(Self {
            id,
            definition,
            pattern,
            response,
            scenario: None,
        })
    }

    /// Bind the registry's scenario named by `scenario_name`.
    pub(crate) fn bind_scenario(mut self, scenario: Arc<Scenario>) -> Self {
        self.scenario = Some(scenario);
        self
    }

    pub fn id(&self) -> StubId {
        self.id
    }

    pub fn definition(&self) -> &StubDefinition {
        &self.definition
    }

    pub fn priority(&self) -> Option<i32> {
        self.definition.priority
    }

    pub fn scenario_name(&self) -> Option<&str> {
        self.definition.scenario_name.as_deref()
    }

    pub fn required_scenario_state(&self) -> Option<&str> {
        self.definition.required_scenario_state.as_deref()
    }

    pub fn new_scenario_state(&self) -> Option<&str> {
        self.definition.new_scenario_state.as_deref()
    }

    pub fn response(&self) -> &PreparedResponse {
        &self.response
    }

    pub fn scenario(&self) -> Option<&Arc<Scenario>> {
        self.scenario.as_ref()
    }

    pub fn matches(&self, request: &Request) -> bool {
        self.pattern.matches(request)
    }

    /// Same definition, regardless of registration identity.
    pub fn same_content(&self, other: &StubMapping) -> bool {
        self.definition == other.definition
    }

    /// `effective(self) - effective(other)`; negative means `self` wins.
    pub fn compare_priority_with(&self, other: &StubMapping) -> i64 {
        i64::from(effective_priority(self.priority())) - i64::from(effective_priority(other.priority()))
    }

    pub fn is_in_scenario(&self) -> bool {
        self.definition.scenario_name.is_some()
    }

    pub fn modifies_scenario_state(&self) -> bool {
        self.definition.new_scenario_state.is_some()
    }

    pub fn is_independent_of_scenario_state(&self) -> bool {
        !self.is_in_scenario() || self.definition.required_scenario_state.is_none()
    }

    /// Whether the scenario is currently in the state this stub requires.
    ///
    /// Reads live state: the answer may be stale as soon as it is returned.
    /// The registry makes the check and the transition under one lock.
    pub fn requires_current_scenario_state(&self) -> bool {
        match (&self.scenario, self.required_scenario_state()) {
            (Some(scenario), Some(_)) if self.is_in_scenario() => {
                self.required_state_holds(&scenario.state())
            }
            _ => false,
        }
    }

    /// Move the scenario to the new state, if this stub sets one.
    pub fn update_scenario_state_if_required(&self) {
        if let Some(scenario) = &self.scenario {
            let mut state = scenario.lock();
            self.transition(&mut state);
        }
    }

    /// Eligibility given the current state of this stub's scenario.
    pub(crate) fn is_eligible_in(&self, current_state: Option<&str>) -> bool {
        if self.is_independent_of_scenario_state() {
            return true;
        }
        current_state.is_some_and(|state| self.required_state_holds(state))
    }

    fn required_state_holds(&self, current_state: &str) -> bool {
        !self.is_independent_of_scenario_state()
            && self.required_scenario_state() == Some(current_state)
    }

    /// Apply the transition to an already locked state. Returns the previous
    /// state when it changed.
    pub(crate) fn transition(&self, state: &mut String) -> Option<String> {
        if !(self.is_in_scenario() && self.modifies_scenario_state()) {
            return None;
        }
        let next = self.new_scenario_state()?;
        Some(std::mem::replace(state, next.to_string()))
    }
}

impl fmt::Debug for StubMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubMapping")
            .field("id", &self.id)
            .field("definition", &self.definition)
            .field("scenario", &self.scenario.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl Serialize for StubMapping {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.definition.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RequestMatcher, ResponseDefinition};
    use crate::scenario::STARTED;

    fn stub(priority: Option<i32>) -> StubDefinition {
        let mut definition =
            StubDefinition::new(RequestMatcher::default(), ResponseDefinition::default());
        definition.priority = priority;
        definition
    }

    fn mapping(id: u64, definition: StubDefinition) -> StubMapping {
        let scenario = definition
            .scenario_name
            .as_ref()
            .map(|name| Arc::new(Scenario::new(name.clone())));
        let mapping = StubMapping::new(StubId(id), definition).unwrap();
        match scenario {
            Some(scenario) => mapping.bind_scenario(scenario),
            None => mapping,
        }
    }

    fn scenario_stub(
        required: Option<&str>,
        new_state: Option<&str>,
        scenario: &Arc<Scenario>,
    ) -> StubMapping {
        let mut definition = stub(None);
        definition.scenario_name = Some(scenario.name().to_string());
        definition.required_scenario_state = required.map(String::from);
        definition.new_scenario_state = new_state.map(String::from);
        StubMapping::new(StubId(1), definition)
            .unwrap()
            .bind_scenario(scenario.clone())
    }

    #[test]
    fn test_absent_priority_compares_like_default() {
        let absent = mapping(1, stub(None));
        let five = mapping(2, stub(Some(5)));
        let others = [Some(1), Some(5), Some(10), Some(-3), None];

        assert_eq!(absent.compare_priority_with(&five), 0);
        for other in others {
            let other = mapping(3, stub(other));
            assert_eq!(
                absent.compare_priority_with(&other),
                five.compare_priority_with(&other)
            );
            assert_eq!(
                other.compare_priority_with(&absent),
                other.compare_priority_with(&five)
            );
        }
    }

    #[test]
    fn test_compare_priority_sign() {
        let high = mapping(1, stub(Some(1)));
        let low = mapping(2, stub(Some(10)));
        assert_eq!(high.compare_priority_with(&low), -9);
        assert_eq!(low.compare_priority_with(&high), 9);
    }

    #[test]
    fn test_extreme_priorities_do_not_overflow() {
        let min = mapping(1, stub(Some(i32::MIN)));
        let max = mapping(2, stub(Some(i32::MAX)));
        assert!(min.compare_priority_with(&max) < 0);
        assert!(max.compare_priority_with(&min) > 0);
    }

    #[test]
    fn test_not_in_scenario_is_independent() {
        let states = [None, Some("cart")];
        for required in states {
            for new_state in states {
                let mut definition = stub(None);
                definition.required_scenario_state = required.map(String::from);
                definition.new_scenario_state = new_state.map(String::from);
                let m = mapping(1, definition);

                assert!(!m.is_in_scenario());
                assert!(m.is_independent_of_scenario_state());
                assert!(!m.requires_current_scenario_state());
                assert!(m.is_eligible_in(None));
            }
        }
    }

    #[test]
    fn test_requires_current_scenario_state() {
        let scenario = Arc::new(Scenario::new("checkout"));
        let m = scenario_stub(Some("cart"), Some("paid"), &scenario);

        assert!(m.is_in_scenario());
        assert!(!m.is_independent_of_scenario_state());
        assert!(!m.requires_current_scenario_state());

        scenario.set_state("cart");
        assert!(m.requires_current_scenario_state());

        scenario.set_state("paid");
        assert!(!m.requires_current_scenario_state());
    }

    #[test]
    fn test_scenario_without_required_state_is_independent() {
        let scenario = Arc::new(Scenario::new("checkout"));
        let m = scenario_stub(None, Some("cart"), &scenario);

        assert!(m.is_independent_of_scenario_state());
        assert!(!m.requires_current_scenario_state());
        assert!(m.is_eligible_in(Some("anything")));
    }

    #[test]
    fn test_update_scenario_state_if_required() {
        let scenario = Arc::new(Scenario::new("checkout"));

        scenario_stub(None, None, &scenario).update_scenario_state_if_required();
        assert_eq!(scenario.state(), STARTED);

        scenario_stub(None, Some("cart"), &scenario).update_scenario_state_if_required();
        assert_eq!(scenario.state(), "cart");
    }

    #[test]
    fn test_new_state_outside_scenario_is_ignored() {
        let mut definition = stub(None);
        definition.new_scenario_state = Some("paid".to_string());
        let m = mapping(1, definition);

        let mut state = STARTED.to_string();
        assert_eq!(m.transition(&mut state), None);
        assert_eq!(state, STARTED);
    }

    #[test]
    fn test_same_content_ignores_identity() {
        let a = mapping(1, stub(Some(2)));
        let b = mapping(99, stub(Some(2)));
        let c = mapping(1, stub(Some(3)));

        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_serializes_as_definition() {
        let m = mapping(7, stub(None));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, serde_json::to_value(m.definition()).unwrap());
        assert!(json.get("insertionIndex").is_none());
    }
}
