use crate::util::Ring;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default number of transitions retained per state key.
pub const DEFAULT_STATE_HISTORY: usize = 128;

/// One recorded state transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The value the key changed to.
    pub value: serde_json::Value,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// Timestamped key→value application state with bounded per-key history.
///
/// Typical keys are coarse lifecycle markers (`"phase"`, `"leader"`,
/// `"migration"`); values are arbitrary JSON.
pub struct ApplicationState {
    states: Mutex<HashMap<String, Ring<StateTransition>>>,
    history_limit: usize,
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_HISTORY)
    }
}

impl ApplicationState {
    /// Creates a state table retaining `history_limit` transitions per key.
    pub fn new(history_limit: usize) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            history_limit,
        }
    }

    /// Records a transition of `key` to `value`.
    pub fn set_state(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut states = self.states.lock();
        let limit = self.history_limit;

        states
            .entry(key.into())
            .or_insert_with(|| Ring::new(limit))
            .push(StateTransition {
                value,
                at: Utc::now(),
            });
    }

    /// The current value of `key`, if ever set.
    pub fn get_state(&self, key: &str) -> Option<serde_json::Value> {
        self.states
            .lock()
            .get(key)
            .and_then(|history| history.back())
            .map(|transition| transition.value.clone())
    }

    /// Current values of every key.
    pub fn all_states(&self) -> BTreeMap<String, serde_json::Value> {
        self.states
            .lock()
            .iter()
            .filter_map(|(key, history)| {
                history
                    .back()
                    .map(|transition| (key.clone(), transition.value.clone()))
            })
            .collect()
    }

    /// Transition history of `key`, oldest first.
    pub fn history(&self, key: &str) -> Vec<StateTransition> {
        self.states
            .lock()
            .get(key)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn export(&self) -> BTreeMap<String, Vec<StateTransition>> {
        self.states
            .lock()
            .iter()
            .map(|(key, history)| (key.clone(), history.iter().cloned().collect()))
            .collect()
    }

    pub(super) fn import(&self, exported: BTreeMap<String, Vec<StateTransition>>) {
        let mut states = self.states.lock();

        states.clear();

        for (key, transitions) in exported {
            let ring = states.entry(key).or_insert_with(|| Ring::new(self.history_limit));

            for transition in transitions {
                ring.push(transition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn latest_value_wins() {
        let state = ApplicationState::default();

        state.set_state("phase", json!("starting"));
        state.set_state("phase", json!("serving"));

        assert_eq!(state.get_state("phase"), Some(json!("serving")));
        assert_eq!(state.history("phase").len(), 2);
    }

    #[test]
    fn history_is_bounded_per_key() {
        let state = ApplicationState::new(4);

        for i in 0..10 {
            state.set_state("counter", json!(i));
        }

        let history = state.history("counter");

        assert_eq!(history.len(), 4);
        assert_eq!(history[0].value, json!(6));
        assert_eq!(state.get_state("counter"), Some(json!(9)));
    }

    #[test]
    fn all_states_reports_every_key() {
        let state = ApplicationState::default();

        state.set_state("a", json!(1));
        state.set_state("b", json!(2));

        let all = state.all_states();

        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], json!(1));
    }

    #[test]
    fn unknown_keys_are_empty() {
        let state = ApplicationState::default();

        assert_eq!(state.get_state("nope"), None);
        assert!(state.history("nope").is_empty());
    }
}
