//! A named state machine: states, a current-state pointer, and a table of
//! triggered transitions `(from_state, trigger) -> to_state`. Two concrete
//! machines (`status`, a 3-state workflow; `switch`, a 2-state on/off
//! toggle) are kept as illustrative built-in constructors over one generic
//! `Machine` type — a data-driven transition table serves both without
//! needing a base-class hierarchy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

/// `(from_state, trigger) -> to_state`.
type TransitionTable = HashMap<(String, String), String>;

pub struct Machine {
    name: String,
    states: Vec<String>,
    current: Mutex<String>,
    transitions: TransitionTable,
    /// Maps a property name to the trigger name fired when that property is
    /// set, so `set_property` can look up `(current_state, trigger)` in
    /// `transitions`.
    property_triggers: HashMap<String, String>,
    properties: Mutex<HashMap<String, Value>>,
    running: AtomicBool,
}

impl Machine {
    /// Config-driven constructor: `transitions` entries are
    /// `(from_state, trigger, to_state)`; `property_triggers` maps a
    /// property name to the trigger it fires on `set_property`.
    pub fn custom(
        name: impl Into<String>,
        states: Vec<String>,
        transitions: Vec<(String, String, String)>,
        property_triggers: HashMap<String, String>,
        initial: impl Into<String>,
    ) -> Self {
        let initial = initial.into();
        Machine {
            name: name.into(),
            states,
            current: Mutex::new(initial),
            transitions: transitions
                .into_iter()
                .map(|(from, trigger, to)| ((from, trigger), to))
                .collect(),
            property_triggers,
            properties: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// A 3-state status machine: `idle -> running -> done`, reset back to
    /// `idle` on a `reset` trigger from any state it's valid from.
    pub fn status(name: impl Into<String>) -> Self {
        let states = vec!["idle".into(), "running".into(), "done".into()];
        let transitions = vec![
            ("idle".into(), "start".into(), "running".into()),
            ("running".into(), "finish".into(), "done".into()),
            ("done".into(), "reset".into(), "idle".into()),
            ("running".into(), "reset".into(), "idle".into()),
        ];
        let mut property_triggers = HashMap::new();
        property_triggers.insert("status".into(), "start".into());
        Machine::custom(name, states, transitions, property_triggers, "idle")
    }

    /// A 2-state on/off toggle.
    pub fn switch(name: impl Into<String>) -> Self {
        let states = vec!["off".into(), "on".into()];
        let transitions = vec![
            ("off".into(), "turn_on".into(), "on".into()),
            ("on".into(), "turn_off".into(), "off".into()),
        ];
        let mut property_triggers = HashMap::new();
        property_triggers.insert("on".into(), "turn_on".into());
        property_triggers.insert("off".into(), "turn_off".into());
        Machine::custom(name, states, transitions, property_triggers, "off")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn current_state(&self) -> String {
        self.current.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Set a named property on the machine's model; if a trigger rule
    /// matches `(current_state, property_triggers[property])`, the
    /// transition fires and `current` advances. This is what the
    /// `UpdateSMPropertyRequest` control handler drives.
    pub fn set_property(&self, property: &str, value: Value) {
        self.properties.lock().insert(property.to_string(), value);
        if let Some(trigger) = self.property_triggers.get(property) {
            if !self.fire(trigger) {
                super::log_warn(
                    "set_property",
                    format!(
                        "machine \"{}\": trigger \"{trigger}\" has no transition from state \"{}\"",
                        self.name,
                        self.current_state()
                    ),
                );
            }
        }
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.lock().get(name).cloned()
    }

    /// Attempt the transition `(current_state, trigger)`. A no-op if no
    /// matching rule exists — not every trigger is valid from every state.
    pub fn fire(&self, trigger: &str) -> bool {
        let mut current = self.current.lock();
        match self.transitions.get(&(current.clone(), trigger.to_string())) {
            Some(next) => {
                *current = next.clone();
                true
            }
            None => false,
        }
    }

    /// Periodic worker tick. The two built-in machines have no time-driven
    /// transitions of their own; this is a hook for config-driven machines
    /// that do.
    pub fn tick(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_advances_on_matching_property() {
        let m = Machine::status("job");
        assert_eq!(m.current_state(), "idle");
        m.set_property("status", Value::from("start"));
        assert_eq!(m.current_state(), "running");
    }

    #[test]
    fn switch_toggles_on_and_off() {
        let m = Machine::switch("relay");
        assert_eq!(m.current_state(), "off");
        m.set_property("on", Value::Bool(true));
        assert_eq!(m.current_state(), "on");
        m.set_property("off", Value::Bool(true));
        assert_eq!(m.current_state(), "off");
    }

    #[test]
    fn fire_with_no_matching_rule_is_a_no_op() {
        let m = Machine::switch("relay");
        assert!(!m.fire("turn_off"));
        assert_eq!(m.current_state(), "off");
    }
}
