//! State-machine subsystem: named machines with triggered transitions,
//! property setters that can fire a transition, a shared requirement
//! tracker, and a global-variable table. The control protocol touches this
//! subsystem through two handlers (`UpdateSMPropertyRequest` and
//! `UpdateGlobalVariable`/`RequirementStateRequest`); the rest runs
//! independently, each machine driven by its own periodic worker.
//!
//! Named state machines, each driven by a dedicated periodic [`Worker`]
//! task; a shared, lazily-populated [`RequirementTracker`]; and a
//! string-keyed [`Globals`] table. [`Manager`] is the process-wide
//! singleton that owns all three, constructed once at startup.

pub mod machines;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use machines::Machine;

/// `name -> {Pending, Pass, Fail}`, created lazily on first reference.
///
/// `Fail` is an ordinary enum variant distinct from `Pending`/`Pass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementState {
    Pending,
    Pass,
    Fail,
}

impl RequirementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementState::Pending => "PENDING",
            RequirementState::Pass => "PASS",
            RequirementState::Fail => "FAIL",
        }
    }
}

#[derive(Default)]
pub struct RequirementTracker {
    states: Mutex<HashMap<String, RequirementState>>,
}

impl RequirementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` as `PENDING` if it is not already tracked. Idempotent.
    pub fn add(&self, name: &str) {
        self.states
            .lock()
            .entry(name.to_string())
            .or_insert(RequirementState::Pending);
    }

    pub fn set(&self, name: &str, state: RequirementState) {
        self.states.lock().insert(name.to_string(), state);
    }

    pub fn get(&self, name: &str) -> Option<RequirementState> {
        self.states.lock().get(name).copied()
    }
}

/// `name -> value`, string-keyed, updatable only if present.
#[derive(Default)]
pub struct Globals {
    values: Mutex<HashMap<String, Value>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: &str, value: Value) {
        self.values.lock().insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }

    /// Update an existing global. Returns `false` (no error thrown) if
    /// `name` is absent — callers surface this as `ErrorReply`, matching
    /// the `UpdateGlobalVariable` control handler.
    pub fn update(&self, name: &str, value: Value) -> bool {
        let mut guard = self.values.lock();
        match guard.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// One periodic worker task per running machine.
pub struct Worker {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn spawn(machine: Arc<Machine>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                if !machine.is_running() {
                    break;
                }
                machine.tick();
                tokio::time::sleep(period).await;
            }
        });
        Worker {
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

/// Process-wide singleton owning every named machine, the requirement
/// tracker, and the globals table.
pub struct Manager {
    machines: Mutex<HashMap<String, Arc<Machine>>>,
    workers: Mutex<HashMap<String, Worker>>,
    pub requirements: RequirementTracker,
    pub globals: Globals,
}

impl Manager {
    pub fn new() -> Self {
        Manager {
            machines: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            requirements: RequirementTracker::new(),
            globals: Globals::new(),
        }
    }

    pub fn register(&self, machine: Machine) -> Arc<Machine> {
        let name = machine.name().to_string();
        let machine = Arc::new(machine);
        self.machines.lock().insert(name, machine.clone());
        machine
    }

    pub fn get(&self, name: &str) -> Option<Arc<Machine>> {
        self.machines.lock().get(name).cloned()
    }

    /// Start a dedicated periodic worker for `name`, polling every `period`.
    /// At-most-one worker per machine, mirroring the at-most-one-periodic-
    /// task-per-node invariant the node runtime enforces.
    pub fn start_worker(&self, name: &str, period: Duration) -> anyhow::Result<()> {
        let machine = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown state machine \"{name}\""))?;
        let mut workers = self.workers.lock();
        if workers.contains_key(name) {
            return Err(anyhow::anyhow!("worker for \"{name}\" already running"));
        }
        machine.set_running(true);
        workers.insert(name.to_string(), Worker::spawn(machine, period));
        info!(machine = name, "state machine worker started");
        Ok(())
    }

    pub fn stop_worker(&self, name: &str) {
        if let Some(worker) = self.workers.lock().remove(name) {
            worker.stop();
        }
        if let Some(machine) = self.get(name) {
            machine.set_running(false);
        }
    }

    /// `UpdateSMPropertyRequest` handler action: set an attribute on the
    /// named machine's model, firing a transition if a matching trigger rule
    /// exists.
    pub fn update_property(&self, machine_name: &str, property: &str, value: Value) -> anyhow::Result<()> {
        let machine = self
            .get(machine_name)
            .ok_or_else(|| anyhow::anyhow!("unknown state machine \"{machine_name}\""))?;
        machine.set_property(property, value);
        Ok(())
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn log_warn(context: &str, err: impl std::fmt::Display) {
    warn!(target: "netsim::statemachine", context, %err, "state machine error");
}
