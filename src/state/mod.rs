// State management module
//
// This module provides the StateManager which wraps the scheduler's RunState with
// thread-safe access using Arc<RwLock<T>> and emits change events to subscribers.

use chrono::NaiveDateTime;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// What caused a restart sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Scheduled,
    ModUpdate,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::Scheduled => write!(f, "scheduled"),
            RestartReason::ModUpdate => write!(f, "mod update"),
        }
    }
}

/// What the scheduler is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Not started yet
    #[default]
    Idle,
    /// Waiting for the next tick
    Polling,
    /// Counting down before a mod-update restart
    Countdown,
    /// Running the restart sequence
    Restarting(RestartReason),
}

/// In-memory run state of one scheduler. Reset when the process restarts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub phase: Phase,

    /// When the workshop was last checked for updates (local wall clock)
    pub last_mod_check: Option<NaiveDateTime>,

    /// Monotonic time of the last update check; immune to wall-clock steps
    pub last_mod_check_instant: Option<Instant>,

    /// When the last restart sequence finished
    pub last_restart: Option<NaiveDateTime>,

    pub restarts_completed: usize,

    /// Workshop items that triggered the current or last mod-update restart
    pub pending_updates: Vec<String>,
}

impl RunState {
    /// Whether at least `interval` has passed since the last update check.
    /// Always true before the first check.
    pub fn mod_check_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_mod_check_instant {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }
}

/// Change events emitted when the run state is modified or the scheduler
/// talks to players
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    PhaseChanged { phase: Phase },

    ModCheckRecorded { at: NaiveDateTime },

    RestartCompleted {
        reason: RestartReason,
        at: NaiveDateTime,
        total: usize,
    },

    /// A scheduled-restart warning went out
    WarningBroadcast { minutes_left: u32 },

    /// The update checker found newer workshop content
    ModUpdatesDetected { ids: Vec<String> },
}

/// Thread-safe run state with event emission
///
/// - [`read()`](Self::read) / [`snapshot()`](Self::snapshot) for inspection
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to changes
pub struct StateManager {
    state: Arc<RwLock<RunState>>,
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(RunState::default())),
            state_tx,
        }
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> RunState {
        self.read(RunState::clone)
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RunState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Update the state and emit an event for every detected change
    ///
    /// # Returns
    /// The events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut RunState),
    {
        let changes = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let old_state = state.clone();
            update_fn(&mut state);
            detect_changes(&old_state, &state)
        };

        for change in &changes {
            // No subscribers is fine
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Emit an event that doesn't correspond to a state field
    pub fn emit(&self, change: StateChange) {
        let _ = self.state_tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    pub fn set_phase(&self, phase: Phase) -> Vec<StateChange> {
        self.update(|state| state.phase = phase)
    }

    pub fn record_mod_check(&self, at: NaiveDateTime, instant: Instant) -> Vec<StateChange> {
        self.update(|state| {
            state.last_mod_check = Some(at);
            state.last_mod_check_instant = Some(instant);
        })
    }

    pub fn begin_restart(&self, reason: RestartReason, updates: &[String]) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = Phase::Restarting(reason);
            if reason == RestartReason::ModUpdate {
                state.pending_updates = updates.to_vec();
            }
        })
    }

    pub fn finish_restart(&self, at: NaiveDateTime) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = Phase::Polling;
            state.last_restart = Some(at);
            state.restarts_completed += 1;
        })
    }
}

fn detect_changes(old: &RunState, new: &RunState) -> Vec<StateChange> {
    let mut changes = Vec::new();

    if new.restarts_completed != old.restarts_completed {
        if let (Phase::Restarting(reason), Some(at)) = (old.phase, new.last_restart) {
            changes.push(StateChange::RestartCompleted {
                reason,
                at,
                total: new.restarts_completed,
            });
        }
    }

    if old.phase != new.phase {
        changes.push(StateChange::PhaseChanged { phase: new.phase });
    }

    if old.last_mod_check != new.last_mod_check {
        if let Some(at) = new.last_mod_check {
            changes.push(StateChange::ModCheckRecorded { at });
        }
    }

    changes
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
