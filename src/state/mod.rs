// State management module
//
// This module provides the WorkflowManager which wraps WorkflowState with
// thread-safe access using Arc<RwLock<T>> and emits change events for UI
// updates, plus the generation-counted CancelToken used by the benchmark
// sampler.

pub mod cancel;

pub use cancel::CancelToken;

use crate::models::{
    EvaluationSample, Template, ThresholdSearchOutcome, WorkflowState, FIRST_STEP, LAST_STEP,
};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when workflow state is modified
///
/// These events are emitted to notify interested parties (primarily the UI)
/// about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The wizard moved to a new step
    StepChanged { step: u8 },

    /// The general loading flag flipped
    LoadingChanged { loading: bool },

    /// A benchmark run has started
    BenchmarkStarted,

    /// A sample arrived during a benchmark run
    SampleAdded { total: usize },

    /// The benchmark run finished (completed, cancelled, or aborted)
    BenchmarkFinished { samples: usize },

    /// A threshold sweep finished and its outcome is available
    ThresholdSearchFinished,

    /// The cached template changed (saved, fetched, or cleared)
    TemplateChanged,

    /// A re-evaluation finished with this bounding-box outcome
    EvaluationOutcome { no_bounding_box: bool },

    /// State has been reset to its initial values
    StateReset,
}

/// Thread-safe workflow state manager with event emission
///
/// This is the central state component of the setup flow:
/// - Provides thread-safe access to [`WorkflowState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Implements the single-flight guards (`try_begin_*`) as atomic
///   test-and-set under the write lock
///
/// Always use `WorkflowManager` instead of touching [`WorkflowState`]
/// directly:
/// - [`read()`](Self::read) for reading state without cloning
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
#[derive(Debug)]
pub struct WorkflowManager {
    /// The workflow state protected by RwLock for thread-safe access
    state: Arc<RwLock<WorkflowState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl WorkflowManager {
    /// Create a new WorkflowManager with default state and a broadcast
    /// buffer of 100 events.
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(WorkflowState::default())),
            state_tx,
        }
    }

    /// Get a read-only snapshot of the current state.
    pub fn snapshot(&self) -> WorkflowState {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&WorkflowState) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Update the state and emit change events.
    ///
    /// This is the primary way to modify state. It captures the old state,
    /// applies the update function, detects what changed, and emits the
    /// corresponding events.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let mut state = self.state.write().unwrap();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Detect what changed between two states and generate events.
    fn detect_changes(&self, old: &WorkflowState, new: &WorkflowState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.current_step != new.current_step {
            changes.push(StateChange::StepChanged {
                step: new.current_step,
            });
        }

        if old.loading != new.loading {
            changes.push(StateChange::LoadingChanged {
                loading: new.loading,
            });
        }

        if old.running_benchmark != new.running_benchmark {
            if new.running_benchmark {
                changes.push(StateChange::BenchmarkStarted);
            } else {
                changes.push(StateChange::BenchmarkFinished {
                    samples: new.random_examples.len(),
                });
            }
        }

        if new.random_examples.len() > old.random_examples.len() {
            changes.push(StateChange::SampleAdded {
                total: new.random_examples.len(),
            });
        }

        if old.threshold_search_result != new.threshold_search_result
            && new.threshold_search_result.is_some()
        {
            changes.push(StateChange::ThresholdSearchFinished);
        }

        if old.template_data != new.template_data {
            changes.push(StateChange::TemplateChanged);
        }

        if old.no_bounding_box != new.no_bounding_box {
            changes.push(StateChange::EvaluationOutcome {
                no_bounding_box: new.no_bounding_box,
            });
        }

        changes
    }

    // Convenience methods for common state updates

    /// Advance the wizard: completing step 1 moves to 2, completing step 2
    /// moves to 3, anything else is a no-op. The mapping is intentionally
    /// not general: the flow is a fixed three-stage wizard with no jumps.
    pub fn advance_step(&self, step: u8) -> Vec<StateChange> {
        self.update(|state| {
            if (FIRST_STEP..LAST_STEP).contains(&step) {
                state.current_step = step + 1;
            }
        })
    }

    /// Direct setter for the general loading flag. No side effects.
    pub fn set_loading(&self, loading: bool) -> Vec<StateChange> {
        self.update(|state| {
            state.loading = loading;
        })
    }

    /// Start a benchmark run. Returns `false` if one is already running
    /// (single-flight). Clears collected samples and the too-few flag.
    pub fn try_begin_benchmark(&self) -> bool {
        self.try_begin(
            |state| state.running_benchmark,
            |state| {
                state.running_benchmark = true;
                state.random_examples.clear();
                state.too_few_evaluations = false;
            },
        )
    }

    /// Clear the benchmark busy flag, optionally marking the run as
    /// aborted for lack of evaluations.
    pub fn finish_benchmark(&self, too_few_evaluations: bool) -> Vec<StateChange> {
        self.update(|state| {
            state.running_benchmark = false;
            if too_few_evaluations {
                state.too_few_evaluations = true;
            }
        })
    }

    /// Append a sample collected by the current benchmark run.
    pub fn push_example(&self, sample: EvaluationSample) -> Vec<StateChange> {
        self.update(|state| {
            state.random_examples.push(sample);
        })
    }

    /// Start a threshold sweep. Returns `false` if one is in flight.
    pub fn try_begin_threshold_search(&self) -> bool {
        self.try_begin(
            |state| state.searching_thresholds,
            |state| {
                state.searching_thresholds = true;
                state.threshold_search_result = None;
            },
        )
    }

    /// Store the sweep outcome and clear the busy flag in one update.
    pub fn finish_threshold_search(
        &self,
        outcome: Option<ThresholdSearchOutcome>,
    ) -> Vec<StateChange> {
        self.update(|state| {
            state.searching_thresholds = false;
            if outcome.is_some() {
                state.threshold_search_result = outcome;
            }
        })
    }

    /// Start a template save. Returns `false` if one is in flight.
    pub fn try_begin_template_save(&self) -> bool {
        self.try_begin(
            |state| state.template_saving,
            |state| state.template_saving = true,
        )
    }

    pub fn finish_template_save(&self) -> Vec<StateChange> {
        self.update(|state| {
            state.template_saving = false;
        })
    }

    /// Start a capture. Returns `false` if one is in flight.
    pub fn try_begin_capture(&self) -> bool {
        self.try_begin(|state| state.capturing, |state| state.capturing = true)
    }

    pub fn finish_capture(&self) -> Vec<StateChange> {
        self.update(|state| {
            state.capturing = false;
        })
    }

    /// Replace the cached template record.
    pub fn set_template_data(&self, template: Option<Template>) -> Vec<StateChange> {
        self.update(|state| {
            state.template_data = template;
        })
    }

    /// Reset the workflow to its initial values and emit a reset event.
    ///
    /// The capture and benchmark busy flags are left alone: their
    /// operations clear them on exit themselves.
    pub fn reset(&self) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.current_step = FIRST_STEP;
            state.random_examples.clear();
            state.no_bounding_box = false;
            state.loading = false;
            state.searching_thresholds = false;
            state.threshold_search_result = None;
            state.too_few_evaluations = false;
            state.template_saving = false;
            state.template_data = None;
            state.reevaluate_error = None;
        });

        let reset_event = StateChange::StateReset;
        let _ = self.state_tx.send(reset_event.clone());
        changes.push(reset_event);

        changes
    }

    /// Atomic test-and-set under one write lock: returns `false` when the
    /// guard flag is already set, otherwise applies `begin` and emits the
    /// resulting events.
    fn try_begin<G, B>(&self, guard: G, begin: B) -> bool
    where
        G: FnOnce(&WorkflowState) -> bool,
        B: FnOnce(&mut WorkflowState),
    {
        let mut state = self.state.write().unwrap();
        if guard(&state) {
            return false;
        }
        let old_state = state.clone();
        begin(&mut state);

        for change in self.detect_changes(&old_state, &state) {
            let _ = self.state_tx.send(change);
        }
        true
    }
}

impl Default for WorkflowManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make WorkflowManager cloneable for sharing across tasks
impl Clone for WorkflowManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample() -> EvaluationSample {
        EvaluationSample {
            processed_images: vec!["aW1n".to_string()],
            predictions: Value::Null,
            raw: Value::Null,
        }
    }

    #[test]
    fn test_new_manager() {
        let manager = WorkflowManager::new();
        let state = manager.snapshot();
        assert_eq!(state.current_step, 1);
        assert!(!state.is_busy());
    }

    #[test]
    fn test_advance_step_linear() {
        let manager = WorkflowManager::new();

        manager.advance_step(1);
        assert_eq!(manager.read(|s| s.current_step), 2);

        manager.advance_step(2);
        assert_eq!(manager.read(|s| s.current_step), 3);
    }

    #[test]
    fn test_advance_step_ignores_invalid_input() {
        let manager = WorkflowManager::new();

        manager.advance_step(3);
        assert_eq!(manager.read(|s| s.current_step), 1);

        manager.advance_step(99);
        assert_eq!(manager.read(|s| s.current_step), 1);
    }

    #[test]
    fn test_advance_step_final_step_unchanged() {
        let manager = WorkflowManager::new();
        manager.advance_step(1);
        manager.advance_step(2);
        assert_eq!(manager.read(|s| s.current_step), 3);

        manager.advance_step(3);
        assert_eq!(manager.read(|s| s.current_step), 3);
    }

    #[test]
    fn test_step_change_event() {
        let manager = WorkflowManager::new();
        let changes = manager.advance_step(1);
        assert_eq!(changes, vec![StateChange::StepChanged { step: 2 }]);
    }

    #[test]
    fn test_benchmark_single_flight() {
        let manager = WorkflowManager::new();
        assert!(manager.try_begin_benchmark());
        assert!(!manager.try_begin_benchmark());

        manager.finish_benchmark(false);
        assert!(manager.try_begin_benchmark());
    }

    #[test]
    fn test_begin_benchmark_clears_previous_run() {
        let manager = WorkflowManager::new();
        assert!(manager.try_begin_benchmark());
        manager.push_example(sample());
        manager.finish_benchmark(true);

        assert!(manager.try_begin_benchmark());
        let state = manager.snapshot();
        assert!(state.random_examples.is_empty());
        assert!(!state.too_few_evaluations);
    }

    #[test]
    fn test_benchmark_events() {
        let manager = WorkflowManager::new();
        let mut rx = manager.subscribe();

        manager.try_begin_benchmark();
        manager.push_example(sample());
        manager.finish_benchmark(false);

        assert_eq!(rx.try_recv().unwrap(), StateChange::BenchmarkStarted);
        assert_eq!(rx.try_recv().unwrap(), StateChange::SampleAdded { total: 1 });
        assert_eq!(
            rx.try_recv().unwrap(),
            StateChange::BenchmarkFinished { samples: 1 }
        );
    }

    #[test]
    fn test_threshold_search_flag_and_outcome() {
        let manager = WorkflowManager::new();
        assert!(manager.try_begin_threshold_search());
        assert!(!manager.try_begin_threshold_search());

        let changes = manager.finish_threshold_search(Some(ThresholdSearchOutcome::Found {
            threshold: [90.0, 250.0],
            threshold_last: [80.0, 240.0],
        }));
        assert!(changes.contains(&StateChange::ThresholdSearchFinished));

        let state = manager.snapshot();
        assert!(!state.searching_thresholds);
        assert!(matches!(
            state.threshold_search_result,
            Some(ThresholdSearchOutcome::Found { .. })
        ));
    }

    #[test]
    fn test_template_save_single_flight() {
        let manager = WorkflowManager::new();
        assert!(manager.try_begin_template_save());
        assert!(!manager.try_begin_template_save());
        manager.finish_template_save();
        assert!(manager.try_begin_template_save());
    }

    #[test]
    fn test_capture_single_flight() {
        let manager = WorkflowManager::new();
        assert!(manager.try_begin_capture());
        assert!(!manager.try_begin_capture());
        manager.finish_capture();
        assert!(!manager.read(|s| s.capturing));
    }

    #[test]
    fn test_reset() {
        let manager = WorkflowManager::new();
        let mut rx = manager.subscribe();

        manager.advance_step(1);
        manager.set_loading(true);
        manager.update(|s| {
            s.no_bounding_box = true;
            s.reevaluate_error = Some("oops".to_string());
        });

        let changes = manager.reset();
        assert!(changes.contains(&StateChange::StateReset));

        let state = manager.snapshot();
        assert_eq!(state.current_step, 1);
        assert!(!state.loading);
        assert!(!state.no_bounding_box);
        assert!(state.reevaluate_error.is_none());

        // Drain the channel: reset event must be present
        let mut saw_reset = false;
        while let Ok(event) = rx.try_recv() {
            saw_reset |= event == StateChange::StateReset;
        }
        assert!(saw_reset);
    }

    #[test]
    fn test_clone_shares_state() {
        let manager = WorkflowManager::new();
        let other = manager.clone();
        manager.set_loading(true);
        assert!(other.read(|s| s.loading));
    }
}
