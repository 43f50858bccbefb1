//! Workflow instances, activity runs, and the per-instance run table.
//!
//! All runs of one instance live in a single `RunTable` behind a mutex owned
//! by the `WorkflowInstance`. Committing a run's outcome and deciding what
//! becomes ready next happen under that one lock, so two runs finishing at
//! the same time cannot both miss (or both schedule) a shared downstream
//! activity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use aq_types::app::App;
use aq_types::job::{InstanceId, JobState, MediaType, RunId, RunRef, Usage};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

/// Named inputs handed to one activity run, keyed by upstream activity name.
///
/// A value is a single string output, or an array of strings when the
/// upstream activity ran more than once.
pub type ActivityInputs = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// ActivityRun
// ---------------------------------------------------------------------------

/// One execution of one activity within a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRun {
    pub id: RunId,
    pub activity_name: String,
    pub instance_id: InstanceId,
    pub state: JobState,
    /// Produced content, or the error text when `state` is ERROR.
    pub output: String,
    pub output_type: MediaType,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActivityRun {
    pub(crate) fn new(instance_id: InstanceId, activity_name: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            activity_name: activity_name.into(),
            instance_id,
            state: JobState::Created,
            output: String::new(),
            output_type: MediaType::PlainText,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn run_ref(&self) -> RunRef {
        RunRef {
            instance_id: self.instance_id,
            run_id: self.id,
        }
    }
}

// ---------------------------------------------------------------------------
// RunTable
// ---------------------------------------------------------------------------

/// Every run of one workflow instance, indexed by id and by activity name.
///
/// Runs are listed per activity in creation order.
#[derive(Debug, Default)]
pub struct RunTable {
    runs: HashMap<RunId, ActivityRun>,
    by_activity: HashMap<String, Vec<RunId>>,
}

impl RunTable {
    pub fn insert(&mut self, run: ActivityRun) {
        self.by_activity
            .entry(run.activity_name.clone())
            .or_default()
            .push(run.id);
        self.runs.insert(run.id, run);
    }

    pub fn get(&self, id: RunId) -> Option<&ActivityRun> {
        self.runs.get(&id)
    }

    /// Runs of the named activity, oldest first.
    pub fn runs_for<'a>(&'a self, activity: &str) -> impl Iterator<Item = &'a ActivityRun> + 'a {
        self.by_activity
            .get(activity)
            .into_iter()
            .flatten()
            .filter_map(|id| self.runs.get(id))
    }

    /// Number of runs of the named activity.
    pub fn run_count(&self, activity: &str) -> usize {
        self.by_activity.get(activity).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// All runs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityRun> {
        self.runs.values()
    }

    /// Move a CREATED run to RUNNING. Returns false for any other state.
    pub fn mark_running(&mut self, id: RunId) -> bool {
        match self.runs.get_mut(&id) {
            Some(run) if run.state == JobState::Created => {
                run.state = JobState::Running;
                true
            }
            _ => false,
        }
    }

    /// Commit a terminal outcome for a run.
    ///
    /// Returns a snapshot of the committed run, or `None` when the run is
    /// unknown or already finished. A finished run is never overwritten.
    pub fn record_outcome(
        &mut self,
        id: RunId,
        state: JobState,
        output: String,
        output_type: MediaType,
    ) -> Option<ActivityRun> {
        let run = self.runs.get_mut(&id)?;
        if run.is_finished() {
            return None;
        }
        run.state = state;
        run.output = output;
        run.output_type = output_type;
        if state.is_finished() {
            run.completed_at = Some(Utc::now());
        }
        Some(run.clone())
    }
}

// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// One execution of an app.
///
/// Nested instances created by a `call` activity carry a `caller` reference
/// to the run that is waiting for their `return`.
#[derive(Debug)]
pub struct WorkflowInstance {
    id: InstanceId,
    app: Arc<App>,
    caller: Option<RunRef>,
    state: Mutex<JobState>,
    context: DashMap<String, Value>,
    usage: Mutex<Usage>,
    runs: Mutex<RunTable>,
}

impl WorkflowInstance {
    pub(crate) fn new(app: Arc<App>, caller: Option<RunRef>) -> Self {
        Self {
            id: InstanceId::new(),
            app,
            caller,
            state: Mutex::new(JobState::Created),
            context: DashMap::new(),
            usage: Mutex::new(Usage::default()),
            runs: Mutex::new(RunTable::default()),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn caller(&self) -> Option<RunRef> {
        self.caller
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().expect("instance state lock poisoned")
    }

    /// Move the instance to `state`. A finished instance keeps its state.
    pub fn set_state(&self, state: JobState) -> bool {
        let mut current = self.state.lock().expect("instance state lock poisoned");
        if current.is_finished() {
            return false;
        }
        *current = state;
        true
    }

    /// Read an entry from the instance's key/value context.
    pub fn context_get(&self, key: &str) -> Option<Value> {
        self.context.get(key).map(|entry| entry.value().clone())
    }

    pub fn context_set(&self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn usage(&self) -> Usage {
        *self.usage.lock().expect("instance usage lock poisoned")
    }

    pub fn record_usage(&self, usage: Usage) {
        *self.usage.lock().expect("instance usage lock poisoned") += usage;
    }

    /// Lock the run table. Never hold the guard across an `.await`.
    pub fn runs(&self) -> MutexGuard<'_, RunTable> {
        self.runs.lock().expect("run table lock poisoned")
    }

    /// Snapshot of a single run.
    pub fn run(&self, id: RunId) -> Option<ActivityRun> {
        self.runs().get(id).cloned()
    }

    /// Snapshots of the named activity's runs, oldest first.
    pub fn runs_for(&self, activity: &str) -> Vec<ActivityRun> {
        self.runs().runs_for(activity).cloned().collect()
    }
}
