//! The `ActivityHandler` trait and the job record handlers operate on.
//!
//! A handler receives an `ActivityJob` (a working copy of one activity run)
//! together with its resolved inputs, and must leave the job in SUCCESS or
//! ERROR with its output set. Handlers never raise: failures are recorded on
//! the job. The scheduler commits the job back into the run table afterwards.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use aq_types::app::{Activity, App};
use aq_types::error::DefinitionError;
use aq_types::job::{JobState, MediaType, RunId, Usage};
use thiserror::Error;

use crate::jobs::model::{ActivityInputs, ActivityRun, WorkflowInstance};

/// Errors a handler can hit while performing an activity.
///
/// Handlers record these on the job rather than returning them.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Core trait for anything that can perform an activity.
///
/// Uses native async fn in traits (Rust 2024 edition, RPITIT).
/// NOT object-safe -- use `BoxActivityHandler` for dynamic dispatch.
pub trait ActivityHandler: Send + Sync {
    /// Do the work for one run and record the outcome on `job`.
    fn perform(
        &self,
        job: &mut ActivityJob,
        inputs: &ActivityInputs,
    ) -> impl Future<Output = ()> + Send;
}

/// Working copy of one activity run, handed to a handler.
pub struct ActivityJob {
    run_id: RunId,
    activity_name: String,
    instance: Arc<WorkflowInstance>,
    pub state: JobState,
    pub output: String,
    pub output_type: MediaType,
}

impl ActivityJob {
    /// Start a job for `run`. The job begins RUNNING with an empty output.
    pub fn new(instance: Arc<WorkflowInstance>, run: &ActivityRun) -> Self {
        Self {
            run_id: run.id,
            activity_name: run.activity_name.clone(),
            instance,
            state: JobState::Running,
            output: String::new(),
            output_type: run.output_type,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn activity_name(&self) -> &str {
        &self.activity_name
    }

    pub fn instance(&self) -> &Arc<WorkflowInstance> {
        &self.instance
    }

    pub fn app(&self) -> &Arc<App> {
        self.instance.app()
    }

    /// The activity definition this job runs.
    pub fn activity(&self) -> Result<&Activity, ActivityError> {
        self.instance
            .app()
            .activity(&self.activity_name)
            .ok_or_else(|| DefinitionError::UnknownActivity(self.activity_name.clone()).into())
    }

    pub fn succeed(&mut self, output: impl Into<String>, output_type: MediaType) {
        self.state = JobState::Success;
        self.output = output.into();
        self.output_type = output_type;
    }

    /// Record a failure; the error text becomes the output.
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.state = JobState::Error;
        self.output = error.to_string();
        self.output_type = MediaType::PlainText;
    }

    /// Add usage to the owning instance's counters.
    pub fn record_usage(&self, usage: Usage) {
        self.instance.record_usage(usage);
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

impl fmt::Debug for ActivityJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityJob")
            .field("run_id", &self.run_id)
            .field("activity_name", &self.activity_name)
            .field("instance_id", &self.instance.id())
            .field("state", &self.state)
            .field("output_type", &self.output_type)
            .finish()
    }
}
