//! Job scheduler: a worker pool draining a shared work queue.
//!
//! Each work item is one activity run plus its resolved inputs. A worker
//! marks the run RUNNING, performs it, then commits the outcome and creates
//! whatever downstream runs became ready, all under the instance's run-table
//! lock. New items go back on the same queue. `drain` resolves once the
//! queue is empty and every item taken from it has finished, which is the
//! completion signal for a whole broker run.
//!
//! `call` activities are performed by the scheduler itself: they start a
//! nested workflow instance at the named function activity. When the nested
//! instance reaches a `return`, its output completes the calling run and
//! execution continues downstream of the call in the outer instance.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use aq_types::app::{Activity, ActivityKind};
use aq_types::error::DefinitionError;
use aq_types::job::{InstanceId, JobState, MediaType, RunId, RunRef};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::manager::JobManager;
use super::model::{ActivityInputs, ActivityRun, WorkflowInstance};
use super::queue::WorkQueue;
use crate::activity::{ActivityJob, HandlerRegistry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors raised while performing a work item.
///
/// The affected run is recorded as ERROR before any of these is returned.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("workflow instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("{0} work item(s) pending but no workers were started")]
    NotStarted(usize),
}

/// One activity run waiting to be performed.
#[derive(Debug)]
pub struct WorkItem {
    pub instance: Arc<WorkflowInstance>,
    pub run: ActivityRun,
    pub inputs: ActivityInputs,
}

/// Runs that became ready, and the instance they belong to.
type Downstream = (Arc<WorkflowInstance>, Vec<(ActivityRun, ActivityInputs)>);

// ---------------------------------------------------------------------------
// JobScheduler
// ---------------------------------------------------------------------------

pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

struct SchedulerInner {
    manager: Arc<JobManager>,
    handlers: Arc<HandlerRegistry>,
    queue: WorkQueue<WorkItem>,
}

impl JobScheduler {
    pub fn new(manager: Arc<JobManager>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                manager,
                handlers,
                queue: WorkQueue::new(),
            }),
            workers: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.inner.manager
    }

    /// Launch `count` workers (at least one) consuming the shared queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_workers(&self, count: usize) {
        let count = count.max(1);
        let mut workers = self.workers.lock().expect("worker list lock poisoned");
        let first = workers.len();
        for worker in first..first + count {
            let inner = Arc::clone(&self.inner);
            let shutdown = self.shutdown.child_token();
            workers.spawn(consume(inner, worker, shutdown));
        }
        tracing::info!(workers = workers.len(), "job scheduler workers started");
    }

    /// Append a run to the work queue.
    pub fn enqueue(&self, instance: Arc<WorkflowInstance>, run: ActivityRun, inputs: ActivityInputs) {
        self.inner.enqueue(instance, run, inputs);
    }

    /// Items enqueued but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.inner.queue.pending()
    }

    /// Perform one work item on the current task, bypassing the queue.
    ///
    /// The run is marked RUNNING first, as a worker would. Downstream runs
    /// it unlocks are still enqueued.
    pub async fn perform_work(&self, item: WorkItem) -> Result<(), SchedulerError> {
        self.inner.perform_work(item).await
    }

    /// Wait until the queue is empty and every taken item has finished, then
    /// stop the workers. A drained scheduler cannot be restarted.
    pub async fn drain(&self) -> Result<(), SchedulerError> {
        let started = !self.workers.lock().expect("worker list lock poisoned").is_empty();
        if !started && self.pending() > 0 {
            return Err(SchedulerError::NotStarted(self.pending()));
        }

        self.inner.queue.join().await;
        self.shutdown.cancel();

        let mut workers = std::mem::take(&mut *self.workers.lock().expect("worker list lock poisoned"));
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "worker task ended abnormally");
            }
        }
        tracing::debug!("job scheduler drained");
        Ok(())
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

async fn consume(inner: Arc<SchedulerInner>, worker: usize, shutdown: CancellationToken) {
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = inner.queue.get() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let activity = item.run.activity_name.clone();
        let run_id = item.run.id;
        let instance = Arc::clone(&item.instance);
        tracing::debug!(worker, activity = activity.as_str(), %run_id, "performing activity");

        let started = Instant::now();
        let task = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move { inner.perform_work(item).await })
        };
        match task.await {
            Ok(Ok(())) => tracing::debug!(
                worker,
                activity = activity.as_str(),
                %run_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "activity finished"
            ),
            Ok(Err(e)) => tracing::error!(
                worker,
                activity = activity.as_str(),
                %run_id,
                error = %e,
                "work item failed"
            ),
            Err(e) => {
                tracing::error!(
                    worker,
                    activity = activity.as_str(),
                    %run_id,
                    error = %e,
                    "work item panicked"
                );
                instance.runs().record_outcome(
                    run_id,
                    JobState::Error,
                    format!("activity handler panicked: {e}"),
                    MediaType::PlainText,
                );
            }
        }

        // Follow-up items were enqueued inside perform_work, before this.
        inner.queue.task_done();
    }
    tracing::trace!(worker, "worker stopped");
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

impl SchedulerInner {
    fn enqueue(&self, instance: Arc<WorkflowInstance>, run: ActivityRun, inputs: ActivityInputs) {
        tracing::debug!(
            instance_id = %instance.id(),
            run_id = %run.id,
            activity = run.activity_name.as_str(),
            "scheduled activity run"
        );
        self.queue.put(WorkItem {
            instance,
            run,
            inputs,
        });
    }

    async fn perform_work(&self, item: WorkItem) -> Result<(), SchedulerError> {
        let WorkItem {
            instance,
            run,
            inputs,
        } = item;
        instance.runs().mark_running(run.id);
        let app = Arc::clone(instance.app());

        let Some(activity) = app.activity(&run.activity_name) else {
            return Err(fail_run(
                &instance,
                run.id,
                DefinitionError::UnknownActivity(run.activity_name.clone()),
            ));
        };

        if activity.kind == ActivityKind::Call {
            return self.call(&instance, &run, activity, inputs);
        }

        let Some(handler) = self.handlers.get(activity.kind) else {
            return Err(fail_run(&instance, run.id, DefinitionError::NoHandler(activity.kind)));
        };

        let mut job = ActivityJob::new(Arc::clone(&instance), &run);
        handler.perform(&mut job, &inputs).await;
        if !job.is_finished() {
            tracing::warn!(
                activity = run.activity_name.as_str(),
                run_id = %run.id,
                "handler returned without a terminal state"
            );
            job.fail("activity handler returned without setting a terminal state");
        }

        let downstream = match (activity.kind, instance.caller()) {
            (ActivityKind::Return, Some(caller)) => self.complete_return(&instance, &job, caller)?,
            _ => self.complete(&instance, &job)?,
        };

        let (target, runs) = downstream;
        for (next, next_inputs) in runs {
            self.enqueue(Arc::clone(&target), next, next_inputs);
        }
        Ok(())
    }

    /// Start a nested instance at the call's target function.
    ///
    /// The calling run stays RUNNING until the nested `return` completes it.
    fn call(
        &self,
        instance: &Arc<WorkflowInstance>,
        run: &ActivityRun,
        activity: &Activity,
        inputs: ActivityInputs,
    ) -> Result<(), SchedulerError> {
        let target = match activity.parameter_str("function") {
            Some(target) if !target.is_empty() => target,
            _ => {
                return Err(fail_run(
                    instance,
                    run.id,
                    DefinitionError::MissingCallTarget {
                        activity: run.activity_name.clone(),
                    },
                ));
            }
        };
        if !instance.app().contains(target) {
            return Err(fail_run(
                instance,
                run.id,
                DefinitionError::UnknownCallTarget {
                    activity: run.activity_name.clone(),
                    target: target.to_string(),
                },
            ));
        }

        let nested = self
            .manager
            .create_nested_instance(Arc::clone(instance.app()), run.run_ref());
        nested.set_state(JobState::Running);
        let entry = self.manager.create_activity_run(&nested, target)?;

        tracing::debug!(
            caller = run.activity_name.as_str(),
            function = target,
            nested_instance = %nested.id(),
            "calling function"
        );
        self.enqueue(nested, entry, inputs);
        Ok(())
    }

    /// Commit `job` into its own instance and collect the runs it unlocks.
    fn complete(
        &self,
        instance: &Arc<WorkflowInstance>,
        job: &ActivityJob,
    ) -> Result<Downstream, SchedulerError> {
        let mut table = instance.runs();
        let Some(run) = table.record_outcome(
            job.run_id(),
            job.state,
            job.output.clone(),
            job.output_type,
        ) else {
            tracing::warn!(run_id = %job.run_id(), "run already finished; outcome ignored");
            return Ok((Arc::clone(instance), Vec::new()));
        };

        if run.state != JobState::Success {
            tracing::error!(
                activity = run.activity_name.as_str(),
                run_id = %run.id,
                error = run.output.as_str(),
                "activity failed"
            );
            return Ok((Arc::clone(instance), Vec::new()));
        }

        let next = self
            .manager
            .schedule_downstream(instance, &mut table, &run.activity_name)?;
        Ok((Arc::clone(instance), next))
    }

    /// Commit a nested `return` and resume the calling run in the outer instance.
    ///
    /// Only one instance lock is held at a time.
    fn complete_return(
        &self,
        nested: &Arc<WorkflowInstance>,
        job: &ActivityJob,
        caller: RunRef,
    ) -> Result<Downstream, SchedulerError> {
        {
            let mut table = nested.runs();
            let Some(run) = table.record_outcome(
                job.run_id(),
                job.state,
                job.output.clone(),
                job.output_type,
            ) else {
                return Ok((Arc::clone(nested), Vec::new()));
            };
            if run.state != JobState::Success {
                tracing::error!(
                    activity = run.activity_name.as_str(),
                    run_id = %run.id,
                    error = run.output.as_str(),
                    "return failed; calling run left unfinished"
                );
                return Ok((Arc::clone(nested), Vec::new()));
            }
        }

        let Some(outer) = self.manager.instance(caller.instance_id) else {
            nested.set_state(JobState::Error);
            return Err(SchedulerError::InstanceNotFound(caller.instance_id));
        };
        nested.set_state(JobState::Success);
        outer.record_usage(nested.usage());

        let mut table = outer.runs();
        let Some(resumed) = table.record_outcome(
            caller.run_id,
            JobState::Success,
            job.output.clone(),
            job.output_type,
        ) else {
            tracing::warn!(
                run_id = %caller.run_id,
                "calling run already finished; return ignored"
            );
            return Ok((Arc::clone(&outer), Vec::new()));
        };
        tracing::debug!(
            caller = resumed.activity_name.as_str(),
            nested_instance = %nested.id(),
            "function returned"
        );

        let next = self
            .manager
            .schedule_downstream(&outer, &mut table, &resumed.activity_name)?;
        drop(table);
        Ok((outer, next))
    }
}

/// Record `error` on a run and hand it back for propagation.
fn fail_run(instance: &WorkflowInstance, run_id: RunId, error: DefinitionError) -> SchedulerError {
    instance
        .runs()
        .record_outcome(run_id, JobState::Error, error.to_string(), MediaType::PlainText);
    SchedulerError::Definition(error)
}
