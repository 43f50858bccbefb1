//! Broker: runs one app from a chosen starting activity to completion.
//!
//! Creates the root workflow instance, seeds it with the starting run,
//! starts the scheduler's workers and drains the queue. The root instance is
//! then settled, its terminal outputs collected, and it is released from the
//! manager together with every instance nested under it.

use std::sync::Arc;

use aq_types::app::App;
use aq_types::config::SchedulerConfig;
use aq_types::job::{InstanceId, JobState, Usage};
use serde::Serialize;

use crate::activity::HandlerRegistry;
use crate::jobs::manager::{JobManager, TerminalOutputs};
use crate::jobs::model::ActivityInputs;
use crate::jobs::scheduler::{JobScheduler, SchedulerError};

/// Result of a broker run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub instance_id: InstanceId,
    pub state: JobState,
    pub outputs: TerminalOutputs,
    pub usage: Usage,
}

pub struct Broker {
    manager: Arc<JobManager>,
    handlers: Arc<HandlerRegistry>,
    workers: usize,
}

impl Broker {
    pub fn new(handlers: HandlerRegistry, config: &SchedulerConfig) -> Self {
        Self::with_manager(Arc::new(JobManager::new()), Arc::new(handlers), config)
    }

    pub fn with_manager(
        manager: Arc<JobManager>,
        handlers: Arc<HandlerRegistry>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            manager,
            handlers,
            workers: config.workers.max(1),
        }
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    /// Run `app` starting at `activity_name` with the given inputs.
    ///
    /// Fails only when `activity_name` is not declared. Activity failures are
    /// reflected in the report's state, not returned as errors.
    #[tracing::instrument(skip(self, app, inputs), fields(app = app.info.id.as_str()))]
    pub async fn run(
        &self,
        app: Arc<App>,
        activity_name: &str,
        inputs: ActivityInputs,
    ) -> Result<RunReport, SchedulerError> {
        let root = self.manager.create_workflow_instance(app);
        root.set_state(JobState::Running);
        let run = match self.manager.create_activity_run(&root, activity_name) {
            Ok(run) => run,
            Err(e) => {
                root.set_state(JobState::Error);
                self.manager.release_instance(root.id());
                return Err(e.into());
            }
        };

        let scheduler = JobScheduler::new(Arc::clone(&self.manager), Arc::clone(&self.handlers));
        scheduler.start_workers(self.workers);
        scheduler.enqueue(Arc::clone(&root), run, inputs);
        scheduler.drain().await?;

        let state = self.manager.finalize_instance(&root);
        let outputs = self.manager.terminal_outputs(&root);
        let usage = root.usage();
        self.manager.release_instance(root.id());
        tracing::info!(
            instance_id = %root.id(),
            %state,
            outputs = outputs.values().map(Vec::len).sum::<usize>(),
            requests = usage.requests,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "workflow finished"
        );

        Ok(RunReport {
            instance_id: root.id(),
            state,
            outputs,
            usage,
        })
    }
}
