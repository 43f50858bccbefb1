//! Job manager: instance registry, readiness rules, input resolution.
//!
//! The manager owns every `WorkflowInstance` created for a broker run and
//! answers the questions the scheduler asks when a run finishes: which
//! downstream activities just became ready, and with what inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use aq_types::app::{Activity, App};
use aq_types::error::DefinitionError;
use aq_types::job::{InstanceId, JobState, RunRef};
use dashmap::DashMap;
use serde_json::Value;

use super::fanout::{FanOutEvaluator, JsonPathFanOut};
use super::model::{ActivityInputs, ActivityRun, RunTable, WorkflowInstance};

/// Successful outputs of every sink activity, keyed by activity name.
pub type TerminalOutputs = BTreeMap<String, Vec<String>>;

/// Registry of workflow instances plus the dependency-resolution rules.
pub struct JobManager {
    instances: DashMap<InstanceId, Arc<WorkflowInstance>>,
    evaluator: Arc<dyn FanOutEvaluator>,
}

impl JobManager {
    /// Create a manager that evaluates `map` expressions as JSONPath.
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(JsonPathFanOut))
    }

    pub fn with_evaluator(evaluator: Arc<dyn FanOutEvaluator>) -> Self {
        Self {
            instances: DashMap::new(),
            evaluator,
        }
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Register a new top-level instance of `app` in CREATED state.
    pub fn create_workflow_instance(&self, app: Arc<App>) -> Arc<WorkflowInstance> {
        self.register(WorkflowInstance::new(app, None))
    }

    /// Register an instance started by a `call` run; its `return` resumes `caller`.
    pub fn create_nested_instance(&self, app: Arc<App>, caller: RunRef) -> Arc<WorkflowInstance> {
        self.register(WorkflowInstance::new(app, Some(caller)))
    }

    fn register(&self, instance: WorkflowInstance) -> Arc<WorkflowInstance> {
        let instance = Arc::new(instance);
        tracing::debug!(
            instance_id = %instance.id(),
            app = instance.app().info.id.as_str(),
            nested = instance.caller().is_some(),
            "created workflow instance"
        );
        self.instances.insert(instance.id(), Arc::clone(&instance));
        instance
    }

    pub fn instance(&self, id: InstanceId) -> Option<Arc<WorkflowInstance>> {
        self.instances.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Unregister `root` and every instance nested under it, at any depth.
    ///
    /// Returns how many instances were removed. Callers holding an `Arc` to
    /// a released instance can still read it.
    pub fn release_instance(&self, root: InstanceId) -> usize {
        let mut frontier = vec![root];
        let mut released = 0;
        while let Some(id) = frontier.pop() {
            if self.instances.remove(&id).is_none() {
                continue;
            }
            released += 1;
            let nested: Vec<InstanceId> = self
                .instances
                .iter()
                .filter(|entry| entry.value().caller().is_some_and(|caller| caller.instance_id == id))
                .map(|entry| *entry.key())
                .collect();
            frontier.extend(nested);
        }
        tracing::debug!(instance_id = %root, released, "released workflow instances");
        released
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a CREATED run of `activity_name` inside `instance`.
    pub fn create_activity_run(
        &self,
        instance: &WorkflowInstance,
        activity_name: &str,
    ) -> Result<ActivityRun, DefinitionError> {
        let mut table = instance.runs();
        create_run(instance, &mut table, activity_name)
    }

    /// Activities that consume `finished` and whose inputs are now all settled.
    ///
    /// Returns nothing for an unknown instance.
    pub fn ready_next_activities(&self, finished: &ActivityRun) -> Vec<String> {
        let Some(instance) = self.instance(finished.instance_id) else {
            tracing::warn!(
                instance_id = %finished.instance_id,
                "ready check for unknown workflow instance"
            );
            return Vec::new();
        };
        let table = instance.runs();
        ready_activities(instance.app(), &table, &finished.activity_name)
    }

    /// True when every input of `activity` has at least one run and all of
    /// those runs are finished. Vacuously true for source activities.
    pub fn inputs_satisfied(&self, instance: &WorkflowInstance, activity: &Activity) -> bool {
        inputs_ready(&instance.runs(), activity)
    }

    /// Build the input sets for the next run(s) of `activity`.
    ///
    /// One set normally; one per element when an input declares a `map`
    /// expression. An empty result means nothing should be scheduled.
    pub fn resolve_inputs(
        &self,
        instance: &WorkflowInstance,
        activity: &Activity,
    ) -> Vec<ActivityInputs> {
        resolve(&instance.runs(), activity, self.evaluator.as_ref())
    }

    /// Successful outputs of every sink activity, runs in creation order.
    pub fn terminal_outputs(&self, instance: &WorkflowInstance) -> TerminalOutputs {
        let table = instance.runs();
        let mut outputs = TerminalOutputs::new();
        for sink in instance.app().sink_activities() {
            let produced: Vec<String> = table
                .runs_for(sink)
                .filter(|run| run.state == JobState::Success)
                .map(|run| run.output.clone())
                .collect();
            if !produced.is_empty() {
                outputs.insert(sink.to_string(), produced);
            }
        }
        outputs
    }

    /// Settle an instance: ERROR if any of its runs failed, SUCCESS otherwise.
    pub fn finalize_instance(&self, instance: &WorkflowInstance) -> JobState {
        let failed = instance
            .runs()
            .iter()
            .any(|run| run.state == JobState::Error);
        let state = if failed {
            JobState::Error
        } else {
            JobState::Success
        };
        instance.set_state(state);
        instance.state()
    }

    /// Create the downstream runs unlocked by a successful run of `finished`.
    ///
    /// The caller holds `table`, the locked run table of `instance`, and has
    /// already committed the finished run into it.
    pub(crate) fn schedule_downstream(
        &self,
        instance: &WorkflowInstance,
        table: &mut RunTable,
        finished: &str,
    ) -> Result<Vec<(ActivityRun, ActivityInputs)>, DefinitionError> {
        let app = Arc::clone(instance.app());
        let mut scheduled = Vec::new();

        for name in ready_activities(&app, table, finished) {
            let activity = app
                .activity(&name)
                .ok_or_else(|| DefinitionError::UnknownActivity(name.clone()))?;
            for inputs in resolve(table, activity, self.evaluator.as_ref()) {
                let run = create_run(instance, table, &name)?;
                scheduled.push((run, inputs));
            }
        }

        Ok(scheduled)
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Rules over a locked run table
// ---------------------------------------------------------------------------

fn create_run(
    instance: &WorkflowInstance,
    table: &mut RunTable,
    activity_name: &str,
) -> Result<ActivityRun, DefinitionError> {
    if !instance.app().contains(activity_name) {
        return Err(DefinitionError::UnknownActivity(activity_name.to_string()));
    }
    let run = ActivityRun::new(instance.id(), activity_name);
    table.insert(run.clone());
    tracing::trace!(
        instance_id = %instance.id(),
        run_id = %run.id,
        activity = activity_name,
        "created activity run"
    );
    Ok(run)
}

fn ready_activities(app: &App, table: &RunTable, finished: &str) -> Vec<String> {
    app.consumers_of(finished)
        .filter(|name| {
            app.activity(name)
                .is_some_and(|activity| inputs_ready(table, activity))
        })
        .map(str::to_string)
        .collect()
}

fn inputs_ready(table: &RunTable, activity: &Activity) -> bool {
    activity.inputs.iter().all(|input| {
        let mut runs = table.runs_for(&input.activity).peekable();
        runs.peek().is_some() && runs.all(ActivityRun::is_finished)
    })
}

fn resolve(table: &RunTable, activity: &Activity, evaluator: &dyn FanOutEvaluator) -> Vec<ActivityInputs> {
    let mut base = ActivityInputs::new();

    for input in &activity.inputs {
        let outputs: Vec<&str> = table
            .runs_for(&input.activity)
            .filter(|run| run.state == JobState::Success)
            .map(|run| run.output.as_str())
            .collect();

        let value = match outputs.as_slice() {
            [] => {
                tracing::warn!(
                    input = input.activity.as_str(),
                    "no successful output for input; nothing to schedule"
                );
                return Vec::new();
            }
            [single] => Value::String((*single).to_string()),
            many => Value::Array(many.iter().map(|o| Value::String((*o).to_string())).collect()),
        };
        base.insert(input.activity.clone(), value);
    }

    // Only the first mapped input fans out.
    let Some((source, expression)) = activity
        .inputs
        .iter()
        .find_map(|input| input.fan_out.as_deref().map(|expr| (input.activity.as_str(), expr)))
    else {
        return vec![base];
    };

    let Some(aggregated) = base.get(source) else {
        return Vec::new();
    };

    match evaluator.fan_out(expression, aggregated) {
        Ok(elements) => elements
            .into_iter()
            .map(|element| {
                let mut inputs = base.clone();
                inputs.insert(source.to_string(), element);
                inputs
            })
            .collect(),
        Err(e) => {
            tracing::error!(input = source, error = %e, "fan-out failed; nothing to schedule");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use aq_types::app::{ActivityInput, ActivityKind, ActivityTable, AppInfo};
    use aq_types::job::MediaType;
    use serde_json::json;

    use super::*;
    use crate::jobs::fanout::FanOutError;

    fn app(activities: Vec<(&str, Activity)>) -> Arc<App> {
        Arc::new(App {
            aq: "1.0".to_string(),
            info: AppInfo {
                id: "test".to_string(),
                title: "Test".to_string(),
                version: "1".to_string(),
                profile: None,
            },
            models: HashMap::new(),
            memory: HashMap::new(),
            tools: HashMap::new(),
            activities: activities.into_iter().collect::<ActivityTable>(),
        })
    }

    fn function() -> Activity {
        Activity::new(ActivityKind::Function)
    }

    fn fed_by(sources: &[&str]) -> Activity {
        function().with_inputs(sources.iter().map(|s| ActivityInput::from_activity(*s)).collect())
    }

    fn finish(instance: &WorkflowInstance, run: &ActivityRun, state: JobState, output: &str) -> ActivityRun {
        instance
            .runs()
            .record_outcome(run.id, state, output.to_string(), MediaType::PlainText)
            .unwrap()
    }

    /// A -> C <- B
    fn diamond() -> Arc<App> {
        app(vec![("a", function()), ("b", function()), ("c", fed_by(&["a", "b"]))])
    }

    #[test]
    fn test_create_workflow_instance_registers_it() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        assert_eq!(instance.state(), JobState::Created);
        assert!(instance.caller().is_none());
        assert_eq!(manager.instance_count(), 1);
        assert!(manager.instance(instance.id()).is_some());
    }

    #[test]
    fn test_create_activity_run_unknown_activity() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        let err = manager.create_activity_run(&instance, "zzz").unwrap_err();
        assert_eq!(err, DefinitionError::UnknownActivity("zzz".to_string()));
        assert!(instance.runs().is_empty());
    }

    #[test]
    fn test_create_activity_run_is_created_with_defaults() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        let run = manager.create_activity_run(&instance, "a").unwrap();
        assert_eq!(run.state, JobState::Created);
        assert_eq!(run.output, "");
        assert_eq!(run.output_type, MediaType::PlainText);
        assert_eq!(run.instance_id, instance.id());
        assert_eq!(instance.run(run.id), Some(run));
    }

    #[test]
    fn test_join_waits_for_every_input() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        let a = manager.create_activity_run(&instance, "a").unwrap();
        let b = manager.create_activity_run(&instance, "b").unwrap();

        let a = finish(&instance, &a, JobState::Success, "x");
        assert!(manager.ready_next_activities(&a).is_empty());

        let b = finish(&instance, &b, JobState::Success, "y");
        assert_eq!(manager.ready_next_activities(&b), vec!["c".to_string()]);

        let c = instance.app().activity("c").unwrap().clone();
        let inputs = manager.resolve_inputs(&instance, &c);
        assert_eq!(inputs, vec![json!({"a": "x", "b": "y"}).as_object().unwrap().clone()]);
    }

    #[test]
    fn test_input_without_runs_is_not_satisfied() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        let a = manager.create_activity_run(&instance, "a").unwrap();
        finish(&instance, &a, JobState::Success, "x");

        let c = instance.app().activity("c").unwrap().clone();
        assert!(!manager.inputs_satisfied(&instance, &c));

        let source = instance.app().activity("a").unwrap().clone();
        assert!(manager.inputs_satisfied(&instance, &source));
    }

    #[test]
    fn test_failed_input_counts_as_settled_but_contributes_nothing() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        let a = manager.create_activity_run(&instance, "a").unwrap();
        let b = manager.create_activity_run(&instance, "b").unwrap();
        finish(&instance, &a, JobState::Success, "x");
        let b = finish(&instance, &b, JobState::Error, "boom");

        assert_eq!(manager.ready_next_activities(&b), vec!["c".to_string()]);
        let c = instance.app().activity("c").unwrap().clone();
        assert!(manager.resolve_inputs(&instance, &c).is_empty());
    }

    #[test]
    fn test_multiple_runs_aggregate_into_array() {
        let manager = JobManager::new();
        let app = app(vec![("a", function()), ("c", fed_by(&["a"]))]);
        let instance = manager.create_workflow_instance(app);
        for output in ["1", "2", "3"] {
            let run = manager.create_activity_run(&instance, "a").unwrap();
            finish(&instance, &run, JobState::Success, output);
        }

        let c = instance.app().activity("c").unwrap().clone();
        let inputs = manager.resolve_inputs(&instance, &c);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0]["a"], json!(["1", "2", "3"]));
    }

    #[test]
    fn test_release_instance_drops_nested_instances() {
        let manager = JobManager::new();
        let app = app(vec![("a", function())]);
        let root = manager.create_workflow_instance(Arc::clone(&app));
        let call = manager.create_activity_run(&root, "a").unwrap();
        let child = manager.create_nested_instance(Arc::clone(&app), call.run_ref());
        let inner = manager.create_activity_run(&child, "a").unwrap();
        let _grandchild = manager.create_nested_instance(Arc::clone(&app), inner.run_ref());
        let unrelated = manager.create_workflow_instance(app);

        assert_eq!(manager.release_instance(root.id()), 3);
        assert_eq!(manager.instance_count(), 1);
        assert!(manager.instance(unrelated.id()).is_some());
        assert_eq!(manager.release_instance(root.id()), 0);
    }

    #[test]
    fn test_ready_activities_follow_declaration_order() {
        let manager = JobManager::new();
        let app = app(vec![
            ("source", function()),
            ("pending", function()),
            ("zeta", fed_by(&["source"])),
            ("alpha", fed_by(&["source", "pending"])),
            ("mid", fed_by(&["source"])),
        ]);
        let instance = manager.create_workflow_instance(app);
        let source = manager.create_activity_run(&instance, "source").unwrap();
        let _pending = manager.create_activity_run(&instance, "pending").unwrap();

        let source = finish(&instance, &source, JobState::Success, "x");
        assert_eq!(
            manager.ready_next_activities(&source),
            vec!["zeta".to_string(), "mid".to_string()]
        );
    }

    #[test]
    fn test_unfinished_sibling_run_blocks_readiness() {
        let manager = JobManager::new();
        let app = app(vec![("a", function()), ("c", fed_by(&["a"]))]);
        let instance = manager.create_workflow_instance(app);
        let first = manager.create_activity_run(&instance, "a").unwrap();
        let _second = manager.create_activity_run(&instance, "a").unwrap();

        let first = finish(&instance, &first, JobState::Success, "1");
        assert!(manager.ready_next_activities(&first).is_empty());
    }

    #[test]
    fn test_fan_out_produces_one_input_set_per_element() {
        let manager = JobManager::new();
        let app = app(vec![
            ("a", function()),
            ("b", function()),
            (
                "c",
                function().with_inputs(vec![
                    ActivityInput::fan_out("a", "$"),
                    ActivityInput::from_activity("b"),
                ]),
            ),
        ]);
        let instance = manager.create_workflow_instance(app);
        let a = manager.create_activity_run(&instance, "a").unwrap();
        let b = manager.create_activity_run(&instance, "b").unwrap();
        finish(&instance, &a, JobState::Success, r#"["p", "q", "r"]"#);
        finish(&instance, &b, JobState::Success, "shared");

        let c = instance.app().activity("c").unwrap().clone();
        let sets = manager.resolve_inputs(&instance, &c);
        assert_eq!(sets.len(), 3);
        let mapped: Vec<&Value> = sets.iter().map(|set| &set["a"]).collect();
        assert_eq!(mapped, vec![&json!("p"), &json!("q"), &json!("r")]);
        assert!(sets.iter().all(|set| set["b"] == json!("shared")));
        let keys: Vec<&String> = sets[0].keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_fan_out_failure_schedules_nothing() {
        let manager = JobManager::new();
        let app = app(vec![
            ("a", function()),
            ("c", function().with_inputs(vec![ActivityInput::fan_out("a", "$.items")])),
        ]);
        let instance = manager.create_workflow_instance(app);
        let a = manager.create_activity_run(&instance, "a").unwrap();
        finish(&instance, &a, JobState::Success, "definitely not json");

        let c = instance.app().activity("c").unwrap().clone();
        assert!(manager.resolve_inputs(&instance, &c).is_empty());
    }

    #[test]
    fn test_custom_evaluator_is_used() {
        struct Split;
        impl FanOutEvaluator for Split {
            fn fan_out(&self, _expression: &str, aggregated: &Value) -> Result<Vec<Value>, FanOutError> {
                let text = aggregated.as_str().unwrap_or_default();
                Ok(text.split(',').map(|s| Value::String(s.to_string())).collect())
            }
        }

        let manager = JobManager::with_evaluator(Arc::new(Split));
        let app = app(vec![
            ("a", function()),
            ("c", function().with_inputs(vec![ActivityInput::fan_out("a", "split")])),
        ]);
        let instance = manager.create_workflow_instance(app);
        let a = manager.create_activity_run(&instance, "a").unwrap();
        finish(&instance, &a, JobState::Success, "x,y");

        let c = instance.app().activity("c").unwrap().clone();
        assert_eq!(manager.resolve_inputs(&instance, &c).len(), 2);
    }

    #[test]
    fn test_terminal_outputs_only_include_successful_sinks() {
        let manager = JobManager::new();
        let app = app(vec![("a", function()), ("b", fed_by(&["a"])), ("d", function())]);
        let instance = manager.create_workflow_instance(app);
        let a = manager.create_activity_run(&instance, "a").unwrap();
        finish(&instance, &a, JobState::Success, "upstream");
        for output in ["one", "two"] {
            let run = manager.create_activity_run(&instance, "b").unwrap();
            finish(&instance, &run, JobState::Success, output);
        }
        let failed = manager.create_activity_run(&instance, "b").unwrap();
        finish(&instance, &failed, JobState::Error, "broken");
        let d = manager.create_activity_run(&instance, "d").unwrap();
        finish(&instance, &d, JobState::Error, "broken");

        let outputs = manager.terminal_outputs(&instance);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["b"], vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_schedule_downstream_creates_runs_under_lock() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        let a = manager.create_activity_run(&instance, "a").unwrap();
        let b = manager.create_activity_run(&instance, "b").unwrap();

        let mut table = instance.runs();
        table.record_outcome(a.id, JobState::Success, "x".into(), MediaType::PlainText);
        assert!(manager.schedule_downstream(&instance, &mut table, "a").unwrap().is_empty());
        table.record_outcome(b.id, JobState::Success, "y".into(), MediaType::PlainText);
        let scheduled = manager.schedule_downstream(&instance, &mut table, "b").unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0.activity_name, "c");
        assert_eq!(table.run_count("c"), 1);
    }

    #[test]
    fn test_finalize_instance() {
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(diamond());
        instance.set_state(JobState::Running);
        let a = manager.create_activity_run(&instance, "a").unwrap();
        finish(&instance, &a, JobState::Error, "boom");
        assert_eq!(manager.finalize_instance(&instance), JobState::Error);

        let clean = manager.create_workflow_instance(diamond());
        clean.set_state(JobState::Running);
        let a = manager.create_activity_run(&clean, "a").unwrap();
        finish(&clean, &a, JobState::Success, "ok");
        assert_eq!(manager.finalize_instance(&clean), JobState::Success);
    }
}
