//! The `write` activity: collates its inputs and writes them to a file.
//!
//! Parameters:
//! - `format`: `md` (default), `text`, `json` or `yaml`
//! - `filename`: output file name; generated from the source file otherwise
//!
//! The run's output is the path of the written file.

use std::path::{Path, PathBuf};

use aq_core::activity::merge::{merge_json, merge_text, merge_yaml};
use aq_core::activity::{ActivityError, ActivityHandler, ActivityJob};
use aq_core::jobs::model::ActivityInputs;
use aq_types::job::MediaType;
use uuid::Uuid;

/// Writes collated inputs under a fixed output directory.
#[derive(Debug, Clone)]
pub struct WriteActivity {
    out_dir: PathBuf,
}

impl WriteActivity {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    async fn write(&self, job: &ActivityJob, inputs: &ActivityInputs) -> Result<PathBuf, ActivityError> {
        let activity = job.activity()?;

        let format = activity.parameter_str("format").unwrap_or("md");
        let (content, media_type) = match format {
            "md" | "markdown" => (merge_text(inputs), MediaType::Markdown),
            "text" | "txt" => (merge_text(inputs), MediaType::PlainText),
            "json" => (merge_json(inputs)?, MediaType::Json),
            "yaml" | "yml" => (merge_yaml(inputs)?, MediaType::Yaml),
            other => {
                return Err(ActivityError::Unsupported(format!("output format '{other}'")));
            }
        };

        let file_name = match activity.parameter_str("filename") {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => generated_file_name(&file_prefix(job), media_type.extension()),
        };

        tokio::fs::create_dir_all(&self.out_dir).await?;
        let path = self.out_dir.join(file_name);
        tokio::fs::write(&path, content.as_bytes()).await?;

        tracing::debug!(path = %path.display(), media_type = %media_type, "wrote file");
        Ok(path)
    }
}

impl ActivityHandler for WriteActivity {
    async fn perform(&self, job: &mut ActivityJob, inputs: &ActivityInputs) {
        match self.write(job, inputs).await {
            Ok(path) => job.succeed(path.to_string_lossy(), MediaType::PlainText),
            Err(e) => {
                tracing::error!(activity = job.activity_name(), error = %e, "write failed");
                job.fail(e);
            }
        }
    }
}

/// Stem of the file the instance read, or `out`.
fn file_prefix(job: &ActivityJob) -> String {
    job.instance()
        .context_get("file_path")
        .as_ref()
        .and_then(|value| value.as_str())
        .and_then(|path| Path::new(path).file_stem())
        .and_then(|stem| stem.to_str())
        .map_or_else(|| "out".to_string(), str::to_string)
}

/// `<prefix>_<8 random characters>.<extension>`
fn generated_file_name(prefix: &str, extension: &str) -> String {
    let random = Uuid::now_v7().simple().to_string();
    let suffix = &random[random.len() - 8..];
    format!("{prefix}_{suffix}.{extension}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use aq_core::jobs::manager::JobManager;
    use aq_types::app::{Activity, ActivityKind, ActivityTable, App, AppInfo};
    use aq_types::job::JobState;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;

    fn job(activity: Activity) -> ActivityJob {
        let app = Arc::new(App {
            aq: "1.0".to_string(),
            info: AppInfo {
                id: "t".to_string(),
                title: "t".to_string(),
                version: "1".to_string(),
                profile: None,
            },
            models: HashMap::new(),
            memory: HashMap::new(),
            tools: HashMap::new(),
            activities: ActivityTable::from_iter([("save", activity)]),
        });
        let manager = JobManager::new();
        let instance = manager.create_workflow_instance(app);
        let run = manager.create_activity_run(&instance, "save").unwrap();
        ActivityJob::new(instance, &run)
    }

    fn inputs(value: Value) -> ActivityInputs {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_writes_markdown_named_after_source_file() {
        let tmp = TempDir::new().unwrap();
        let writer = WriteActivity::new(tmp.path().join("out"));
        let mut job = job(Activity::new(ActivityKind::Write));
        job.instance()
            .context_set("file_path", json!("/docs/report.md"));

        writer
            .perform(&mut job, &inputs(json!({"a": "first", "b": ["x", "y"]})))
            .await;

        assert_eq!(job.state, JobState::Success);
        let path = PathBuf::from(&job.output);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("report_"), "got: {name}");
        assert!(name.ends_with(".md"), "got: {name}");
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "first\n\nx\ny");
    }

    #[tokio::test]
    async fn test_writes_json_with_explicit_filename() {
        let tmp = TempDir::new().unwrap();
        let writer = WriteActivity::new(tmp.path());
        let activity = Activity::new(ActivityKind::Write)
            .with_parameter("format", json!("json"))
            .with_parameter("filename", json!("result.json"));
        let mut job = job(activity);

        writer
            .perform(&mut job, &inputs(json!({"a": "{\"k\": 1}"})))
            .await;

        assert_eq!(job.state, JobState::Success);
        assert_eq!(PathBuf::from(&job.output), tmp.path().join("result.json"));
        let written = tokio::fs::read_to_string(tmp.path().join("result.json"))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_default_prefix_is_out() {
        let tmp = TempDir::new().unwrap();
        let writer = WriteActivity::new(tmp.path());
        let activity = Activity::new(ActivityKind::Write).with_parameter("format", json!("yaml"));
        let mut job = job(activity);

        writer.perform(&mut job, &inputs(json!({"a": "{\"k\": 1}"}))).await;

        assert_eq!(job.state, JobState::Success);
        let name = PathBuf::from(&job.output)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("out_") && name.ends_with(".yml"), "got: {name}");
    }

    #[tokio::test]
    async fn test_unknown_format_fails() {
        let tmp = TempDir::new().unwrap();
        let writer = WriteActivity::new(tmp.path());
        let activity = Activity::new(ActivityKind::Write).with_parameter("format", json!("pdf"));
        let mut job = job(activity);

        writer.perform(&mut job, &inputs(json!({"a": "x"}))).await;
        assert_eq!(job.state, JobState::Error);
        assert!(job.output.contains("output format 'pdf'"));
    }

    #[test]
    fn test_generated_file_name_shape() {
        let name = generated_file_name("notes", "txt");
        assert!(name.starts_with("notes_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(name.len(), "notes_".len() + 8 + ".txt".len());
    }
}
