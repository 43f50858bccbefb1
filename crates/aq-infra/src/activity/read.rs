//! The `read` activity: loads a local file named by the `file_path` input.

use std::path::Path;

use aq_core::activity::{ActivityError, ActivityHandler, ActivityJob};
use aq_core::jobs::model::ActivityInputs;
use aq_types::job::MediaType;
use serde_json::Value;

/// Reads text files (`.txt`, `.md`, `.json`, `.yaml`/`.yml`, `.html`).
///
/// On success the path is recorded in the instance context under
/// `file_path`, where `write` picks it up to name its output file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadActivity;

impl ReadActivity {
    async fn read(&self, job: &ActivityJob, inputs: &ActivityInputs) -> Result<(String, MediaType), ActivityError> {
        let file_path = match inputs.get("file_path") {
            Some(Value::String(path)) if !path.is_empty() => path.as_str(),
            other => {
                return Err(ActivityError::InvalidInput(format!(
                    "invalid file path: {}",
                    other.map_or_else(|| "none".to_string(), Value::to_string)
                )));
            }
        };

        let path = Path::new(file_path);
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let media_type = MediaType::from_extension(extension).ok_or_else(|| {
            ActivityError::Unsupported(format!("cannot read content of type '.{extension}'"))
        })?;

        let content = tokio::fs::read_to_string(path).await?;
        job.instance()
            .context_set("file_path", Value::String(file_path.to_string()));

        tracing::debug!(
            path = %path.display(),
            media_type = %media_type,
            bytes = content.len(),
            "read file"
        );
        Ok((content, media_type))
    }
}

impl ActivityHandler for ReadActivity {
    async fn perform(&self, job: &mut ActivityJob, inputs: &ActivityInputs) {
        match self.read(job, inputs).await {
            Ok((content, media_type)) => job.succeed(content, media_type),
            Err(e) => {
                tracing::error!(activity = job.activity_name(), error = %e, "read failed");
                job.fail(e);
            }
        }
    }
}
