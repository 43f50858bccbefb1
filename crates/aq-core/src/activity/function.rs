//! The `function` and `return` activities.
//!
//! `function` marks the entry of a reusable sub-workflow and passes its
//! inputs through as text. `return` closes it, collating its inputs into a
//! JSON document that becomes the output of the calling run.

use aq_types::job::MediaType;

use super::handler::{ActivityHandler, ActivityJob};
use super::merge::{merge_json, merge_text};
use crate::jobs::model::ActivityInputs;

#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionActivity;

impl ActivityHandler for FunctionActivity {
    async fn perform(&self, job: &mut ActivityJob, inputs: &ActivityInputs) {
        job.succeed(merge_text(inputs), MediaType::PlainText);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnActivity;

impl ActivityHandler for ReturnActivity {
    async fn perform(&self, job: &mut ActivityJob, inputs: &ActivityInputs) {
        match merge_json(inputs) {
            Ok(document) => job.succeed(document, MediaType::Json),
            Err(e) => {
                tracing::error!(activity = job.activity_name(), error = %e, "return failed");
                job.fail(e);
            }
        }
    }
}
