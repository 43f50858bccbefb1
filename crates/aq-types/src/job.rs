//! Job entity types: identifiers, lifecycle state, output media types and
//! usage counters shared by workflow instances and activity runs.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workflow instance, wrapping a UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Create a new InstanceId using UUID v7 (time-sortable).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for an activity run, wrapping a UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new RunId using UUID v7 (time-sortable).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Non-owning reference to an activity run: the owning instance plus the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunRef {
    pub instance_id: InstanceId,
    pub run_id: RunId,
}

/// Lifecycle shared by workflow instances and activity runs.
///
/// CREATED -> RUNNING -> {SUCCESS, ERROR}. SUCCESS and ERROR are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Created,
    Running,
    Success,
    Error,
}

impl JobState {
    /// SUCCESS and ERROR are terminal.
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Success | JobState::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => write!(f, "created"),
            JobState::Running => write!(f, "running"),
            JobState::Success => write!(f, "success"),
            JobState::Error => write!(f, "error"),
        }
    }
}

/// Declared media type of an activity run's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MediaType {
    #[default]
    #[serde(rename = "text/plain")]
    PlainText,
    #[serde(rename = "text/markdown")]
    Markdown,
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "text/html")]
    Html,
    #[serde(rename = "text/yaml")]
    Yaml,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::PlainText => "text/plain",
            MediaType::Markdown => "text/markdown",
            MediaType::Json => "application/json",
            MediaType::Html => "text/html",
            MediaType::Yaml => "text/yaml",
        }
    }

    /// File extension used when the output is written to disk.
    pub fn extension(self) -> &'static str {
        match self {
            MediaType::PlainText => "txt",
            MediaType::Markdown => "md",
            MediaType::Json => "json",
            MediaType::Html => "html",
            MediaType::Yaml => "yml",
        }
    }

    /// Guess the media type from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Some(MediaType::PlainText),
            "md" | "markdown" => Some(MediaType::Markdown),
            "json" => Some(MediaType::Json),
            "html" | "htm" => Some(MediaType::Html),
            "yaml" | "yml" => Some(MediaType::Yaml),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text/plain" => Ok(MediaType::PlainText),
            "text/markdown" => Ok(MediaType::Markdown),
            "application/json" => Ok(MediaType::Json),
            "text/html" => Ok(MediaType::Html),
            "text/yaml" => Ok(MediaType::Yaml),
            other => Err(format!("invalid media type: '{other}'")),
        }
    }
}

/// Cumulative usage counters for a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Number of model requests issued.
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.requests += rhs.requests;
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}
