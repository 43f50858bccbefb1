//! App definition types.
//!
//! An `App` is the immutable, declarative description of an activity graph:
//! identity metadata, named model/tool/memory resources, and the activities
//! themselves. Activities declare the upstream activities whose outputs they
//! consume; an activity without inputs is a source node.
//!
//! ```yaml
//! aq: "1.0"
//! info:
//!   id: summarize-file
//!   title: Summarize a file
//!   version: "1.0.0"
//! activities:
//!   read_file:
//!     type: read
//!   merge:
//!     type: function
//!     inputs:
//!       - activity: read_file
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// The canonical app definition.
///
/// Loaded once and shared read-only by every workflow instance created from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    /// Definition format version (e.g. "1.0").
    pub aq: String,
    /// Identity and version metadata.
    pub info: AppInfo,
    /// Named model configurations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, ModelDef>,
    /// Named memory-store configurations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub memory: HashMap<String, MemoryDef>,
    /// Named tool configurations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, ToolDef>,
    /// Activities keyed by name, in declaration order.
    pub activities: ActivityTable,
}

impl App {
    /// Look up an activity by name.
    pub fn activity(&self, name: &str) -> Option<&Activity> {
        self.activities.get(name)
    }

    /// Whether the app declares an activity with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains(name)
    }

    /// Names of the activities that list `source` as one of their inputs,
    /// in declaration order.
    pub fn consumers_of<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.activities
            .iter()
            .filter(move |(_, activity)| activity.inputs.iter().any(|i| i.activity == source))
            .map(|(name, _)| name)
    }

    /// Sink activities: declare at least one input and are never consumed by
    /// any other activity. Their outputs are the app's final result.
    pub fn sink_activities(&self) -> Vec<&str> {
        self.activities
            .iter()
            .filter(|(name, activity)| {
                !activity.inputs.is_empty() && self.consumers_of(name).next().is_none()
            })
            .map(|(name, _)| name)
            .collect()
    }
}

/// Identity metadata for an app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: String,
    pub title: String,
    pub version: String,
    /// Optional system profile handed to model-backed activities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// LLM providers an app may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    OpenAi,
    Azure,
    Anthropic,
    Gemini,
    Llava,
}

/// A named model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDef {
    pub model: String,
    pub provider: ModelProvider,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Tool plugin kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Web,
    Rest,
    News,
}

/// A named tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Memory backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    ChromaDb,
}

/// A named memory-store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDef {
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

/// The closed set of activity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Read,
    Write,
    Store,
    Retrieve,
    Summarize,
    Extract,
    Generate,
    Function,
    Call,
    Return,
}

impl ActivityKind {
    /// Every kind, in declaration order.
    pub const ALL: [ActivityKind; 10] = [
        ActivityKind::Read,
        ActivityKind::Write,
        ActivityKind::Store,
        ActivityKind::Retrieve,
        ActivityKind::Summarize,
        ActivityKind::Extract,
        ActivityKind::Generate,
        ActivityKind::Function,
        ActivityKind::Call,
        ActivityKind::Return,
    ];

    /// `call` is handled by the scheduler itself and never dispatched to a handler.
    pub fn is_scheduler_native(self) -> bool {
        matches!(self, ActivityKind::Call)
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityKind::Read => "read",
            ActivityKind::Write => "write",
            ActivityKind::Store => "store",
            ActivityKind::Retrieve => "retrieve",
            ActivityKind::Summarize => "summarize",
            ActivityKind::Extract => "extract",
            ActivityKind::Generate => "generate",
            ActivityKind::Function => "function",
            ActivityKind::Call => "call",
            ActivityKind::Return => "return",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s.to_lowercase())
            .ok_or_else(|| format!("invalid activity kind: '{s}'"))
    }
}

/// A declared dependency on another activity's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInput {
    /// Name of the source activity.
    pub activity: String,
    /// Optional fan-out expression applied to the source's aggregated output.
    #[serde(default, rename = "map", skip_serializing_if = "Option::is_none")]
    pub fan_out: Option<String>,
}

impl ActivityInput {
    /// Plain dependency without fan-out.
    pub fn from_activity(activity: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            fan_out: None,
        }
    }

    /// Dependency whose output is split by `expression`.
    pub fn fan_out(activity: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            fan_out: Some(expression.into()),
        }
    }
}

/// One node in the app's activity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ActivityInput>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl Activity {
    /// A bare activity of the given kind with no inputs or parameters.
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            tools: Vec::new(),
            models: Vec::new(),
            memory: Vec::new(),
            inputs: Vec::new(),
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<ActivityInput>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// A string parameter, if present.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Source nodes declare no inputs.
    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ActivityTable
// ---------------------------------------------------------------------------

/// Activities keyed by unique name, preserving declaration order.
///
/// Serialized as a plain map. Declaration order drives the order in which
/// newly-ready activities are offered to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct ActivityTable {
    entries: Vec<(String, Activity)>,
    index: HashMap<String, usize>,
}

impl ActivityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an activity. A replaced activity keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, activity: Activity) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&pos) => self.entries[pos].1 = activity,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, activity));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Activity> {
        self.index.get(name).map(|&pos| &self.entries[pos].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, activity)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Activity)> {
        self.entries.iter().map(|(name, a)| (name.as_str(), a))
    }

    /// Activity names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

impl<S: Into<String>> FromIterator<(S, Activity)> for ActivityTable {
    fn from_iter<I: IntoIterator<Item = (S, Activity)>>(iter: I) -> Self {
        let mut table = ActivityTable::new();
        for (name, activity) in iter {
            table.insert(name, activity);
        }
        table
    }
}

impl Serialize for ActivityTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, activity) in &self.entries {
            map.serialize_entry(name, activity)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ActivityTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ActivityTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of activity names to activity definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut table = ActivityTable::new();
                while let Some((name, activity)) = access.next_entry::<String, Activity>()? {
                    if table.contains(&name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate activity name: '{name}'"
                        )));
                    }
                    table.insert(name, activity);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
