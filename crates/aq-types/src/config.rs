//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that sizes the
//! worker pool, locates the output directory and toggles telemetry export.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine.
///
/// All sections and fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrent worker loops.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

/// Where file-writing activities put their results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Export tracing spans through OpenTelemetry.
    #[serde(default)]
    pub otel: bool,
}
