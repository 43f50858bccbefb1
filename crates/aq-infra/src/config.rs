//! Engine configuration loader.
//!
//! The file named by `--config` (or `AQ_CONFIG`) holds the `[scheduler]`,
//! `[output]` and `[telemetry]` tables of [`EngineConfig`]. It is read before
//! tracing is installed, so problems are handed back to the caller to log
//! rather than logged here.

use std::path::Path;

use aq_types::config::EngineConfig;

/// Configuration in effect, and why defaults replaced the file if they did.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    /// Set when the file existed but could not be read or parsed.
    pub fallback: Option<String>,
}

/// Load the engine configuration at `path`.
///
/// A missing file is the common case and silently yields the defaults. An
/// unreadable or malformed file also yields the defaults, with the reason
/// recorded in [`LoadedConfig::fallback`].
pub async fn load_engine_config(path: &Path) -> LoadedConfig {
    let defaults = |reason: Option<String>| LoadedConfig {
        config: EngineConfig::default(),
        fallback: reason,
    };

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return defaults(None),
        Err(err) => return defaults(Some(format!("cannot read {}: {err}", path.display()))),
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => LoadedConfig {
            config,
            fallback: None,
        },
        Err(err) => defaults(Some(format!("cannot parse {}: {err}", path.display()))),
    }
}

/// Worker count for a run: `--workers` beats `[scheduler] workers`, floor 1.
pub fn resolve_workers(config: &EngineConfig, cli_override: Option<usize>) -> usize {
    cli_override.unwrap_or(config.scheduler.workers).max(1)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let loaded = load_engine_config(&tmp.path().join("config.toml")).await;
        assert!(loaded.fallback.is_none());
        let config = loaded.config;
        assert_eq!(config.scheduler.workers, 3);
        assert_eq!(config.output.dir, PathBuf::from("./out"));
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(
            &config_path,
            r#"
[scheduler]
workers = 6

[output]
dir = "results"
"#,
        )
        .await
        .unwrap();

        let loaded = load_engine_config(&config_path).await;
        assert!(loaded.fallback.is_none());
        let config = loaded.config;
        assert_eq!(config.scheduler.workers, 6);
        assert_eq!(config.output.dir, PathBuf::from("results"));
        assert!(!config.telemetry.otel);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(&config_path, "[scheduler\nworkers = = 2")
            .await
            .unwrap();

        let loaded = load_engine_config(&config_path).await;
        assert_eq!(loaded.config.scheduler.workers, 3);
        let reason = loaded.fallback.unwrap();
        assert!(reason.starts_with("cannot parse"), "got: {reason}");
    }

    #[test]
    fn resolve_workers_prefers_override_and_floors_at_one() {
        let config = EngineConfig::default();
        assert_eq!(resolve_workers(&config, None), 3);
        assert_eq!(resolve_workers(&config, Some(8)), 8);
        assert_eq!(resolve_workers(&config, Some(0)), 1);
    }
}
