// mlmm-server/src/log/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer,
};

use crate::error::{MlmmError, Result as MlmmResult};

/// The `[log]` section of the configuration.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Master switch; when false no subscriber is installed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_level", deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,

    #[serde(default = "default_stderr")]
    pub stderr: bool,

    /// Log file; no file layer when absent.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// JSON lines instead of plain text in the log file.
    #[serde(default)]
    pub structured: bool,

    #[serde(default, deserialize_with = "deserialize_module_levels")]
    pub modules: HashMap<String, LevelFilter>,
}

fn default_enabled() -> bool { true }
fn default_log_level() -> LevelFilter { LevelFilter::INFO }
fn default_stderr() -> bool { true }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_log_level(),
            stderr: default_stderr(),
            file: None,
            structured: false,
            modules: HashMap::new(),
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// The returned guard flushes the file writer on drop and must be held by `main`.
pub fn init(config: &LogConfig) -> MlmmResult<Option<WorkerGuard>> {
    if !config.enabled {
        return Ok(None);
    }

    let env_filter = build_filter(config)?;
    let mut file_guard: Option<WorkerGuard> = None;
    let mut layers = Vec::new();

    // 1. File layer
    if let Some(path) = &config.file {
        let (dir, file_name) = split_log_path(path)?;
        fs::create_dir_all(&dir).map_err(|e| MlmmError::io_with_path(dir.clone(), e))?;

        let file_appender = tracing_appender::rolling::never(&dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = if config.structured {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed()
        };
        layers.push(file_layer);
        file_guard = Some(guard);
    }

    // 2. StdErr layer
    if config.stderr {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .boxed();
        layers.push(console_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| MlmmError::Internal(format!("failed to init tracing: {}", e)))?;

    Ok(file_guard)
}

fn build_filter(config: &LogConfig) -> MlmmResult<EnvFilter> {
    let mut directives = vec![format!("mlmm_server={}", config.level)];

    // Override per-module levels
    let mut targets: Vec<_> = config.modules.iter().collect();
    targets.sort();
    for (target, level) in targets {
        directives.push(format!("{}={}", target, level));
    }

    EnvFilter::try_new(directives.join(","))
        .map_err(|e| MlmmError::Config(format!("invalid log filter: {}", e)))
}

fn split_log_path(path: &Path) -> MlmmResult<(PathBuf, std::ffi::OsString)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| MlmmError::Config(format!("log.file {:?} has no file name", path)))?
        .to_os_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

/// Helper: deserialize LevelFilter from string (e.g., "info", "debug")
fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<LevelFilter>().map_err(serde::de::Error::custom)
}

fn deserialize_module_levels<'de, D>(deserializer: D) -> Result<HashMap<String, LevelFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: HashMap<String, String> = Deserialize::deserialize(deserializer)?;
    let mut result = HashMap::new();
    for (target, level_str) in map {
        let level = level_str
            .parse::<LevelFilter>()
            .map_err(serde::de::Error::custom)?;
        result.insert(target, level);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults_from_empty_table() {
        let config: LogConfig = toml::from_str("").unwrap();
        assert!(config.enabled);
        assert_eq!(config.level, LevelFilter::INFO);
        assert!(config.stderr);
        assert!(config.file.is_none());
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_log_config_parses_levels() {
        let config: LogConfig = toml::from_str(
            r#"
            level = "debug"
            file = "logs/server.log"
            structured = true

            [modules]
            "mlmm_server::engine" = "trace"
            "#,
        )
        .unwrap();

        assert_eq!(config.level, LevelFilter::DEBUG);
        assert_eq!(config.modules.get("mlmm_server::engine"), Some(&LevelFilter::TRACE));

        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("mlmm_server=debug"), "{}", filter);
        assert!(filter.contains("mlmm_server::engine=trace"), "{}", filter);
    }

    #[test]
    fn test_log_config_rejects_bad_level() {
        let result: Result<LogConfig, _> = toml::from_str(r#"level = "loud""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(&PathBuf::from("server.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "server.log");

        let (dir, name) = split_log_path(&PathBuf::from("/var/log/mlmm/server.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/mlmm"));
        assert_eq!(name, "server.log");

        assert!(split_log_path(&PathBuf::from("/")).is_err());
    }

    #[test]
    fn test_disabled_logging_installs_nothing() {
        let config = LogConfig { enabled: false, ..Default::default() };
        assert!(init(&config).unwrap().is_none());
    }
}
