// mlmm-server/src/config/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration resolution.
//!
//! The configuration is resolved exactly once, before the server starts, from
//! three layers (lowest priority first):
//!
//! 1. the built-in `default_config.toml`;
//! 2. an optional user file (`--config`/`MLMM_CONFIG`, otherwise
//!    `<config dir>/mlmm/mlmm.toml` when it exists);
//! 3. [`Overrides`] collected from the command line and environment.
//!
//! The result is a plain [`MlmmConfig`] value. Nothing below this module reads
//! the environment.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use toml::{Table, Value};

use crate::error::{MlmmError, Result as MlmmResult};
use crate::log::LogConfig;
use crate::protocol::ReplyFraming;

const DEFAULT_CONFIG_CONTENT: &str = include_str!("default_config.toml");

/// Keys a user file may set even though the defaults leave them out.
const OPTIONAL_KEYS: &[&str] = &["engine.program", "engine.working_dir", "log.file"];

/// Sections that accept arbitrary new keys.
const OPEN_SECTIONS: &[&str] = &["log.modules."];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MlmmConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

/// Settings consumed by [`crate::server::start`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Listen backlog.
    pub num_clients: u32,
    pub concurrent_sessions: bool,
    pub reply_framing: ReplyFraming,
    pub max_message_len: usize,
    pub discovery_dir: PathBuf,
}

/// Same values as `[server]` in `default_config.toml`, for embedding without
/// going through [`load`].
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            num_clients: 1,
            concurrent_sessions: false,
            reply_framing: ReplyFraming::Double,
            max_message_len: crate::protocol::framing::DEFAULT_MAX_MESSAGE_LEN,
            discovery_dir: PathBuf::from("."),
        }
    }
}

/// Settings for [`crate::engine::CommandEngine`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Highest-priority values, usually from clap.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub num_clients: Option<u32>,
    pub concurrent_sessions: Option<bool>,
    pub reply_framing: Option<ReplyFraming>,
    pub discovery_dir: Option<PathBuf>,
    pub engine_program: Option<PathBuf>,
    pub engine_args: Option<Vec<String>>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_enabled: Option<bool>,
}

/// Non-fatal findings, reported once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLoadWarning {
    /// A key the defaults do not know about; the value was ignored.
    UnknownKey { key: String, file: PathBuf },
}

impl fmt::Display for ConfigLoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLoadWarning::UnknownKey { key, file } => {
                write!(f, "Unknown key '{}' in {:?} ignored", key, file)
            }
        }
    }
}

/// Resolves the configuration from defaults, the user file and `overrides`.
pub async fn load(overrides: &Overrides) -> MlmmResult<(MlmmConfig, Vec<ConfigLoadWarning>)> {
    let user_file = match &overrides.config_file {
        Some(path) => {
            if !path.exists() {
                return Err(MlmmError::Config(format!("config file {:?} does not exist", path)));
            }
            Some(path.clone())
        }
        None => default_config_path().filter(|path| path.exists()),
    };

    let user_layer = match &user_file {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .await
                .map_err(|e| MlmmError::io_with_path(path.clone(), e))?;
            Some((parse_table(&contents, path)?, path.clone()))
        }
        None => None,
    };

    resolve(user_layer, overrides)
}

/// Layers a parsed user file and overrides over the built-in defaults.
pub fn resolve(
    user_layer: Option<(Table, PathBuf)>,
    overrides: &Overrides,
) -> MlmmResult<(MlmmConfig, Vec<ConfigLoadWarning>)> {
    let mut merged = parse_table(DEFAULT_CONFIG_CONTENT, Path::new("default_config.toml"))?;
    let mut warnings = Vec::new();

    if let Some((table, file)) = user_layer {
        merge_layer(&mut merged, table, "", &file, &mut warnings);
    }
    apply_overrides(&mut merged, overrides);

    let config: MlmmConfig = Value::Table(merged)
        .try_into()
        .map_err(|e: toml::de::Error| MlmmError::Config(e.to_string()))?;
    config.validate()?;

    Ok((config, warnings))
}

/// `<config dir>/mlmm/mlmm.toml`, e.g. `~/.config/mlmm/mlmm.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mlmm").join("mlmm.toml"))
}

impl MlmmConfig {
    fn validate(&self) -> MlmmResult<()> {
        if self.server.host.trim().is_empty() {
            return Err(MlmmError::Config("server.host must not be empty".to_string()));
        }
        if self.server.max_message_len == 0 {
            return Err(MlmmError::Config("server.max_message_len must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_table(contents: &str, path: &Path) -> MlmmResult<Table> {
    toml::from_str::<Table>(contents)
        .map_err(|e| MlmmError::Config(format!("{}: {}", path.display(), e)))
}

fn merge_layer(
    base: &mut Table,
    layer: Table,
    prefix: &str,
    file: &Path,
    warnings: &mut Vec<ConfigLoadWarning>,
) {
    for (key, value) in layer {
        let full_key = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };

        match (base.get_mut(&key), value) {
            (Some(Value::Table(base_table)), Value::Table(layer_table)) => {
                merge_layer(base_table, layer_table, &full_key, file, warnings);
            }
            (Some(slot), value) => {
                *slot = value;
            }
            (None, value) => {
                let allowed = OPTIONAL_KEYS.contains(&full_key.as_str())
                    || OPEN_SECTIONS.iter().any(|section| full_key.starts_with(section));
                if allowed {
                    base.insert(key, value);
                } else {
                    warnings.push(ConfigLoadWarning::UnknownKey {
                        key: full_key,
                        file: file.to_path_buf(),
                    });
                }
            }
        }
    }
}

fn apply_overrides(merged: &mut Table, overrides: &Overrides) {
    let mut set = |section: &str, key: &str, value: Value| {
        let entry = merged
            .entry(section.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if let Value::Table(table) = entry {
            table.insert(key.to_string(), value);
        }
    };
    let path_value = |path: &PathBuf| Value::String(path.to_string_lossy().into_owned());

    if let Some(host) = &overrides.host {
        set("server", "host", Value::String(host.clone()));
    }
    if let Some(port) = overrides.port {
        set("server", "port", Value::Integer(i64::from(port)));
    }
    if let Some(num_clients) = overrides.num_clients {
        set("server", "num_clients", Value::Integer(i64::from(num_clients)));
    }
    if let Some(concurrent) = overrides.concurrent_sessions {
        set("server", "concurrent_sessions", Value::Boolean(concurrent));
    }
    if let Some(framing) = overrides.reply_framing {
        let name = match framing {
            ReplyFraming::Double => "double",
            ReplyFraming::Single => "single",
        };
        set("server", "reply_framing", Value::String(name.to_string()));
    }
    if let Some(dir) = &overrides.discovery_dir {
        set("server", "discovery_dir", path_value(dir));
    }
    if let Some(program) = &overrides.engine_program {
        set("engine", "program", path_value(program));
    }
    if let Some(args) = &overrides.engine_args {
        let args = args.iter().cloned().map(Value::String).collect();
        set("engine", "args", Value::Array(args));
    }
    if let Some(level) = &overrides.log_level {
        set("log", "level", Value::String(level.clone()));
    }
    if let Some(file) = &overrides.log_file {
        set("log", "file", path_value(file));
    }
    if let Some(enabled) = overrides.log_enabled {
        set("log", "enabled", Value::Boolean(enabled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::filter::LevelFilter;

    fn user_layer(contents: &str) -> Option<(Table, PathBuf)> {
        let path = PathBuf::from("mlmm.toml");
        Some((parse_table(contents, &path).unwrap(), path))
    }

    #[test]
    fn test_defaults() {
        let (config, warnings) = resolve(None, &Overrides::default()).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 0);
        assert_eq!(config.server.num_clients, 1);
        assert!(!config.server.concurrent_sessions);
        assert_eq!(config.server.reply_framing, ReplyFraming::Double);
        assert_eq!(config.server.max_message_len, 65536);
        assert_eq!(config.server.discovery_dir, PathBuf::from("."));
        assert!(config.engine.program.is_none());
        assert!(config.engine.args.is_empty());
        assert!(config.log.enabled);
        assert_eq!(config.log.level, LevelFilter::INFO);
    }

    #[test]
    fn test_server_default_matches_embedded_defaults() {
        let (config, _) = resolve(None, &Overrides::default()).unwrap();
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let layer = user_layer(
            r#"
            [server]
            port = 5599
            reply_framing = "single"

            [engine]
            program = "/opt/mlmm/run-step"
            args = ["--device", "cuda:0"]

            [log]
            file = "server.log"

            [log.modules]
            "mlmm_server::engine" = "debug"
            "#,
        );

        let (config, warnings) = resolve(layer, &Overrides::default()).unwrap();

        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(config.server.port, 5599);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.reply_framing, ReplyFraming::Single);
        assert_eq!(config.engine.program, Some(PathBuf::from("/opt/mlmm/run-step")));
        assert_eq!(config.engine.args, vec!["--device", "cuda:0"]);
        assert_eq!(config.log.file, Some(PathBuf::from("server.log")));
        assert_eq!(config.log.modules.get("mlmm_server::engine"), Some(&LevelFilter::DEBUG));
    }

    #[test]
    fn test_unknown_keys_are_reported_and_ignored() {
        let layer = user_layer(
            r#"
            [server]
            prot = 1234

            [gui]
            theme = "dark"
            "#,
        );

        let (config, warnings) = resolve(layer, &Overrides::default()).unwrap();

        assert_eq!(config.server.port, 0);
        assert_eq!(
            warnings,
            vec![
                ConfigLoadWarning::UnknownKey { key: "gui".to_string(), file: PathBuf::from("mlmm.toml") },
                ConfigLoadWarning::UnknownKey { key: "server.prot".to_string(), file: PathBuf::from("mlmm.toml") },
            ]
        );
    }

    #[test]
    fn test_overrides_win_over_file() {
        let layer = user_layer("[server]\nhost = \"0.0.0.0\"\nport = 7000\n");
        let overrides = Overrides {
            port: Some(7100),
            num_clients: Some(8),
            concurrent_sessions: Some(true),
            engine_program: Some(PathBuf::from("/bin/engine")),
            engine_args: Some(vec!["-q".to_string()]),
            log_level: Some("warn".to_string()),
            ..Default::default()
        };

        let (config, _) = resolve(layer, &overrides).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.server.num_clients, 8);
        assert!(config.server.concurrent_sessions);
        assert_eq!(config.engine.program, Some(PathBuf::from("/bin/engine")));
        assert_eq!(config.engine.args, vec!["-q"]);
        assert_eq!(config.log.level, LevelFilter::WARN);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for contents in [
            "[server]\nport = 70000\n",
            "[server]\nnum_clients = -1\n",
            "[server]\nreply_framing = \"triple\"\n",
            "[server]\nhost = \"  \"\n",
            "[server]\nmax_message_len = 0\n",
            "[log]\nlevel = \"chatty\"\n",
        ] {
            let result = resolve(user_layer(contents), &Overrides::default());
            assert!(matches!(result, Err(MlmmError::Config(_))), "accepted {:?}", contents);
        }
    }

    #[tokio::test]
    async fn test_load_reads_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mlmm.toml");
        std::fs::write(&path, "[server]\nport = 6123\n").unwrap();

        let overrides = Overrides { config_file: Some(path), ..Default::default() };
        let (config, _) = load(&overrides).await.unwrap();
        assert_eq!(config.server.port, 6123);
    }

    #[tokio::test]
    async fn test_load_missing_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let overrides = Overrides {
            config_file: Some(temp_dir.path().join("absent.toml")),
            ..Default::default()
        };
        assert!(matches!(load(&overrides).await, Err(MlmmError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mlmm.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let overrides = Overrides { config_file: Some(path), ..Default::default() };
        assert!(matches!(load(&overrides).await, Err(MlmmError::Config(_))));
    }
}
