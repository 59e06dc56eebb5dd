// mlmm-server/src/engine/command.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::EngineConfig;
use crate::error::{MlmmError, Result as MlmmResult};

use super::{Engine, EngineFailure};

/// Runs an external program once per request: `program [args..] <input>`.
///
/// Exit status 0 means the result was written. Otherwise the last non-empty
/// line of stderr becomes the failure reason. Stdout is inherited so the
/// program's own progress output lands in the server's console.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &EngineConfig) -> MlmmResult<Self> {
        let program = config.program.clone().ok_or_else(|| {
            MlmmError::Config("engine.program is not set".to_string())
        })?;

        let mut engine = Self::new(program).with_args(config.args.iter().cloned());
        if let Some(dir) = &config.working_dir {
            engine = engine.with_working_dir(dir);
        }
        Ok(engine)
    }
}

impl Engine for CommandEngine {
    fn run(&mut self, input: &Path) -> Result<(), EngineFailure> {
        // Relative inputs are relative to the server, not to `working_dir`.
        let input = std::path::absolute(input).map_err(|e| {
            EngineFailure::new(format!("cannot resolve input path {}: {}", input.display(), e))
        })?;
        if !input.exists() {
            return Err(EngineFailure::new(format!(
                "input file not found: {}",
                input.display()
            )));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        tracing::trace!("Spawning engine: {:?}", command);
        let output = command.output().map_err(|e| {
            EngineFailure::new(format!("failed to launch {}: {}", self.program.display(), e))
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} exited with {}", self.program.display(), output.status));
        Err(EngineFailure::new(reason))
    }
}
