//! Command building for the agent subprocess

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::VERSION;
use crate::types::AgentOptions;

use super::config::DANGEROUS_ENV_VARS;

/// Command builder for the agent executable
pub struct AgentCommand<'a> {
    program: &'a Path,
    workspace: &'a Path,
    options: &'a AgentOptions,
}

impl<'a> AgentCommand<'a> {
    /// Create a new command builder
    pub fn new(program: &'a Path, workspace: &'a Path, options: &'a AgentOptions) -> Self {
        Self {
            program,
            workspace,
            options,
        }
    }

    /// Build the command with piped stdio
    pub fn build(&self) -> Command {
        let mut cmd = Command::new(self.program);
        cmd.args(&self.options.args);
        cmd.current_dir(self.workspace);
        cmd.envs(self.environment());

        // stderr is piped, not inherited, so the agent cannot scribble on
        // the host terminal
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Extra variables layered on the inherited environment
    fn environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        for (key, value) in &self.options.env {
            if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                log::warn!("Refusing to pass {key} to the agent process");
                continue;
            }
            env.insert(key.clone(), value.clone());
        }
        env.insert(
            "PWD".to_string(),
            self.workspace.to_string_lossy().into_owned(),
        );
        env.insert("TERMBRIDGE_VERSION".to_string(), VERSION.to_string());
        env
    }
}
