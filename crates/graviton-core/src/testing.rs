//! Test doubles for the subprocess seam.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::console::Progress;
use crate::error::{GravitonError, Result};
use crate::runner::{CommandRunner, CommandSpec, LineScanner, RunOutput};

/// Canned outcome for a matching invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    pub lines: Vec<String>,
    pub exit_code: i32,
}

impl ScriptedResponse {
    pub fn ok(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit_code: 0,
        }
    }

    pub fn failing(exit_code: i32, lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit_code,
        }
    }
}

struct Rule {
    first_arg: String,
    cwd_suffix: Option<String>,
    response: ScriptedResponse,
}

/// Replays canned stdout per first argument (the IaC subcommand, e.g.
/// `apply` or `output`) and records every invocation. Unmatched commands
/// succeed with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to any command whose first argument is `first_arg`.
    pub fn on(mut self, first_arg: &str, response: ScriptedResponse) -> Self {
        self.rules.push(Rule {
            first_arg: first_arg.to_string(),
            cwd_suffix: None,
            response,
        });
        self
    }

    /// Respond only when the working directory ends with `cwd_suffix`.
    pub fn on_in(mut self, first_arg: &str, cwd_suffix: &str, response: ScriptedResponse) -> Self {
        self.rules.push(Rule {
            first_arg: first_arg.to_string(),
            cwd_suffix: Some(cwd_suffix.to_string()),
            response,
        });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// First arguments of every recorded call, in order.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.args.first().cloned().unwrap_or_default())
            .collect()
    }

    fn respond(&self, cmd: &CommandSpec) -> ScriptedResponse {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(cmd.clone());
        }
        let first = cmd.args.first().map(String::as_str).unwrap_or_default();
        self.rules
            .iter()
            .find(|rule| {
                rule.first_arg == first
                    && rule.cwd_suffix.as_ref().is_none_or(|suffix| {
                        cmd.cwd.as_ref().is_some_and(|cwd| cwd.ends_with(suffix))
                    })
            })
            .map(|rule| rule.response.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        scanner: Option<&dyn LineScanner>,
        progress: Option<&dyn Progress>,
    ) -> Result<RunOutput> {
        let response = self.respond(cmd);
        let mut output = RunOutput::default();
        for line in response.lines {
            output.record(line, scanner, progress);
        }
        if response.exit_code != 0 {
            return Err(GravitonError::Subprocess {
                program: cmd.program_name(),
                exit_code: Some(response.exit_code),
                last_line: output.last_line().map(str::to_string),
            });
        }
        Ok(output)
    }

    async fn run_interactive(&self, cmd: &CommandSpec) -> Result<()> {
        let response = self.respond(cmd);
        if response.exit_code != 0 {
            return Err(GravitonError::Subprocess {
                program: cmd.program_name(),
                exit_code: Some(response.exit_code),
                last_line: None,
            });
        }
        Ok(())
    }
}
