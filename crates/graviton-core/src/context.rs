//! Application context passed down to every lifecycle operation.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::console::Console;
use crate::error::{GravitonError, Result};
use crate::prompt::{InputResolver, TerminalResolver};
use crate::runner::{CommandRunner, ProcessRunner};

/// Remote shell used to reach the bastion.
pub const SSH_TOOL: &str = "ssh";

/// Environment variable naming the config root.
pub const CONF_DIR_ENV: &str = "STARDOG_GRAVITON_CONF_DIR";

/// Environment captured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Variables whose name or value is not UTF-8 are skipped.
    pub fn capture() -> Self {
        Self::from_os_pairs(std::env::vars_os())
    }

    fn from_os_pairs(pairs: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        Self {
            vars: pairs
                .into_iter()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The value of `key` if it is set and non-empty.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Fail with a precondition error naming every missing variable.
    pub fn require(&self, keys: &[&str]) -> Result<()> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| self.non_empty(k).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GravitonError::precondition(format!(
                "the environment variable(s) {} must be set",
                missing.join(", ")
            )))
        }
    }
}

/// Locates external tools.
#[derive(Debug, Clone, Default)]
pub enum ToolResolver {
    /// Search `$PATH`.
    #[default]
    System,
    /// Fixed locations, for tests.
    Fixed(HashMap<String, PathBuf>),
}

impl ToolResolver {
    pub fn fixed<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = (S, PathBuf)>,
        S: Into<String>,
    {
        ToolResolver::Fixed(tools.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let found = match self {
            ToolResolver::System => which::which(name).ok(),
            ToolResolver::Fixed(tools) => tools.get(name).cloned(),
        };
        match found {
            Some(path) => {
                debug!(tool = name, path = %path.display(), "resolved external tool");
                Ok(path)
            }
            None => Err(GravitonError::precondition(format!(
                "the program {name} must be in the PATH when running this program"
            ))),
        }
    }
}

/// Shared, read-only context for one process invocation.
#[derive(Clone)]
pub struct AppContext {
    config_dir: PathBuf,
    env: EnvSnapshot,
    tools: ToolResolver,
    runner: Arc<dyn CommandRunner>,
    input: Arc<dyn InputResolver>,
    console: Console,
    cancel: CancellationToken,
}

impl AppContext {
    /// A context with production collaborators.
    pub fn new(config_dir: impl Into<PathBuf>, env: EnvSnapshot) -> Self {
        let cancel = CancellationToken::new();
        Self {
            config_dir: config_dir.into(),
            env,
            tools: ToolResolver::System,
            runner: Arc::new(ProcessRunner::new(cancel.clone())),
            input: Arc::new(TerminalResolver),
            console: Console::default(),
            cancel,
        }
    }

    /// Replace the cancellation token. The default process runner is
    /// rebuilt to observe it.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.runner = Arc::new(ProcessRunner::new(cancel.clone()));
        self.cancel = cancel;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputResolver>) -> Self {
        self.input = input;
        self
    }

    pub fn with_tools(mut self, tools: ToolResolver) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    pub fn tools(&self) -> &ToolResolver {
        &self.tools
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    pub fn input(&self) -> &dyn InputResolver {
        self.input.as_ref()
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `<config_root>/deployments/<name>`.
    pub fn deployment_dir(&self, name: &str) -> PathBuf {
        crate::deployment::deployment_dir(&self.config_dir, name)
    }
}

/// Resolve the config root: `$STARDOG_GRAVITON_CONF_DIR`, else
/// `$HOME/.graviton`.
pub fn default_config_dir(env: &EnvSnapshot) -> Result<PathBuf> {
    if let Some(dir) = env.non_empty(CONF_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    env.non_empty("HOME")
        .map(|home| Path::new(home).join(".graviton"))
        .ok_or_else(|| {
            GravitonError::precondition(format!(
                "cannot determine the config directory; set {CONF_DIR_ENV} or HOME"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let env = EnvSnapshot::from_os_pairs([
            (OsString::from("LANG_HINT"), OsString::from_vec(b"caf\xe9".to_vec())),
            (OsString::from_vec(b"B\xffD".to_vec()), OsString::from("x")),
            (OsString::from("AWS_ACCESS_KEY_ID"), OsString::from("id")),
        ]);
        assert_eq!(env.get("LANG_HINT"), None);
        assert_eq!(env.get("AWS_ACCESS_KEY_ID"), Some("id"));
        assert_eq!(env, EnvSnapshot::from_pairs([("AWS_ACCESS_KEY_ID", "id")]));
    }

    #[test]
    fn capture_reads_the_process_environment() {
        let env = EnvSnapshot::capture();
        assert_eq!(env.get("PATH").is_some(), std::env::var_os("PATH").is_some());
    }

    #[test]
    fn require_lists_missing_vars() {
        let env = EnvSnapshot::from_pairs([("AWS_ACCESS_KEY_ID", "x"), ("AWS_SECRET_ACCESS_KEY", "")]);
        let err = env
            .require(&["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"])
            .unwrap_err();
        assert!(matches!(err, GravitonError::Precondition(_)));
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));
        assert!(!err.to_string().contains("AWS_ACCESS_KEY_ID,"));
    }

    #[test]
    fn fixed_tool_resolver() {
        let tools = ToolResolver::fixed([("terraform", PathBuf::from("/opt/tf"))]);
        assert_eq!(tools.resolve("terraform").unwrap(), PathBuf::from("/opt/tf"));
        let err = tools.resolve("packer").unwrap_err();
        assert!(err.to_string().contains("packer"));
    }

    #[test]
    fn config_dir_prefers_env_override() {
        let env = EnvSnapshot::from_pairs([(CONF_DIR_ENV, "/tmp/r"), ("HOME", "/home/op")]);
        assert_eq!(default_config_dir(&env).unwrap(), PathBuf::from("/tmp/r"));

        let env = EnvSnapshot::from_pairs([("HOME", "/home/op")]);
        assert_eq!(
            default_config_dir(&env).unwrap(),
            PathBuf::from("/home/op/.graviton")
        );

        assert!(default_config_dir(&EnvSnapshot::default()).is_err());
    }

    #[test]
    fn deployment_dir_layout() {
        let ctx = AppContext::new("/tmp/r", EnvSnapshot::default());
        assert_eq!(ctx.deployment_dir("demo"), PathBuf::from("/tmp/r/deployments/demo"));
    }
}
