//! Subprocess runner.
//!
//! Launches an external tool, streams its stdout line by line through an
//! optional scanner and progress indicator, and reports the exit status.
//! Stderr is inherited. An operator interrupt (the shared cancellation
//! token) kills the child and surfaces [`GravitonError::Canceled`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::console::Progress;
use crate::error::{GravitonError, Result};

/// An external command: program, argv (without the program), working
/// directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The program's file name, for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Full command line, for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// A keyed value captured from one line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub key: String,
    pub value: String,
}

impl ScanResult {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Inspects each stdout line; returning `Some` captures a keyed value.
pub trait LineScanner: Send + Sync {
    fn scan(&self, line: &str) -> Option<ScanResult>;
}

impl<F> LineScanner for F
where
    F: Fn(&str) -> Option<ScanResult> + Send + Sync,
{
    fn scan(&self, line: &str) -> Option<ScanResult> {
        self(line)
    }
}

/// Builds a scanner that captures `<key> = <value>` lines for the given
/// keys.
pub fn assignment_scanner(keys: &'static [&'static str]) -> impl LineScanner {
    move |line: &str| {
        let line = line.trim();
        keys.iter().find_map(|key| {
            let rest = line.strip_prefix(key)?;
            let value = rest.trim_start().strip_prefix('=')?;
            Some(ScanResult::new(*key, value.trim()))
        })
    }
}

/// Everything a finished subprocess produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Every stdout line, terminators stripped.
    pub lines: Vec<String>,
    /// Values captured by the scanner, last capture per key wins.
    pub captures: HashMap<String, String>,
}

impl RunOutput {
    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    /// Stdout rejoined with newlines.
    pub fn stdout(&self) -> String {
        self.lines.join("\n")
    }

    pub fn capture(&self, key: &str) -> Option<&str> {
        self.captures.get(key).map(String::as_str)
    }

    /// Feed one line through logging, scanner and progress.
    pub fn record(
        &mut self,
        line: String,
        scanner: Option<&dyn LineScanner>,
        progress: Option<&dyn Progress>,
    ) {
        debug!(target: "graviton::subprocess", "{line}");
        if let Some(scanner) = scanner {
            if let Some(ScanResult { key, value }) = scanner.scan(&line) {
                debug!(%key, %value, "captured output value");
                self.captures.insert(key, value);
            }
        }
        if let Some(progress) = progress {
            progress.tick();
        }
        self.lines.push(line);
    }
}

/// Executes external commands on behalf of lifecycle operations.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, streaming stdout. Fails with
    /// [`GravitonError::Subprocess`] on a non-zero exit.
    async fn run(
        &self,
        cmd: &CommandSpec,
        scanner: Option<&dyn LineScanner>,
        progress: Option<&dyn Progress>,
    ) -> Result<RunOutput>;

    /// Run with the operator's terminal attached (stdin, stdout and
    /// stderr inherited).
    async fn run_interactive(&self, cmd: &CommandSpec) -> Result<()>;
}

/// One stdout line without its terminator. Bytes that are not UTF-8 are
/// replaced, not rejected.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Runs real processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cancel: CancellationToken,
}

impl ProcessRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn command(cmd: &CommandSpec) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).kill_on_drop(true);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        command
    }

    fn spawn(cmd: &CommandSpec, mut command: Command) -> Result<Child> {
        command.spawn().map_err(|source| GravitonError::Spawn {
            program: cmd.program_name(),
            source,
        })
    }

    async fn kill(child: &mut Child, cmd: &CommandSpec) -> GravitonError {
        warn!(command = %cmd.display(), "interrupted, killing subprocess");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill subprocess");
        }
        GravitonError::Canceled
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        scanner: Option<&dyn LineScanner>,
        progress: Option<&dyn Progress>,
    ) -> Result<RunOutput> {
        if self.cancel.is_cancelled() {
            return Err(GravitonError::Canceled);
        }
        debug!(command = %cmd.display(), cwd = ?cmd.cwd, "running subprocess");

        let mut command = Self::command(cmd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = Self::spawn(cmd, command)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GravitonError::precondition("subprocess stdout was not captured"))?;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut output = RunOutput::default();

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Self::kill(&mut child, cmd).await),
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                break;
            }
            output.record(decode_line(&buf), scanner, progress);
        }

        let status = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Self::kill(&mut child, cmd).await),
            status = child.wait() => status?,
        };

        if !status.success() {
            return Err(GravitonError::Subprocess {
                program: cmd.program_name(),
                exit_code: status.code(),
                last_line: output.last_line().map(str::to_string),
            });
        }
        Ok(output)
    }

    async fn run_interactive(&self, cmd: &CommandSpec) -> Result<()> {
        debug!(command = %cmd.display(), "running interactive subprocess");
        let mut command = Self::command(cmd);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let mut child = Self::spawn(cmd, command)?;

        let status = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Self::kill(&mut child, cmd).await),
            status = child.wait() => status?,
        };
        if !status.success() {
            return Err(GravitonError::Subprocess {
                program: cmd.program_name(),
                exit_code: status.code(),
                last_line: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct Counter(AtomicUsize);

    impl Progress for Counter {
        fn tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn streams_lines_to_scanner_and_progress() {
        let runner = ProcessRunner::default();
        let scanner = assignment_scanner(&["load_balancer_ip"]);
        let counter = Counter(AtomicUsize::new(0));

        let out = runner
            .run(
                &sh("echo 'Apply complete!'; echo 'load_balancer_ip = 10.0.0.7'; echo done"),
                Some(&scanner),
                Some(&counter),
            )
            .await
            .unwrap();

        assert_eq!(out.lines.len(), 3);
        assert_eq!(out.capture("load_balancer_ip"), Some("10.0.0.7"));
        assert_eq!(out.last_line(), Some("done"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_last_line() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(&sh("echo partial; echo 'Error: boom'; exit 3"), None, None)
            .await
            .unwrap_err();

        match err {
            GravitonError::Subprocess {
                exit_code,
                last_line,
                ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(last_line.as_deref(), Some("Error: boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn invalid_utf8_output_does_not_fail_the_run() {
        let runner = ProcessRunner::default();
        let scanner = assignment_scanner(&["tag"]);
        let out = runner
            .run(
                &sh("printf 'tag = caf\\351\\n'; echo 'Apply complete!'; exit 0"),
                Some(&scanner),
                None,
            )
            .await
            .unwrap();

        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.capture("tag"), Some("caf\u{FFFD}"));
        assert_eq!(out.last_line(), Some("Apply complete!"));
    }

    #[test]
    fn decode_line_strips_terminators() {
        assert_eq!(decode_line(b"done\r\n"), "done");
        assert_eq!(decode_line(b"done\n"), "done");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\xff\n"), "\u{FFFD}");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(&CommandSpec::new("/nonexistent/terraform"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GravitonError::Spawn { .. }), "{err}");
    }

    #[tokio::test]
    async fn runs_in_working_directory_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::default();
        let out = runner
            .run(
                &sh("pwd; echo $GRAVITON_TEST_VALUE")
                    .current_dir(dir.path())
                    .env("GRAVITON_TEST_VALUE", "xyz"),
                None,
                None,
            )
            .await
            .unwrap();

        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(out.lines[0], canonical.display().to_string());
        assert_eq!(out.lines[1], "xyz");
    }

    #[tokio::test]
    async fn cancellation_kills_the_subprocess() {
        let cancel = CancellationToken::new();
        let runner = ProcessRunner::new(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner.run(&sh("sleep 30"), None, None).await.unwrap_err();
        assert!(err.is_canceled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn assignment_scanner_ignores_other_lines() {
        let scanner = assignment_scanner(&["load_balancer_ip"]);
        assert_eq!(scanner.scan("aws_instance.bastion: Creating..."), None);
        assert_eq!(scanner.scan("load_balancer_ip_extra = 1"), None);
        assert_eq!(
            scanner.scan("  load_balancer_ip = lb.example.com"),
            Some(ScanResult::new("load_balancer_ip", "lb.example.com"))
        );
    }
}
