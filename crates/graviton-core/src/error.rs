//! Error types shared by every graviton crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for graviton operations.
pub type Result<T> = std::result::Result<T, GravitonError>;

/// Errors surfaced by lifecycle operations.
///
/// Nothing in the core retries on these; they travel up to the command
/// layer unchanged.
#[derive(Debug, Error)]
pub enum GravitonError {
    /// A missing environment variable, external tool, or user input.
    #[error("{0}")]
    Precondition(String),

    #[error("failed to stage assets: {0}")]
    Staging(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}{}", fmt_exit_code(.exit_code), fmt_last_line(.last_line))]
    Subprocess {
        program: String,
        exit_code: Option<i32>,
        last_line: Option<String>,
    },

    #[error("invalid IaC output: {0}")]
    OutputParse(String),

    #[error("failed to persist {}: {source}", path.display())]
    StatePersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the plugin {0} does not exist")]
    UnknownPlugin(String),

    #[error("the deployment {0} does not exist")]
    DeploymentNotFound(String),

    #[error("the deployment {0} already exists")]
    DeploymentAlreadyExists(String),

    #[error("timed out after {seconds}s waiting for the cluster to become healthy")]
    Timeout { seconds: u64 },

    #[error("operation canceled")]
    Canceled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GravitonError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        GravitonError::Precondition(msg.into())
    }

    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GravitonError::StatePersist {
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from an operator interrupt.
    pub fn is_canceled(&self) -> bool {
        matches!(self, GravitonError::Canceled)
    }
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

fn fmt_last_line(line: &Option<String>) -> String {
    match line {
        Some(line) if !line.is_empty() => format!(": {line}"),
        _ => String::new(),
    }
}
