//! Interactive input acquisition.
//!
//! Construction never reads the terminal directly; it asks an
//! [`InputResolver`] so tests can script the answers.

use std::io::{BufRead, Write};

use crate::error::Result;

/// Source of answers for missing mandatory inputs.
pub trait InputResolver: Send + Sync {
    /// Ask for a value. An empty answer yields `default`.
    fn ask_string(&self, prompt: &str, default: &str) -> Result<String>;
}

/// Reads answers from the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalResolver;

impl InputResolver for TerminalResolver {
    fn ask_string(&self, prompt: &str, default: &str) -> Result<String> {
        {
            let mut out = std::io::stdout().lock();
            if default.is_empty() {
                write!(out, "{prompt}: ")?;
            } else {
                write!(out, "{prompt} [{default}]: ")?;
            }
            out.flush()?;
        }

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(answer_or_default(&line, default))
    }
}

fn answer_or_default(line: &str, default: &str) -> String {
    let answer = line.trim();
    if answer.is_empty() {
        default.to_string()
    } else {
        answer.to_string()
    }
}

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedResolver;

#[cfg(any(test, feature = "testing"))]
mod scripted {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::InputResolver;
    use crate::error::Result;

    /// Deterministic resolver: answers by prompt text, falling back to
    /// the default. Records every prompt it was asked.
    #[derive(Debug, Default)]
    pub struct ScriptedResolver {
        answers: HashMap<String, String>,
        asked: Mutex<Vec<String>>,
    }

    impl ScriptedResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn answer(mut self, prompt: &str, value: &str) -> Self {
            self.answers.insert(prompt.to_string(), value.to_string());
            self
        }

        pub fn asked(&self) -> Vec<String> {
            self.asked.lock().map(|a| a.clone()).unwrap_or_default()
        }
    }

    impl InputResolver for ScriptedResolver {
        fn ask_string(&self, prompt: &str, default: &str) -> Result<String> {
            if let Ok(mut asked) = self.asked.lock() {
                asked.push(prompt.to_string());
            }
            Ok(self
                .answers
                .get(prompt)
                .cloned()
                .unwrap_or_else(|| default.to_string()))
        }
    }
}
