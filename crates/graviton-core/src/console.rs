//! Operator-facing console output.
//!
//! Console messages are separate from tracing logs: they are what the
//! operator reads, leveled by `-v` count. Logs go through `tracing`.

use indicatif::{ProgressBar, ProgressStyle};

/// Advances a progress indicator once per unit of work (one stdout line
/// of a subprocess, one health poll).
pub trait Progress: Send + Sync {
    fn tick(&self);
}

/// Leveled console writer.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    verbosity: u8,
}

impl Default for Console {
    fn default() -> Self {
        Self { verbosity: 1 }
    }
}

impl Console {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }

    /// A console that never prints (for tests).
    pub fn silent() -> Self {
        Self { verbosity: 0 }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Print `msg` when the console verbosity is at least `level`.
    pub fn say(&self, level: u8, msg: impl AsRef<str>) {
        if level <= self.verbosity {
            println!("{}", msg.as_ref());
        }
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        self.say(1, format!("\u{2713} {}", msg.as_ref()));
    }

    pub fn failure(&self, msg: impl AsRef<str>) {
        self.say(1, format!("\u{2717} {}", msg.as_ref()));
    }

    /// Create a spinner shown at the given level.
    pub fn spinner(&self, level: u8, message: impl Into<String>) -> Spinner {
        Spinner::new(level <= self.verbosity, message)
    }
}

/// A single-line spinner drawn on stderr. Dropping it unfinished clears
/// the line.
pub struct Spinner {
    bar: ProgressBar,
    message: String,
}

impl Spinner {
    fn new(visible: bool, message: impl Into<String>) -> Self {
        let message = message.into();
        let bar = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(spinner_style());
        bar.set_message(message.clone());
        bar.tick();
        Self { bar, message }
    }

    /// Number of ticks received so far.
    pub fn ticks(&self) -> u64 {
        self.bar.position()
    }

    /// Leave the spinner's message as a finished line.
    pub fn finish(&self) {
        self.bar.finish_with_message(self.message.clone());
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl Progress for Spinner {
    fn tick(&self) {
        self.bar.inc(1);
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
