//! Operator-facing progress output.
//!
//! Progress is plain text on standard error: a message when a step starts,
//! one dot per part or poll, and ` done.` when it finishes. Remote status
//! messages print once and collapse into dots while they stay the same.

use std::fmt;
use std::io::{self, Write};

/// Progress reporter.
pub struct Progress {
    out: Box<dyn Write + Send>,
    last_status: Option<String>,
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("last_status", &self.last_status)
            .finish_non_exhaustive()
    }
}

impl Progress {
    /// Report to `out`.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            last_status: None,
        }
    }

    /// Report to standard error.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write `text` as is.
    pub fn message(&mut self, text: &str) {
        self.emit(text);
    }

    /// Write a single dot.
    pub fn dot(&mut self) {
        self.emit(".");
    }

    /// Finish the current step and forget the last status.
    pub fn done(&mut self) {
        self.last_status = None;
        self.emit(" done.\n");
    }

    /// Report a remote status message.
    ///
    /// The first message prints as `prefix: status`. A changed message
    /// starts a new line; a repeated one prints a dot.
    pub fn status(&mut self, prefix: &str, status: &str) {
        if self.last_status.as_deref() == Some(status) {
            self.emit(".");
            return;
        }

        let line = if self.last_status.is_some() {
            format!("\n{prefix}: {status}")
        } else {
            format!("{prefix}: {status}")
        };
        self.emit(&line);
        self.last_status = Some(status.to_owned());
    }

    // Progress output is best effort.
    fn emit(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}
