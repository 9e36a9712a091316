use crate::pty::SessionOptions;
use crate::sandbox::Sandbox;
use std::time::Duration;

/// Expectation timeout used when neither the step nor its case sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for a suite run, passed down explicitly to every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub global_timeout: Duration,
    /// Suppress per-case progress lines.
    pub quiet: bool,
    pub session: SessionOptions,
    /// Wrapper for cases marked as sandboxed. `None` runs them unwrapped.
    pub sandbox: Option<Sandbox>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            global_timeout: DEFAULT_TIMEOUT,
            quiet: false,
            session: SessionOptions::default(),
            sandbox: None,
        }
    }
}

impl RunConfig {
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_sandbox(mut self, sandbox: Option<Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }
}
