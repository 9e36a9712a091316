use crate::action::{Action, Script};
use crate::config::RunConfig;
use crate::error::RunError;
use crate::parser::render_scalar;
use crate::runner::run_script;
use crate::sandbox::Sandbox;
use crate::variables::VariableDefinitions;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub const INCORRECT_EXIT_STATUS: &str = "Incorrect exit status.";

/// Names starting with this prefix describe suite metadata, not runnable cases.
pub const METADATA_PREFIX: &str = "_";

/// Only cases whose names start with this prefix are run in the sandbox.
pub const SANDBOX_PREFIX: &str = "case_";

/// A named check: a command, the script it must follow and its scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub command: String,
    /// Default for steps of this case that set no timeout of their own.
    pub timeout: Option<Duration>,
    pub script: Script,
    pub expected_exit: i32,
    pub points: Option<f64>,
    /// A failed blocker stops the rest of the suite.
    pub blocker: bool,
    pub visible: bool,
    /// Set from the name by [`TestCase::new`].
    pub sandboxed: bool,
}

impl TestCase {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let name = name.into();
        let sandboxed = name.starts_with(SANDBOX_PREFIX);
        Self {
            name,
            command: command.into(),
            timeout: None,
            script: Script::new(),
            expected_exit: 0,
            points: None,
            blocker: false,
            visible: true,
            sandboxed,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_expected_exit(mut self, status: i32) -> Self {
        self.expected_exit = status;
        self
    }

    pub fn with_points(mut self, points: f64) -> Self {
        self.points = Some(points);
        self
    }

    pub fn blocker(mut self, blocker: bool) -> Self {
        self.blocker = blocker;
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn sandboxed(mut self, sandboxed: bool) -> Self {
        self.sandboxed = sandboxed;
        self
    }

    pub fn with_script(mut self, script: impl Into<Script>) -> Self {
        self.script = script.into();
        self
    }

    pub fn add_action(&mut self, action: Action) {
        self.script.push(action);
    }

    pub fn is_metadata(&self) -> bool {
        self.name.starts_with(METADATA_PREFIX)
    }

    /// The argument vector to spawn, wrapped by `sandbox` when this case is
    /// sandboxed.
    pub fn command_line(&self, sandbox: Option<&Sandbox>) -> Result<Vec<String>, RunError> {
        let argv = shell_words::split(&self.command).map_err(|e| RunError::Command {
            command: self.command.clone(),
            reason: e.to_string(),
        })?;
        if argv.is_empty() {
            return Err(RunError::Command {
                command: self.command.clone(),
                reason: "empty command".to_string(),
            });
        }
        Ok(match sandbox {
            Some(sandbox) if self.sandboxed => sandbox.wrap(argv),
            _ => argv,
        })
    }

    /// Run this case and report its errors.
    ///
    /// Script failures and a wrong exit status both land in the error list.
    /// A command that cannot be started is reported as a single error
    /// without an exit status check.
    pub async fn run(
        &self,
        definitions: Option<&VariableDefinitions>,
        config: &RunConfig,
    ) -> CaseReport {
        let mut report = CaseReport::default();

        let command = match self.command_line(config.sandbox.as_ref()) {
            Ok(command) => command,
            Err(e) => {
                warn!("{}: {e}", self.name);
                report.errors.push(format!("Could not run command: {e}"));
                return report;
            }
        };
        debug!("running command: {}", command.join(" "));

        let timeout = self.timeout.unwrap_or(config.global_timeout);
        match run_script(&command, &self.script, definitions, timeout, &config.session).await {
            Ok(outcome) => {
                report.errors.extend(outcome.errors);
                if let Some(status) = outcome.exit_status {
                    debug!("exit status: {status} (expected {})", self.expected_exit);
                }
                if outcome.exit_status != Some(self.expected_exit) {
                    report.errors.push(INCORRECT_EXIT_STATUS.to_string());
                }
            }
            Err(e) => {
                warn!("{}: {e}", self.name);
                report.errors.push(format!("Could not run command: {e}"));
            }
        }

        report
    }
}

/// Renders the case as a document entry that parses back to an equal case.
impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- {}:", self.name)?;
        write!(f, "    run: {}", render_scalar(&self.command)?)?;
        if let Some(timeout) = self.timeout {
            write!(f, "  # timeout: {}", timeout.as_secs())?;
        }
        writeln!(f)?;
        if !self.script.is_empty() {
            writeln!(f, "    script:")?;
            for action in self.script.actions() {
                writeln!(f, "        {action}")?;
            }
        }
        writeln!(f, "    return: {}", self.expected_exit)?;
        if let Some(points) = self.points {
            writeln!(f, "    points: {points}")?;
        }
        if self.blocker {
            writeln!(f, "    blocker: true")?;
        }
        if !self.visible {
            writeln!(f, "    visible: false")?;
        }
        Ok(())
    }
}

/// Result of running one case.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaseReport {
    pub errors: Vec<String>,
    /// Awarded points, present only for cases that declare points.
    pub points: Option<f64>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}
