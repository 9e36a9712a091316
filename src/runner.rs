//! Drives a child process through a [`Script`].

use crate::action::{Action, ActionData, ActionKind, Script};
use crate::error::RunError;
use crate::matcher::Pattern;
use crate::pty::{PtySession, ReadOutcome, SessionOptions};
use crate::variables::{VariableDefinitions, substitute};
use std::time::Duration;
use tracing::debug;

pub const EXPECTED_OUTPUT_NOT_RECEIVED: &str = "Expected output not received.";
pub const TIMEOUT_EXCEEDED: &str = "Timeout exceeded.";

/// What happened when a script was run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptOutcome {
    /// `None` if the process was terminated by a signal.
    pub exit_status: Option<i32>,
    pub signal_status: Option<String>,
    pub errors: Vec<String>,
}

/// Run `command` in a PTY and check that it follows `script`.
///
/// Steps run in order; the first expectation that is not met records a
/// failure, kills the process and skips the rest of the script. When every
/// step is met the session is closed gracefully. `default_timeout`
/// applies to steps without their own timeout.
///
/// # Errors
///
/// Returns an error if the process cannot be started, a pattern does not
/// compile, or input cannot be written. The session is released in every
/// case.
pub async fn run_script(
    command: &[String],
    script: &Script,
    definitions: Option<&VariableDefinitions>,
    default_timeout: Duration,
    options: &SessionOptions,
) -> Result<ScriptOutcome, RunError> {
    let mut session = PtySession::spawn(command, options)?;
    let mut errors = Vec::new();

    for action in script.with_trailing_eof() {
        if let Some(failure) = execute(&mut session, &action, definitions, default_timeout).await? {
            debug!("FAILED: {failure}");
            errors.push(failure.to_string());
            break;
        }
    }

    let exit = session.close(!errors.is_empty()).await?;
    if let Some(status) = exit.exit_status {
        debug!("exit status: {status}");
    }
    if let Some(signal) = &exit.signal {
        debug!("program terminated with signal {signal}");
    }

    Ok(ScriptOutcome {
        exit_status: exit.exit_status,
        signal_status: exit.signal,
        errors,
    })
}

/// Execute one step. Returns the failure message if the step was not met.
async fn execute(
    session: &mut PtySession,
    action: &Action,
    definitions: Option<&VariableDefinitions>,
    default_timeout: Duration,
) -> Result<Option<&'static str>, RunError> {
    match (action.kind, &action.data) {
        (ActionKind::Send, ActionData::Text(text)) => {
            let line = substitute(definitions, text);
            debug!("  sending: {line:?}");
            session.send_line(&line)?;
            Ok(None)
        }
        (ActionKind::Send, ActionData::EndOfOutput) => {
            debug!("  sending: _EOF_");
            session.send_eof()?;
            Ok(None)
        }
        (ActionKind::Expect, data) => {
            let timeout = action.timeout.unwrap_or(default_timeout);
            let pattern = match data {
                ActionData::EndOfOutput => {
                    debug!("  expecting ({}s): _EOF_", timeout.as_secs());
                    Pattern::EndOfOutput
                }
                ActionData::Text(text) => {
                    let expr = substitute(definitions, text);
                    debug!("  expecting ({}s): {expr:?}", timeout.as_secs());
                    Pattern::compile(&expr).map_err(|source| RunError::Pattern {
                        pattern: expr.to_string(),
                        source,
                    })?
                }
            };

            match session.read_until(&pattern, timeout).await {
                ReadOutcome::Matched(found) => {
                    if pattern.is_end_of_output() {
                        debug!("  received: _EOF_");
                    } else {
                        debug!("  received: {:?}", String::from_utf8_lossy(&found.matched));
                    }
                    Ok(None)
                }
                ReadOutcome::EndOfStream { before } => {
                    debug!("  received: {:?}", String::from_utf8_lossy(&before));
                    Ok(Some(EXPECTED_OUTPUT_NOT_RECEIVED))
                }
                ReadOutcome::Timeout { before } => {
                    debug!("  received: {:?}", String::from_utf8_lossy(&before));
                    Ok(Some(TIMEOUT_EXCEEDED))
                }
            }
        }
    }
}
