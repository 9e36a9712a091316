//! Error types shared across the engine.
//!
//! Runtime mismatches (timeouts, missing output, wrong exit status) are not
//! errors in this sense: they are recorded as strings in a case report. The
//! types here cover malformed specifications and resource failures.

use thiserror::Error;

/// PTY and child-process failures.
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY: {0}")]
    Open(String),
    #[error("Failed to spawn process: {0}")]
    Spawn(String),
    #[error("Failed to write to PTY: {0}")]
    Write(String),
    #[error("Failed to wait for process: {0}")]
    Wait(String),
}

/// Failures that prevent a script from being driven to completion.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid command line {command:?}: {reason}")]
    Command { command: String, reason: String },
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error(transparent)]
    Pty(#[from] PtyError),
}

/// A malformed or incomplete test specification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("no test specification")]
    Empty,
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("{case}: {message}")]
    Invalid { case: String, message: String },
}

impl SpecError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        SpecError::Syntax {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(case: &str, message: impl Into<String>) -> Self {
        SpecError::Invalid {
            case: case.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised by [`Suite`](crate::Suite) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuiteError {
    #[error("duplicate test case: {0}")]
    DuplicateCase(String),
    #[error("no such test case: {0}")]
    UnknownCase(String),
}

/// Errors raised while recording a session.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Pty(#[from] PtyError),
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("operator input closed")]
    InputClosed,
    #[error(transparent)]
    Suite(#[from] SuiteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_error_messages() {
        assert_eq!(SpecError::Empty.to_string(), "no test specification");
        assert_eq!(
            SpecError::invalid("t1", "no run command").to_string(),
            "t1: no run command"
        );
        assert_eq!(
            SpecError::syntax(3, "expected a list item").to_string(),
            "line 3: expected a list item"
        );
    }

    #[test]
    fn test_pty_error_converts_into_run_error() {
        let err: RunError = PtyError::Spawn("not found".to_string()).into();
        assert!(matches!(err, RunError::Pty(PtyError::Spawn(_))));
        assert_eq!(err.to_string(), "Failed to spawn process: not found");
    }
}
