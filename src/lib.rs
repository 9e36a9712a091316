//! # Calico
//!
//! Check interactive command-line programs against scripted PTY sessions.
//!
//! Calico runs a program inside a pseudo-terminal, feeds it input and
//! waits for expected output, one step at a time. A suite of such test
//! cases is graded: cases may carry points, and a failed *blocker* case
//! stops the rest of the suite. The companion `clioc` binary records real
//! sessions into a suite document.
//!
//! ## Quick start
//!
//! ```no_run
//! use calico::{RunConfig, parse_str};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let suite = parse_str(r#"
//! - greeting:
//!     run: ./greet
//!     script:
//!         - expect: "Name: "
//!         - send: "Alice"
//!         - expect: "Hello, Alice!"
//!     points: 10
//! "#)?;
//!
//!     let report = suite.run(None, &RunConfig::default()).await?;
//!     println!("Grade: {} / {}", report.points, report.total_points);
//!     Ok(())
//! }
//! ```
//!
//! ## Document syntax
//!
//! | Field | Description |
//! |-------|-------------|
//! | `run: CMD` | Command line to run, split with shell quoting rules |
//! | `run: CMD  # timeout: N` | Default step timeout for this case, in seconds |
//! | `script:` | List of `- expect: "regex"` and `- send: "line"` steps (`e`/`s` for short) |
//! | `- expect: _EOF_` | Wait for the program to close its output |
//! | `- send: _EOF_` | Send end of input (Ctrl-D) |
//! | `- expect: "x"  # timeout: N` | Timeout for a single step |
//! | `return: N` | Expected exit status, default 0 |
//! | `points: N` | Points awarded if the case passes |
//! | `blocker: true` | Stop grading if this case fails |
//! | `visible: false` | Run without a progress line |
//!
//! Cases whose names start with `_` are skipped unless selected by name.
//! The `_define_vars` entry defines `%(key)s` substitutions applied to
//! every step.
//!
//! ## Driving a session directly
//!
//! [`run_script`] drives one command through a [`Script`] without the
//! suite machinery:
//!
//! ```no_run
//! use calico::{Action, Script, SessionOptions, run_script};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let script = Script::from(vec![Action::send("2 + 2"), Action::expect("4")]);
//!     let command = vec!["bc".to_string()];
//!     let outcome = run_script(&command, &script, None, Duration::from_secs(5), &SessionOptions::default()).await?;
//!     assert!(outcome.errors.is_empty());
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod case;
pub mod config;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod parser;
pub mod pty;
pub(crate) mod pty_reader;
pub mod recorder;
pub mod runner;
pub mod sandbox;
pub mod suite;
pub mod variables;

pub use action::{Action, ActionData, ActionKind, Script};
pub use case::{CaseReport, TestCase};
pub use config::{DEFAULT_TIMEOUT, RunConfig};
pub use error::{PtyError, RecordError, RunError, SpecError, SuiteError};
pub use matcher::{Match, Matcher, Pattern};
pub use parser::{parse_file, parse_str};
pub use pty::{PtySession, SessionOptions};
pub use recorder::{ConsoleTerminal, Recorder, RecorderState, Terminal};
pub use runner::{ScriptOutcome, run_script};
pub use sandbox::Sandbox;
pub use suite::{Suite, SuiteReport};
pub use variables::VariableDefinitions;
