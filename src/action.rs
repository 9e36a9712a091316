//! Script steps: [`Action`] and the ordered [`Script`] built from them.

use std::fmt;
use std::time::Duration;

/// Document spelling of the end-of-output sentinel.
pub const EOF_SENTINEL: &str = "_EOF_";

/// The two kinds of script step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Expect,
    Send,
}

impl ActionKind {
    /// Name used when rendering a step.
    pub const fn name(self) -> &'static str {
        match self {
            ActionKind::Expect => "expect",
            ActionKind::Send => "send",
        }
    }

    /// One-letter alias accepted by the parser.
    pub const fn short_name(self) -> &'static str {
        match self {
            ActionKind::Expect => "e",
            ActionKind::Send => "s",
        }
    }

    /// Look up a kind by its full or short name.
    pub fn from_name(name: &str) -> Option<Self> {
        [ActionKind::Expect, ActionKind::Send]
            .into_iter()
            .find(|kind| kind.name() == name || kind.short_name() == name)
    }
}

/// Payload of a step.
///
/// The document spells [`ActionData::EndOfOutput`] as `_EOF_`, so a
/// `Text("_EOF_")` cannot be written out. The `Action` constructors map that
/// text to `EndOfOutput`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionData {
    Text(String),
    /// For `expect`, the closing of the child's output stream. For `send`,
    /// end of input.
    EndOfOutput,
}

impl ActionData {
    /// Map the document sentinel to [`ActionData::EndOfOutput`].
    pub fn from_document(text: impl Into<String>) -> Self {
        let text = text.into();
        if text == EOF_SENTINEL {
            ActionData::EndOfOutput
        } else {
            ActionData::Text(text)
        }
    }
}

/// A single expect or send step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub data: ActionData,
    /// Falls back to the case timeout, then to the global default.
    pub timeout: Option<Duration>,
}

impl Action {
    pub fn new(kind: ActionKind, data: ActionData) -> Self {
        Self {
            kind,
            data,
            timeout: None,
        }
    }

    pub fn expect(pattern: impl Into<String>) -> Self {
        Self::new(ActionKind::Expect, ActionData::from_document(pattern))
    }

    pub fn expect_eof() -> Self {
        Self::new(ActionKind::Expect, ActionData::EndOfOutput)
    }

    /// A line to send; the newline is added on transmission.
    pub fn send(line: impl Into<String>) -> Self {
        Self::new(ActionKind::Send, ActionData::from_document(line))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_expect_eof(&self) -> bool {
        self.kind == ActionKind::Expect && self.data == ActionData::EndOfOutput
    }
}

/// Renders as one document line: `- expect: "data"  # timeout: 3`.
impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "- {}: ", self.kind.name())?;
        match &self.data {
            ActionData::EndOfOutput => f.write_str(EOF_SENTINEL)?,
            ActionData::Text(text) => f.write_str(&quote(text)?)?,
        }
        if let Some(timeout) = self.timeout {
            write!(f, "  # timeout: {}", timeout.as_secs())?;
        }
        Ok(())
    }
}

/// Double-quoted form of `text`, using JSON escapes.
pub(crate) fn quote(text: &str) -> Result<String, fmt::Error> {
    serde_json::to_string(text).map_err(|_| fmt::Error)
}

/// Ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    actions: Vec<Action>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn ends_with_eof(&self) -> bool {
        self.actions.last().is_some_and(Action::is_expect_eof)
    }

    /// The steps as executed: an end-of-output expectation is appended unless
    /// the script already ends with one.
    pub fn with_trailing_eof(&self) -> Vec<Action> {
        let mut actions = self.actions.clone();
        if !self.ends_with_eof() {
            actions.push(Action::expect_eof());
        }
        actions
    }
}

impl From<Vec<Action>> for Script {
    fn from(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

impl FromIterator<Action> for Script {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}
