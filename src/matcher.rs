//! Pattern matching against buffered child output.

use regex::bytes::{Regex, RegexBuilder};

/// Once the buffer grows past this size the oldest half is discarded.
const MAX_BUFFER: usize = 64 * 1024;

/// What an `expect` step waits for.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// A regular expression searched for in the output. `.` also matches
    /// line breaks.
    Text(Regex),
    /// Satisfied only when the child closes its output stream.
    EndOfOutput,
}

impl Pattern {
    pub fn compile(expr: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(expr).dot_matches_new_line(true).build()?;
        Ok(Pattern::Text(regex))
    }

    pub fn is_end_of_output(&self) -> bool {
        matches!(self, Pattern::EndOfOutput)
    }
}

/// A successful match: the matched bytes and everything received before them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Match {
    pub before: Vec<u8>,
    pub matched: Vec<u8>,
}

/// Rolling buffer of output that has not been consumed by a match yet.
#[derive(Debug, Default)]
pub struct Matcher {
    buffer: Vec<u8>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_BUFFER {
            self.buffer.drain(..MAX_BUFFER / 2);
        }
    }

    /// Look for `pattern` in the buffer.
    ///
    /// On success the buffer is consumed up to and including the match, so
    /// a later search does not see the same occurrence again. The
    /// end-of-output pattern never matches buffered text.
    pub fn find(&mut self, pattern: &Pattern) -> Option<Match> {
        let Pattern::Text(regex) = pattern else {
            return None;
        };
        let (start, end) = regex
            .find(&self.buffer)
            .map(|found| (found.start(), found.end()))?;
        let matched = self.buffer[start..end].to_vec();
        let before = self.buffer[..start].to_vec();
        self.buffer.drain(..end);
        Some(Match { before, matched })
    }

    /// Output received but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn take_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
