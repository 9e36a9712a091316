//! Session recorder: builds a [`Suite`] from real, operator-driven runs.
//!
//! Each round spawns the command in a PTY and proxies traffic between the
//! operator's terminal and the child. Operator input becomes `send` steps;
//! each line of child output becomes an `expect` step matching that line
//! literally. The operator then scores the run and decides whether to
//! record another one.

use crate::action::{Action, ActionData, ActionKind};
use crate::case::TestCase;
use crate::error::RecordError;
use crate::pty::{PtySession, SessionOptions};
use crate::suite::Suite;
use async_trait::async_trait;
use std::io::{self, Write};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

const CLEAR_SCREEN: &[u8] = b"\x1B[2J\x1B[1;1H";

/// Where the recorder talks to the operator.
#[async_trait(?Send)]
pub trait Terminal {
    /// Next chunk of operator input, or `None` once input is closed.
    async fn read_input(&mut self) -> Option<Vec<u8>>;

    fn write_output(&mut self, data: &[u8]) -> io::Result<()>;

    fn clear_screen(&mut self) -> io::Result<()> {
        self.write_output(CLEAR_SCREEN)
    }

    /// Show `question` and read one line of answer, without its newline.
    async fn prompt(&mut self, question: &str) -> Result<String, RecordError> {
        self.write_output(question.as_bytes())?;
        let mut answer = Vec::new();
        while !answer.contains(&b'\n') {
            match self.read_input().await {
                Some(chunk) => answer.extend(chunk),
                None if answer.is_empty() => return Err(RecordError::InputClosed),
                None => break,
            }
        }
        Ok(String::from_utf8_lossy(&answer)
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }
}

/// The process's own stdin and stdout.
pub struct ConsoleTerminal {
    input: UnboundedReceiver<Vec<u8>>,
    stdout: io::Stdout,
}

impl ConsoleTerminal {
    pub fn new() -> Self {
        Self {
            input: crate::pty_reader::spawn_reader(io::stdin()),
            stdout: io::stdout(),
        }
    }
}

impl Default for ConsoleTerminal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Terminal for ConsoleTerminal {
    async fn read_input(&mut self) -> Option<Vec<u8>> {
        self.input.recv().await
    }

    fn write_output(&mut self, data: &[u8]) -> io::Result<()> {
        let mut stdout = self.stdout.lock();
        stdout.write_all(data)?;
        stdout.flush()
    }
}

/// Where the recorder is between and during rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    AwaitingOperatorScore,
    /// The operator declined to record another round.
    Done,
}

/// Records rounds of `command` until the operator stops.
pub struct Recorder<T: Terminal> {
    command: Vec<String>,
    terminal: T,
    options: SessionOptions,
    state: RecorderState,
    suite: Suite,
    rounds: usize,
}

impl<T: Terminal> Recorder<T> {
    pub fn new(command: Vec<String>, terminal: T) -> Self {
        Self {
            command,
            terminal,
            options: SessionOptions::default(),
            state: RecorderState::Idle,
            suite: Suite::new(),
            rounds: 0,
        }
    }

    /// Options for the recorded child. Keep them equal to the grader's so
    /// replayed output matches what was recorded.
    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn into_suite(self) -> Suite {
        self.suite
    }

    /// Record rounds until the operator declines to continue.
    pub async fn run(&mut self) -> Result<(), RecordError> {
        while self.state != RecorderState::Done {
            self.record_round().await?;
        }
        Ok(())
    }

    /// Record, score and store a single round.
    pub async fn record_round(&mut self) -> Result<(), RecordError> {
        if self.state == RecorderState::Done {
            return Ok(());
        }
        self.rounds += 1;
        let name = format!("case_{}", self.rounds);

        self.terminal.clear_screen()?;
        self.say(&format!("Running for {name}..."))?;
        self.state = RecorderState::Recording;
        let mut case = self.capture(&name).await?;
        self.say(&format!("{name} ended"))?;

        self.state = RecorderState::AwaitingOperatorScore;
        case.points = Some(self.ask_points().await?);
        self.suite.add_case(case)?;

        let answer = self.terminal.prompt("Do you want to continue? [Y/n] ").await?;
        if matches!(answer.trim().to_lowercase().as_str(), "y" | "") {
            self.state = RecorderState::Idle;
        } else {
            self.say("Abort.")?;
            self.state = RecorderState::Done;
        }
        Ok(())
    }

    fn say(&mut self, line: &str) -> io::Result<()> {
        self.terminal.write_output(format!("{line}\n").as_bytes())
    }

    async fn ask_points(&mut self) -> Result<f64, RecordError> {
        loop {
            let answer = self.terminal.prompt("Assign points for this run: ").await?;
            match answer.trim().parse::<f64>() {
                Ok(points) if points.is_finite() => return Ok(points),
                _ => self.say("Please enter a number.")?,
            }
        }
    }

    /// Proxy one run of the command and turn the traffic into a case.
    async fn capture(&mut self, name: &str) -> Result<TestCase, RecordError> {
        let mut case = TestCase::new(name, shell_words::join(&self.command));
        let mut session = PtySession::spawn(&self.command, &self.options)?;
        let mut lines = OutputLines::default();
        let mut input_closed = false;

        loop {
            tokio::select! {
                output = session.next_output() => match output {
                    Some(data) => {
                        self.terminal.write_output(&data)?;
                        for line in lines.push(&data) {
                            case.add_action(Action::expect(regex::escape(&line)));
                        }
                    }
                    None => break,
                },
                input = self.terminal.read_input(), if !input_closed => match input {
                    Some(data) => {
                        session.write(&data)?;
                        let text = String::from_utf8_lossy(&data);
                        let line = text.strip_suffix('\n').unwrap_or(&text);
                        debug!("captured input: {line:?}");
                        case.add_action(Action::send(line));
                    }
                    None => {
                        input_closed = true;
                        session.send_eof()?;
                        case.add_action(Action::new(ActionKind::Send, ActionData::EndOfOutput));
                    }
                },
            }
        }
        if let Some(rest) = lines.finish() {
            case.add_action(Action::expect(regex::escape(&rest)));
        }
        case.add_action(Action::expect_eof());

        let exit = session.close(false).await?;
        if let Some(signal) = &exit.signal {
            warn!("{name}: program terminated with signal {signal}, recording exit status 0");
        }
        case.expected_exit = exit.exit_status.unwrap_or(0);
        Ok(case)
    }
}

/// Splits output chunks into lines, carrying incomplete UTF-8 sequences
/// over to the next chunk.
#[derive(Debug, Default)]
struct OutputLines {
    pending: Vec<u8>,
}

impl OutputLines {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let chunk: Vec<u8> = self.pending.drain(..complete).collect();
        String::from_utf8_lossy(&chunk)
            .split_inclusive('\n')
            .map(str::to_string)
            .collect()
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Matcher, Pattern};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedTerminal {
        input: VecDeque<Vec<u8>>,
        answers: VecDeque<String>,
        output: Vec<u8>,
    }

    impl ScriptedTerminal {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                ..Self::default()
            }
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    #[async_trait(?Send)]
    impl Terminal for ScriptedTerminal {
        async fn read_input(&mut self) -> Option<Vec<u8>> {
            match self.input.pop_front() {
                Some(chunk) => Some(chunk),
                None => std::future::pending().await,
            }
        }

        fn write_output(&mut self, data: &[u8]) -> io::Result<()> {
            self.output.extend_from_slice(data);
            Ok(())
        }

        async fn prompt(&mut self, question: &str) -> Result<String, RecordError> {
            self.write_output(question.as_bytes())?;
            self.answers.pop_front().ok_or(RecordError::InputClosed)
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn expected_text(case: &TestCase) -> String {
        case.script
            .actions()
            .iter()
            .filter(|a| a.kind == ActionKind::Expect)
            .filter_map(|a| match &a.data {
                ActionData::Text(text) => Some(text.as_str()),
                ActionData::EndOfOutput => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_output_is_escaped_and_rematches() {
        let mut recorder = Recorder::new(sh("printf a.b"), ScriptedTerminal::answering(&["3", "n"]));
        recorder.run().await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Done);

        let case = recorder.suite().get("case_1").unwrap();
        let expected = expected_text(case);
        assert_eq!(expected, "a\\.b");
        assert!(case.script.ends_with_eof());
        assert_eq!(case.points, Some(3.0));
        assert_eq!(case.expected_exit, 0);

        let mut matcher = Matcher::new();
        matcher.feed(b"a.b");
        assert!(matcher.find(&Pattern::compile(&expected).unwrap()).is_some());
        let mut matcher = Matcher::new();
        matcher.feed(b"axb");
        assert!(matcher.find(&Pattern::compile(&expected).unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_rounds_until_declined() {
        let terminal = ScriptedTerminal::answering(&["5", "y", "lots", "2", "n"]);
        let mut recorder = Recorder::new(sh("echo hi; exit 3"), terminal);
        recorder.run().await.unwrap();

        let output = recorder.terminal().output();
        assert!(output.contains("Running for case_1..."));
        assert!(output.contains("case_2 ended"));
        assert!(output.contains("Please enter a number."));
        assert!(output.ends_with("Abort.\n"));

        let suite = recorder.into_suite();
        assert_eq!(suite.runnable_names(), ["case_1", "case_2"]);
        assert_eq!(suite.total_points(), 7.0);
        let case = suite.get("case_2").unwrap();
        assert_eq!(case.expected_exit, 3);
        assert_eq!(case.command, "sh -c 'echo hi; exit 3'");
        assert_eq!(expected_text(case), "hi\r\n");
    }

    #[tokio::test]
    async fn test_input_becomes_send() {
        let mut terminal = ScriptedTerminal::answering(&["1", ""]);
        terminal.input.push_back(b"banana\n".to_vec());
        let mut recorder = Recorder::new(sh("read w; echo \"got $w\""), terminal);
        recorder.record_round().await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Idle);

        let case = recorder.suite().get("case_1").unwrap();
        assert_eq!(case.script.actions()[0], Action::send("banana"));
        assert_eq!(expected_text(case), "got banana\r\n");
    }

    #[tokio::test]
    async fn test_closed_input_aborts() {
        let mut recorder = Recorder::new(sh("true"), ScriptedTerminal::default());
        let result = recorder.record_round().await;
        assert!(matches!(result, Err(RecordError::InputClosed)));
        assert_eq!(recorder.state(), RecorderState::AwaitingOperatorScore);
    }

    #[test]
    fn test_output_lines_carry_partial_utf8() {
        let mut lines = OutputLines::default();
        let bytes = "é\n".as_bytes();
        assert!(lines.push(&bytes[..1]).is_empty());
        assert_eq!(lines.push(&bytes[1..]), ["é\n"]);
        assert_eq!(lines.push(b"one\ntwo"), ["one\n", "two"]);
        assert_eq!(lines.finish(), None);
    }
}
