//! Parser for test specification documents.
//!
//! A specification is a YAML-style list of test cases:
//!
//! ```text
//! - greeting:
//!     run: ./greet  # timeout: 5
//!     script:
//!         - expect: "Name: "
//!         - send: "Alice"
//!         - expect: "Hello, Alice!"  # timeout: 2
//!         - expect: _EOF_
//!     return: 0
//!     points: 10
//!     blocker: true
//! ```
//!
//! Only the subset of YAML needed for this layout is understood: block
//! entries, plain scalars, double-quoted strings with JSON escapes and
//! single-quoted strings. A `# timeout: N` comment on the `run` line sets
//! the case timeout; on a step it sets the step timeout.
//!
//! The top-level entry points are [`parse_str`] and [`parse_file`].

use crate::action::{Action, ActionData, ActionKind, Script, quote};
use crate::case::TestCase;
use crate::error::{SpecError, SuiteError};
use crate::matcher::Pattern;
use crate::suite::Suite;
use crate::variables::VariableDefinitions;
use anyhow::Context as _;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Entry holding the variable definitions instead of a test case.
pub const DEFINITIONS_ENTRY: &str = "_define_vars";

/// Parse a test specification from a string slice.
///
/// # Errors
///
/// Returns an error for malformed lines, missing or mistyped fields,
/// unknown step kinds, duplicate case names and patterns that do not
/// compile. Nothing is partially applied.
///
/// # Example
///
/// ```
/// use calico::parse_str;
///
/// let suite = parse_str("- hello:\n    run: echo hello\n    points: 5\n").unwrap();
/// assert_eq!(suite.len(), 1);
/// assert_eq!(suite.total_points(), 5.0);
/// ```
pub fn parse_str(content: &str) -> Result<Suite, SpecError> {
    let entries = lex(content)?;
    if entries.is_empty() {
        return Err(SpecError::Empty);
    }

    let mut suite = Suite::new();
    let mut definitions: Option<VariableDefinitions> = None;

    for entry in entries {
        if entry.name == DEFINITIONS_ENTRY {
            if definitions.is_some() {
                return Err(SpecError::invalid(&entry.name, "duplicate test case"));
            }
            definitions = Some(build_definitions(&entry)?);
            continue;
        }
        let case = build_case(&entry)?;
        suite.add_case(case).map_err(|e| match e {
            SuiteError::DuplicateCase(name) => SpecError::invalid(&name, "duplicate test case"),
            other => SpecError::invalid(&entry.name, other.to_string()),
        })?;
    }

    let definitions = definitions.unwrap_or_default();
    check_patterns(&suite, &definitions)?;
    suite.set_definitions(definitions);
    Ok(suite)
}

/// Parse a test specification from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the specification is
/// malformed.
pub fn parse_file(path: impl AsRef<Path>) -> anyhow::Result<Suite> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read specification file: {}", path.display()))?;
    Ok(parse_str(&content)?)
}

/// A `key: value` line with its trailing comment.
#[derive(Debug)]
struct RawField {
    key: String,
    value: String,
    comment: Option<String>,
    line: usize,
}

#[derive(Debug)]
struct RawEntry {
    name: String,
    fields: Vec<RawField>,
    steps: Vec<RawField>,
}

/// Split the document into entries, fields and script steps.
fn lex(content: &str) -> Result<Vec<RawEntry>, SpecError> {
    let mut entries: Vec<RawEntry> = Vec::new();
    let mut in_script = false;

    for (line_num, line) in content.lines().enumerate() {
        let line_num = line_num + 1;
        let body = line.trim_start();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        let indented = body.len() < line.len();

        if !indented {
            let field = body
                .strip_prefix("- ")
                .and_then(|item| split_field(item, line_num).transpose())
                .transpose()?
                .filter(|field| field.value.is_empty())
                .ok_or_else(|| SpecError::syntax(line_num, "expected a test case such as `- name:`"))?;
            entries.push(RawEntry {
                name: field.key,
                fields: Vec::new(),
                steps: Vec::new(),
            });
            in_script = false;
            continue;
        }

        let entry = entries
            .last_mut()
            .ok_or_else(|| SpecError::syntax(line_num, "indented line outside of a test case"))?;

        if let Some(item) = body.strip_prefix("- ") {
            if !in_script {
                return Err(SpecError::syntax(line_num, "list item outside of a script"));
            }
            let step = split_field(item, line_num)?
                .ok_or_else(|| SpecError::syntax(line_num, "expected a step such as `- expect: \"text\"`"))?;
            entry.steps.push(step);
            continue;
        }

        let field = split_field(body, line_num)?
            .ok_or_else(|| SpecError::syntax(line_num, "expected `key: value`"))?;
        if field.key == "script" {
            if !field.value.is_empty() && field.value != "[]" {
                return Err(SpecError::invalid(&entry.name, "script must be a list of steps"));
            }
            in_script = true;
            continue;
        }
        in_script = false;
        entry.fields.push(field);
    }

    Ok(entries)
}

/// Split `key: value  # comment`. Returns `None` if the text is not a mapping.
fn split_field(text: &str, line: usize) -> Result<Option<RawField>, SpecError> {
    let Some((key, rest)) = text.split_once(':') else {
        return Ok(None);
    };
    let key = key.trim();
    if key.is_empty()
        || key.starts_with(['"', '\''])
        || !(rest.is_empty() || rest.starts_with(char::is_whitespace))
    {
        return Ok(None);
    }
    let (value, comment) = split_value(rest, line)?;
    Ok(Some(RawField {
        key: key.to_string(),
        value: value.to_string(),
        comment: comment.map(str::to_string),
        line,
    }))
}

/// Separate a raw value from its trailing comment, respecting quotes.
fn split_value(rest: &str, line: usize) -> Result<(&str, Option<&str>), SpecError> {
    let rest = rest.trim();
    let end = match rest.chars().next() {
        Some('"') => closing_double_quote(rest)
            .ok_or_else(|| SpecError::syntax(line, "unclosed double quote"))?,
        Some('\'') => closing_single_quote(rest)
            .ok_or_else(|| SpecError::syntax(line, "unclosed single quote"))?,
        _ => plain_end(rest),
    };
    let (value, tail) = rest.split_at(end);
    let tail = tail.trim();
    if tail.is_empty() {
        Ok((value.trim_end(), None))
    } else if let Some(comment) = tail.strip_prefix('#') {
        Ok((value.trim_end(), Some(comment.trim())))
    } else {
        Err(SpecError::syntax(line, "unexpected text after quoted value"))
    }
}

/// Byte offset just past the closing quote, honouring backslash escapes.
fn closing_double_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, ch) in text.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Byte offset just past the closing quote; `''` is an escaped quote.
fn closing_single_quote(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// A plain scalar ends where a `#` preceded by whitespace starts a comment.
fn plain_end(text: &str) -> usize {
    if text.starts_with('#') {
        return 0;
    }
    text.find(" #")
        .into_iter()
        .chain(text.find("\t#"))
        .min()
        .unwrap_or(text.len())
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Quoted(String),
    Plain(String),
}

impl Scalar {
    fn decode(raw: &str, line: usize) -> Result<Self, SpecError> {
        if raw.starts_with('"') {
            serde_json::from_str::<String>(raw)
                .map(Scalar::Quoted)
                .map_err(|e| SpecError::syntax(line, format!("invalid double-quoted string: {e}")))
        } else if let Some(inner) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
            Ok(Scalar::Quoted(inner.replace("''", "'")))
        } else {
            Ok(Scalar::Plain(raw.to_string()))
        }
    }

    fn text(&self) -> &str {
        match self {
            Scalar::Quoted(s) | Scalar::Plain(s) => s,
        }
    }

    fn plain(&self) -> Option<&str> {
        match self {
            Scalar::Plain(s) => Some(s),
            Scalar::Quoted(_) => None,
        }
    }

    fn is_null(&self) -> bool {
        self.plain()
            .is_some_and(|s| matches!(s, "" | "~" | "null" | "Null" | "NULL"))
    }

    fn as_bool(&self) -> Option<bool> {
        match self.plain()? {
            "true" | "True" | "TRUE" => Some(true),
            "false" | "False" | "FALSE" => Some(false),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        self.plain()?.parse().ok()
    }

    fn as_number(&self) -> Option<f64> {
        let s = self.plain()?;
        if !is_number(s) {
            return None;
        }
        s.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    /// The value as a string, or `None` if it is a null, boolean or number.
    fn as_string(&self) -> Option<&str> {
        match self {
            Scalar::Quoted(s) => Some(s),
            Scalar::Plain(s) => {
                let resolves_elsewhere =
                    self.is_null() || self.as_bool().is_some() || is_number(s);
                (!resolves_elsewhere).then_some(s.as_str())
            }
        }
    }
}

fn is_number(s: &str) -> bool {
    if matches!(s.to_ascii_lowercase().as_str(), ".inf" | "+.inf" | "-.inf" | ".nan") {
        return true;
    }
    s.parse::<i64>().is_ok()
        || (s.parse::<f64>().is_ok()
            && s.chars().any(|c| c.is_ascii_digit())
            && s.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c)))
}

/// Value of a `field: value` comment, e.g. `timeout: 5`.
fn comment_value<'a>(comment: Option<&'a str>, field: &str) -> Option<&'a str> {
    comment?
        .strip_prefix(field)?
        .strip_prefix(':')
        .map(str::trim)
}

fn timeout_from_comment(comment: Option<&str>, case: &str) -> Result<Option<Duration>, SpecError> {
    let Some(value) = comment_value(comment, "timeout") else {
        return Ok(None);
    };
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(SpecError::invalid(case, "timeout value must be an integer"));
    }
    value
        .parse()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|_| SpecError::invalid(case, "timeout value must be an integer"))
}

fn build_definitions(entry: &RawEntry) -> Result<VariableDefinitions, SpecError> {
    if !entry.steps.is_empty() {
        return Err(SpecError::invalid(&entry.name, "variable definitions cannot have a script"));
    }
    let mut definitions = VariableDefinitions::new();
    for field in &entry.fields {
        let value = Scalar::decode(&field.value, field.line)?;
        definitions.insert(field.key.clone(), value.text());
    }
    Ok(definitions)
}

fn build_case(entry: &RawEntry) -> Result<TestCase, SpecError> {
    let name = entry.name.as_str();
    let mut run = None;
    let mut timeout = None;
    let mut expected_exit = None;
    let mut points = None;
    let mut blocker = None;
    let mut visible = None;

    for field in &entry.fields {
        let value = Scalar::decode(&field.value, field.line)?;
        match field.key.as_str() {
            "run" => {
                if !value.is_null() {
                    let command = value
                        .as_string()
                        .ok_or_else(|| SpecError::invalid(name, "run command must be a string"))?;
                    run = Some(command.to_string());
                }
                timeout = timeout_from_comment(field.comment.as_deref(), name)?;
            }
            "return" if !value.is_null() => {
                let status = value
                    .as_int()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| SpecError::invalid(name, "return value must be an integer"))?;
                expected_exit = Some(status);
            }
            "points" if !value.is_null() => {
                points = Some(
                    value
                        .as_number()
                        .ok_or_else(|| SpecError::invalid(name, "points value must be numeric"))?,
                );
            }
            "blocker" if !value.is_null() => {
                blocker = Some(value.as_bool().ok_or_else(|| {
                    SpecError::invalid(name, "blocker value must be true or false")
                })?);
            }
            "visible" if !value.is_null() => {
                visible = Some(value.as_bool().ok_or_else(|| {
                    SpecError::invalid(name, "visibility value must be true or false")
                })?);
            }
            "return" | "points" | "blocker" | "visible" => {}
            other => warn!("{name}: ignoring unknown field {other:?}"),
        }
    }

    let run = run.ok_or_else(|| SpecError::invalid(name, "no run command"))?;
    match shell_words::split(&run) {
        Ok(argv) if !argv.is_empty() => {}
        Ok(_) => return Err(SpecError::invalid(name, "no run command")),
        Err(_) => {
            return Err(SpecError::invalid(name, "run command is not a valid command line"));
        }
    }

    let mut case = TestCase::new(name, run);
    case.timeout = timeout;
    case.expected_exit = expected_exit.unwrap_or(0);
    case.points = points;
    case.blocker = blocker.unwrap_or(false);
    case.visible = visible.unwrap_or(true);
    case.script = build_script(entry)?;
    Ok(case)
}

fn build_script(entry: &RawEntry) -> Result<Script, SpecError> {
    let name = entry.name.as_str();
    let mut script = Script::new();
    for step in &entry.steps {
        let kind = ActionKind::from_name(&step.key)
            .ok_or_else(|| SpecError::invalid(name, "unknown action type"))?;
        let value = Scalar::decode(&step.value, step.line)?;
        let data = value
            .as_string()
            .ok_or_else(|| SpecError::invalid(name, "action data must be a string"))?;
        let mut action = Action::new(kind, ActionData::from_document(data));
        action.timeout = timeout_from_comment(step.comment.as_deref(), name)?;
        script.push(action);
    }
    Ok(script)
}

/// Expectation patterns must compile once variables are substituted.
fn check_patterns(suite: &Suite, definitions: &VariableDefinitions) -> Result<(), SpecError> {
    for case in suite.cases() {
        for action in case.script.actions() {
            if let (ActionKind::Expect, ActionData::Text(text)) = (action.kind, &action.data) {
                let expr = definitions.substitute(text);
                if let Err(e) = Pattern::compile(&expr) {
                    return Err(SpecError::invalid(
                        &case.name,
                        format!("invalid pattern {text:?}: {e}"),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Render `text` as a plain scalar when it reads back unchanged, quoted
/// otherwise.
pub(crate) fn render_scalar(text: &str) -> Result<String, fmt::Error> {
    let plain_safe = !text.is_empty()
        && text == text.trim()
        && !text.starts_with(['"', '\'', '#', '-', '[', ']', '{', '}', '&', '*', '!', '|', '>', '%', '@', '`', '?', ':', ','])
        && !text.contains(" #")
        && !text.contains(": ")
        && !text.ends_with(':')
        && !text.chars().any(char::is_control)
        && Scalar::Plain(text.to_string()).as_string().is_some();
    if plain_safe {
        Ok(text.to_string())
    } else {
        quote(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r##"
# Grading specification
- _define_vars:
    name: "Alice"

- greeting:
    run: ./greet --polite  # timeout: 5
    script:
        - expect: "Name: "
        - send: "%(name)s"
        - expect: "Hello, %(name)s!"  # timeout: 2
        - expect: _EOF_
    return: 0
    points: 10
    blocker: true

- case_exit:
    run: './fail # not a comment'
    return: 3
    points: 2.5
    visible: false

- _helper:
    run: "true"
    script:
        - s: 'it''s'
        - e: "#literal"
"##;

    #[test]
    fn test_parse_full_document() {
        let suite = parse_str(FULL).unwrap();
        assert_eq!(suite.len(), 3);
        assert_eq!(suite.definitions().get("name"), Some("Alice"));
        assert_eq!(suite.total_points(), 12.5);
        assert_eq!(suite.runnable_names(), ["greeting", "case_exit"]);

        let greeting = suite.get("greeting").unwrap();
        assert_eq!(greeting.command, "./greet --polite");
        assert_eq!(greeting.timeout, Some(Duration::from_secs(5)));
        assert!(greeting.blocker);
        assert!(greeting.visible);
        assert!(!greeting.sandboxed);
        assert_eq!(
            greeting.script.actions(),
            [
                Action::expect("Name: "),
                Action::send("%(name)s"),
                Action::expect("Hello, %(name)s!").with_timeout(Duration::from_secs(2)),
                Action::expect_eof(),
            ]
        );

        let exit = suite.get("case_exit").unwrap();
        assert_eq!(exit.command, "./fail # not a comment");
        assert_eq!(exit.expected_exit, 3);
        assert_eq!(exit.points, Some(2.5));
        assert!(!exit.visible);
        assert!(exit.sandboxed);
        assert!(exit.script.is_empty());

        let helper = suite.get("_helper").unwrap();
        assert_eq!(
            helper.script.actions(),
            [Action::send("it's"), Action::expect("#literal")]
        );
    }

    #[test]
    fn test_render_round_trip() {
        let suite = parse_str(FULL).unwrap();
        let rendered = suite.to_string();
        let reparsed = parse_str(&rendered).unwrap();
        assert_eq!(reparsed, suite, "rendered:\n{rendered}");
    }

    #[test]
    fn test_round_trip_of_recorded_output() {
        let mut suite = Suite::new();
        let mut case = TestCase::new("case_1", "./prog").with_points(1.0);
        case.add_action(Action::expect(regex::escape("a.b (x)\r\n")));
        case.add_action(Action::send("answer: 42"));
        case.add_action(Action::expect("\u{1b}0m tab\there"));
        case.add_action(Action::send(crate::action::EOF_SENTINEL));
        case.add_action(Action::expect_eof());
        suite.add_case(case).unwrap();

        let reparsed = parse_str(&suite.to_string()).unwrap();
        assert_eq!(reparsed, suite);
    }

    #[test]
    fn test_eof_sentinel_quoted_or_plain() {
        let suite = parse_str("- t:\n    run: x\n    script:\n        - expect: \"_EOF_\"\n        - expect: _EOF_\n").unwrap();
        let actions = suite.get("t").unwrap().script.actions();
        assert!(actions.iter().all(Action::is_expect_eof));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_str(""), Err(SpecError::Empty));
        assert_eq!(parse_str("# only a comment\n\n"), Err(SpecError::Empty));
    }

    fn invalid(content: &str) -> String {
        parse_str(content).err().unwrap().to_string()
    }

    #[test]
    fn test_missing_run() {
        assert_eq!(invalid("- t1:\n    return: 0\n"), "t1: no run command");
        assert_eq!(invalid("- t1:\n    run:\n"), "t1: no run command");
    }

    #[test]
    fn test_field_type_errors() {
        assert_eq!(invalid("- t1:\n    run: 42\n"), "t1: run command must be a string");
        assert_eq!(
            invalid("- t1:\n    run: x\n    return: zero\n"),
            "t1: return value must be an integer"
        );
        assert_eq!(
            invalid("- t1:\n    run: x\n    points: \"10\"\n"),
            "t1: points value must be numeric"
        );
        assert_eq!(
            invalid("- t1:\n    run: x\n    blocker: yes\n"),
            "t1: blocker value must be true or false"
        );
        assert_eq!(
            invalid("- t1:\n    run: x\n    visible: 1\n"),
            "t1: visibility value must be true or false"
        );
    }

    #[test]
    fn test_step_errors() {
        assert_eq!(
            invalid("- t1:\n    run: x\n    script:\n        - wait: \"1\"\n"),
            "t1: unknown action type"
        );
        assert_eq!(
            invalid("- t1:\n    run: x\n    script:\n        - send: 42\n"),
            "t1: action data must be a string"
        );
        assert_eq!(
            invalid("- t1:\n    run: x\n    script:\n        - expect: \"a\"  # timeout: soon\n"),
            "t1: timeout value must be an integer"
        );
        assert_eq!(
            invalid("- t1:\n    run: x  # timeout: -1\n"),
            "t1: timeout value must be an integer"
        );
    }

    #[test]
    fn test_unrelated_comments_ignored() {
        let suite =
            parse_str("- t1:\n    run: x  # the program\n    script:\n        - send: \"y\"  # answer\n")
                .unwrap();
        let case = suite.get("t1").unwrap();
        assert_eq!(case.timeout, None);
        assert_eq!(case.script.actions()[0].timeout, None);
    }

    #[test]
    fn test_duplicate_case() {
        assert_eq!(
            invalid("- t1:\n    run: x\n- t1:\n    run: y\n"),
            "t1: duplicate test case"
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let err = invalid("- t1:\n    run: x\n    script:\n        - expect: \"(oops\"\n");
        assert!(err.starts_with("t1: invalid pattern"), "got: {err}");
    }

    #[test]
    fn test_invalid_command_line() {
        assert_eq!(
            invalid("- t1:\n    run: echo \"unclosed\n"),
            "t1: run command is not a valid command line"
        );
        assert_eq!(
            invalid("- t1:\n    run: \"echo\" -n\n"),
            "line 2: unexpected text after quoted value"
        );
        assert_eq!(
            invalid("- t1:\n    run: echo 'it\n"),
            "t1: run command is not a valid command line"
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            parse_str("greeting:\n    run: x\n"),
            Err(SpecError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse_str("    run: x\n"),
            Err(SpecError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse_str("- t1:\n    run: x\n    - send: \"y\"\n"),
            Err(SpecError::Syntax { line: 3, .. })
        ));
        assert!(matches!(
            parse_str("- t1:\n    run: \"x\n"),
            Err(SpecError::Syntax { line: 2, .. })
        ));
    }

    #[test]
    fn test_split_value() {
        assert_eq!(split_value(" ./prog  # timeout: 3", 1).unwrap(), ("./prog", Some("timeout: 3")));
        assert_eq!(split_value(" \"a # b\"", 1).unwrap(), ("\"a # b\"", None));
        assert_eq!(split_value(" 'a'' # b' # c", 1).unwrap(), ("'a'' # b'", Some("c")));
        assert_eq!(split_value(" x#y", 1).unwrap(), ("x#y", None));
    }

    #[test]
    fn test_render_scalar() {
        assert_eq!(render_scalar("./prog -v").unwrap(), "./prog -v");
        assert_eq!(render_scalar("42").unwrap(), "\"42\"");
        assert_eq!(render_scalar("true").unwrap(), "\"true\"");
        assert_eq!(render_scalar("a # b").unwrap(), "\"a # b\"");
        assert_eq!(render_scalar("'quoted'").unwrap(), "\"'quoted'\"");
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        std::fs::write(&path, FULL).unwrap();
        assert_eq!(parse_file(&path).unwrap().len(), 3);
        assert!(parse_file(dir.path().join("missing.yaml")).is_err());
    }
}
