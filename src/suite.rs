use crate::case::{CaseReport, TestCase};
use crate::config::RunConfig;
use crate::error::SuiteError;
use crate::variables::VariableDefinitions;
use std::fmt;
use std::io::{self, Write};
use tracing::debug;

/// Width that case names are padded or truncated to in progress lines.
pub const MAX_LABEL_WIDTH: usize = 40;

/// Ordered collection of test cases; insertion order is execution order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Suite {
    cases: Vec<TestCase>,
    definitions: VariableDefinitions,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a case. Names must be unique.
    pub fn add_case(&mut self, case: TestCase) -> Result<(), SuiteError> {
        if self.get(&case.name).is_some() {
            return Err(SuiteError::DuplicateCase(case.name));
        }
        self.cases.push(case);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|case| case.name == name)
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn definitions(&self) -> &VariableDefinitions {
        &self.definitions
    }

    pub fn set_definitions(&mut self, definitions: VariableDefinitions) {
        self.definitions = definitions;
    }

    /// Sum of declared points over all cases.
    pub fn total_points(&self) -> f64 {
        self.cases.iter().filter_map(|case| case.points).sum()
    }

    /// Names run when no selection is given: every non-metadata case.
    pub fn runnable_names(&self) -> Vec<&str> {
        self.cases
            .iter()
            .filter(|case| !case.is_metadata())
            .map(|case| case.name.as_str())
            .collect()
    }

    /// Run the suite, printing progress to stdout unless `config.quiet` is set.
    pub async fn run(
        &self,
        selected: Option<&[String]>,
        config: &RunConfig,
    ) -> Result<SuiteReport, SuiteError> {
        self.run_with_progress(selected, config, &mut io::stdout())
            .await
    }

    /// Run the selected cases (or all runnable ones) in order.
    ///
    /// A case that declares points earns them only if it passes. The run
    /// stops right after a failed blocker; later cases do not appear in the
    /// report.
    ///
    /// # Errors
    ///
    /// Fails before anything runs if a selected name is not in the suite.
    pub async fn run_with_progress<W: Write>(
        &self,
        selected: Option<&[String]>,
        config: &RunConfig,
        progress: &mut W,
    ) -> Result<SuiteReport, SuiteError> {
        let order: Vec<&TestCase> = match selected {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.get(name)
                        .ok_or_else(|| SuiteError::UnknownCase(name.clone()))
                })
                .collect::<Result<_, _>>()?,
            None => self.cases.iter().filter(|case| !case.is_metadata()).collect(),
        };

        let definitions = (!self.definitions.is_empty()).then_some(&self.definitions);
        let mut report = SuiteReport {
            cases: Vec::new(),
            points: 0.0,
            total_points: self.total_points(),
        };

        for case in order {
            debug!("starting test {}", case.name);
            let show = !config.quiet && case.visible;
            if show {
                // Progress output is best effort; a closed stdout must not stop grading.
                let _ = write!(progress, "{} ", progress_label(&case.name));
                let _ = progress.flush();
            }

            let mut case_report = case.run(definitions, config).await;
            let passed = case_report.passed();

            match case.points {
                None => {
                    if show {
                        let _ = writeln!(progress, "{}", if passed { "PASSED" } else { "FAILED" });
                    }
                }
                Some(points) => {
                    let earned = if passed { points } else { 0.0 };
                    case_report.points = Some(earned);
                    report.points += earned;
                    if show {
                        let _ = writeln!(progress, "{earned} / {points}");
                    }
                }
            }

            report.cases.push((case.name.clone(), case_report));

            if case.blocker && !passed {
                debug!("blocker {} failed, stopping", case.name);
                break;
            }
        }

        Ok(report)
    }
}

/// `name .......` padded to a fixed width.
fn progress_label(name: &str) -> String {
    let name: String = name.chars().take(MAX_LABEL_WIDTH).collect();
    let dots = ".".repeat(MAX_LABEL_WIDTH - name.chars().count() + 1);
    format!("{name} {dots}")
}

/// Renders the suite as a document; parsing it yields an equal suite.
impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if !self.definitions.is_empty() {
            writeln!(f, "- {}:", crate::parser::DEFINITIONS_ENTRY)?;
            for (key, value) in self.definitions.iter() {
                writeln!(f, "    {key}: {}", crate::action::quote(value)?)?;
            }
            first = false;
        }
        for case in &self.cases {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{case}")?;
            first = false;
        }
        Ok(())
    }
}

/// Results of a suite run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SuiteReport {
    /// Per-case reports in execution order.
    pub cases: Vec<(String, CaseReport)>,
    /// Points earned.
    pub points: f64,
    pub total_points: f64,
}

impl SuiteReport {
    pub fn get(&self, name: &str) -> Option<&CaseReport> {
        self.cases
            .iter()
            .find(|(case, _)| case == name)
            .map(|(_, report)| report)
    }

    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(|(_, report)| report.passed())
    }
}
