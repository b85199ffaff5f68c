//! Problem reporting (§6 "Problem reporting", §7).
//!
//! A `Problem` is the build orchestrator's distinguished way of
//! telling an embedder something went wrong (or merely noteworthy)
//! without unwinding: tracing errors, compile-time parse failures, and
//! run-time execution failures are all reported this way rather than
//! three separate ad hoc channels.

use serde::{Deserialize, Serialize};
use skein_core::Atom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemKind {
    Information,
    Warning,
    Trace,
    Parse,
    Execution,
    Internal,
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub module_name: Option<Atom>,
    pub kind: ProblemKind,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub message: String,
    pub describers: Vec<String>,
}

impl Problem {
    pub fn new(kind: ProblemKind, message: impl Into<String>) -> Self {
        Self {
            module_name: None,
            kind,
            line: None,
            column: None,
            message: message.into(),
            describers: Vec::new(),
        }
    }

    pub fn in_module(mut self, module_name: Atom) -> Self {
        self.module_name = Some(module_name);
        self
    }

    pub fn at_position(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_describers(mut self, describers: Vec<String>) -> Self {
        self.describers = describers;
        self
    }
}

/// Receives problems as the build proceeds. The continue-or-abort
/// decision for a `Warning`/`Information` problem is the embedder's;
/// `Trace`/`Parse`/`Execution`/`Internal` problems always abort the
/// module that raised them regardless of what this returns (§7).
pub trait ProblemHandler: Send + Sync {
    fn handle(&self, problem: &Problem);
}

/// A handler that renders every problem to a `Vec<String>` instead of
/// acting on it; useful for tests and for embedders that just want a
/// transcript.
#[derive(Default)]
pub struct CollectingProblemHandler {
    rendered: std::sync::Mutex<Vec<String>>,
}

impl CollectingProblemHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().expect("problem log poisoned").clone()
    }
}

impl ProblemHandler for CollectingProblemHandler {
    fn handle(&self, problem: &Problem) {
        self.rendered
            .lock()
            .expect("problem log poisoned")
            .push(render_problem(problem, None));
    }
}

/// Renders one problem as a category line, optional source snippet
/// (line before, the offending line with a caret, line after), and any
/// attached describer strings.
pub fn render_problem(problem: &Problem, source: Option<&str>) -> String {
    let mut out = String::new();

    let category = match problem.kind {
        ProblemKind::Information => "INFORMATION",
        ProblemKind::Warning => "WARNING",
        ProblemKind::Trace => "TRACE ERROR",
        ProblemKind::Parse => "PARSE ERROR",
        ProblemKind::Execution => "EXECUTION ERROR",
        ProblemKind::Internal => "INTERNAL ERROR",
    };

    let location = match (&problem.module_name, problem.line, problem.column) {
        (Some(name), Some(line), Some(col)) => format!(" {}:{}:{}", name, line, col),
        (Some(name), Some(line), None) => format!(" {}:{}", name, line),
        (Some(name), None, None) => format!(" {}", name),
        _ => String::new(),
    };

    out.push_str(&format!("-- {}{}\n", category, location));
    out.push_str(&problem.message);
    out.push('\n');

    if let (Some(source), Some(line)) = (source, problem.line) {
        out.push_str(&render_snippet(source, line, problem.column.unwrap_or(1)));
    }

    if !problem.describers.is_empty() {
        let mut seen = std::collections::BTreeSet::new();
        for describer in &problem.describers {
            if seen.insert(describer.clone()) {
                out.push_str(&format!("  note: {}\n", describer));
            }
        }
    }

    out
}

/// Renders the line before, the offending line with a caret under
/// `column`, and the line after, with line numbers left-padded to a
/// common width.
pub fn render_snippet(source: &str, line_number: usize, column: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if line_number == 0 || line_number > lines.len() {
        return String::new();
    }
    let index = line_number - 1;
    let first_shown = index.saturating_sub(1);
    let last_shown = (index + 1).min(lines.len() - 1);
    let width = (last_shown + 1).to_string().len();

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate().take(last_shown + 1).skip(first_shown) {
        out.push_str(&format!("  {:>width$} | {}\n", i + 1, line, width = width));
        if i == index {
            let caret_offset = column.saturating_sub(1);
            out.push_str(&format!("  {:>width$} | {}^\n", "", " ".repeat(caret_offset), width = width));
        }
    }
    out
}
