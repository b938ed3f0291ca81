//! Iteration drivers: one per mode, each walking its items through the
//! evaluator and committing a single batch of output.
//!
//! Every driver follows the same outline:
//!
//! 1. restore the document to the invocation snapshot, re-checking the token
//!    around every host call
//! 2. build the mode's context and, per item, seal it, evaluate, advance
//! 3. check the token again and commit the accumulated output in one call
//!
//! Evaluation failures are handled inside the driver according to the mode's
//! policy; only host failures escape as errors.

mod generator;
mod line_selector;
mod regex_selector;
mod transform;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::errors::HostError;
use crate::evaluator::Evaluator;
use crate::host::{DocumentHost, DocumentSnapshot};

pub use generator::run_generator;
pub use line_selector::run_line_selector;
pub use regex_selector::run_regex_line_selector;
pub use transform::run_transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Transform,
    LineSelector,
    RegexLineSelector,
    Generator,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Transform, Mode::LineSelector, Mode::RegexLineSelector, Mode::Generator];

    /// Stable identifier; history is stored under `<command_id>.history`.
    pub fn command_id(self) -> &'static str {
        match self {
            Mode::Transform => "extension.transform",
            Mode::LineSelector => "extension.createSelections",
            Mode::RegexLineSelector => "extension.createSelectionsFromRegex",
            Mode::Generator => "extension.generatorCommand",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Mode::Transform => "Transform",
            Mode::LineSelector => "Create Selections",
            Mode::RegexLineSelector => "Selections from Regex",
            Mode::Generator => "Generator",
        }
    }

    /// Title shown while the input box is open.
    pub fn prompt_title(self) -> String {
        format!("{}: Press ESC to cancel changes, ENTER to accept", self.title())
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Mode::Transform => r#"Example: "currentSelection + (selectionIndex + 1)""#,
            Mode::LineSelector => r#"Example: "[0,5]" or "[[0,5],[6,8]]""#,
            Mode::RegexLineSelector => r#"Example(s): "/abc/i" or "'abc'" or "return /abc/i;""#,
            Mode::Generator => r#"Example: "return {iterations: 5, func: ()=>{return 'abc';}};""#,
        }
    }

    /// One entry per line: the result shape and every bound variable.
    pub fn help_text(self) -> &'static [&'static str] {
        match self {
            Mode::Transform => &[
                "Description: Replaces text in current selections dynamically",
                "Must Return: string (replaces current selection)",
                "Variable: currentDocumentText (string)",
                "Variable: currentSelection (per-selection, string)",
                "Variable: allSelections (string[])",
                "Variable: selectionIndex (per-selection, number)",
                "Variable: currentAutoNumber (per-selection, number)",
                "Variable: lastSelection (per-selection, string)",
                "Variable: lastResult (per-selection, string)",
                "Variable: lastAutoNumber (per-selection, number)",
                "Variable: lastResultAutoNumber (per-selection, number)",
                "Variable: toNumberOnly (function, extracts the number from a string)",
                "Variable: toTextOnly (function, removes the number from a string)",
                "Variable: variables (user-defined variables)",
            ],
            Mode::LineSelector => &[
                r#"Example: "[0,5]" or "[[0,5],[6,8]]""#,
                "Description: Creates selections per-line in current file from char positions",
                "Must Return: [number,number] OR [number,number][]",
                "Variable: currentDocumentText (string)",
                "Variable: currentLineText (per-line, string)",
                "Variable: lastLineText (per-line, string)",
                "Variable: lineIndex (per-line, number)",
                "Variable: lastResults (per-line, [number,number][])",
                "Variable: variables (user-defined variables)",
            ],
            Mode::RegexLineSelector => &[
                r#"Example(s): "/abc/i" or "'abc'" or "return /abc/i;""#,
                "Description: Creates selections from a RegExp or string",
                "Must Return: RegExp or string",
                "Variable: currentDocumentText (string)",
                "Variable: currentLineText (per-line, string)",
                "Variable: lastLineText (per-line, string)",
                "Variable: lineIndex (per-line, number)",
                "Variable: lastResults (per-line, [number,number][])",
                "Variable: variables (user-defined variables)",
            ],
            Mode::Generator => &[
                r#"Example: "return {iterations: 5, func: ()=>{return 'abc\n';}};""#,
                r#"Example: "({iterations: 5, func: ()=>{return 'abc\n';}})""#,
                "Description: Generate text dynamically.",
                "Must Return: { iterations: number, func: function that returns value }",
                "Variable: currentDocumentText (string)",
                "Variable: lastResult (last generated value)",
                "Variable: iterationNumber (number)",
                "Variable: variables (user-defined variables)",
            ],
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Output was committed to the host.
    Applied,
    /// The run finished without anything to commit; the document is at its snapshot.
    NoOutput,
    /// A newer run superseded this one before it committed.
    Cancelled,
}

/// Run `mode` once against the invocation snapshot.
pub async fn run<H: DocumentHost>(
    mode: Mode,
    evaluator: &Evaluator,
    settings: &Settings,
    host: &H,
    snapshot: &DocumentSnapshot,
    expression: &str,
    token: &CancellationToken,
) -> Result<RunOutcome, HostError> {
    debug!(?mode, "run started");
    let outcome = match mode {
        Mode::Transform => run_transform(evaluator, host, snapshot, expression, token).await,
        Mode::LineSelector => run_line_selector(evaluator, host, snapshot, expression, token).await,
        Mode::RegexLineSelector => run_regex_line_selector(evaluator, host, snapshot, expression, token).await,
        Mode::Generator => {
            run_generator(evaluator, host, snapshot, expression, token, settings.max_generator_iterations).await
        }
    }?;
    debug!(?mode, ?outcome, "run finished");
    Ok(outcome)
}

/// The shared preamble: bail out if superseded, put the document back, and
/// skip blank input.
pub(crate) async fn prepare<H: DocumentHost>(
    host: &H,
    snapshot: &DocumentSnapshot,
    expression: &str,
    token: &CancellationToken,
) -> Result<Option<RunOutcome>, HostError> {
    if token.is_cancelled() || !snapshot.restore_unless_cancelled(host, token).await? {
        return Ok(Some(cancelled()));
    }
    if expression.trim().is_empty() {
        return Ok(Some(RunOutcome::NoOutput));
    }
    Ok(None)
}

pub(crate) fn cancelled() -> RunOutcome {
    debug!("run superseded, discarding output");
    RunOutcome::Cancelled
}
