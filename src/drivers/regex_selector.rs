use tracing::debug;

use crate::cancel::CancellationToken;
use crate::context::{seal, ContextFields, LineContext, LineItem};
use crate::errors::HostError;
use crate::evaluator::Evaluator;
use crate::host::{DocumentHost, DocumentSnapshot, Position, Selection};
use crate::shape::{decode_matcher, scan_line, Matcher};

use super::{cancelled, prepare, RunOutcome};

/// Select every match of the per-line pattern. A run that matches nothing
/// leaves a single caret at the start of the document.
pub async fn run_regex_line_selector<H: DocumentHost>(
    evaluator: &Evaluator,
    host: &H,
    snapshot: &DocumentSnapshot,
    expression: &str,
    token: &CancellationToken,
) -> Result<RunOutcome, HostError> {
    if let Some(outcome) = prepare(host, snapshot, expression, token).await? {
        return Ok(outcome);
    }
    let module_base = host.file_path();
    let mut context = LineContext::new(&snapshot.text);
    let mut selections = Vec::new();

    for (index, line) in snapshot.text.split('\n').enumerate() {
        if token.is_cancelled() {
            return Ok(cancelled());
        }
        let item = LineItem { index, text: line.to_string() };
        context.enter(&item);
        let sealed = seal(context);
        let result = evaluator.evaluate_suppressed(expression, &sealed.bindings(), module_base.as_deref());
        let pairs = match decode_matcher(&result) {
            Matcher::Skip => Vec::new(),
            Matcher::Pattern(re) => match scan_line(&re, line) {
                Ok(pairs) => pairs,
                Err(e) => {
                    debug!(line = index, error = %e, "pattern failed to run, abandoning run");
                    return Ok(RunOutcome::NoOutput);
                }
            },
            Matcher::Invalid(reason) => {
                debug!(line = index, %reason, "unusable matcher, abandoning run");
                return Ok(RunOutcome::NoOutput);
            }
        };
        context = sealed.advance(&item, &pairs);

        selections.extend(
            pairs
                .into_iter()
                .map(|(start, end)| Selection::new(Position::new(index, start), Position::new(index, end))),
        );
        tokio::task::yield_now().await;
    }

    if token.is_cancelled() {
        return Ok(cancelled());
    }
    if selections.is_empty() {
        selections.push(Selection::caret(Position::new(0, 0)));
    }
    host.set_selections(selections).await?;
    Ok(RunOutcome::Applied)
}
