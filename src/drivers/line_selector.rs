use crate::cancel::CancellationToken;
use crate::context::{seal, ContextFields, LineContext, LineItem};
use crate::errors::HostError;
use crate::evaluator::Evaluator;
use crate::host::{DocumentHost, DocumentSnapshot, Position, Selection};
use crate::shape::decode_selection_pairs;

use super::{cancelled, prepare, RunOutcome};

/// Build selections from `[start, end]` column pairs returned per line.
pub async fn run_line_selector<H: DocumentHost>(
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
        let pairs = decode_selection_pairs(&result).into_vec();
        context = sealed.advance(&item, &pairs);

        let width = line.chars().count();
        for (start, end) in pairs {
            selections.push(Selection::new(
                Position::new(index, start.min(width)),
                Position::new(index, end.min(width)),
            ));
        }
        tokio::task::yield_now().await;
    }

    if token.is_cancelled() {
        return Ok(cancelled());
    }
    if selections.is_empty() {
        return Ok(RunOutcome::NoOutput);
    }
    host.set_selections(selections).await?;
    Ok(RunOutcome::Applied)
}
