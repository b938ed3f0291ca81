use crate::cancel::CancellationToken;
use crate::context::{seal, ContextFields, TransformContext, TransformItem};
use crate::errors::HostError;
use crate::evaluator::Evaluator;
use crate::host::{DocumentHost, DocumentSnapshot, TextEdit};
use crate::shape::decode_replacement;

use super::{cancelled, prepare, RunOutcome};

/// Replace each selection with the truthy result evaluated for it.
///
/// Every selection is evaluated against the snapshot text, and all
/// replacements land in one edit batch.
pub async fn run_transform<H: DocumentHost>(
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
    let texts = snapshot.selection_texts();
    let mut context = TransformContext::new(&snapshot.text, texts.clone());
    let mut edits = Vec::new();

    for (index, (selection, text)) in snapshot.selections.iter().zip(texts).enumerate() {
        if token.is_cancelled() {
            return Ok(cancelled());
        }
        let item = TransformItem { index, text };
        context.enter(&item);
        let sealed = seal(context);
        let result = evaluator.evaluate_suppressed(expression, &sealed.bindings(), module_base.as_deref());
        context = sealed.advance(&item, &result);

        if let Some(text) = decode_replacement(&result) {
            edits.push(TextEdit { range: selection.range(), text });
        }
        tokio::task::yield_now().await;
    }

    if token.is_cancelled() {
        return Ok(cancelled());
    }
    if edits.is_empty() {
        return Ok(RunOutcome::NoOutput);
    }
    host.apply_edits(edits).await?;
    Ok(RunOutcome::Applied)
}
