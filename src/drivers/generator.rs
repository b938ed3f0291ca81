use tracing::debug;

use crate::cancel::CancellationToken;
use crate::context::{seal, ContextFields, GeneratorContext};
use crate::errors::HostError;
use crate::evaluator::{EvalOptions, Evaluator};
use crate::host::{DocumentHost, DocumentSnapshot};
use crate::shape::decode_generator_spec;
use crate::value::Value;

use super::{cancelled, prepare, RunOutcome};

/// Evaluate a `{iterations, func}` object once, call `func` per step, and insert
/// the concatenated output at the invocation cursor.
pub async fn run_generator<H: DocumentHost>(
    evaluator: &Evaluator,
    host: &H,
    snapshot: &DocumentSnapshot,
    expression: &str,
    token: &CancellationToken,
    max_iterations: usize,
) -> Result<RunOutcome, HostError> {
    if let Some(outcome) = prepare(host, snapshot, expression, token).await? {
        return Ok(outcome);
    }
    let module_base = host.file_path();
    let mut context = GeneratorContext::new(&snapshot.text);

    // Setup failures abort the whole run.
    let options = EvalOptions::propagate().with_module_base(module_base.clone());
    let setup = match evaluator.evaluate(expression, &seal(context.clone()).bindings(), &options) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "generator setup failed");
            return Ok(RunOutcome::NoOutput);
        }
    };
    let Some(spec) = decode_generator_spec(&setup, max_iterations) else {
        debug!("generator setup did not return {{iterations, func}}");
        return Ok(RunOutcome::NoOutput);
    };

    let mut output = String::new();
    for step in 1..=spec.iterations {
        if token.is_cancelled() {
            return Ok(cancelled());
        }
        context.enter(&step);
        let sealed = seal(context);
        // Re-evaluated so per-step side effects in the expression still run.
        evaluator.evaluate_suppressed(expression, &sealed.bindings(), module_base.as_deref());
        let args = vec![Value::Num(step as f64), sealed.last_result.deep_copy()];
        let produced = match evaluator.call(&spec.func, args) {
            Ok(value) => value,
            Err(e) => {
                debug!(step, error = %e, "generator step failed");
                Value::Undefined
            }
        };
        context = sealed.advance(&step, &produced);

        if !produced.is_nullish() {
            output.push_str(&produced.to_js_string());
        }
        tokio::task::yield_now().await;
    }

    if token.is_cancelled() || !snapshot.restore_unless_cancelled(host, token).await? {
        return Ok(cancelled());
    }
    if output.is_empty() {
        return Ok(RunOutcome::NoOutput);
    }
    host.insert(snapshot.cursor(), &output).await?;
    Ok(RunOutcome::Applied)
}
