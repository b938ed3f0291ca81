//! Per-iteration contexts and the seal/advance protocol that threads them.
//!
//! A driver owns a plain context value, seals it before handing its bindings
//! to the evaluator, then builds the next generation from the sealed copy with
//! [`Sealed::advance`]. Evaluated code only ever sees freshly built binding
//! values, so mutations it makes cannot leak into the driver's bookkeeping.
//! The one deliberate exception is `variables`, a scratch object shared by
//! reference across iterations of a run.

use std::ops::Deref;
use std::rc::Rc;

use crate::evaluator::Bindings;
use crate::shape::{auto_number, ToNumberOnly, ToTextOnly};
use crate::value::Value;

/// Field bookkeeping for one mode's context.
pub trait ContextFields: Clone {
    /// One driven item (a selection, a line, a step number).
    type Item;
    /// What evaluating against that item produced.
    type Outcome: ?Sized;

    /// Load the current-item fields.
    fn enter(&mut self, item: &Self::Item);
    /// Overwrite the carried `last*` fields.
    fn carry(&mut self, item: &Self::Item, outcome: &Self::Outcome);
    /// Reset per-iteration fields before the next item.
    fn clear_scratch(&mut self);
    /// The enumerated binding table visible to evaluated code.
    fn bindings(&self) -> Bindings;
}

/// A read-only generation of a context.
#[derive(Debug)]
pub struct Sealed<C>(Rc<C>);

pub fn seal<C: ContextFields>(context: C) -> Sealed<C> {
    Sealed(Rc::new(context))
}

impl<C: ContextFields> Sealed<C> {
    pub fn bindings(&self) -> Bindings {
        self.0.bindings()
    }

    /// The next generation: copy, carry, clear.
    pub fn advance(&self, item: &C::Item, outcome: &C::Outcome) -> C {
        let mut next = (*self.0).clone();
        next.carry(item, outcome);
        next.clear_scratch();
        next
    }
}

impl<C> Deref for Sealed<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.0
    }
}

fn opt_str(s: &Option<String>) -> Value {
    Value::string_or_undefined(s.as_deref())
}

fn opt_index(i: Option<usize>) -> Value {
    Value::number_or_undefined(i.map(|i| i as f64))
}

fn strings(items: &[String]) -> Value {
    Value::array(items.iter().map(|s| Value::str(s.as_str())).collect())
}

/* ===================== Transform ===================== */

#[derive(Debug, Clone)]
pub struct TransformItem {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TransformContext {
    pub current_document_text: String,
    pub all_selections: Vec<String>,
    pub variables: Value,

    pub current_selection: Option<String>,
    pub selection_index: Option<usize>,
    pub current_auto_number: Option<f64>,

    pub last_selection: Option<String>,
    pub last_result: Option<String>,
    pub last_auto_number: Option<f64>,
    pub last_result_auto_number: Option<f64>,
}

impl TransformContext {
    pub fn new(document_text: &str, all_selections: Vec<String>) -> Self {
        Self {
            current_document_text: document_text.to_string(),
            all_selections,
            variables: Value::empty_object(),
            current_selection: None,
            selection_index: None,
            current_auto_number: None,
            last_selection: None,
            last_result: None,
            last_auto_number: None,
            last_result_auto_number: None,
        }
    }
}

impl ContextFields for TransformContext {
    type Item = TransformItem;
    type Outcome = Value;

    fn enter(&mut self, item: &TransformItem) {
        self.current_selection = Some(item.text.clone());
        self.selection_index = Some(item.index);
        self.current_auto_number = auto_number(&item.text);
    }

    fn carry(&mut self, item: &TransformItem, outcome: &Value) {
        self.last_selection = Some(item.text.clone());
        self.last_auto_number = auto_number(&item.text);
        self.last_result = if outcome.is_nullish() { None } else { Some(outcome.to_js_string()) };
        self.last_result_auto_number = self.last_result.as_deref().and_then(auto_number);
    }

    fn clear_scratch(&mut self) {
        self.current_selection = None;
        self.selection_index = None;
        self.current_auto_number = None;
    }

    fn bindings(&self) -> Bindings {
        let mut b = Bindings::new();
        b.insert("currentDocumentText".into(), Value::str(self.current_document_text.as_str()));
        b.insert("allSelections".into(), strings(&self.all_selections));
        b.insert("currentSelection".into(), opt_str(&self.current_selection));
        b.insert("selectionIndex".into(), opt_index(self.selection_index));
        b.insert("currentAutoNumber".into(), Value::number_or_undefined(self.current_auto_number));
        b.insert("lastSelection".into(), opt_str(&self.last_selection));
        b.insert("lastResult".into(), opt_str(&self.last_result));
        b.insert("lastAutoNumber".into(), Value::number_or_undefined(self.last_auto_number));
        b.insert("lastResultAutoNumber".into(), Value::number_or_undefined(self.last_result_auto_number));
        b.insert("toNumberOnly".into(), Value::native(ToNumberOnly));
        b.insert("toTextOnly".into(), Value::native(ToTextOnly));
        b.insert("variables".into(), self.variables.clone());
        b
    }
}

/* ===================== Line selectors ===================== */

#[derive(Debug, Clone)]
pub struct LineItem {
    pub index: usize,
    pub text: String,
}

/// Shared by the line and regex-line selectors.
#[derive(Debug, Clone)]
pub struct LineContext {
    pub current_document_text: String,
    pub variables: Value,

    pub current_line_text: Option<String>,
    pub line_index: Option<usize>,

    pub last_line_text: Option<String>,
    /// `None` until the first line has been processed.
    pub last_results: Option<Vec<(usize, usize)>>,
}

impl LineContext {
    pub fn new(document_text: &str) -> Self {
        Self {
            current_document_text: document_text.to_string(),
            variables: Value::empty_object(),
            current_line_text: None,
            line_index: None,
            last_line_text: None,
            last_results: None,
        }
    }
}

impl ContextFields for LineContext {
    type Item = LineItem;
    type Outcome = [(usize, usize)];

    fn enter(&mut self, item: &LineItem) {
        self.current_line_text = Some(item.text.clone());
        self.line_index = Some(item.index);
    }

    fn carry(&mut self, item: &LineItem, outcome: &[(usize, usize)]) {
        self.last_line_text = Some(item.text.clone());
        self.last_results = Some(outcome.to_vec());
    }

    fn clear_scratch(&mut self) {
        self.current_line_text = None;
        self.line_index = None;
    }

    fn bindings(&self) -> Bindings {
        let last_results = match &self.last_results {
            Some(pairs) => Value::array(
                pairs
                    .iter()
                    .map(|(a, b)| Value::array(vec![Value::Num(*a as f64), Value::Num(*b as f64)]))
                    .collect(),
            ),
            None => Value::Undefined,
        };
        let mut b = Bindings::new();
        b.insert("currentDocumentText".into(), Value::str(self.current_document_text.as_str()));
        b.insert("currentLineText".into(), opt_str(&self.current_line_text));
        b.insert("lineIndex".into(), opt_index(self.line_index));
        b.insert("lastLineText".into(), opt_str(&self.last_line_text));
        b.insert("lastResults".into(), last_results);
        b.insert("variables".into(), self.variables.clone());
        b
    }
}

/* ===================== Generator ===================== */

#[derive(Debug, Clone)]
pub struct GeneratorContext {
    pub current_document_text: String,
    pub variables: Value,
    pub iteration_number: Option<usize>,
    pub last_result: Value,
}

impl GeneratorContext {
    pub fn new(document_text: &str) -> Self {
        Self {
            current_document_text: document_text.to_string(),
            variables: Value::empty_object(),
            iteration_number: None,
            last_result: Value::Undefined,
        }
    }
}

impl ContextFields for GeneratorContext {
    /// The 1-based step number.
    type Item = usize;
    type Outcome = Value;

    fn enter(&mut self, step: &usize) {
        self.iteration_number = Some(*step);
    }

    fn carry(&mut self, _step: &usize, outcome: &Value) {
        self.last_result = outcome.clone();
    }

    fn clear_scratch(&mut self) {
        self.iteration_number = None;
    }

    fn bindings(&self) -> Bindings {
        let mut b = Bindings::new();
        b.insert("currentDocumentText".into(), Value::str(self.current_document_text.as_str()));
        b.insert("lastResult".into(), self.last_result.deep_copy());
        b.insert("iterationNumber".into(), opt_index(self.iteration_number));
        b.insert("variables".into(), self.variables.clone());
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvalOptions, Evaluator};
    use pretty_assertions::assert_eq;

    #[test]
    fn advance_carries_and_clears() {
        let mut ctx = TransformContext::new("doc", vec!["item 4".into()]);
        let item = TransformItem { index: 0, text: "item 4".into() };
        ctx.enter(&item);
        assert_eq!(ctx.current_auto_number, Some(4.0));

        let sealed = seal(ctx);
        let next = sealed.advance(&item, &Value::str("item 5"));
        assert_eq!(next.last_selection.as_deref(), Some("item 4"));
        assert_eq!(next.last_auto_number, Some(4.0));
        assert_eq!(next.last_result_auto_number, Some(5.0));
        assert_eq!(next.current_selection, None);
        // the sealed generation is untouched
        assert_eq!(sealed.current_selection.as_deref(), Some("item 4"));
    }

    #[test]
    fn nullish_results_clear_last_result() {
        let ctx = TransformContext::new("", vec![]);
        let item = TransformItem { index: 0, text: "a".into() };
        let next = seal(ctx).advance(&item, &Value::Undefined);
        assert_eq!(next.last_result, None);
    }

    #[test]
    fn user_mutation_does_not_reach_the_context() {
        let mut ctx = LineContext::new("x");
        ctx.last_results = Some(vec![(0, 1)]);
        let sealed = seal(ctx);
        Evaluator::default()
            .evaluate("lastResults.push([5, 5]); lastResults[0][0] = 9", &sealed.bindings(), &EvalOptions::propagate())
            .unwrap();
        assert_eq!(sealed.last_results, Some(vec![(0, 1)]));
    }

    #[test]
    fn generator_last_result_is_copied_per_generation() {
        let ctx = GeneratorContext::new("");
        let produced = Value::array(vec![Value::Num(1.0)]);
        let next = seal(ctx).advance(&1, &produced);
        let bindings = next.bindings();
        if let Some(Value::Array(items)) = bindings.get("lastResult") {
            items.borrow_mut().push(Value::Num(2.0));
        }
        assert_eq!(next.last_result.to_js_string(), "1");
    }

    #[test]
    fn line_bindings_before_first_line() {
        let b = LineContext::new("").bindings();
        assert_eq!(b.get("lastResults"), Some(&Value::Undefined));
        assert_eq!(b.keys().cloned().collect::<Vec<_>>(), vec![
            "currentDocumentText", "currentLineText", "lineIndex", "lastLineText", "lastResults", "variables",
        ]);
    }
}
