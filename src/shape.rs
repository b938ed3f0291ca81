//! Result-shape helpers shared by the drivers.
//!
//! Each mode accepts a few result shapes from one evaluation slot; the
//! decoders here turn a raw [`Value`] into a tagged variant so the drivers
//! never branch on loosely typed values themselves.

use std::ops::RangeInclusive;
use std::rc::Rc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::Result;
use crate::functions::Function;
use crate::interpreter::{get_property, Interpreter};
use crate::value::{match_error, RegexValue, Value};

lazy_static! {
    static ref AUTO_NUMBER: Regex = Regex::new(r"[0-9]+(?:\.[0-9]+)?").unwrap();
}

/// The first decimal number in `text`, if any.
pub fn auto_number(text: &str) -> Option<f64> {
    AUTO_NUMBER.find(text).and_then(|m| m.as_str().parse().ok())
}

/// `text` with its first decimal number removed.
pub fn text_only(text: &str) -> String {
    match AUTO_NUMBER.find(text) {
        Some(m) => format!("{}{}", &text[..m.start()], &text[m.end()..]),
        None => text.to_string(),
    }
}

/// `toNumberOnly(str)`
pub struct ToNumberOnly;

impl Function for ToNumberOnly {
    fn name(&self) -> &'static str { "toNumberOnly" }
    fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
    fn call(&self, _: &mut Interpreter, args: &[Value]) -> Result<Value> {
        if !args[0].is_truthy() {
            return Ok(Value::Undefined);
        }
        Ok(Value::number_or_undefined(auto_number(&args[0].to_js_string())))
    }
}

/// `toTextOnly(str)`
pub struct ToTextOnly;

impl Function for ToTextOnly {
    fn name(&self) -> &'static str { "toTextOnly" }
    fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
    fn call(&self, _: &mut Interpreter, args: &[Value]) -> Result<Value> {
        if !args[0].is_truthy() {
            return Ok(Value::Undefined);
        }
        Ok(Value::Str(text_only(&args[0].to_js_string())))
    }
}

/* ===================== Transform ===================== */

/// Transform: a truthy result replaces the selection with its string form.
pub fn decode_replacement(value: &Value) -> Option<String> {
    value.is_truthy().then(|| value.to_js_string())
}

/* ===================== LineSelector ===================== */

pub type Pair = (usize, usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPairs {
    One(Pair),
    Many(Vec<Pair>),
    Mismatch,
}

impl SelectionPairs {
    pub fn into_vec(self) -> Vec<Pair> {
        match self {
            SelectionPairs::One(pair) => vec![pair],
            SelectionPairs::Many(pairs) => pairs,
            SelectionPairs::Mismatch => Vec::new(),
        }
    }
}

/// A non-empty array whose first element is not numeric is a list of pairs;
/// anything else is read as a single pair.
pub fn decode_selection_pairs(value: &Value) -> SelectionPairs {
    let first = match value {
        Value::Array(items) => items.borrow().first().cloned(),
        _ => None,
    };
    match first {
        Some(first) if first.to_number().is_nan() => {
            let items = value.as_array().map(|a| a.borrow().clone()).unwrap_or_default();
            SelectionPairs::Many(items.iter().filter_map(decode_pair).collect())
        }
        _ => decode_pair(value).map(SelectionPairs::One).unwrap_or(SelectionPairs::Mismatch),
    }
}

fn decode_pair(value: &Value) -> Option<Pair> {
    let items = value.as_array()?.borrow();
    let column = |v: Option<&Value>| {
        let n = v?.to_number();
        (n.is_finite() && n >= 0.0).then_some(n.trunc() as usize)
    };
    Some((column(items.first())?, column(items.get(1))?))
}

/* ===================== RegexLineSelector ===================== */

#[derive(Clone)]
pub enum Matcher {
    /// Nothing to match on this line.
    Skip,
    Pattern(Rc<RegexValue>),
    /// Fatal for the rest of the run.
    Invalid(String),
}

/// A regex is used as-is; a string compiles with the global flag.
pub fn decode_matcher(value: &Value) -> Matcher {
    match value {
        v if !v.is_truthy() => Matcher::Skip,
        Value::Regex(re) => Matcher::Pattern(re.clone()),
        Value::Str(source) => match RegexValue::new(source, "g") {
            Ok(re) => Matcher::Pattern(Rc::new(re)),
            Err(e) => Matcher::Invalid(e.to_string()),
        },
        other => Matcher::Invalid(format!("expected a RegExp or string, got {}", other.type_of())),
    }
}

/// Match spans on one line as character columns. Non-global patterns stop after the first match.
pub fn scan_line(re: &RegexValue, line: &str) -> Result<Vec<Pair>> {
    let column = |byte: usize| line[..byte].chars().count();
    let mut pairs = Vec::new();
    // The iterator already steps past empty matches.
    for m in re.regex.find_iter(line) {
        let m = m.map_err(match_error)?;
        pairs.push((column(m.start()), column(m.end())));
        if !re.is_global() {
            break;
        }
    }
    Ok(pairs)
}

/* ===================== Generator ===================== */

pub struct GeneratorSpec {
    pub iterations: usize,
    pub func: Value,
}

/// `{iterations, func}` with a finite count of at least one and a callable `func`.
pub fn decode_generator_spec(value: &Value, max_iterations: usize) -> Option<GeneratorSpec> {
    if !matches!(value, Value::Object(_)) {
        return None;
    }
    let count = get_property(value, "iterations").ok()?.to_number();
    if !count.is_finite() || count < 1.0 {
        return None;
    }
    let func = get_property(value, "func").ok()?;
    if !func.is_callable() {
        return None;
    }
    Some(GeneratorSpec { iterations: (count.trunc() as usize).min(max_iterations), func })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Bindings, EvalOptions, Evaluator};
    use pretty_assertions::assert_eq;

    fn value(src: &str) -> Value {
        Evaluator::default().evaluate(src, &Bindings::new(), &EvalOptions::propagate()).unwrap()
    }

    #[test]
    fn auto_number_finds_first_decimal() {
        assert_eq!(auto_number("item 12.5 of 30"), Some(12.5));
        assert_eq!(auto_number("v2"), Some(2.0));
        assert_eq!(auto_number("none"), None);
        assert_eq!(text_only("item 12.5 of 30"), "item  of 30");
        assert_eq!(text_only("plain"), "plain");
    }

    #[test]
    fn auto_number_ignores_non_ascii_digits() {
        assert_eq!(auto_number("٣ item 5"), Some(5.0));
        assert_eq!(text_only("٣ item 5"), "٣ item ");
        assert_eq!(auto_number("٣٤"), None);
    }

    proptest::proptest! {
        #[test]
        fn auto_number_splits_label_and_number(prefix in "[a-z ]{0,8}", n in 0u32..100_000, suffix in "[a-z ]{0,8}") {
            let label = format!("{prefix}{n}{suffix}");
            proptest::prop_assert_eq!(auto_number(&label), Some(n as f64));
            proptest::prop_assert_eq!(text_only(&label), format!("{prefix}{suffix}"));
        }
    }

    #[test]
    fn pair_disambiguation() {
        assert_eq!(decode_selection_pairs(&value("[0, 1]")), SelectionPairs::One((0, 1)));
        assert_eq!(decode_selection_pairs(&value("['2', '3']")), SelectionPairs::One((2, 3)));
        assert_eq!(
            decode_selection_pairs(&value("[[0, 1], [1, 2]]")),
            SelectionPairs::Many(vec![(0, 1), (1, 2)])
        );
        assert_eq!(decode_selection_pairs(&value("[[0, 1], [-1, 2]]")), SelectionPairs::Many(vec![(0, 1)]));
        assert_eq!(decode_selection_pairs(&value("[]")), SelectionPairs::Mismatch);
        assert_eq!(decode_selection_pairs(&value("'0,1'")), SelectionPairs::Mismatch);
        assert_eq!(decode_selection_pairs(&Value::Undefined), SelectionPairs::Mismatch);
    }

    #[test]
    fn matcher_decoding() {
        assert!(matches!(decode_matcher(&Value::Null), Matcher::Skip));
        assert!(matches!(decode_matcher(&Value::str("")), Matcher::Skip));
        assert!(matches!(decode_matcher(&Value::str("a+")), Matcher::Pattern(re) if re.is_global()));
        assert!(matches!(decode_matcher(&Value::str("(")), Matcher::Invalid(_)));
        assert!(matches!(decode_matcher(&Value::Num(3.0)), Matcher::Invalid(_)));
    }

    #[test]
    fn scanning_respects_the_global_flag() {
        let global = RegexValue::new("a", "g").unwrap();
        let once = RegexValue::new("a", "").unwrap();
        assert_eq!(scan_line(&global, "aba").unwrap(), vec![(0, 1), (2, 3)]);
        assert_eq!(scan_line(&once, "aba").unwrap(), vec![(0, 1)]);
        assert_eq!(scan_line(&global, "éa").unwrap(), vec![(1, 2)]);
        assert_eq!(scan_line(&RegexValue::new("x*", "g").unwrap(), "ab").unwrap(), vec![(0, 0), (1, 1), (2, 2)]);
        let behind = RegexValue::new("(?<=k)v", "g").unwrap();
        assert_eq!(scan_line(&behind, "kv v kv").unwrap(), vec![(1, 2), (6, 7)]);
    }

    #[test]
    fn generator_spec_decoding() {
        let spec = decode_generator_spec(&value("({iterations: '3.7', func: () => 1})"), 100).unwrap();
        assert_eq!(spec.iterations, 3);
        assert_eq!(decode_generator_spec(&value("({iterations: 1e9, func: () => 1})"), 100).unwrap().iterations, 100);
        assert!(decode_generator_spec(&value("({})"), 100).is_none());
        assert!(decode_generator_spec(&value("({iterations: 0, func: () => 1})"), 100).is_none());
        assert!(decode_generator_spec(&value("({iterations: 2})"), 100).is_none());
    }
}
