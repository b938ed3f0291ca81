//! Runs user expressions under the two calling conventions.
//!
//! Text is first tried as a script whose value is its last expression
//! statement (`currentSelection.toUpperCase()`); when that fails it is
//! retried as a function body so `return` works at top level.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::errors::{EvalError, Result};
use crate::expression::{parse_function_body, parse_script};
use crate::functions::Registry;
use crate::interpreter::{Interpreter, Limits, Scope};
use crate::modules::{FsModuleSource, ModuleLoader, ModuleSource, Require};
use crate::value::Value;

/// Names and values visible to evaluated code, in enumeration order.
pub type Bindings = IndexMap<String, Value>;

#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Log failures and yield `undefined` instead of returning the error.
    pub suppress_errors: bool,
    /// File that relative `require` requests resolve against.
    pub module_base: Option<PathBuf>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self { suppress_errors: true, module_base: None }
    }
}

impl EvalOptions {
    pub fn propagate() -> Self {
        Self { suppress_errors: false, module_base: None }
    }

    pub fn with_module_base(mut self, base: Option<PathBuf>) -> Self {
        self.module_base = base;
        self
    }
}

pub struct Evaluator {
    registry: Registry,
    limits: Limits,
    modules: Rc<ModuleLoader>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Registry::with_builtins(), Limits::default())
    }
}

impl Evaluator {
    pub fn new(registry: Registry, limits: Limits) -> Self {
        Self::with_module_source(registry, limits, Rc::new(FsModuleSource))
    }

    pub fn with_module_source(registry: Registry, limits: Limits, source: Rc<dyn ModuleSource>) -> Self {
        let modules = Rc::new(ModuleLoader::new(source, registry.clone()));
        Self { registry, limits, modules }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Evaluate `source` against `bindings`.
    pub fn evaluate(&self, source: &str, bindings: &Bindings, options: &EvalOptions) -> Result<Value> {
        match self.try_conventions(source, bindings, options) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "expression evaluation failed");
                if options.suppress_errors {
                    Ok(Value::Undefined)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Evaluate with errors logged and turned into `undefined`.
    pub fn evaluate_suppressed(&self, source: &str, bindings: &Bindings, module_base: Option<&Path>) -> Value {
        let options = EvalOptions::default().with_module_base(module_base.map(Path::to_path_buf));
        match self.evaluate(source, bindings, &options) {
            Ok(value) => value,
            // unreachable while suppress_errors is set
            Err(_) => Value::Undefined,
        }
    }

    /// Call a guest function value outside of any expression.
    pub fn call(&self, function: &Value, args: Vec<Value>) -> Result<Value> {
        let mut interp = Interpreter::new(self.limits);
        interp.call(function, Value::Undefined, args)
    }

    fn try_conventions(&self, source: &str, bindings: &Bindings, options: &EvalOptions) -> Result<Value> {
        let first = parse_script(source, self.limits.max_nesting_depth).and_then(|body| {
            let scope = self.global_scope(bindings, options);
            Interpreter::new(self.limits).run_script(&body, &scope)
        });
        match first {
            Ok(value) => Ok(value),
            // A blown budget is not a calling-convention problem; retrying would double the cost.
            Err(e @ EvalError::Limit(_)) => Err(e),
            Err(e) => {
                debug!(error = %e, "bare expression attempt failed, retrying as function body");
                let body = parse_function_body(source, self.limits.max_nesting_depth)?;
                let scope = self.global_scope(bindings, options);
                Interpreter::new(self.limits).run_function_body(&body, &scope)
            }
        }
    }

    // Each attempt gets its own scope so the retry never sees the first attempt's declarations.
    fn global_scope(&self, bindings: &Bindings, options: &EvalOptions) -> Rc<Scope> {
        let scope = Scope::root();
        self.registry.install(&scope);
        for (name, value) in bindings {
            scope.define(name.as_str(), value.clone());
        }
        if let Some(base) = &options.module_base {
            scope.define("require", Value::native(Require::new(base.clone(), self.modules.clone())));
        }
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::MemoryModuleSource;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn bindings(pairs: &[(&str, Value)]) -> Bindings {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn eval(src: &str, b: &Bindings) -> Result<Value> {
        Evaluator::default().evaluate(src, b, &EvalOptions::propagate())
    }

    #[test]
    fn bare_expression_convention() {
        let b = bindings(&[("currentSelection", Value::str("abc"))]);
        assert_eq!(eval("currentSelection.toUpperCase()", &b).unwrap(), Value::str("ABC"));
    }

    #[test]
    fn block_convention_allows_return() {
        let b = bindings(&[("n", Value::Num(3.0))]);
        let out = eval("if (n > 2) { return 'big' } return 'small'", &b).unwrap();
        assert_eq!(out, Value::str("big"));
    }

    #[test]
    fn object_literal_at_statement_start() {
        let out = eval("{iterations: 2, func: () => 'x'}", &Bindings::new()).unwrap();
        assert_eq!(crate::interpreter::get_property(&out, "iterations").unwrap(), Value::Num(2.0));
    }

    #[test]
    fn errors_are_suppressed_by_default() {
        let out = Evaluator::default()
            .evaluate("undefinedThing.x", &Bindings::new(), &EvalOptions::default())
            .unwrap();
        assert_eq!(out, Value::Undefined);
    }

    #[test]
    fn errors_propagate_on_request() {
        assert!(eval("(", &Bindings::new()).is_err());
        assert!(matches!(eval("throw new Error('no')", &Bindings::new()), Err(EvalError::Thrown(_))));
    }

    #[test]
    fn bindings_shadow_builtins() {
        let b = bindings(&[("Math", Value::Num(1.0))]);
        assert_eq!(eval("Math + 1", &b).unwrap(), Value::Num(2.0));
    }

    #[test]
    fn runaway_loops_hit_the_budget_once() {
        let evaluator = Evaluator::new(Registry::with_builtins(), Limits { max_call_depth: 32, max_loop_iterations: 1000, ..Limits::default() });
        let out = evaluator.evaluate("while (true) {}", &Bindings::new(), &EvalOptions::propagate());
        assert!(matches!(out, Err(EvalError::Limit(_))));
    }

    #[test]
    fn require_is_bound_when_a_base_is_known() {
        let source = MemoryModuleSource::new().with_file("/w/helpers.js", "exports.twice = s => s + s;");
        let evaluator = Evaluator::with_module_source(Registry::with_builtins(), Limits::default(), Rc::new(source));
        let options = EvalOptions::propagate().with_module_base(Some(PathBuf::from("/w/notes.txt")));
        let out = evaluator.evaluate("require('./helpers').twice('ab')", &Bindings::new(), &options).unwrap();
        assert_eq!(out.to_json(), Some(json!("abab")));

        let unbound = evaluator.evaluate("require('./helpers')", &Bindings::new(), &EvalOptions::propagate());
        assert!(unbound.is_err());
    }

    #[test]
    fn user_variables_object_is_shared() {
        let vars = Value::empty_object();
        let b = bindings(&[("variables", vars.clone())]);
        eval("variables.count = (variables.count || 0) + 1", &b).unwrap();
        eval("variables.count = (variables.count || 0) + 1", &b).unwrap();
        assert_eq!(crate::interpreter::get_property(&vars, "count").unwrap(), Value::Num(2.0));
    }
}
