//! Tree-walking interpreter for the guest language.
//!
//! Scopes are reference-counted frames so closures can keep their defining
//! scope alive. Every evaluation gets a fresh [`Interpreter`] with its own
//! call-depth and loop budgets.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

use crate::ast::{Arg, BinaryOp, DeclKind, Expr, FnBody, LogicalOp, Prop, PropKey, Stmt, UnaryOp, UpdateOp};
use crate::comparison::{compare, loose_equals, strict_equals, to_primitive};
use crate::errors::{EvalError, Result};
use crate::functions::methods;
use crate::value::{Closure, RegexValue, Value};

/// Budgets that keep live-typed expressions from hanging the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_call_depth: usize,
    pub max_loop_iterations: u64,
    /// Parser nesting budget; also bounds how deep evaluation recurses into the tree.
    pub max_nesting_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_call_depth: 256, max_loop_iterations: 1_000_000, max_nesting_depth: 128 }
    }
}

struct Binding {
    value: Value,
    mutable: bool,
}

/// One frame of lexical bindings.
pub struct Scope {
    vars: RefCell<IndexMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
    // `var` declarations land in the nearest function (or root) frame.
    function_boundary: bool,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope { vars: RefCell::new(IndexMap::new()), parent: None, function_boundary: true })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(IndexMap::new()),
            parent: Some(parent.clone()),
            function_boundary: false,
        })
    }

    fn function_child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(IndexMap::new()),
            parent: Some(parent.clone()),
            function_boundary: true,
        })
    }

    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), Binding { value, mutable: true });
    }

    pub fn define_const(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), Binding { value, mutable: false });
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref()?.get(name)
    }

    fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    // Assigning an undeclared name creates it on the root frame.
    fn assign(&self, name: &str, value: Value) -> Result<()> {
        let mut current = self;
        loop {
            {
                let mut vars = current.vars.borrow_mut();
                if let Some(binding) = vars.get_mut(name) {
                    if !binding.mutable {
                        return Err(type_error("Assignment to constant variable."));
                    }
                    binding.value = value;
                    return Ok(());
                }
            }
            match &current.parent {
                Some(parent) => current = parent.as_ref(),
                None => {
                    current.define(name, value);
                    return Ok(());
                }
            }
        }
    }

    fn var_scope(self: &Rc<Self>) -> Rc<Scope> {
        let mut current = self.clone();
        while !current.function_boundary {
            match &current.parent {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }
        current
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

enum Reference {
    Var(String),
    Prop(Value, String),
}

pub struct Interpreter {
    limits: Limits,
    depth: usize,
    loop_budget: u64,
    completion: Value,
    rng_state: u64,
}

impl Interpreter {
    pub fn new(limits: Limits) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x1234_5678);
        Self {
            limits,
            depth: 0,
            loop_budget: limits.max_loop_iterations,
            completion: Value::Undefined,
            rng_state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Run top-level statements; the result is the value of the last expression statement.
    pub fn run_script(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Value> {
        self.completion = Value::Undefined;
        match self.exec_body(body, scope)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(std::mem::take(&mut self.completion)),
        }
    }

    /// Run statements as a function body; the result is the `return`ed value.
    pub fn run_function_body(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Value> {
        match self.exec_body(body, scope)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    pub fn call(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, this, args),
            Value::Native(f) => {
                let mut args = args;
                let min = *f.arity().start();
                if args.len() < min {
                    args.resize(min, Value::Undefined);
                }
                f.call(self, &args)
            }
            other => Err(type_error(format!("{} is not a function", other.type_of()))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, this: Value, args: Vec<Value>) -> Result<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(EvalError::Limit("Maximum call stack size exceeded".into()));
        }
        let def = &closure.def;
        let scope = Scope::function_child(&closure.env);
        if let Some(name) = &def.name {
            scope.define(name.clone(), Value::Closure(closure.clone()));
        }
        if !def.is_arrow {
            scope.define("this", this);
        }
        let mut args = args.into_iter();
        for param in &def.params {
            scope.define(param.clone(), args.next().unwrap_or_default());
        }
        if let Some(rest) = &def.rest {
            scope.define(rest.clone(), Value::array(args.collect()));
        }

        self.depth += 1;
        let saved_completion = std::mem::take(&mut self.completion);
        let result = match &def.body {
            FnBody::Expr(expr) => self.eval(expr, &scope),
            FnBody::Block(body) => self.run_function_body(body, &scope),
        };
        self.completion = saved_completion;
        self.depth -= 1;
        result
    }

    /// A pseudo-random number in [0, 1) for `Math.random`.
    pub fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }

    fn tick_loop(&mut self) -> Result<()> {
        if self.loop_budget == 0 {
            return Err(EvalError::Limit("loop iteration budget exhausted".into()));
        }
        self.loop_budget -= 1;
        Ok(())
    }

    /* ===================== Statements ===================== */

    fn exec_body(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Flow> {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = Closure { def: def.clone(), env: scope.clone() };
                    scope.define(name.clone(), Value::Closure(Rc::new(closure)));
                }
            }
        }
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.completion = self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Declare { kind, decls } => {
                for (name, init) in decls {
                    let target = if *kind == DeclKind::Var { scope.var_scope() } else { scope.clone() };
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None if *kind == DeclKind::Var && target.has_own(name) => continue,
                        None => Value::Undefined,
                    };
                    if *kind == DeclKind::Const {
                        target.define_const(name.clone(), value);
                    } else {
                        target.define(name.clone(), value);
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => self.exec_body(body, &Scope::child(scope)),
            Stmt::If { test, consequent, alternate } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.exec(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                loop {
                    self.tick_loop()?;
                    if !self.eval(test, scope)?.is_truthy() {
                        break;
                    }
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    self.tick_loop()?;
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if !self.eval(test, scope)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { init, test, update, body } => {
                let loop_scope = Scope::child(scope);
                if let Some(init) = init {
                    self.exec(init, &loop_scope)?;
                }
                loop {
                    self.tick_loop()?;
                    if let Some(test) = test {
                        if !self.eval(test, &loop_scope)?.is_truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &loop_scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf { kind, name, iterable, body } => {
                let iterable = self.eval(iterable, scope)?;
                let items = self.iterate(&iterable)?;
                self.exec_each(*kind, name, items, body, scope)
            }
            Stmt::ForIn { kind, name, object, body } => {
                let keys = own_keys(&self.eval(object, scope)?).into_iter().map(Value::Str).collect();
                self.exec_each(*kind, name, keys, body, scope)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(expr) => Err(EvalError::Thrown(self.eval(expr, scope)?)),
            Stmt::Try { block, param, handler, finalizer } => {
                let outcome = self.exec_body(block, &Scope::child(scope));
                let outcome = match (outcome, handler) {
                    // Budget exhaustion is not catchable.
                    (Err(err), Some(handler)) if !matches!(err, EvalError::Limit(_)) => {
                        let catch_scope = Scope::child(scope);
                        if let Some(param) = param {
                            catch_scope.define(param.clone(), err.into_thrown_value());
                        }
                        self.exec_body(handler, &catch_scope)
                    }
                    (other, _) => other,
                };
                if let Some(finalizer) = finalizer {
                    match self.exec_body(finalizer, &Scope::child(scope))? {
                        Flow::Normal => {}
                        overriding => return Ok(overriding),
                    }
                }
                outcome
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_each(
        &mut self,
        kind: DeclKind,
        name: &str,
        items: Vec<Value>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Result<Flow> {
        for item in items {
            self.tick_loop()?;
            let iteration_scope = Scope::child(scope);
            if kind == DeclKind::Const {
                iteration_scope.define_const(name, item);
            } else {
                iteration_scope.define(name, item);
            }
            match self.exec(body, &iteration_scope)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Continue | Flow::Normal => {}
            }
        }
        Ok(Flow::Normal)
    }

    /* ===================== Expressions ===================== */

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value> {
        match expr {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::This => Ok(scope.get("this").unwrap_or_default()),
            Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(expr) = exprs.get(i) {
                        out.push_str(&self.eval(expr, scope)?.to_js_string());
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Regex { pattern, flags } => Ok(Value::Regex(Rc::new(RegexValue::new(pattern, flags)?))),
            Expr::Ident(name) => scope
                .get(name)
                .ok_or_else(|| EvalError::Runtime(format!("ReferenceError: {name} is not defined"))),
            Expr::Array(items) => Ok(Value::array(self.eval_args(items, scope)?)),
            Expr::Object(props) => self.eval_object(props, scope),
            Expr::Function(def) => Ok(Value::Closure(Rc::new(Closure { def: def.clone(), env: scope.clone() }))),
            Expr::Member { object, property, optional } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                get_property(&object, property)
            }
            Expr::Index { object, index, optional } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = property_key(&self.eval(index, scope)?);
                get_property(&object, &key)
            }
            Expr::Call { callee, args, optional } => self.eval_call(callee, args, *optional, scope),
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                match &constructor {
                    Value::Native(_) => self.call(&constructor, Value::Undefined, args),
                    Value::Closure(closure) if !closure.def.is_arrow => {
                        let instance = Value::empty_object();
                        let result = self.call_closure(closure, instance.clone(), args)?;
                        Ok(match result {
                            Value::Object(_) | Value::Array(_) => result,
                            _ => instance,
                        })
                    }
                    _ => Err(type_error(format!("{} is not a constructor", describe(callee)))),
                }
            }
            Expr::Unary { op, expr } => {
                if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, expr.as_ref()) {
                    let value = scope.get(name).unwrap_or_default();
                    return Ok(Value::str(value.type_of()));
                }
                let value = self.eval(expr, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Num(-value.to_number()),
                    UnaryOp::Plus => Value::Num(value.to_number()),
                    UnaryOp::BitNot => Value::Num(!to_int32(value.to_number()) as f64),
                    UnaryOp::TypeOf => Value::str(value.type_of()),
                    UnaryOp::Void => Value::Undefined,
                })
            }
            Expr::Update { op, prefix, target } => {
                let reference = self.resolve_ref(target, scope)?;
                let old = self.read_ref(&reference, scope)?.to_number();
                let new = match op {
                    UpdateOp::Inc => old + 1.0,
                    UpdateOp::Dec => old - 1.0,
                };
                self.write_ref(reference, Value::Num(new), scope)?;
                Ok(Value::Num(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional { test, consequent, alternate } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let reference = self.resolve_ref(target, scope)?;
                let value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.read_ref(&reference, scope)?;
                        let rhs = self.eval(value, scope)?;
                        binary(*op, &current, &rhs)?
                    }
                };
                self.write_ref(reference, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Arg], optional: bool, scope: &Rc<Scope>) -> Result<Value> {
        let (receiver, key, member_optional) = match callee {
            Expr::Member { object, property, optional } => {
                (self.eval(object, scope)?, property.clone(), *optional)
            }
            Expr::Index { object, index, optional } => {
                let receiver = self.eval(object, scope)?;
                let key = property_key(&self.eval(index, scope)?);
                (receiver, key, *optional)
            }
            _ => {
                let function = self.eval(callee, scope)?;
                if optional && function.is_nullish() {
                    return Ok(Value::Undefined);
                }
                if !function.is_callable() {
                    return Err(type_error(format!("{} is not a function", describe(callee))));
                }
                let args = self.eval_args(args, scope)?;
                return self.call(&function, Value::Undefined, args);
            }
        };
        if member_optional && receiver.is_nullish() {
            return Ok(Value::Undefined);
        }
        if optional && own_property(&receiver, &key).is_none() && !methods::has_method(&receiver, &key) {
            return Ok(Value::Undefined);
        }
        let args = self.eval_args(args, scope)?;
        self.call_member(receiver, &key, args)
    }

    /// `receiver.key(args)`: own callable properties first, then built-in methods.
    pub fn call_member(&mut self, receiver: Value, key: &str, args: Vec<Value>) -> Result<Value> {
        if receiver.is_nullish() {
            return Err(type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                receiver.to_js_string()
            )));
        }
        if let Some(function) = own_property(&receiver, key) {
            if function.is_callable() {
                return self.call(&function, receiver, args);
            }
            return Err(type_error(format!("{key} is not a function")));
        }
        methods::call_method(self, &receiver, key, args)
    }

    pub fn eval_args(&mut self, args: &[Arg], scope: &Rc<Scope>) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Plain(expr) => out.push(self.eval(expr, scope)?),
                Arg::Spread(expr) => {
                    let value = self.eval(expr, scope)?;
                    out.extend(self.iterate(&value)?);
                }
            }
        }
        Ok(out)
    }

    fn eval_object(&mut self, props: &[Prop], scope: &Rc<Scope>) -> Result<Value> {
        let mut fields = IndexMap::new();
        for prop in props {
            match prop {
                Prop::Init(key, expr) => {
                    let key = match key {
                        PropKey::Static(name) => name.clone(),
                        PropKey::Computed(expr) => property_key(&self.eval(expr, scope)?),
                    };
                    let value = self.eval(expr, scope)?;
                    fields.insert(key, value);
                }
                Prop::Spread(expr) => {
                    let source = self.eval(expr, scope)?;
                    for key in own_keys(&source) {
                        let value = get_property(&source, &key)?;
                        fields.insert(key, value);
                    }
                }
            }
        }
        Ok(Value::object(fields))
    }

    /// Values produced by `for...of` and spread.
    pub fn iterate(&self, value: &Value) -> Result<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(type_error(format!("{} is not iterable", other.to_js_string()))),
        }
    }

    fn resolve_ref(&mut self, target: &Expr, scope: &Rc<Scope>) -> Result<Reference> {
        match target {
            Expr::Ident(name) => Ok(Reference::Var(name.clone())),
            Expr::Member { object, property, .. } => {
                Ok(Reference::Prop(self.eval(object, scope)?, property.clone()))
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let key = property_key(&self.eval(index, scope)?);
                Ok(Reference::Prop(object, key))
            }
            _ => Err(EvalError::Runtime("SyntaxError: Invalid assignment target".into())),
        }
    }

    fn read_ref(&self, reference: &Reference, scope: &Rc<Scope>) -> Result<Value> {
        match reference {
            Reference::Var(name) => scope
                .get(name)
                .ok_or_else(|| EvalError::Runtime(format!("ReferenceError: {name} is not defined"))),
            Reference::Prop(object, key) => get_property(object, key),
        }
    }

    fn write_ref(&self, reference: Reference, value: Value, scope: &Rc<Scope>) -> Result<()> {
        match reference {
            Reference::Var(name) => scope.assign(&name, value),
            Reference::Prop(object, key) => set_property(&object, &key, value),
        }
    }
}

/* ===================== Property access ===================== */

pub(crate) fn type_error(msg: impl Into<String>) -> EvalError {
    EvalError::Runtime(format!("TypeError: {}", msg.into()))
}

pub fn property_key(value: &Value) -> String {
    value.to_js_string()
}

// Properties stored on the value itself (object fields, namespace members).
fn own_property(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(fields) => fields.borrow().get(key).cloned(),
        Value::Native(f) => f.property(key),
        _ => None,
    }
}

pub fn get_property(object: &Value, key: &str) -> Result<Value> {
    Ok(match object {
        Value::Undefined | Value::Null => {
            return Err(type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                object.to_js_string()
            )))
        }
        Value::Str(s) => match key {
            "length" => Value::Num(s.chars().count() as f64),
            _ => match key.parse::<usize>() {
                Ok(i) => s.chars().nth(i).map(|c| Value::Str(c.to_string())).unwrap_or_default(),
                Err(_) => Value::Undefined,
            },
        },
        Value::Array(items) => {
            let items = items.borrow();
            match key {
                "length" => Value::Num(items.len() as f64),
                _ => match key.parse::<usize>() {
                    Ok(i) => items.get(i).cloned().unwrap_or_default(),
                    Err(_) => Value::Undefined,
                },
            }
        }
        Value::Object(fields) => fields.borrow().get(key).cloned().unwrap_or_default(),
        Value::Regex(re) => match key {
            "source" => Value::str(re.source.as_str()),
            "flags" => Value::str(re.flags.as_str()),
            "global" => Value::Bool(re.is_global()),
            "ignoreCase" => Value::Bool(re.flags.contains('i')),
            "multiline" => Value::Bool(re.flags.contains('m')),
            "lastIndex" => Value::Num(0.0),
            _ => Value::Undefined,
        },
        Value::Closure(c) => match key {
            "name" => Value::str(c.def.name.clone().unwrap_or_default()),
            "length" => Value::Num(c.def.params.len() as f64),
            _ => Value::Undefined,
        },
        Value::Native(f) => match key {
            "name" => Value::str(f.name()),
            "length" => Value::Num(*f.arity().start() as f64),
            _ => f.property(key).unwrap_or_default(),
        },
        Value::Bool(_) | Value::Num(_) => Value::Undefined,
    })
}

pub fn set_property(object: &Value, key: &str, value: Value) -> Result<()> {
    match object {
        Value::Undefined | Value::Null => Err(type_error(format!(
            "Cannot set properties of {} (setting '{key}')",
            object.to_js_string()
        ))),
        Value::Object(fields) => {
            fields.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            if key == "length" {
                let len = value.to_number();
                if len < 0.0 || len.fract() != 0.0 || !len.is_finite() {
                    return Err(EvalError::Runtime("RangeError: Invalid array length".into()));
                }
                items.resize(len as usize, Value::Undefined);
            } else if let Ok(i) = key.parse::<usize>() {
                if i >= items.len() {
                    items.resize(i + 1, Value::Undefined);
                }
                items[i] = value;
            }
            Ok(())
        }
        // Writes to primitives are silently dropped.
        _ => Ok(()),
    }
}

/// Keys seen by `for...in`, `Object.keys` and object spread.
pub fn own_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(fields) => fields.borrow().keys().cloned().collect(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member { object, property, .. } => format!("{}.{}", describe(object), property),
        Expr::This => "this".to_string(),
        _ => "expression".to_string(),
    }
}

/* ===================== Operators ===================== */

pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let num = |f: fn(f64, f64) -> f64| Value::Num(f(left.to_number(), right.to_number()));
    Ok(match op {
        BinaryOp::Add => {
            let (l, r) = (to_primitive(left), to_primitive(right));
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                Value::Str(l.to_js_string() + &r.to_js_string())
            } else {
                Value::Num(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => num(|a, b| a - b),
        BinaryOp::Mul => num(|a, b| a * b),
        BinaryOp::Div => num(|a, b| a / b),
        BinaryOp::Rem => num(|a, b| a % b),
        BinaryOp::Pow => num(f64::powf),
        BinaryOp::Eq => Value::Bool(loose_equals(left, right)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(left, right)),
        BinaryOp::StrictEq => Value::Bool(strict_equals(left, right)),
        BinaryOp::StrictNotEq => Value::Bool(!strict_equals(left, right)),
        BinaryOp::Lt => Value::Bool(compare(left, right).is_some_and(|o| o.is_lt())),
        BinaryOp::LtEq => Value::Bool(compare(left, right).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Value::Bool(compare(left, right).is_some_and(|o| o.is_gt())),
        BinaryOp::GtEq => Value::Bool(compare(left, right).is_some_and(|o| o.is_ge())),
        BinaryOp::BitAnd => Value::Num((to_int32(left.to_number()) & to_int32(right.to_number())) as f64),
        BinaryOp::BitOr => Value::Num((to_int32(left.to_number()) | to_int32(right.to_number())) as f64),
        BinaryOp::BitXor => Value::Num((to_int32(left.to_number()) ^ to_int32(right.to_number())) as f64),
        BinaryOp::Shl => {
            Value::Num(to_int32(left.to_number()).wrapping_shl(to_uint32(right.to_number()) & 31) as f64)
        }
        BinaryOp::Shr => {
            Value::Num(to_int32(left.to_number()).wrapping_shr(to_uint32(right.to_number()) & 31) as f64)
        }
        BinaryOp::UShr => {
            Value::Num(to_uint32(left.to_number()).wrapping_shr(to_uint32(right.to_number()) & 31) as f64)
        }
        BinaryOp::In => match right {
            Value::Object(_) | Value::Array(_) => {
                let key = property_key(left);
                Value::Bool(own_keys(right).contains(&key) || (key == "length" && right.as_array().is_some()))
            }
            other => {
                return Err(type_error(format!(
                    "Cannot use 'in' operator to search for '{}' in {}",
                    left.to_js_string(),
                    other.to_js_string()
                )))
            }
        },
        BinaryOp::InstanceOf => Value::Bool(instance_of(left, right)?),
    })
}

fn instance_of(value: &Value, constructor: &Value) -> Result<bool> {
    match constructor {
        Value::Native(f) => Ok(match f.name() {
            "Array" => matches!(value, Value::Array(_)),
            "RegExp" => matches!(value, Value::Regex(_)),
            "Object" => matches!(value, Value::Object(_) | Value::Array(_) | Value::Regex(_)) || value.is_callable(),
            "Function" => value.is_callable(),
            name if name.ends_with("Error") => match value {
                Value::Object(fields) => fields
                    .borrow()
                    .get("name")
                    .is_some_and(|n| name == "Error" || n.as_str() == Some(name)),
                _ => false,
            },
            _ => false,
        }),
        Value::Closure(_) => Ok(false),
        _ => Err(type_error("Right-hand side of 'instanceof' is not callable")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_function_body, parse_script};
    use crate::functions::Registry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(src: &str) -> Result<Value> {
        let scope = Scope::root();
        Registry::with_builtins().install(&scope);
        let body = parse_script(src, Limits::default().max_nesting_depth)?;
        Interpreter::new(Limits::default()).run_script(&body, &scope)
    }

    fn run_json(src: &str) -> serde_json::Value {
        run(src).unwrap().to_json().unwrap_or(serde_json::Value::Null)
    }

    #[test]
    fn completion_value_is_last_expression_statement() {
        assert_eq!(run_json("let a = 2; a * 3"), json!(6));
        assert_eq!(run_json("if (true) { 'yes' } else { 'no' }"), json!("yes"));
    }

    #[test]
    fn closures_capture_by_reference() {
        assert_eq!(run_json("let n = 0; const inc = () => ++n; inc(); inc(); n"), json!(2));
    }

    #[test]
    fn function_calls_do_not_clobber_completion() {
        assert_eq!(run_json("function f() { 99; } 1; let x = f(); "), json!(1));
    }

    #[test]
    fn string_concatenation_and_arithmetic() {
        assert_eq!(run_json("'a' + 1 + 2"), json!("a12"));
        assert_eq!(run_json("1 + 2 + 'a'"), json!("3a"));
        assert_eq!(run_json("7 % 3 + 2 ** 3"), json!(9));
        assert_eq!(run_json("[1, 2] + ''"), json!("1,2"));
    }

    #[test]
    fn loops_and_control_flow() {
        assert_eq!(
            run_json("let s = 0; for (let i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; s += i } s"),
            json!(12)
        );
        assert_eq!(run_json("let out = ''; for (const c of 'abc') out = c + out; out"), json!("cba"));
        assert_eq!(run_json("let k = []; for (const key in {a: 1, b: 2}) k.push(key); k"), json!(["a", "b"]));
    }

    #[test]
    fn try_catch_binds_thrown_value() {
        assert_eq!(run_json("try { throw {code: 7} } catch (e) { e.code }"), json!(7));
        assert_eq!(run_json("try { null.x } catch (e) { e.name }"), json!("Error"));
        assert_eq!(run_json("let r = 0; try { r = 1 } finally { r = 2 } r"), json!(2));
    }

    #[test]
    fn uncaught_throw_is_an_error() {
        assert!(matches!(run("throw 'boom'"), Err(EvalError::Thrown(Value::Str(s))) if s == "boom"));
    }

    #[test]
    fn reference_errors() {
        assert!(matches!(run("missing + 1"), Err(EvalError::Runtime(m)) if m.contains("missing is not defined")));
        assert_eq!(run_json("typeof missing"), json!("undefined"));
    }

    #[test]
    fn const_cannot_be_reassigned() {
        assert!(run("const a = 1; a = 2").is_err());
    }

    #[test]
    fn loop_budget_stops_runaway_loops() {
        let scope = Scope::root();
        let body = parse_script("while (true) {}", 16).unwrap();
        let limits = Limits { max_call_depth: 8, max_loop_iterations: 100, max_nesting_depth: 16 };
        assert!(matches!(Interpreter::new(limits).run_script(&body, &scope), Err(EvalError::Limit(_))));
    }

    #[test]
    fn call_depth_is_bounded() {
        let scope = Scope::root();
        let body = parse_script("function f() { return f() } f()", 16).unwrap();
        let limits = Limits { max_call_depth: 16, max_loop_iterations: 100, max_nesting_depth: 16 };
        assert!(matches!(Interpreter::new(limits).run_script(&body, &scope), Err(EvalError::Limit(_))));
    }

    #[test]
    fn function_body_returns() {
        let scope = Scope::root();
        scope.define("x", Value::Bool(false));
        let body = parse_function_body("if (x) { return 1; } return 2;", 16).unwrap();
        let out = Interpreter::new(Limits::default()).run_function_body(&body, &scope).unwrap();
        assert_eq!(out, Value::Num(2.0));
    }

    #[test]
    fn methods_and_this() {
        assert_eq!(run_json("const o = { n: 4, get() { return this.n } }; o.get()"), json!(4));
        assert_eq!(run_json("function P(x) { this.x = x } const p = new P(3); p.x"), json!(3));
    }

    #[test]
    fn optional_chaining_and_nullish() {
        assert_eq!(run_json("let o = null; o?.a ?? 'd'"), json!("d"));
        assert_eq!(run_json("({a: {b: 1}}).a?.b"), json!(1));
        assert_eq!(run_json("({}).f?.()"), serde_json::Value::Null);
    }

    #[test]
    fn spread_and_templates() {
        assert_eq!(run_json("const a = [1, 2]; [...a, 3]"), json!([1, 2, 3]));
        assert_eq!(run_json("const o = {a: 1}; ({...o, b: 2})"), json!({"a": 1, "b": 2}));
        assert_eq!(run_json("const n = 2; `n=${n + 1}`"), json!("n=3"));
    }

    #[test]
    fn assignment_to_members_and_indexes() {
        assert_eq!(run_json("const a = []; a[2] = 'x'; a.length"), json!(3));
        assert_eq!(run_json("const o = {c: 1}; o.c += 4; o['c']++; o.c"), json!(6));
    }

    #[test]
    fn instanceof_and_in() {
        assert_eq!(run_json("[[] instanceof Array, /a/ instanceof RegExp, 'a' in {a: 1}]"), json!([true, true, true]));
    }
}
