use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::errors::Result;
use crate::interpreter::{type_error, Interpreter, Scope};
use crate::value::Value;

pub mod builtins;
pub mod methods;

/// Trait for host functions callable from evaluated code.
pub trait Function {
    fn name(&self) -> &'static str;
    fn arity(&self) -> RangeInclusive<usize>;
    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value>;

    /// Static members, for functions that double as namespaces (`Array.isArray`).
    fn property(&self, _key: &str) -> Option<Value> {
        None
    }
}

pub type NativeImpl = fn(&mut Interpreter, &[Value]) -> Result<Value>;

/// A function backed by a plain `fn` pointer.
pub struct NativeFn {
    name: &'static str,
    arity: RangeInclusive<usize>,
    imp: NativeImpl,
}

impl NativeFn {
    pub fn new(name: &'static str, arity: RangeInclusive<usize>, imp: NativeImpl) -> Self {
        Self { name, arity, imp }
    }
}

impl Function for NativeFn {
    fn name(&self) -> &'static str { self.name }
    fn arity(&self) -> RangeInclusive<usize> { self.arity.clone() }
    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
        (self.imp)(interp, args)
    }
}

/// A callable global that also carries static members, like `Number` or `Object`.
pub struct Namespace {
    call: Rc<dyn Function>,
    members: IndexMap<String, Value>,
}

impl Function for Namespace {
    fn name(&self) -> &'static str { self.call.name() }
    fn arity(&self) -> RangeInclusive<usize> { self.call.arity() }
    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
        self.call.call(interp, args)
    }
    fn property(&self, key: &str) -> Option<Value> {
        self.members.get(key).cloned()
    }
}

/// Function registry. Dotted paths (`Math.floor`) are grouped into namespaces on install.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Rc<HashMap<&'static str, Rc<dyn Function>>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn with_builtins() -> Self {
        let mut map: HashMap<&'static str, Rc<dyn Function>> = HashMap::new();
        builtins::register_all(&mut map);
        Self { inner: Rc::new(map) }
    }

    /// Register a global under its own name.
    pub fn register<F: Function + 'static>(&mut self, f: F) {
        let name = f.name();
        self.register_at(name, f);
    }

    /// Register under an explicit, possibly dotted, path.
    pub fn register_at<F: Function + 'static>(&mut self, path: &'static str, f: F) {
        let map = Rc::make_mut(&mut self.inner);
        map.insert(path, Rc::new(f));
    }

    pub fn get(&self, path: &str) -> Option<Rc<dyn Function>> {
        self.inner.get(path).cloned()
    }

    /// Define every registered function (and the numeric constants) in `scope`.
    pub fn install(&self, scope: &Scope) {
        let mut paths: Vec<&'static str> = self.inner.keys().copied().collect();
        paths.sort();

        let mut globals: IndexMap<&str, Rc<dyn Function>> = IndexMap::new();
        let mut namespaces: IndexMap<&str, IndexMap<String, Value>> = IndexMap::new();
        for path in paths {
            let Some(f) = self.inner.get(path) else { continue };
            match path.split_once('.') {
                Some((namespace, member)) => {
                    namespaces
                        .entry(namespace)
                        .or_default()
                        .insert(member.to_string(), Value::Native(f.clone()));
                }
                None => {
                    globals.insert(path, f.clone());
                }
            }
        }
        for (namespace, name, value) in builtins::CONSTANTS {
            if let Some(members) = namespaces.get_mut(namespace) {
                members.insert(name.to_string(), Value::Num(*value));
            }
        }

        for (namespace, members) in namespaces {
            let value = match globals.shift_remove(namespace) {
                Some(call) => Value::native(Namespace { call, members }),
                None => Value::object(members),
            };
            scope.define(namespace, value);
        }
        for (name, f) in globals {
            scope.define(name, Value::Native(f));
        }
        scope.define("NaN", Value::Num(f64::NAN));
        scope.define("Infinity", Value::Num(f64::INFINITY));
    }
}

/// `fn.bind(this, ...args)`.
pub struct Bound {
    target: Value,
    this: Value,
    args: Vec<Value>,
}

impl Bound {
    pub fn new(target: Value, this: Value, args: Vec<Value>) -> Self {
        Self { target, this, args }
    }
}

impl Function for Bound {
    fn name(&self) -> &'static str { "bound" }
    fn arity(&self) -> RangeInclusive<usize> { 0..=usize::MAX }
    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
        if !self.target.is_callable() {
            return Err(type_error("Bind must be called on a function"));
        }
        let mut all = self.args.clone();
        all.extend_from_slice(args);
        interp.call(&self.target, self.this.clone(), all)
    }
}
