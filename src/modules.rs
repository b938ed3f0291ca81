//! `require(...)` support: module resolution, loading and caching.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::errors::{EvalError, Result};
use crate::expression::parse_function_body;
use crate::functions::{Function, Registry};
use crate::interpreter::{get_property, Interpreter, Scope};
use crate::value::Value;

/// Where module text comes from.
pub trait ModuleSource {
    fn read_text(&self, path: &Path) -> std::io::Result<String>;
    fn is_file(&self, path: &Path) -> bool;
}

/// Modules on the real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsModuleSource;

impl ModuleSource for FsModuleSource {
    fn read_text(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// In-memory module tree, used by tests and embedders.
#[derive(Debug, Default, Clone)]
pub struct MemoryModuleSource {
    files: HashMap<PathBuf, String>,
}

impl MemoryModuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.files.insert(normalize(&path.into()), text.into());
        self
    }
}

impl ModuleSource for MemoryModuleSource {
    fn read_text(&self, path: &Path) -> std::io::Result<String> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }
}

// Lexically collapse `.` and `..` so equal paths hash equally.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves, evaluates and caches modules. Shared by every `require` in an evaluator.
pub struct ModuleLoader {
    source: Rc<dyn ModuleSource>,
    registry: Registry,
    cache: RefCell<HashMap<PathBuf, Value>>,
    loading: RefCell<HashSet<PathBuf>>,
}

impl ModuleLoader {
    pub fn new(source: Rc<dyn ModuleSource>, registry: Registry) -> Self {
        Self {
            source,
            registry,
            cache: RefCell::new(HashMap::new()),
            loading: RefCell::new(HashSet::new()),
        }
    }

    /// Resolve `request` relative to the module (or document) at `base`.
    pub fn resolve(&self, base: &Path, request: &str) -> Result<PathBuf> {
        let dir = base.parent().unwrap_or_else(|| Path::new("."));
        let is_path = request.starts_with("./") || request.starts_with("../") || Path::new(request).is_absolute();
        let roots: Vec<PathBuf> = if is_path {
            vec![dir.join(request)]
        } else {
            dir.ancestors().map(|d| d.join("node_modules").join(request)).collect()
        };
        for root in roots {
            if let Some(found) = self.resolve_candidate(&normalize(&root)) {
                return Ok(found);
            }
        }
        Err(EvalError::Module(format!("Cannot find module '{request}' from '{}'", base.display())))
    }

    fn resolve_candidate(&self, root: &Path) -> Option<PathBuf> {
        let with_ext = |ext: &str| {
            let mut s = root.as_os_str().to_owned();
            s.push(ext);
            PathBuf::from(s)
        };
        let mut candidates = vec![root.to_path_buf(), with_ext(".js"), with_ext(".json")];
        if let Some(main) = self.package_main(root) {
            candidates.push(normalize(&root.join(main)));
        }
        candidates.push(root.join("index.js"));
        candidates.into_iter().find(|p| self.source.is_file(p))
    }

    fn package_main(&self, dir: &Path) -> Option<String> {
        let text = self.source.read_text(&dir.join("package.json")).ok()?;
        let json: serde_json::Value = serde_json::from_str(&text).ok()?;
        json.get("main")?.as_str().map(str::to_string)
    }

    /// Evaluate the module at `path` (once) and return its exports.
    pub fn load(self: &Rc<Self>, interp: &mut Interpreter, path: &Path) -> Result<Value> {
        if let Some(exports) = self.cache.borrow().get(path) {
            return Ok(exports.clone());
        }
        if !self.loading.borrow_mut().insert(path.to_path_buf()) {
            return Err(EvalError::Module(format!("circular require of '{}'", path.display())));
        }
        debug!(path = %path.display(), "loading module");
        let result = self.evaluate_module(interp, path);
        self.loading.borrow_mut().remove(path);
        let exports = result?;
        self.cache.borrow_mut().insert(path.to_path_buf(), exports.clone());
        Ok(exports)
    }

    fn evaluate_module(self: &Rc<Self>, interp: &mut Interpreter, path: &Path) -> Result<Value> {
        let text = self
            .source
            .read_text(path)
            .map_err(|e| EvalError::Module(format!("cannot read '{}': {e}", path.display())))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| EvalError::Module(format!("invalid JSON in '{}': {e}", path.display())))?;
            return Ok(Value::from_json(&json));
        }

        let body = parse_function_body(&text, interp.limits().max_nesting_depth).map_err(|e| match e {
            EvalError::Limit(_) => e,
            e => EvalError::Module(format!("'{}': {e}", path.display())),
        })?;
        let scope = Scope::root();
        self.registry.install(&scope);
        let exports = Value::empty_object();
        let module = Value::empty_object();
        crate::interpreter::set_property(&module, "exports", exports.clone())?;
        scope.define("module", module.clone());
        scope.define("exports", exports);
        scope.define("require", Value::native(Require::new(path.to_path_buf(), self.clone())));
        scope.define("__filename", Value::str(path.display().to_string()));
        scope.define(
            "__dirname",
            Value::str(path.parent().map(|p| p.display().to_string()).unwrap_or_default()),
        );
        interp.run_function_body(&body, &scope)?;
        get_property(&module, "exports")
    }
}

/// The `require` function handed to evaluated code.
pub struct Require {
    base: PathBuf,
    loader: Rc<ModuleLoader>,
}

impl Require {
    pub fn new(base: PathBuf, loader: Rc<ModuleLoader>) -> Self {
        Self { base, loader }
    }
}

impl Function for Require {
    fn name(&self) -> &'static str { "require" }
    fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
        let Some(request) = args[0].as_str() else {
            return Err(EvalError::Module(format!(
                "module name must be a string, got {}",
                args[0].type_of()
            )));
        };
        let path = self.loader.resolve(&self.base, request)?;
        self.loader.load(interp, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Limits;
    use pretty_assertions::assert_eq;

    fn loader(source: MemoryModuleSource) -> Rc<ModuleLoader> {
        Rc::new(ModuleLoader::new(Rc::new(source), Registry::with_builtins()))
    }

    #[test]
    fn resolves_relative_and_extension_candidates() {
        let l = loader(
            MemoryModuleSource::new()
                .with_file("/p/lib/util.js", "")
                .with_file("/p/data.json", "{}")
                .with_file("/p/pkg/index.js", ""),
        );
        let base = Path::new("/p/doc.txt");
        assert_eq!(l.resolve(base, "./lib/util").unwrap(), PathBuf::from("/p/lib/util.js"));
        assert_eq!(l.resolve(base, "./data").unwrap(), PathBuf::from("/p/data.json"));
        assert_eq!(l.resolve(base, "./pkg").unwrap(), PathBuf::from("/p/pkg/index.js"));
        assert!(matches!(l.resolve(base, "./nope"), Err(EvalError::Module(_))));
    }

    #[test]
    fn bare_names_search_node_modules_upwards() {
        let l = loader(
            MemoryModuleSource::new()
                .with_file("/p/node_modules/dep/package.json", r#"{"main": "lib/main.js"}"#)
                .with_file("/p/node_modules/dep/lib/main.js", ""),
        );
        let found = l.resolve(Path::new("/p/a/b/doc.txt"), "dep").unwrap();
        assert_eq!(found, PathBuf::from("/p/node_modules/dep/lib/main.js"));
    }

    #[test]
    fn modules_are_evaluated_once() {
        let l = loader(
            MemoryModuleSource::new()
                .with_file("/m/counter.js", "module.exports = { n: Math.floor(Math.random() * 1e9) };"),
        );
        let mut interp = Interpreter::new(Limits::default());
        let a = l.load(&mut interp, Path::new("/m/counter.js")).unwrap();
        let b = l.load(&mut interp, Path::new("/m/counter.js")).unwrap();
        assert!(a == b);
    }

    #[test]
    fn nested_requires_resolve_from_the_module() {
        let l = loader(
            MemoryModuleSource::new()
                .with_file("/m/a.js", "const b = require('./sub/b'); exports.v = b.v + 1;")
                .with_file("/m/sub/b.js", "exports.v = 41;"),
        );
        let mut interp = Interpreter::new(Limits::default());
        let a = l.load(&mut interp, Path::new("/m/a.js")).unwrap();
        assert_eq!(get_property(&a, "v").unwrap(), Value::Num(42.0));
    }

    #[test]
    fn circular_requires_are_reported() {
        let l = loader(
            MemoryModuleSource::new()
                .with_file("/m/a.js", "require('./b')")
                .with_file("/m/b.js", "require('./a')"),
        );
        let mut interp = Interpreter::new(Limits::default());
        assert!(matches!(l.load(&mut interp, Path::new("/m/a.js")), Err(EvalError::Module(_))));
    }
}
