pub mod errors;
pub mod value;
pub mod interpreter;
pub mod functions;  // plugin model for globals
pub mod modules;
pub mod evaluator;
pub mod context;
pub mod shape;
pub mod host;
pub mod cancel;
pub mod drivers;
pub mod history;
pub mod session;
pub mod config;
mod ast;
mod parser;
mod expression;
mod comparison;

use std::rc::Rc;

use cancel::CancellationToken;
use config::Settings;
pub use drivers::{Mode, RunOutcome};
use errors::{HostError, Result};
use evaluator::{Bindings, EvalOptions, Evaluator};
use functions::Registry;
use host::{DocumentHost, DocumentSnapshot};
use modules::ModuleSource;
use value::Value;

/// The evaluator plus the settings every run is bounded by.
pub struct Engine {
    evaluator: Evaluator,
    settings: Settings,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        let evaluator = Evaluator::new(Registry::with_builtins(), settings.limits());
        Self { evaluator, settings }
    }

    /// Resolve `require` through `source` instead of the filesystem.
    pub fn with_module_source(settings: Settings, source: Rc<dyn ModuleSource>) -> Self {
        let evaluator = Evaluator::with_module_source(Registry::with_builtins(), settings.limits(), source);
        Self { evaluator, settings }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one mode against `snapshot`; see [`drivers`].
    pub async fn run<H: DocumentHost>(
        &self,
        mode: Mode,
        host: &H,
        snapshot: &DocumentSnapshot,
        expression: &str,
        token: &CancellationToken,
    ) -> std::result::Result<RunOutcome, HostError> {
        drivers::run(mode, &self.evaluator, &self.settings, host, snapshot, expression, token).await
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

/// Convenience: evaluate an expression with no bindings, returning errors.
pub fn eval(expr: &str) -> Result<Value> {
    Evaluator::default().evaluate(expr, &Bindings::new(), &EvalOptions::propagate())
}

pub use host::{MemoryDocument, Position, Range, Selection, TextEdit};
pub use session::{InputResponse, Session};
