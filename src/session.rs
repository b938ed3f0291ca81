//! One open input box: the document as it was when the command was invoked,
//! a run per keystroke, and accept/hide handling.

use std::cell::{Cell, RefCell};

use tracing::warn;

use crate::cancel::CancellationSignal;
use crate::drivers::{Mode, RunOutcome};
use crate::errors::{HistoryError, HostError};
use crate::history::{History, HistoryStore};
use crate::host::{DocumentHost, DocumentSnapshot};
use crate::Engine;

pub const CLEAR_HISTORY: &str = "Clear History";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResponse {
    Ran(RunOutcome),
    /// The input was a `?` help request; nothing ran.
    Help(Vec<&'static str>),
}

pub struct Session<'a, H: DocumentHost> {
    engine: &'a Engine,
    host: &'a H,
    store: &'a dyn HistoryStore,
    mode: Mode,
    snapshot: DocumentSnapshot,
    signal: CancellationSignal,
    history: RefCell<History>,
    accepted: Cell<bool>,
    last_input: RefCell<Option<String>>,
}

impl<'a, H: DocumentHost> Session<'a, H> {
    /// Capture the document and load the command's history.
    pub async fn start(engine: &'a Engine, host: &'a H, mode: Mode, store: &'a dyn HistoryStore) -> Self {
        let snapshot = DocumentSnapshot::capture(host).await;
        let history = History::load(store, mode.command_id(), engine.settings().max_history);
        Self {
            engine,
            host,
            store,
            mode,
            snapshot,
            signal: CancellationSignal::new(),
            history: RefCell::new(history),
            accepted: Cell::new(false),
            last_input: RefCell::new(None),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn snapshot(&self) -> &DocumentSnapshot {
        &self.snapshot
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted.get()
    }

    /// The input box changed. Supersedes any run still in flight.
    pub async fn input(&self, expression: &str) -> Result<InputResponse, HostError> {
        if expression.trim().starts_with('?') {
            let mut items = vec![CLEAR_HISTORY];
            items.extend_from_slice(self.mode.help_text());
            return Ok(InputResponse::Help(items));
        }
        self.last_input.replace(Some(expression.to_string()));
        self.run(expression).await.map(InputResponse::Ran)
    }

    /// Enter was pressed. Re-runs only when `expression` is not what last ran.
    pub async fn accept(&self, expression: &str) -> Result<Option<RunOutcome>, HostError> {
        self.accepted.set(true);
        if let Err(e) = self.history.borrow_mut().add(self.store, expression) {
            warn!(error = %e, "could not save expression history");
        }
        let stale = self.last_input.borrow().as_deref() != Some(expression);
        if !stale {
            return Ok(None);
        }
        self.last_input.replace(Some(expression.to_string()));
        self.run(expression).await.map(Some)
    }

    /// The input box closed. Without an accept, the document goes back to
    /// how it was at invocation.
    pub async fn hide(&self) -> Result<(), HostError> {
        if self.accepted.get() {
            return Ok(());
        }
        self.signal.cancel();
        self.snapshot.restore(self.host).await
    }

    pub fn history(&self) -> Vec<String> {
        self.history.borrow().entries().to_vec()
    }

    pub fn clear_history(&self) -> Result<(), HistoryError> {
        self.history.borrow_mut().clear(self.store)
    }

    async fn run(&self, expression: &str) -> Result<RunOutcome, HostError> {
        let token = self.signal.begin();
        self.engine.run(self.mode, self.host, &self.snapshot, expression, &token).await
    }
}
