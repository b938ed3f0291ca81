use std::cell::RefCell;

pub use tokio_util::sync::CancellationToken;

/// Hands out one token per run. Starting a run cancels the one before it, so
/// only the most recent run ever commits output.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    active: RefCell<Option<CancellationToken>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the active run (if any) and return a fresh token for the next one.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.active.borrow_mut().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel the active run without starting another.
    pub fn cancel(&self) {
        if let Some(active) = self.active.borrow_mut().take() {
            active.cancel();
        }
    }
}
