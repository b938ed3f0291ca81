use std::cell::Cell;

use pretty_assertions::assert_eq;
use text_transformer as ttx;
use ttx::cancel::{CancellationSignal, CancellationToken};
use ttx::errors::HostError;
use ttx::host::{DocumentHost, DocumentSnapshot};
use ttx::{Engine, MemoryDocument, Mode, Position, RunOutcome, Selection, TextEdit};

fn sel(line: usize, start: usize, end: usize) -> Selection {
    Selection::new(Position::new(line, start), Position::new(line, end))
}

/// A host whose next text read stalls for `delay` scheduler turns.
struct SlowDocument {
    inner: MemoryDocument,
    delay: Cell<u32>,
}

impl DocumentHost for SlowDocument {
    async fn text(&self) -> String {
        for _ in 0..self.delay.take() {
            tokio::task::yield_now().await;
        }
        self.inner.text().await
    }

    async fn selections(&self) -> Vec<Selection> {
        self.inner.selections().await
    }

    async fn set_selections(&self, selections: Vec<Selection>) -> Result<(), HostError> {
        self.inner.set_selections(selections).await
    }

    async fn apply_edits(&self, edits: Vec<TextEdit>) -> Result<(), HostError> {
        self.inner.apply_edits(edits).await
    }

    async fn insert(&self, at: Position, text: &str) -> Result<(), HostError> {
        self.inner.insert(at, text).await
    }

    async fn replace_all(&self, text: &str) -> Result<(), HostError> {
        self.inner.replace_all(text).await
    }
}

#[tokio::test]
async fn test_superseded_transform_never_commits() {
    let engine = Engine::default();
    let doc = MemoryDocument::new("x y").with_selections(vec![sel(0, 0, 1), sel(0, 2, 3)]);
    let snapshot = DocumentSnapshot::capture(&doc).await;
    let signal = CancellationSignal::new();

    let first = signal.begin();
    let run_a = engine.run(Mode::Transform, &doc, &snapshot, "currentSelection + 'A'", &first);
    let run_b = async {
        tokio::task::yield_now().await;
        let second = signal.begin();
        engine.run(Mode::Transform, &doc, &snapshot, "currentSelection + 'B'", &second).await
    };
    let (a, b) = tokio::join!(run_a, run_b);

    assert_eq!(a.unwrap(), RunOutcome::Cancelled);
    assert_eq!(b.unwrap(), RunOutcome::Applied);
    assert_eq!(doc.current_text(), "xB yB");
    assert_eq!(doc.text_history(), vec!["xB yB".to_string()]);
}

#[tokio::test]
async fn test_superseded_generator_inserts_nothing() {
    let engine = Engine::default();
    let doc = MemoryDocument::new("start");
    let snapshot = DocumentSnapshot::capture(&doc).await;
    let signal = CancellationSignal::new();

    let first = signal.begin();
    let run_a = engine.run(Mode::Generator, &doc, &snapshot, "({iterations: 50, func: () => 'a'})", &first);
    let run_b = async {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        let second = signal.begin();
        engine.run(Mode::Generator, &doc, &snapshot, "({iterations: 2, func: () => 'b'})", &second).await
    };
    let (a, b) = tokio::join!(run_a, run_b);

    assert_eq!(a.unwrap(), RunOutcome::Cancelled);
    assert_eq!(b.unwrap(), RunOutcome::Applied);
    assert_eq!(doc.current_text(), "bbstart");
}

#[tokio::test]
async fn test_cancelled_token_does_not_touch_the_document() {
    let engine = Engine::default();
    let doc = MemoryDocument::new("abc").with_selections(vec![sel(0, 0, 3)]);
    let snapshot = DocumentSnapshot::capture(&doc).await;

    let token = CancellationToken::new();
    token.cancel();
    for mode in Mode::ALL {
        let outcome = engine.run(mode, &doc, &snapshot, "'z'", &token).await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }
    assert_eq!(doc.current_text(), "abc");
    assert!(doc.text_history().is_empty());
}

#[tokio::test]
async fn test_later_run_wins_regardless_of_completion_order() {
    let engine = Engine::default();
    let doc = MemoryDocument::new("ab\ncd");
    let snapshot = DocumentSnapshot::capture(&doc).await;
    let signal = CancellationSignal::new();

    let first = signal.begin();
    let second = signal.begin();
    // The superseded run is polled last and still loses.
    let (b, a) = tokio::join!(
        engine.run(Mode::LineSelector, &doc, &snapshot, "[1,2]", &second),
        engine.run(Mode::LineSelector, &doc, &snapshot, "[0,1]", &first),
    );
    assert_eq!(a.unwrap(), RunOutcome::Cancelled);
    assert_eq!(b.unwrap(), RunOutcome::Applied);
    assert_eq!(doc.current_selections(), vec![sel(0, 1, 2), sel(1, 1, 2)]);
}

#[tokio::test]
async fn test_stalled_restore_cannot_undo_a_newer_commit() {
    let engine = Engine::default();
    let doc = SlowDocument {
        inner: MemoryDocument::new("x y").with_selections(vec![sel(0, 0, 1), sel(0, 2, 3)]),
        delay: Cell::new(0),
    };
    let snapshot = DocumentSnapshot::capture(&doc).await;
    let signal = CancellationSignal::new();

    let earlier = signal.begin();
    let outcome = engine.run(Mode::Transform, &doc, &snapshot, "currentSelection + 'C'", &earlier).await;
    assert_eq!(outcome.unwrap(), RunOutcome::Applied);
    assert_eq!(doc.inner.current_text(), "xC yC");

    // Run A parks inside its snapshot restore while run B starts and commits.
    doc.delay.set(200);
    let first = signal.begin();
    let run_a = engine.run(Mode::Transform, &doc, &snapshot, "currentSelection + 'A'", &first);
    let run_b = async {
        tokio::task::yield_now().await;
        let second = signal.begin();
        engine.run(Mode::Transform, &doc, &snapshot, "currentSelection + 'B'", &second).await
    };
    let (a, b) = tokio::join!(run_a, run_b);

    assert_eq!(a.unwrap(), RunOutcome::Cancelled);
    assert_eq!(b.unwrap(), RunOutcome::Applied);
    assert_eq!(doc.inner.current_text(), "xB yB");
}
