use pretty_assertions::assert_eq;
use text_transformer as ttx;
use ttx::cancel::CancellationToken;
use ttx::host::DocumentSnapshot;
use ttx::{Engine, MemoryDocument, Mode, Position, RunOutcome, Selection};

fn sel(line: usize, start: usize, end: usize) -> Selection {
    Selection::new(Position::new(line, start), Position::new(line, end))
}

async fn select(doc: &MemoryDocument, expr: &str) -> RunOutcome {
    let snapshot = DocumentSnapshot::capture(doc).await;
    Engine::default()
        .run(Mode::LineSelector, doc, &snapshot, expr, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_single_pair_per_line() {
    let doc = MemoryDocument::new("ab\ncd");
    assert_eq!(select(&doc, "[0,1]").await, RunOutcome::Applied);
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 1), sel(1, 0, 1)]);
    assert_eq!(doc.current_text(), "ab\ncd");
}

#[tokio::test]
async fn test_array_of_pairs_per_line() {
    let doc = MemoryDocument::new("ab\ncd");
    select(&doc, "[[0,1],[1,2]]").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 1), sel(0, 1, 2), sel(1, 0, 1), sel(1, 1, 2)]);
}

#[tokio::test]
async fn test_line_context_drives_the_pairs() {
    let doc = MemoryDocument::new("key = value\nempty\nother = 2");
    select(&doc, "const i = currentLineText.indexOf('='); return i < 0 ? null : [0, i - 1];").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 3), sel(2, 0, 5)]);
}

#[tokio::test]
async fn test_last_results_carry_to_the_next_line() {
    let doc = MemoryDocument::new("a\nb\nc");
    select(&doc, "lastResults ? [lastResults[0][1], lastResults[0][1] + 1] : [0, 1]").await;
    // The column grows each line and clamps to the line width.
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 1), sel(1, 1, 1), sel(2, 1, 1)]);
}

#[tokio::test]
async fn test_mismatched_shapes_keep_the_original_selections() {
    let doc = MemoryDocument::new("ab\ncd").with_selections(vec![sel(1, 0, 2)]);
    assert_eq!(select(&doc, "'not a pair'").await, RunOutcome::NoOutput);
    assert_eq!(doc.current_selections(), vec![sel(1, 0, 2)]);
}

#[tokio::test]
async fn test_line_index_is_bound() {
    let doc = MemoryDocument::new("x\nyy\nzzz");
    select(&doc, "lineIndex === 1 ? [0, 2] : undefined").await;
    assert_eq!(doc.current_selections(), vec![sel(1, 0, 2)]);
}
