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
        .run(Mode::RegexLineSelector, doc, &snapshot, expr, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_global_regex_selects_every_match() {
    let doc = MemoryDocument::new("aa\nbb");
    select(&doc, "/a/g").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 1), sel(0, 1, 2)]);
}

#[tokio::test]
async fn test_non_global_regex_matches_once_per_line() {
    let doc = MemoryDocument::new("aa\nbab");
    select(&doc, "/a/").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 1), sel(1, 1, 2)]);
}

#[tokio::test]
async fn test_no_match_leaves_a_caret_at_the_start() {
    let doc = MemoryDocument::new("xx").with_selections(vec![sel(0, 1, 2)]);
    assert_eq!(select(&doc, "/a/g").await, RunOutcome::Applied);
    assert_eq!(doc.current_selections(), vec![Selection::caret(Position::new(0, 0))]);
}

#[tokio::test]
async fn test_strings_compile_as_global_patterns() {
    let doc = MemoryDocument::new("x1 y22 z333");
    select(&doc, "'\\\\d+'").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 1, 2), sel(0, 4, 6), sel(0, 8, 11)]);
}

#[tokio::test]
async fn test_flags_and_block_convention() {
    let doc = MemoryDocument::new("Abc abc");
    select(&doc, "return /abc/gi;").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 3), sel(0, 4, 7)]);
}

#[tokio::test]
async fn test_invalid_pattern_aborts_without_touching_selections() {
    let doc = MemoryDocument::new("ab\ncd").with_selections(vec![sel(1, 0, 1)]);
    let outcome = select(&doc, "lineIndex === 0 ? 'a' : 42").await;
    assert_eq!(outcome, RunOutcome::NoOutput);
    assert_eq!(doc.current_selections(), vec![sel(1, 0, 1)]);
}

#[tokio::test]
async fn test_falsy_results_skip_lines() {
    let doc = MemoryDocument::new("ab\nab");
    select(&doc, "lineIndex === 1 && /b/").await;
    assert_eq!(doc.current_selections(), vec![sel(1, 1, 2)]);
}

#[tokio::test]
async fn test_lookbehind_and_backreferences() {
    let doc = MemoryDocument::new("price=10\nqty=3");
    assert_eq!(select(&doc, "/(?<==)\\d+/g").await, RunOutcome::Applied);
    assert_eq!(doc.current_selections(), vec![sel(0, 6, 8), sel(1, 4, 5)]);

    let doc = MemoryDocument::new("the the end\nno repeats");
    select(&doc, "/\\b(\\w+) \\1\\b/").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 7)]);
}

#[tokio::test]
async fn test_digit_class_is_ascii_only() {
    let doc = MemoryDocument::new("٣ 5");
    select(&doc, "/\\d/g").await;
    assert_eq!(doc.current_selections(), vec![sel(0, 2, 3)]);
}
