use std::rc::Rc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use text_transformer as ttx;
use ttx::cancel::CancellationToken;
use ttx::config::Settings;
use ttx::host::DocumentSnapshot;
use ttx::modules::MemoryModuleSource;
use ttx::{Engine, MemoryDocument, Mode, Position, RunOutcome, Selection};

fn sel(line: usize, start: usize, end: usize) -> Selection {
    Selection::new(Position::new(line, start), Position::new(line, end))
}

async fn transform(engine: &Engine, doc: &MemoryDocument, expr: &str) -> RunOutcome {
    let snapshot = DocumentSnapshot::capture(doc).await;
    engine.run(Mode::Transform, doc, &snapshot, expr, &CancellationToken::new()).await.unwrap()
}

#[tokio::test]
async fn test_identity_leaves_text_unchanged() {
    let doc = MemoryDocument::new("hello world").with_selections(vec![sel(0, 0, 5), sel(0, 6, 11)]);
    let outcome = transform(&Engine::default(), &doc, "currentSelection").await;
    assert_eq!(outcome, RunOutcome::Applied);
    assert_eq!(doc.current_text(), "hello world");
}

#[tokio::test]
async fn test_uppercase_with_selection_index() {
    let doc = MemoryDocument::new("a b").with_selections(vec![sel(0, 0, 1), sel(0, 2, 3)]);
    transform(&Engine::default(), &doc, "currentSelection.toUpperCase() + selectionIndex").await;
    assert_eq!(doc.current_text(), "A0 B1");
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 2), sel(0, 3, 5)]);
}

#[tokio::test]
async fn test_throwing_expression_leaves_snapshot() {
    let doc = MemoryDocument::new("keep me").with_selections(vec![sel(0, 0, 4)]);
    let outcome = transform(&Engine::default(), &doc, "throw new Error('nope')").await;
    assert_eq!(outcome, RunOutcome::NoOutput);
    assert_eq!(doc.current_text(), "keep me");
    assert!(doc.text_history().is_empty());
}

#[tokio::test]
async fn test_block_convention_with_return() {
    let doc = MemoryDocument::new("x y").with_selections(vec![sel(0, 0, 1), sel(0, 2, 3)]);
    transform(
        &Engine::default(),
        &doc,
        "if (selectionIndex === 0) { return 'first'; } return currentSelection + '!';",
    )
    .await;
    assert_eq!(doc.current_text(), "first y!");
}

#[tokio::test]
async fn test_counter_from_last_result() {
    let doc = MemoryDocument::new("item 1\nitem 1\nitem 1")
        .with_selections(vec![sel(0, 0, 6), sel(1, 0, 6), sel(2, 0, 6)]);
    transform(
        &Engine::default(),
        &doc,
        "lastResultAutoNumber ? toTextOnly(currentSelection) + (lastResultAutoNumber + 1) : currentSelection",
    )
    .await;
    assert_eq!(doc.current_text(), "item 1\nitem 2\nitem 3");
}

#[tokio::test]
async fn test_variables_persist_across_selections() {
    let doc = MemoryDocument::new("_ _ _").with_selections(vec![sel(0, 0, 1), sel(0, 2, 3), sel(0, 4, 5)]);
    transform(&Engine::default(), &doc, "variables.n = (variables.n || 0) + 1; variables.n").await;
    assert_eq!(doc.current_text(), "1 2 3");
}

#[tokio::test]
async fn test_falsy_results_skip_the_selection() {
    let doc = MemoryDocument::new("a b c").with_selections(vec![sel(0, 0, 1), sel(0, 2, 3), sel(0, 4, 5)]);
    transform(&Engine::default(), &doc, "currentSelection === 'b' ? '' : currentSelection + allSelections.length").await;
    assert_eq!(doc.current_text(), "a3 b c3");
}

#[tokio::test]
async fn test_rerun_from_the_same_snapshot_is_idempotent() {
    let engine = Engine::default();
    let doc = MemoryDocument::new("one two").with_selections(vec![sel(0, 0, 3)]);
    let snapshot = DocumentSnapshot::capture(&doc).await;
    for _ in 0..2 {
        engine.run(Mode::Transform, &doc, &snapshot, "currentSelection + '!'", &CancellationToken::new()).await.unwrap();
        assert_eq!(doc.current_text(), "one! two");
        assert_eq!(doc.current_selections(), vec![sel(0, 0, 4)]);
    }
}

#[tokio::test]
async fn test_blank_expression_restores_only() {
    let engine = Engine::default();
    let doc = MemoryDocument::new("abc").with_selections(vec![sel(0, 0, 3)]);
    let snapshot = DocumentSnapshot::capture(&doc).await;
    engine.run(Mode::Transform, &doc, &snapshot, "'x'", &CancellationToken::new()).await.unwrap();
    assert_eq!(doc.current_text(), "x");
    let outcome = engine.run(Mode::Transform, &doc, &snapshot, "   ", &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, RunOutcome::NoOutput);
    assert_eq!(doc.current_text(), "abc");
    assert_eq!(doc.current_selections(), vec![sel(0, 0, 3)]);
}

#[tokio::test]
async fn test_require_resolves_next_to_the_document() {
    let source = MemoryModuleSource::new().with_file("/work/lib/wrap.js", "module.exports = s => '[' + s + ']';");
    let engine = Engine::with_module_source(Settings::default(), Rc::new(source));
    let doc = MemoryDocument::new("a").with_selections(vec![sel(0, 0, 1)]).with_path("/work/notes.txt");
    transform(&engine, &doc, "require('./lib/wrap')(currentSelection)").await;
    assert_eq!(doc.current_text(), "[a]");
}

fn word_selections(text: &str) -> Vec<Selection> {
    let mut selections = Vec::new();
    let mut start = 0;
    for word in text.split(' ') {
        let len = word.chars().count();
        selections.push(sel(0, start, start + len));
        start += len + 1;
    }
    selections
}

proptest! {
    #[test]
    fn prop_identity_transform_is_a_no_op(text in "[a-zé]{1,8}( [a-zé]{1,8}){0,4}") {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let doc = MemoryDocument::new(text.clone()).with_selections(word_selections(&text));
        runtime.block_on(transform(&Engine::default(), &doc, "currentSelection"));
        prop_assert_eq!(doc.current_text(), text);
    }
}
