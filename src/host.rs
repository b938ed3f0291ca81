//! The text/selection host the drivers read from and write to.

use std::cell::RefCell;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::errors::HostError;

/// Zero-based line and character column (characters are Unicode scalar values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Builds an ordered range from two positions in either order.
    pub fn new(a: Position, b: Position) -> Self {
        Self { start: a.min(b), end: a.max(b) }
    }

    pub fn caret(at: Position) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A selection keeps its direction: `active` is where the cursor sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub active: Position,
}

impl Selection {
    pub fn new(anchor: Position, active: Position) -> Self {
        Self { anchor, active }
    }

    pub fn caret(at: Position) -> Self {
        Self { anchor: at, active: at }
    }

    pub fn range(&self) -> Range {
        Range::new(self.anchor, self.active)
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.active
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range,
    pub text: String,
}

/// Operations the engine needs from an editor buffer.
///
/// Every method may suspend; a batch passed to [`apply_edits`](Self::apply_edits)
/// is applied atomically or not at all.
#[allow(async_fn_in_trait)]
pub trait DocumentHost {
    async fn text(&self) -> String;
    async fn selections(&self) -> Vec<Selection>;
    async fn set_selections(&self, selections: Vec<Selection>) -> Result<(), HostError>;
    async fn apply_edits(&self, edits: Vec<TextEdit>) -> Result<(), HostError>;
    async fn insert(&self, at: Position, text: &str) -> Result<(), HostError>;
    async fn replace_all(&self, text: &str) -> Result<(), HostError>;

    /// The file behind the document, used as the base for `require`.
    fn file_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Line-start table for converting between positions and byte offsets.
pub struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, starts }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    pub fn line(&self, line: usize) -> Option<&'a str> {
        let start = *self.starts.get(line)?;
        let end = self.starts.get(line + 1).map(|s| s - 1).unwrap_or(self.text.len());
        Some(&self.text[start..end])
    }

    pub fn offset(&self, pos: Position) -> Result<usize, HostError> {
        let invalid = || HostError::InvalidPosition { line: pos.line, character: pos.character };
        let line = self.line(pos.line).ok_or_else(invalid)?;
        let start = self.starts[pos.line];
        if pos.character == line.chars().count() {
            return Ok(start + line.len());
        }
        line.char_indices()
            .nth(pos.character)
            .map(|(b, _)| start + b)
            .ok_or_else(invalid)
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self.starts.partition_point(|s| *s <= offset) - 1;
        let character = self.text[self.starts[line]..offset].chars().count();
        Position { line, character }
    }

    pub fn clamp(&self, pos: Position) -> Position {
        let line = pos.line.min(self.line_count() - 1);
        let len = self.line(line).map(|l| l.chars().count()).unwrap_or(0);
        Position { line, character: pos.character.min(len) }
    }

    pub fn slice(&self, range: Range) -> Result<&'a str, HostError> {
        let (start, end) = (self.offset(range.start)?, self.offset(range.end)?);
        if start > end {
            return Err(HostError::InvalidRange);
        }
        Ok(&self.text[start..end])
    }
}

/// Document text and selections captured when a command is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub text: String,
    pub selections: Vec<Selection>,
}

impl DocumentSnapshot {
    pub async fn capture<H: DocumentHost>(host: &H) -> Self {
        let text = host.text().await;
        let mut selections = host.selections().await;
        if selections.is_empty() {
            selections.push(Selection::default());
        }
        Self { text, selections }
    }

    /// Put the host back to exactly this text and selection set.
    pub async fn restore<H: DocumentHost>(&self, host: &H) -> Result<(), HostError> {
        if host.text().await != self.text {
            host.replace_all(&self.text).await?;
        }
        host.set_selections(self.selections.clone()).await
    }

    /// [`restore`](Self::restore) for a run that may be superseded while it
    /// waits on the host. The token is re-read after every await, and no
    /// mutation happens once it is cancelled. Returns `false` in that case.
    pub async fn restore_unless_cancelled<H: DocumentHost>(
        &self,
        host: &H,
        token: &CancellationToken,
    ) -> Result<bool, HostError> {
        let text = host.text().await;
        if token.is_cancelled() {
            return Ok(false);
        }
        if text != self.text {
            host.replace_all(&self.text).await?;
            if token.is_cancelled() {
                return Ok(false);
            }
        }
        host.set_selections(self.selections.clone()).await?;
        Ok(!token.is_cancelled())
    }

    /// The primary selection's active end.
    pub fn cursor(&self) -> Position {
        self.selections.first().map(|s| s.active).unwrap_or_default()
    }

    pub fn selection_texts(&self) -> Vec<String> {
        let index = LineIndex::new(&self.text);
        self.selections
            .iter()
            .map(|s| index.slice(s.range()).map(str::to_string).unwrap_or_default())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct DocumentState {
    text: String,
    selections: Vec<Selection>,
    history: Vec<String>,
}

/// An in-memory [`DocumentHost`]. Each operation completes synchronously and
/// then yields to the runtime, so concurrent runs interleave at every call.
#[derive(Debug)]
pub struct MemoryDocument {
    state: RefCell<DocumentState>,
    path: Option<PathBuf>,
}

impl MemoryDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            state: RefCell::new(DocumentState {
                text: text.into(),
                selections: vec![Selection::default()],
                history: Vec::new(),
            }),
            path: None,
        }
    }

    pub fn with_selections(self, selections: Vec<Selection>) -> Self {
        self.state.borrow_mut().selections = selections;
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn current_text(&self) -> String {
        self.state.borrow().text.clone()
    }

    pub fn current_selections(&self) -> Vec<Selection> {
        self.state.borrow().selections.clone()
    }

    /// The document text after each mutation, oldest first.
    pub fn text_history(&self) -> Vec<String> {
        self.state.borrow().history.clone()
    }

    fn set_selections_now(&self, selections: Vec<Selection>) -> Result<(), HostError> {
        if selections.is_empty() {
            return Err(HostError::NoSelections);
        }
        let mut state = self.state.borrow_mut();
        {
            let index = LineIndex::new(&state.text);
            for s in &selections {
                index.offset(s.anchor)?;
                index.offset(s.active)?;
            }
        }
        state.selections = selections;
        Ok(())
    }

    fn apply_edits_now(&self, edits: &[TextEdit]) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        let (text, selections) = {
            let index = LineIndex::new(&state.text);
            let mut spans = Vec::with_capacity(edits.len());
            for edit in edits {
                let (start, end) = (index.offset(edit.range.start)?, index.offset(edit.range.end)?);
                if start > end {
                    return Err(HostError::InvalidRange);
                }
                spans.push((start, end, edit.text.as_str()));
            }
            spans.sort_by_key(|(start, end, _)| (*start, *end));
            if spans.windows(2).any(|w| w[1].0 < w[0].1) {
                return Err(HostError::OverlappingEdits);
            }

            let mut text = String::with_capacity(state.text.len());
            let mut last = 0;
            for (start, end, replacement) in &spans {
                text.push_str(&state.text[last..*start]);
                text.push_str(replacement);
                last = *end;
            }
            text.push_str(&state.text[last..]);

            let new_index = LineIndex::new(&text);
            let mut selections = Vec::with_capacity(state.selections.len());
            for s in &state.selections {
                let (anchor, active) = (index.offset(s.anchor)?, index.offset(s.active)?);
                let (lo, hi) = (anchor.min(active), anchor.max(active));
                // A selection that exactly covered a replaced range covers its replacement.
                let covered = spans.iter().find(|(start, end, _)| start < end && *start == lo && *end == hi);
                let (new_anchor, new_active) = match covered {
                    Some((start, _, replacement)) => {
                        let new_start = map_offset(*start, &spans);
                        let new_end = new_start + replacement.len();
                        if anchor <= active {
                            (new_start, new_end)
                        } else {
                            (new_end, new_start)
                        }
                    }
                    None => (map_offset(anchor, &spans), map_offset(active, &spans)),
                };
                selections.push(Selection::new(new_index.position(new_anchor), new_index.position(new_active)));
            }
            (text, selections)
        };
        state.history.push(text.clone());
        state.text = text;
        state.selections = selections;
        Ok(())
    }

    fn replace_all_now(&self, text: &str) {
        let mut state = self.state.borrow_mut();
        state.text = text.to_string();
        let index = LineIndex::new(text);
        let selections = state
            .selections
            .iter()
            .map(|s| Selection::new(index.clamp(s.anchor), index.clamp(s.active)))
            .collect();
        state.selections = selections;
        state.history.push(text.to_string());
    }
}

// Where `offset` lands after the sorted, non-overlapping `spans` are applied.
fn map_offset(offset: usize, spans: &[(usize, usize, &str)]) -> usize {
    let mut shift: isize = 0;
    for (start, end, replacement) in spans {
        if *end <= offset {
            shift += replacement.len() as isize - (end - start) as isize;
        } else if *start < offset {
            return (*start as isize + shift) as usize + replacement.len();
        } else {
            break;
        }
    }
    (offset as isize + shift) as usize
}

impl DocumentHost for MemoryDocument {
    async fn text(&self) -> String {
        let text = self.current_text();
        tokio::task::yield_now().await;
        text
    }

    async fn selections(&self) -> Vec<Selection> {
        let selections = self.current_selections();
        tokio::task::yield_now().await;
        selections
    }

    async fn set_selections(&self, selections: Vec<Selection>) -> Result<(), HostError> {
        self.set_selections_now(selections)?;
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn apply_edits(&self, edits: Vec<TextEdit>) -> Result<(), HostError> {
        self.apply_edits_now(&edits)?;
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn insert(&self, at: Position, text: &str) -> Result<(), HostError> {
        self.apply_edits_now(&[TextEdit { range: Range::caret(at), text: text.to_string() }])?;
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn replace_all(&self, text: &str) -> Result<(), HostError> {
        self.replace_all_now(text);
        tokio::task::yield_now().await;
        Ok(())
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos(line: usize, character: usize) -> Position {
        Position::new(line, character)
    }

    #[test]
    fn line_index_round_trips_positions() {
        let index = LineIndex::new("ab\nçd\n");
        assert_eq!(index.line_count(), 3);
        assert_eq!(index.line(1), Some("çd"));
        assert_eq!(index.offset(pos(1, 1)).unwrap(), 5);
        assert_eq!(index.position(5), pos(1, 1));
        assert_eq!(index.offset(pos(2, 0)).unwrap(), 7);
        assert!(index.offset(pos(0, 3)).is_err());
        assert!(index.offset(pos(3, 0)).is_err());
    }

    #[tokio::test]
    async fn edits_apply_as_one_batch_and_remap_selections() {
        let doc = MemoryDocument::new("one two three").with_selections(vec![
            Selection::new(pos(0, 0), pos(0, 3)),
            Selection::new(pos(0, 8), pos(0, 13)),
        ]);
        doc.apply_edits(vec![
            TextEdit { range: Range::new(pos(0, 0), pos(0, 3)), text: "1".into() },
            TextEdit { range: Range::new(pos(0, 8), pos(0, 13)), text: "3".into() },
        ])
        .await
        .unwrap();
        assert_eq!(doc.current_text(), "1 two 3");
        assert_eq!(
            doc.current_selections(),
            vec![Selection::new(pos(0, 0), pos(0, 1)), Selection::new(pos(0, 6), pos(0, 7))]
        );
        assert_eq!(doc.text_history(), vec!["1 two 3".to_string()]);
    }

    #[tokio::test]
    async fn overlapping_edits_are_rejected_whole() {
        let doc = MemoryDocument::new("abcdef");
        let err = doc
            .apply_edits(vec![
                TextEdit { range: Range::new(pos(0, 0), pos(0, 3)), text: "x".into() },
                TextEdit { range: Range::new(pos(0, 2), pos(0, 4)), text: "y".into() },
            ])
            .await;
        assert!(matches!(err, Err(HostError::OverlappingEdits)));
        assert_eq!(doc.current_text(), "abcdef");
    }

    #[tokio::test]
    async fn insert_moves_a_caret_past_the_text() {
        let doc = MemoryDocument::new("ab").with_selections(vec![Selection::caret(pos(0, 1))]);
        doc.insert(pos(0, 1), "XY\nZ").await.unwrap();
        assert_eq!(doc.current_text(), "aXY\nZb");
        assert_eq!(doc.current_selections(), vec![Selection::caret(pos(1, 1))]);
    }

    #[tokio::test]
    async fn snapshot_restore_is_exact() {
        let doc = MemoryDocument::new("hello\nworld").with_selections(vec![Selection::new(pos(1, 5), pos(1, 0))]);
        let snapshot = DocumentSnapshot::capture(&doc).await;
        assert_eq!(snapshot.cursor(), pos(1, 0));
        assert_eq!(snapshot.selection_texts(), vec!["world".to_string()]);

        doc.replace_all("x").await.unwrap();
        doc.set_selections(vec![Selection::caret(pos(0, 1))]).await.unwrap();
        snapshot.restore(&doc).await.unwrap();
        assert_eq!(doc.current_text(), "hello\nworld");
        assert_eq!(doc.current_selections(), snapshot.selections);
    }

    #[tokio::test]
    async fn cancelled_restore_leaves_the_host_alone() {
        let doc = MemoryDocument::new("before").with_selections(vec![Selection::caret(pos(0, 2))]);
        let snapshot = DocumentSnapshot::capture(&doc).await;
        doc.replace_all("after").await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(!snapshot.restore_unless_cancelled(&doc, &token).await.unwrap());
        assert_eq!(doc.current_text(), "after");

        let live = CancellationToken::new();
        assert!(snapshot.restore_unless_cancelled(&doc, &live).await.unwrap());
        assert_eq!(doc.current_text(), "before");
        assert_eq!(doc.current_selections(), vec![Selection::caret(pos(0, 2))]);
    }

    #[tokio::test]
    async fn empty_selection_sets_are_rejected() {
        let doc = MemoryDocument::new("x");
        assert!(matches!(doc.set_selections(vec![]).await, Err(HostError::NoSelections)));
    }
}
