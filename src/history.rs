//! Previously accepted expressions, kept per command.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::HistoryError;

/// A named-list key-value store.
pub trait HistoryStore {
    fn get(&self, key: &str) -> Vec<String>;
    fn set(&self, key: &str, entries: &[String]) -> Result<(), HistoryError>;
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    lists: RefCell<HashMap<String, Vec<String>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn get(&self, key: &str) -> Vec<String> {
        self.lists.borrow().get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, entries: &[String]) -> Result<(), HistoryError> {
        self.lists.borrow_mut().insert(key.to_string(), entries.to_vec());
        Ok(())
    }
}

/// All lists in one JSON object file: `{"<key>": ["expr", ...], ...}`.
#[derive(Debug, Clone)]
pub struct JsonFileHistoryStore {
    path: PathBuf,
}

impl JsonFileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<HashMap<String, Vec<String>>, HistoryError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl HistoryStore for JsonFileHistoryStore {
    // An unreadable file reads as empty history.
    fn get(&self, key: &str) -> Vec<String> {
        self.read_all().ok().and_then(|mut all| all.remove(key)).unwrap_or_default()
    }

    fn set(&self, key: &str, entries: &[String]) -> Result<(), HistoryError> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), entries.to_vec());
        std::fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        Ok(())
    }
}

/// The bounded, de-duplicated history of one command, newest last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    key: String,
    entries: Vec<String>,
    max: usize,
}

impl History {
    pub fn load(store: &dyn HistoryStore, command_id: &str, max: usize) -> Self {
        let key = format!("{command_id}.history");
        let entries = store.get(&key);
        Self { key, entries, max }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Record `expression` unless an entry equal after trimming exists;
    /// the oldest entries are dropped beyond the limit.
    pub fn add(&mut self, store: &dyn HistoryStore, expression: &str) -> Result<(), HistoryError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() || self.entries.iter().any(|e| e.trim() == trimmed) {
            return Ok(());
        }
        self.entries.push(expression.to_string());
        if self.entries.len() > self.max {
            let excess = self.entries.len() - self.max;
            self.entries.drain(..excess);
        }
        store.set(&self.key, &self.entries)
    }

    pub fn clear(&mut self, store: &dyn HistoryStore) -> Result<(), HistoryError> {
        self.entries.clear();
        store.set(&self.key, &self.entries)
    }
}
