use thiserror::Error; // Import the `Error` derive macro from the `thiserror` crate

use crate::value::Value;

// Errors raised while parsing or running a guest expression
#[derive(Debug, Error)]
pub enum EvalError {
    // Source text that is not valid under the calling convention being tried
    #[error("parse error: {0}")]
    Parse(String),

    // Type errors, reference errors and other failures detected by the interpreter
    #[error("runtime error: {0}")]
    Runtime(String),

    // A value raised with `throw` that no `catch` handled
    #[error("uncaught exception: {0}")]
    Thrown(Value),

    // `require` could not resolve, read or evaluate a module
    #[error("module error: {0}")]
    Module(String),

    // Call depth or loop budget exhausted
    #[error("limit exceeded: {0}")]
    Limit(String),
}

impl EvalError {
    /// The value a `catch` clause binds for this error.
    pub fn into_thrown_value(self) -> Value {
        match self {
            EvalError::Thrown(value) => value,
            other => Value::error_object("Error", &other.to_string()),
        }
    }
}

// Errors reported by a document host while reading or mutating text and selections
#[derive(Debug, Error)]
pub enum HostError {
    #[error("position {line}:{character} is outside the document")]
    InvalidPosition { line: usize, character: usize },

    #[error("range end precedes range start")]
    InvalidRange,

    #[error("edits in one batch overlap")]
    OverlappingEdits,

    #[error("a selection set must not be empty")]
    NoSelections,
}

// Errors raised while loading or saving expression history
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// Errors raised while reading a settings file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Toml(#[from] toml::de::Error),
}

// Type alias for results that use `EvalError` as the error type
pub type Result<T> = std::result::Result<T, EvalError>;
