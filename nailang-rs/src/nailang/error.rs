//! Error types surfaced by the engine.

use std::fmt;

use thiserror::Error;

/// A tokenization or parse failure with its source position (0-based).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {file}:{}:{}{}", .row + 1, .col + 1, token_suffix(.token))]
pub struct ParseError {
    pub file: String,
    pub row: u32,
    pub col: u32,
    pub message: String,
    /// Description of the offending token, when there is one.
    pub token: Option<String>,
}

fn token_suffix(token: &Option<String>) -> String {
    match token {
        Some(t) => format!(", got {t}"),
        None => String::new(),
    }
}

/// What a runtime error points at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExceptionTarget {
    #[default]
    Empty,
    /// A runtime value, rendered.
    Arg(String),
    /// An expression, serialized back to source form.
    Expr(String),
    /// The target variable of an assignment.
    Assignment(String),
    FuncCall(String),
    RawBlock(String),
    Block(String),
}

impl ExceptionTarget {
    pub fn is_empty(&self) -> bool {
        matches!(self, ExceptionTarget::Empty)
    }
}

impl fmt::Display for ExceptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionTarget::Empty => f.write_str("<empty>"),
            ExceptionTarget::Arg(s) => write!(f, "arg [{s}]"),
            ExceptionTarget::Expr(s) => write!(f, "expr [{s}]"),
            ExceptionTarget::Assignment(s) => write!(f, "assignment [{s}]"),
            ExceptionTarget::FuncCall(s) => write!(f, "call [{s}]"),
            ExceptionTarget::RawBlock(s) => write!(f, "raw block [{s}]"),
            ExceptionTarget::Block(s) => write!(f, "block [{s}]"),
        }
    }
}

/// Whether the engine or a host hook raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorOrigin {
    #[default]
    Engine,
    Host,
}

/// A failure while executing a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub target: ExceptionTarget,
    /// The innermost block or call being executed.
    pub scope: ExceptionTarget,
    /// Frame chain at the point of failure, innermost first.
    pub stack: Vec<String>,
    pub origin: ErrorOrigin,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            target: ExceptionTarget::Empty,
            scope: ExceptionTarget::Empty,
            stack: Vec::new(),
            origin: ErrorOrigin::Engine,
        }
    }

    /// An error raised by a host hook or custom value handler.
    pub fn host(message: impl Into<String>) -> Self {
        RuntimeError { origin: ErrorOrigin::Host, ..Self::new(message) }
    }

    pub fn with_target(mut self, target: ExceptionTarget) -> Self {
        self.target = target;
        self
    }

    /// Attach a target unless one is already set.
    pub fn or_target(mut self, target: impl FnOnce() -> ExceptionTarget) -> Self {
        if self.target.is_empty() {
            self.target = target();
        }
        self
    }

    /// Full multi-line report: message, target, scope and stack.
    pub fn report(&self) -> String {
        let mut out = self.message.clone();
        if !self.target.is_empty() {
            out.push_str(&format!("\n  at {}", self.target));
        }
        if !self.scope.is_empty() {
            out.push_str(&format!("\n  in {}", self.scope));
        }
        for frame in &self.stack {
            out.push_str(&format!("\n    {frame}"));
        }
        out
    }
}

/// Any failure crossing the engine's public boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NailangError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
