//! Dotted qualified names (`a.b.c`) for variables and functions.
//!
//! A name keeps its full text in one buffer plus a table of part ranges.
//! Up to four parts are stored inline; longer names spill to the heap.
//! Two flag bits carry the name's role: scope prefix for variables, call
//! kind for functions.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use thiserror::Error;

/// Failure building a [`QualifiedName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name [{name}] has an empty part at [{index}]")]
    EmptyPart { name: String, index: usize },
    #[error("name [{0}] is too long")]
    TooLong(String),
}

/// Scope selector carried by variable names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VarScope {
    /// No prefix: search innermost scope outwards.
    #[default]
    Any,
    /// `` ` `` prefix: the root scope.
    Root,
    /// `:` prefix: the current scope only.
    Local,
}

/// Call kind carried by function names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FuncKind {
    #[default]
    Plain,
    /// Statement annotation (`@name(...)`).
    Meta,
    /// Call appearing inside an expression.
    ExprPart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Part {
    offset: u16,
    len: u16,
}

/// An immutable dotted name.
#[derive(Clone)]
pub struct QualifiedName {
    text: Rc<str>,
    parts: SmallVec<[Part; 4]>,
    flags: u8,
}

impl QualifiedName {
    /// Split `text` on dots.  Every part must be non-empty.
    pub fn new(text: &str) -> Result<Self, NameError> {
        if text.is_empty() {
            return Err(NameError::Empty);
        }
        if text.len() > u16::MAX as usize {
            return Err(NameError::TooLong(text.to_owned()));
        }
        let mut parts = SmallVec::new();
        let mut offset = 0usize;
        for (index, piece) in text.split('.').enumerate() {
            if piece.is_empty() {
                return Err(NameError::EmptyPart { name: text.to_owned(), index });
            }
            parts.push(Part { offset: offset as u16, len: piece.len() as u16 });
            offset += piece.len() + 1;
        }
        Ok(QualifiedName { text: Rc::from(text), parts, flags: 0 })
    }

    /// Parse a variable reference, stripping a `` ` `` or `:` scope prefix.
    pub fn var(text: &str) -> Result<Self, NameError> {
        let (scope, rest) = match text.as_bytes().first() {
            Some(b'`') => (VarScope::Root, &text[1..]),
            Some(b':') => (VarScope::Local, &text[1..]),
            _ => (VarScope::Any, text),
        };
        let mut name = Self::new(rest)?;
        name.flags = match scope {
            VarScope::Any => 0,
            VarScope::Root => 1,
            VarScope::Local => 2,
        };
        Ok(name)
    }

    pub fn func(text: &str, kind: FuncKind) -> Result<Self, NameError> {
        let mut name = Self::new(text)?;
        name.flags = match kind {
            FuncKind::Plain => 0,
            FuncKind::Meta => 1,
            FuncKind::ExprPart => 2,
        };
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, idx: usize) -> Option<&str> {
        self.parts.get(idx).map(|p| self.slice(p.offset as usize, p.len as usize))
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> + '_ {
        self.parts.iter().map(|p| self.slice(p.offset as usize, p.len as usize))
    }

    /// The name from part `idx` onwards (`a.b.c`.get_rest(1) == `b.c`).
    pub fn get_rest(&self, idx: usize) -> &str {
        match self.parts.get(idx) {
            Some(p) => &self.text[p.offset as usize..],
            None => "",
        }
    }

    /// Parts `[from, to)` joined with dots.
    pub fn get_range(&self, from: usize, to: usize) -> &str {
        let to = to.min(self.parts.len());
        if from >= to {
            return "";
        }
        let begin = self.parts[from].offset as usize;
        let last = self.parts[to - 1];
        &self.text[begin..last.offset as usize + last.len as usize]
    }

    pub fn scope(&self) -> VarScope {
        match self.flags & 0b11 {
            1 => VarScope::Root,
            2 => VarScope::Local,
            _ => VarScope::Any,
        }
    }

    pub fn func_kind(&self) -> FuncKind {
        match self.flags & 0b11 {
            1 => FuncKind::Meta,
            2 => FuncKind::ExprPart,
            _ => FuncKind::Plain,
        }
    }

    /// The variable as written in source, including its scope prefix.
    pub fn var_source(&self) -> String {
        match self.scope() {
            VarScope::Any => self.text.to_string(),
            VarScope::Root => format!("`{}", self.text),
            VarScope::Local => format!(":{}", self.text),
        }
    }

    fn slice(&self, offset: usize, len: usize) -> &str {
        &self.text[offset..offset + len]
    }
}

impl PartialEq for QualifiedName {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}
impl Eq for QualifiedName {}

impl PartialEq<str> for QualifiedName {
    fn eq(&self, other: &str) -> bool {
        &*self.text == other
    }
}
impl PartialEq<&str> for QualifiedName {
    fn eq(&self, other: &&str) -> bool {
        &*self.text == *other
    }
}

impl std::hash::Hash for QualifiedName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QualifiedName({:?})", &*self.text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
