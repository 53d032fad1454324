//! Engine configuration and the defines file.
//!
//! A defines file presets root variables before a program runs:
//!
//! | Line | Action |
//! |------|--------|
//! | `name = value` | define `name` |
//! | `# ...` | comment, ignored |
//! | blank | ignored |
//!
//! Values are typed by their spelling: `true`/`false` are bools, `-3` is an
//! int, `42` and `0x2A` are uints, `1.5` and `1e3` are floats, `"quoted"` is
//! a string with `\"`/`\\`/`\n`/`\t` escapes, anything else is taken as a
//! bare string.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::nailang::arena::DEFAULT_TRUNK_SIZE;
use crate::nailang::context::ContextKind;
use crate::nailang::replace::Markers;
use crate::nailang::value::Arg;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A malformed line in a defines file (1-based line number).
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("invalid engine config: {0}")]
    Invalid(String),
}

// ── Define values ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum DefineValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
}

impl DefineValue {
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("missing value".into());
        }
        if let Some(quoted) = text.strip_prefix('"') {
            return unquote(quoted).map(DefineValue::Str);
        }
        Ok(match text {
            "true" => DefineValue::Bool(true),
            "false" => DefineValue::Bool(false),
            _ => {
                if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    u64::from_str_radix(hex, 16).map(DefineValue::Uint).map_err(|e| format!("bad hex value: {e}"))?
                } else if let Ok(v) = text.parse::<u64>() {
                    DefineValue::Uint(v)
                } else if let Ok(v) = text.parse::<i64>() {
                    DefineValue::Int(v)
                } else if let Some(v) = text.parse::<f64>().ok().filter(|_| text.bytes().any(|b| b.is_ascii_digit())) {
                    DefineValue::Float(v)
                } else {
                    DefineValue::Str(text.to_owned())
                }
            }
        })
    }
}

impl From<&DefineValue> for Arg {
    fn from(value: &DefineValue) -> Arg {
        match value {
            DefineValue::Bool(v) => Arg::Bool(*v),
            DefineValue::Int(v) => Arg::Int(*v),
            DefineValue::Uint(v) => Arg::Uint(*v),
            DefineValue::Float(v) => Arg::FP(*v),
            DefineValue::Str(s) => Arg::from(s.as_str()),
        }
    }
}

/// Decode the body of a quoted value; `rest` starts after the opening quote.
fn unquote(rest: &str) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = rest.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                return if chars.as_str().trim().is_empty() {
                    Ok(out)
                } else {
                    Err("text after closing quote".into())
                };
            }
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(c) => out.push(c),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err("unterminated string".into())
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.ends_with('.')
        && !name.contains("..")
}

// ── Defines ───────────────────────────────────────────────────────────────────

/// Named values preset as root variables.  Later definitions of a name win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defines {
    entries: Vec<(String, DefineValue)>,
}

impl Defines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DefineValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DefineValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn set(&mut self, name: impl Into<String>, value: DefineValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Parse and add one `name=value` definition.
    pub fn define(&mut self, spec: &str) -> Result<(), String> {
        let (name, value) = spec.split_once('=').ok_or_else(|| format!("expected name=value, got '{spec}'"))?;
        let name = name.trim();
        if !valid_name(name) {
            return Err(format!("invalid define name '{name}'"));
        }
        self.set(name, DefineValue::parse(value)?);
        Ok(())
    }

    /// Fold `other` in; its values override ours.
    pub fn merge(&mut self, other: Defines) {
        for (name, value) in other.entries {
            self.set(name, value);
        }
    }

    /// Parse a defines file.  Malformed lines are reported and skipped.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut defines = Defines::new();
        let mut errors = Vec::new();
        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(message) = defines.define(line) {
                errors.push(ConfigError::Syntax { line: i + 1, message });
            }
        }
        (defines, errors)
    }

    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// `<config dir>/nailang/defines`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("nailang").join("defines"))
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Trunk size of each program's text pool, in bytes.
    pub trunk_size: usize,
    pub root_context: ContextKind,
    pub child_context: ContextKind,
    pub markers: Markers,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            trunk_size: DEFAULT_TRUNK_SIZE,
            root_context: ContextKind::Large,
            child_context: ContextKind::Compact,
            markers: Markers::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trunk_size == 0 {
            return Err(ConfigError::Invalid("trunk size must be positive".into()));
        }
        self.markers.validate().map_err(ConfigError::Invalid)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
