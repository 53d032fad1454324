//! Marker-driven text replacement.
//!
//! Raw block bodies may embed three kinds of markers, processed in this
//! order:
//!
//! | Marker | Default form | Handler |
//! |--------|--------------|---------|
//! | optional block | `$$@ cond { text }@$$` | [`ReplaceHandler::on_opt_block`] |
//! | variable | `$$!{name}` | [`ReplaceHandler::on_variable`] |
//! | function | `$$!name(arg, "a,b")` | [`ReplaceHandler::on_function`] |
//!
//! Function arguments are split on commas outside double quotes and passed
//! through untouched (quotes included).

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use super::error::RuntimeError;

/// Marker strings.  All must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub variable_prefix: String,
    pub variable_suffix: String,
    pub function_prefix: String,
    pub opt_prefix: String,
    pub opt_suffix: String,
}

impl Default for Markers {
    fn default() -> Self {
        Markers {
            variable_prefix: "$$!{".into(),
            variable_suffix: "}".into(),
            function_prefix: "$$!".into(),
            opt_prefix: "$$@".into(),
            opt_suffix: "@$$".into(),
        }
    }
}

impl Markers {
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("variable prefix", &self.variable_prefix),
            ("variable suffix", &self.variable_suffix),
            ("function prefix", &self.function_prefix),
            ("optional block prefix", &self.opt_prefix),
            ("optional block suffix", &self.opt_suffix),
        ];
        match all.iter().find(|(_, m)| m.is_empty()) {
            Some((what, _)) => Err(format!("replace {what} must not be empty")),
            None => Ok(()),
        }
    }
}

pub trait ReplaceHandler {
    fn on_variable(&mut self, output: &mut String, var: &str) -> Result<(), RuntimeError>;
    fn on_function(&mut self, output: &mut String, func: &str, args: &[&str]) -> Result<(), RuntimeError>;
    /// Append `content` when `cond` holds.
    fn on_opt_block(&mut self, output: &mut String, cond: &str, content: &str) -> Result<(), RuntimeError>;
}

#[derive(Debug)]
pub struct ReplaceEngine {
    markers: Markers,
    variable: AhoCorasick,
    function: AhoCorasick,
    opt: AhoCorasick,
}

fn finder(pattern: &str) -> AhoCorasick {
    AhoCorasickBuilder::new().match_kind(MatchKind::LeftmostFirst).build([pattern])
}

fn syntax_error(message: &str, near: &str) -> RuntimeError {
    let near: String = near.chars().take(24).collect();
    RuntimeError::new(format!("{message} near [{near}]"))
}

impl Default for ReplaceEngine {
    fn default() -> Self {
        Self::new(Markers::default())
    }
}

impl ReplaceEngine {
    pub fn new(markers: Markers) -> Self {
        ReplaceEngine {
            variable: finder(&markers.variable_prefix),
            function: finder(&markers.function_prefix),
            opt: finder(&markers.opt_prefix),
            markers,
        }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Run the enabled passes over `src`.  Optional blocks are expanded
    /// whenever any pass is enabled.
    pub fn process(
        &self,
        src: &str,
        handler: &mut dyn ReplaceHandler,
        variables: bool,
        functions: bool,
    ) -> Result<String, RuntimeError> {
        if !variables && !functions {
            return Ok(src.to_owned());
        }
        let mut text = self.process_opt_blocks(src, handler)?;
        if variables {
            text = self.process_variables(&text, handler)?;
        }
        if functions {
            text = self.process_functions(&text, handler)?;
        }
        Ok(text)
    }

    pub fn process_variables(&self, src: &str, handler: &mut dyn ReplaceHandler) -> Result<String, RuntimeError> {
        let suffix = self.markers.variable_suffix.as_str();
        let mut out = String::with_capacity(src.len());
        let mut rest = src;
        while let Some(m) = self.variable.find(rest) {
            out.push_str(&rest[..m.start()]);
            let after = rest[m.end()..].trim_start();
            let Some(end) = after.find(suffix) else {
                let msg = if after.is_empty() { "End before variable name" } else { "No suffix found!" };
                return Err(syntax_error(msg, &rest[m.start()..]));
            };
            handler.on_variable(&mut out, after[..end].trim_end())?;
            rest = &after[end + suffix.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }

    pub fn process_functions(&self, src: &str, handler: &mut dyn ReplaceHandler) -> Result<String, RuntimeError> {
        let mut out = String::with_capacity(src.len());
        let mut rest = src;
        let var_prefix = self.markers.variable_prefix.as_str();
        while let Some(m) = self.function.find(rest) {
            out.push_str(&rest[..m.start()]);
            // a variable marker left for the variable pass
            if rest[m.start()..].starts_with(var_prefix) {
                out.push_str(var_prefix);
                rest = &rest[m.start() + var_prefix.len()..];
                continue;
            }
            let after = rest[m.end()..].trim_start();
            let Some(paren) = after.find('(') else {
                let msg = if after.is_empty() { "End before func name" } else { "No '(' found!" };
                return Err(syntax_error(msg, &rest[m.start()..]));
            };
            let name = after[..paren].trim_end();
            let list = &after[paren + 1..];
            let (args, used) = split_args(list).map_err(|msg| syntax_error(msg, &rest[m.start()..]))?;
            handler.on_function(&mut out, name, &args)?;
            rest = &list[used..];
        }
        out.push_str(rest);
        Ok(out)
    }

    pub fn process_opt_blocks(&self, src: &str, handler: &mut dyn ReplaceHandler) -> Result<String, RuntimeError> {
        let close = format!("}}{}", self.markers.opt_suffix);
        let mut out = String::with_capacity(src.len());
        let mut rest = src;
        while let Some(m) = self.opt.find(rest) {
            out.push_str(&rest[..m.start()]);
            let after = &rest[m.end()..];
            let Some(brace) = after.find('{') else {
                let msg = if after.trim().is_empty() { "End before condition" } else { "No '{' found!" };
                return Err(syntax_error(msg, &rest[m.start()..]));
            };
            let body = &after[brace + 1..];
            let Some(end) = body.find(&close) else {
                return Err(syntax_error("No suffix found!", &rest[m.start()..]));
            };
            handler.on_opt_block(&mut out, after[..brace].trim(), &body[..end])?;
            rest = &body[end + close.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgState {
    Init,
    Pending,
    InQuote,
    Escape,
    End,
}

/// Split `a, "b,c")...` into its arguments.  Returns them with the number of
/// bytes consumed, closing parenthesis included.
fn split_args(list: &str) -> Result<(Vec<&str>, usize), &'static str> {
    let bytes = list.as_bytes();
    let skip_blank = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };
    let mut args = Vec::new();
    let mut state = ArgState::Init;
    let mut i = skip_blank(0);
    let mut start = i;
    while i < bytes.len() && state != ArgState::End {
        let ch = bytes[i];
        i += 1;
        state = match (state, ch) {
            (ArgState::Init | ArgState::Pending, b'"') => ArgState::InQuote,
            (ArgState::Init, b',') => return Err("empty arg not allowed"),
            // `(a,)`
            (ArgState::Init, b')') if !args.is_empty() => return Err("empty arg not allowed"),
            (ArgState::Init | ArgState::Pending, b',' | b')') => {
                if state == ArgState::Pending {
                    args.push(list[start..i - 1].trim_end());
                }
                if ch == b')' {
                    ArgState::End
                } else {
                    i = skip_blank(i);
                    start = i;
                    ArgState::Init
                }
            }
            (ArgState::Init | ArgState::Pending, _) => ArgState::Pending,
            (ArgState::InQuote, b'"') => ArgState::Pending,
            (ArgState::InQuote, b'\\') => ArgState::Escape,
            (ArgState::InQuote, _) => ArgState::InQuote,
            (ArgState::Escape, _) => ArgState::InQuote,
            (ArgState::End, _) => ArgState::End,
        };
    }
    if state != ArgState::End {
        return Err("End before arg list finishes");
    }
    Ok((args, i))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
