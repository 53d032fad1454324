//! Runtime value type.
//!
//! [`Arg`] is a small tagged union.  Strings are either shared owned text
//! (`Rc<str>`) or a view of a literal inside the program's [`Ast`]; custom
//! values delegate everything to their handler.  Cloning never deep-copies.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::arena::StrSpan;
use super::ast::Ast;
use super::custom::CustomVar;
use super::token::EmbedOp;

/// Built-in kinds a custom value may be converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Uint,
    Int,
    FP,
    Str,
}

/// A string literal borrowed from a parsed program.
#[derive(Clone)]
pub struct ArenaStr {
    owner: Rc<Ast>,
    span: StrSpan,
}

impl ArenaStr {
    pub fn new(owner: Rc<Ast>, span: StrSpan) -> Self {
        ArenaStr { owner, span }
    }

    pub fn as_str(&self) -> &str {
        self.owner.text(self.span)
    }
}

/// A runtime value.
#[derive(Clone, Default)]
pub enum Arg {
    #[default]
    Empty,
    Custom(CustomVar),
    Str(Rc<str>),
    View(ArenaStr),
    Uint(u64),
    Int(i64),
    FP(f64),
    Bool(bool),
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Empty => f.write_str("Empty"),
            Arg::Custom(var) => var.fmt(f),
            Arg::Str(s) => write!(f, "Str({s:?})"),
            Arg::View(s) => write!(f, "View({:?})", s.as_str()),
            Arg::Uint(v) => write!(f, "Uint({v})"),
            Arg::Int(v) => write!(f, "Int({v})"),
            Arg::FP(v) => write!(f, "FP({v})"),
            Arg::Bool(v) => write!(f, "Bool({v})"),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Empty => Ok(()),
            Arg::Custom(var) => f.write_str(&var.handler.to_string(var)),
            Arg::Str(s) => f.write_str(s),
            Arg::View(s) => f.write_str(s.as_str()),
            Arg::Uint(v) => write!(f, "{v}"),
            Arg::Int(v) => write!(f, "{v}"),
            Arg::FP(v) => write!(f, "{v}"),
            Arg::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Structural equality: same kind and value; strings by content, custom
/// values by identity.
impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Empty, Arg::Empty) => true,
            (Arg::Custom(a), Arg::Custom(b)) => a.ptr_eq(b),
            (Arg::Uint(a), Arg::Uint(b)) => a == b,
            (Arg::Int(a), Arg::Int(b)) => a == b,
            (Arg::FP(a), Arg::FP(b)) => a == b,
            (Arg::Bool(a), Arg::Bool(b)) => a == b,
            _ => match (self.as_str(), other.as_str()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Arg {
    pub fn is_empty(&self) -> bool {
        matches!(self, Arg::Empty)
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Arg::Str(_) | Arg::View(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Arg::Uint(_) | Arg::Int(_) | Arg::FP(_))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Arg::Empty => "empty",
            Arg::Custom(var) => var.handler.type_name(),
            Arg::Str(_) | Arg::View(_) => "string",
            Arg::Uint(_) => "uint",
            Arg::Int(_) => "int",
            Arg::FP(_) => "fp",
            Arg::Bool(_) => "bool",
        }
    }

    /// The text of a string value, without conversion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            Arg::View(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn convert(&self, kind: ArgKind) -> Option<Arg> {
        match self {
            Arg::Custom(var) => {
                var.handler.convert_to_common(var, kind).filter(|arg| !matches!(arg, Arg::Custom(_)))
            }
            _ => None,
        }
    }

    // ── Coercions ─────────────────────────────────────────────────────────────

    pub fn get_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(v) => Some(*v),
            Arg::Uint(v) => Some(*v != 0),
            Arg::Int(v) => Some(*v != 0),
            Arg::FP(v) => Some(*v != 0.0),
            Arg::Str(_) | Arg::View(_) => self.as_str().map(|s| !s.is_empty()),
            Arg::Custom(_) => self.convert(ArgKind::Bool)?.get_bool(),
            Arg::Empty => None,
        }
    }

    pub fn get_uint(&self) -> Option<u64> {
        match self {
            Arg::Bool(v) => Some(u64::from(*v)),
            Arg::Uint(v) => Some(*v),
            Arg::Int(v) => u64::try_from(*v).ok(),
            Arg::FP(v) if v.is_finite() && *v >= 0.0 => Some(v.trunc() as u64),
            Arg::Custom(_) => self.convert(ArgKind::Uint)?.get_uint(),
            _ => None,
        }
    }

    pub fn get_int(&self) -> Option<i64> {
        match self {
            Arg::Bool(v) => Some(i64::from(*v)),
            Arg::Uint(v) => i64::try_from(*v).ok(),
            Arg::Int(v) => Some(*v),
            Arg::FP(v) if v.is_finite() => Some(v.trunc() as i64),
            Arg::Custom(_) => self.convert(ArgKind::Int)?.get_int(),
            _ => None,
        }
    }

    pub fn get_fp(&self) -> Option<f64> {
        match self {
            Arg::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Arg::Uint(v) => Some(*v as f64),
            Arg::Int(v) => Some(*v as f64),
            Arg::FP(v) => Some(*v),
            Arg::Custom(_) => self.convert(ArgKind::FP)?.get_fp(),
            _ => None,
        }
    }

    pub fn get_str(&self) -> Option<Cow<'_, str>> {
        match self {
            Arg::Str(_) | Arg::View(_) => self.as_str().map(Cow::Borrowed),
            Arg::Custom(_) => {
                let converted = self.convert(ArgKind::Str)?;
                converted.as_str().map(|s| Cow::Owned(s.to_owned()))
            }
            _ => None,
        }
    }

    /// Turn a borrowed literal into owned text so it outlives its program.
    pub fn into_owned(self) -> Arg {
        match self {
            Arg::View(s) => Arg::Str(Rc::from(s.as_str())),
            other => other,
        }
    }

    // ── Operators ─────────────────────────────────────────────────────────────

    pub fn unary(&self, op: EmbedOp) -> Result<Arg, String> {
        match op {
            EmbedOp::Not => self
                .get_bool()
                .map(|b| Arg::Bool(!b))
                .ok_or_else(|| format!("cannot apply '!' to {}", self.type_name())),
            EmbedOp::BitNot => match self {
                Arg::Uint(v) => Ok(Arg::Uint(!v)),
                Arg::Int(v) => Ok(Arg::Int(!v)),
                _ => Err(format!("cannot apply '~' to {}", self.type_name())),
            },
            _ => Err(format!("'{}' is not a unary operator", op.symbol())),
        }
    }

    /// Evaluate a binary operator.  `&&`, `||` and `??` are handled here
    /// without short-circuit; the evaluator short-circuits before calling.
    pub fn binary(&self, op: EmbedOp, rhs: &Arg) -> Result<Arg, String> {
        match op {
            EmbedOp::Equal => Ok(Arg::Bool(self.loose_eq(rhs))),
            EmbedOp::NotEqual => Ok(Arg::Bool(!self.loose_eq(rhs))),
            EmbedOp::Less | EmbedOp::LessEqual | EmbedOp::Greater | EmbedOp::GreaterEqual => {
                let ord = self.compare(rhs).ok_or_else(|| self.op_error(op, rhs))?;
                Ok(Arg::Bool(match op {
                    EmbedOp::Less => ord == Ordering::Less,
                    EmbedOp::LessEqual => ord != Ordering::Greater,
                    EmbedOp::Greater => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            EmbedOp::And | EmbedOp::Or => {
                let (Some(a), Some(b)) = (self.get_bool(), rhs.get_bool()) else {
                    return Err(self.op_error(op, rhs));
                };
                Ok(Arg::Bool(if op == EmbedOp::And { a && b } else { a || b }))
            }
            EmbedOp::ValueOr => Ok(if self.is_empty() { rhs.clone() } else { self.clone() }),
            EmbedOp::Add if self.is_str() => Ok(Arg::Str(Rc::from(format!("{self}{rhs}")))),
            EmbedOp::Add | EmbedOp::Sub | EmbedOp::Mul | EmbedOp::Div | EmbedOp::Rem => {
                self.arith(op, rhs)
            }
            EmbedOp::BitAnd | EmbedOp::BitOr | EmbedOp::BitXor => self.bitwise(op, rhs),
            EmbedOp::ShiftLeft | EmbedOp::ShiftRight => self.shift(op, rhs),
            EmbedOp::Not | EmbedOp::BitNot | EmbedOp::CheckExist => {
                Err(format!("'{}' is not a binary operator", op.symbol()))
            }
        }
    }

    fn op_error(&self, op: EmbedOp, rhs: &Arg) -> String {
        format!("cannot apply '{}' to {} and {}", op.symbol(), self.type_name(), rhs.type_name())
    }

    /// `==` semantics: numbers compare by value across kinds, strings by
    /// content, anything else only against its own kind.
    fn loose_eq(&self, rhs: &Arg) -> bool {
        if self.is_number() && rhs.is_number() {
            return self.compare(rhs) == Some(Ordering::Equal);
        }
        self == rhs
    }

    fn compare(&self, rhs: &Arg) -> Option<Ordering> {
        match (self, rhs) {
            (Arg::Uint(a), Arg::Uint(b)) => Some(a.cmp(b)),
            (Arg::Int(a), Arg::Int(b)) => Some(a.cmp(b)),
            (Arg::Uint(a), Arg::Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Arg::Int(a), Arg::Uint(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Arg::FP(_), _) | (_, Arg::FP(_)) if self.is_number() && rhs.is_number() => {
                self.get_fp()?.partial_cmp(&rhs.get_fp()?)
            }
            (Arg::Bool(a), Arg::Bool(b)) => Some(a.cmp(b)),
            _ => Some(self.as_str()?.cmp(rhs.as_str()?)),
        }
    }

    fn arith(&self, op: EmbedOp, rhs: &Arg) -> Result<Arg, String> {
        let err = || self.op_error(op, rhs);
        match (self, rhs) {
            (Arg::FP(_), _) | (_, Arg::FP(_)) => {
                let (a, b) = (self.get_fp().ok_or_else(err)?, rhs.get_fp().ok_or_else(err)?);
                Ok(Arg::FP(match op {
                    EmbedOp::Add => a + b,
                    EmbedOp::Sub => a - b,
                    EmbedOp::Mul => a * b,
                    EmbedOp::Div => a / b,
                    _ => a % b,
                }))
            }
            (Arg::Uint(a), Arg::Uint(b)) => {
                let (a, b) = (*a, *b);
                match op {
                    EmbedOp::Add => Ok(Arg::Uint(a.wrapping_add(b))),
                    EmbedOp::Sub if a < b => Ok(Arg::Int((a as i64).wrapping_sub(b as i64))),
                    EmbedOp::Sub => Ok(Arg::Uint(a - b)),
                    EmbedOp::Mul => Ok(Arg::Uint(a.wrapping_mul(b))),
                    EmbedOp::Div => a.checked_div(b).map(Arg::Uint).ok_or_else(|| "division by zero".into()),
                    _ => a.checked_rem(b).map(Arg::Uint).ok_or_else(|| "modulo by zero".into()),
                }
            }
            (Arg::Uint(_) | Arg::Int(_) | Arg::Bool(_), Arg::Uint(_) | Arg::Int(_) | Arg::Bool(_)) => {
                let (a, b) = (self.get_int().ok_or_else(err)?, rhs.get_int().ok_or_else(err)?);
                match op {
                    EmbedOp::Add => Ok(Arg::Int(a.wrapping_add(b))),
                    EmbedOp::Sub => Ok(Arg::Int(a.wrapping_sub(b))),
                    EmbedOp::Mul => Ok(Arg::Int(a.wrapping_mul(b))),
                    EmbedOp::Div => a.checked_div(b).map(Arg::Int).ok_or_else(|| "division by zero".into()),
                    _ => a.checked_rem(b).map(Arg::Int).ok_or_else(|| "modulo by zero".into()),
                }
            }
            _ => Err(err()),
        }
    }

    fn bitwise(&self, op: EmbedOp, rhs: &Arg) -> Result<Arg, String> {
        let apply = |a: u64, b: u64| match op {
            EmbedOp::BitAnd => a & b,
            EmbedOp::BitOr => a | b,
            _ => a ^ b,
        };
        match (self, rhs) {
            (Arg::Uint(a), Arg::Uint(b)) => Ok(Arg::Uint(apply(*a, *b))),
            (Arg::Uint(_) | Arg::Int(_), Arg::Uint(_) | Arg::Int(_)) => {
                let a = self.get_int().unwrap_or_else(|| self.get_uint().unwrap_or(0) as i64);
                let b = rhs.get_int().unwrap_or_else(|| rhs.get_uint().unwrap_or(0) as i64);
                Ok(Arg::Int(apply(a as u64, b as u64) as i64))
            }
            (Arg::Bool(a), Arg::Bool(b)) => Ok(Arg::Bool(apply(u64::from(*a), u64::from(*b)) != 0)),
            _ => Err(self.op_error(op, rhs)),
        }
    }

    fn shift(&self, op: EmbedOp, rhs: &Arg) -> Result<Arg, String> {
        let amount = rhs.get_uint().ok_or_else(|| self.op_error(op, rhs))?;
        let amount = u32::try_from(amount).unwrap_or(u32::MAX);
        match self {
            Arg::Uint(v) => Ok(Arg::Uint(if op == EmbedOp::ShiftLeft {
                v.checked_shl(amount).unwrap_or(0)
            } else {
                v.checked_shr(amount).unwrap_or(0)
            })),
            Arg::Int(v) => Ok(Arg::Int(if op == EmbedOp::ShiftLeft {
                v.checked_shl(amount).unwrap_or(0)
            } else {
                v.checked_shr(amount).unwrap_or(if *v < 0 { -1 } else { 0 })
            })),
            _ => Err(self.op_error(op, rhs)),
        }
    }

    // ── Queries on built-in kinds ─────────────────────────────────────────────

    /// `str[i]`: the character at `i`, counting from the end when negative.
    pub fn index_str(&self, index: &Arg) -> Result<Arg, String> {
        let s = self.as_str().ok_or_else(|| format!("cannot index into {}", self.type_name()))?;
        let count = s.chars().count() as i64;
        let idx = index.get_int().ok_or_else(|| format!("index must be an integer, got {}", index.type_name()))?;
        let pos = if idx < 0 { count + idx } else { idx };
        if pos < 0 || pos >= count {
            return Err(format!("index [{idx}] out of range for string of length {count}"));
        }
        let ch = s.chars().nth(pos as usize).map(String::from).unwrap_or_default();
        Ok(Arg::Str(Rc::from(ch)))
    }

    /// Built-in subfields (`Length` on strings).
    pub fn subfield(&self, field: &str) -> Option<Arg> {
        match (self.as_str(), field) {
            (Some(s), "Length") => Some(Arg::Uint(s.chars().count() as u64)),
            _ => None,
        }
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<u64> for Arg {
    fn from(v: u64) -> Self {
        Arg::Uint(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::FP(v)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(Rc::from(s))
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Arg {
    fn from(s: Rc<str>) -> Self {
        Arg::Str(s)
    }
}

impl From<CustomVar> for Arg {
    fn from(v: CustomVar) -> Self {
        Arg::Custom(v)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
