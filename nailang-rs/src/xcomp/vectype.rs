//! Vector data type names.
//!
//! Templates spell element types as `<kind><bits>[+][v<lanes>]`: `f32v4`,
//! `i8`, `u16v2`, `f16`.  A trailing `+` on the bit count asks for "at least
//! this many bits" and maps to the same kernel type.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Unsigned,
    Signed,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VecType {
    pub kind: ScalarKind,
    pub bits: u8,
    /// 1 for scalars.
    pub lanes: u8,
    pub min_bits: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VecTypeError {
    #[error("[{0}] is not recognized as VecType")]
    Unrecognized(String),
    #[error("[{0}] is not supported")]
    Unsupported(String),
}

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([uif])(8|16|32|64)(\+)?(?:v(2|3|4|8|16))?$").expect("vec type pattern"))
}

impl FromStr for VecType {
    type Err = VecTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = pattern().captures(s).ok_or_else(|| VecTypeError::Unrecognized(s.to_owned()))?;
        let kind = match &caps[1] {
            "u" => ScalarKind::Unsigned,
            "i" => ScalarKind::Signed,
            _ => ScalarKind::Float,
        };
        let bits: u8 = caps[2].parse().map_err(|_| VecTypeError::Unrecognized(s.to_owned()))?;
        if kind == ScalarKind::Float && bits == 8 {
            return Err(VecTypeError::Unsupported(s.to_owned()));
        }
        let lanes = match caps.get(4) {
            Some(m) => m.as_str().parse().map_err(|_| VecTypeError::Unrecognized(s.to_owned()))?,
            None => 1,
        };
        Ok(VecType { kind, bits, lanes, min_bits: caps.get(3).is_some() })
    }
}

impl VecType {
    /// The kernel-language spelling: `float4`, `char`, `ushort2`.
    pub fn kernel_name(&self) -> String {
        let scalar = match (self.kind, self.bits) {
            (ScalarKind::Unsigned, 8) => "uchar",
            (ScalarKind::Unsigned, 16) => "ushort",
            (ScalarKind::Unsigned, 32) => "uint",
            (ScalarKind::Unsigned, _) => "ulong",
            (ScalarKind::Signed, 8) => "char",
            (ScalarKind::Signed, 16) => "short",
            (ScalarKind::Signed, 32) => "int",
            (ScalarKind::Signed, _) => "long",
            (ScalarKind::Float, 16) => "half",
            (ScalarKind::Float, 32) => "float",
            (ScalarKind::Float, _) => "double",
        };
        if self.lanes > 1 {
            format!("{scalar}{}", self.lanes)
        } else {
            scalar.to_owned()
        }
    }
}

impl fmt::Display for VecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ScalarKind::Unsigned => 'u',
            ScalarKind::Signed => 'i',
            ScalarKind::Float => 'f',
        };
        write!(f, "{prefix}{}", self.bits)?;
        if self.min_bits {
            f.write_str("+")?;
        }
        if self.lanes > 1 {
            write!(f, "v{}", self.lanes)?;
        }
        Ok(())
    }
}

/// Parse `name` and return its kernel spelling.
pub fn vec_type_name(name: &str) -> Result<String, VecTypeError> {
    Ok(name.parse::<VecType>()?.kernel_name())
}
