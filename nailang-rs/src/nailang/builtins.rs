//! Built-in Nailang functions that need no runtime state.
//!
//! Each function receives already-evaluated arguments and returns
//! `Result<Arg, String>`.  Control-flow functions (`Return`, `Break`, ...)
//! live in the executor since they act on the frame stack.

use std::rc::Rc;

use super::value::Arg;

/// Dispatch an engine built-in (`Select`, `Format`, `ToString`, `Len`).
///
/// Returns `None` if `name` is not one of them.
pub fn call_builtin(name: &str, args: &[Arg]) -> Option<Result<Arg, String>> {
    fn inner(name: &str, args: &[Arg]) -> Result<Option<Arg>, String> {
        Ok(Some(match name {
            "Select" => {
                expect_count(args, 3, name)?;
                let cond = get_bool(args, 0, name)?;
                args[if cond { 1 } else { 2 }].clone()
            }
            "Format" => {
                let fmt = get_str(args, 0, name)?;
                Arg::from(format_args_list(&fmt, &args[1..])?)
            }
            "ToString" => {
                expect_count(args, 1, name)?;
                Arg::from(args[0].to_string())
            }
            "Len" => {
                expect_count(args, 1, name)?;
                match args[0].get_str() {
                    Some(s) => Arg::Uint(s.chars().count() as u64),
                    None => return Err(format!("{name}: expect a string, got {}", args[0].type_name())),
                }
            }
            _ => return Ok(None),
        }))
    }
    inner(name, args).transpose()
}

/// Dispatch a `Math.*` function.
pub fn call_math(name: &str, args: &[Arg]) -> Option<Result<Arg, String>> {
    fn inner(name: &str, args: &[Arg]) -> Result<Option<Arg>, String> {
        let Some(func) = name.strip_prefix("Math.") else {
            return Ok(None);
        };
        Ok(Some(match func {
            "Max" | "Min" => {
                let mut best = args.first().ok_or_else(|| format!("{name}: too few args"))?;
                for arg in &args[1..] {
                    let op = if func == "Max" {
                        super::token::EmbedOp::Greater
                    } else {
                        super::token::EmbedOp::Less
                    };
                    if arg.binary(op, best)?.get_bool() == Some(true) {
                        best = arg;
                    }
                }
                best.clone()
            }
            "Abs" => match args.first() {
                Some(Arg::Int(v)) => Arg::Int(v.wrapping_abs()),
                Some(Arg::Uint(v)) => Arg::Uint(*v),
                Some(Arg::FP(v)) => Arg::FP(v.abs()),
                Some(other) => return Err(format!("{name}: expect a number, got {}", other.type_name())),
                None => return Err(format!("{name}: too few args")),
            },
            "Sqrt" => Arg::FP(get_fp(args, 0, name)?.sqrt()),
            "Ceil" => Arg::FP(get_fp(args, 0, name)?.ceil()),
            "Floor" => Arg::FP(get_fp(args, 0, name)?.floor()),
            "Round" => Arg::FP(get_fp(args, 0, name)?.round()),
            "Log2" => Arg::FP(get_fp(args, 0, name)?.log2()),
            "Log10" => Arg::FP(get_fp(args, 0, name)?.log10()),
            "Pow" => {
                let base = get_fp(args, 0, name)?;
                let exp = get_fp(args, 1, name)?;
                Arg::FP(base.powf(exp))
            }
            "ToUint" => Arg::Uint(
                args.first()
                    .and_then(Arg::get_uint)
                    .ok_or_else(|| format!("{name}: cannot convert to uint"))?,
            ),
            "ToInt" => Arg::Int(
                args.first()
                    .and_then(Arg::get_int)
                    .ok_or_else(|| format!("{name}: cannot convert to int"))?,
            ),
            "ToFP" => Arg::FP(get_fp(args, 0, name)?),
            _ => return Ok(None),
        }))
    }
    inner(name, args).transpose()
}

/// Replace `{}` / `{N}` placeholders with the rendered arguments.
/// `{{` and `}}` produce literal braces.
pub fn format_args_list(fmt: &str, args: &[Arg]) -> Result<String, String> {
    let mut out = String::with_capacity(fmt.len());
    let mut next = 0usize;
    let mut chars = fmt.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => spec.push(c),
                        None => return Err(format!("unterminated placeholder in [{fmt}]")),
                    }
                }
                let idx = if spec.is_empty() {
                    next += 1;
                    next - 1
                } else {
                    spec.trim().parse().map_err(|_| format!("bad placeholder {{{spec}}}"))?
                };
                let arg = args.get(idx).ok_or_else(|| format!("missing argument {idx} for [{fmt}]"))?;
                out.push_str(&arg.to_string());
            }
            '}' => return Err(format!("unmatched '}}' in [{fmt}]")),
            c => out.push(c),
        }
    }
    Ok(out)
}

// ── Argument accessors ────────────────────────────────────────────────────────

fn expect_count(args: &[Arg], count: usize, name: &str) -> Result<(), String> {
    if args.len() != count {
        return Err(format!("{name}: expect {count} args, got {}", args.len()));
    }
    Ok(())
}

fn get_str(args: &[Arg], idx: usize, name: &str) -> Result<Rc<str>, String> {
    let arg = args.get(idx).ok_or_else(|| format!("{name}: argument {idx} missing"))?;
    arg.get_str()
        .map(|s| Rc::from(s.as_ref()))
        .ok_or_else(|| format!("{name}: argument {idx} must be a string"))
}

fn get_bool(args: &[Arg], idx: usize, name: &str) -> Result<bool, String> {
    args.get(idx)
        .and_then(Arg::get_bool)
        .ok_or_else(|| format!("{name}: argument {idx} must be convertible to bool"))
}

fn get_fp(args: &[Arg], idx: usize, name: &str) -> Result<f64, String> {
    args.get(idx)
        .and_then(Arg::get_fp)
        .ok_or_else(|| format!("{name}: argument {idx} must be a number"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
