//! Turn AST terms back into source text.
//!
//! Used for error targets and diagnostics.  The output re-parses to the same
//! tree: an operand of a binary or ternary operator that is itself an
//! operator expression is always parenthesized, as is the operand of a unary
//! operator unless it is atomic.

use std::fmt::Write;

use super::ast::{Ast, FuncCall, RawArg, SubQuery};

pub fn stringify(ast: &Ast, arg: RawArg) -> String {
    let mut out = String::new();
    write_arg(ast, arg, &mut out);
    out
}

/// `Name(arg, arg)`, without the call-site prefix.
pub fn stringify_call(ast: &Ast, call: &FuncCall) -> String {
    let mut out = String::new();
    write_call(ast, call, &mut out);
    out
}

fn is_operator(arg: &RawArg) -> bool {
    matches!(arg, RawArg::Unary { .. } | RawArg::Binary { .. } | RawArg::Ternary { .. })
}

fn write_operand(ast: &Ast, arg: RawArg, out: &mut String) {
    if is_operator(&arg) {
        out.push('(');
        write_arg(ast, arg, out);
        out.push(')');
    } else {
        write_arg(ast, arg, out);
    }
}

fn write_call(ast: &Ast, call: &FuncCall, out: &mut String) {
    out.push_str(ast.name(call.name).as_str());
    out.push('(');
    for (i, arg) in ast.exprs(call.args).iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_arg(ast, *arg, out);
    }
    out.push(')');
}

fn write_arg(ast: &Ast, arg: RawArg, out: &mut String) {
    match arg {
        RawArg::Empty => {}
        RawArg::Func(id) => write_call(ast, ast.call(id), out),
        RawArg::Unary { op, operand } => {
            out.push_str(op.symbol());
            write_operand(ast, ast.expr(operand), out);
        }
        RawArg::Binary { op, left, right } => {
            write_operand(ast, ast.expr(left), out);
            let _ = write!(out, " {} ", op.symbol());
            write_operand(ast, ast.expr(right), out);
        }
        RawArg::Ternary { cond, left, right } => {
            write_operand(ast, ast.expr(cond), out);
            out.push_str(" ? ");
            write_operand(ast, ast.expr(left), out);
            out.push_str(" : ");
            write_operand(ast, ast.expr(right), out);
        }
        RawArg::Query { target, queries } => {
            write_operand(ast, ast.expr(target), out);
            for query in ast.queries(queries) {
                match query {
                    SubQuery::Index(idx) => {
                        out.push('[');
                        write_arg(ast, ast.expr(*idx), out);
                        out.push(']');
                    }
                    SubQuery::Sub(name) => {
                        out.push('.');
                        out.push_str(ast.text(*name));
                    }
                }
            }
        }
        RawArg::Var(id) => out.push_str(&ast.name(id).var_source()),
        RawArg::Str(span) => write_quoted(ast.text(span), out),
        RawArg::Uint(v) => {
            let _ = write!(out, "{v}");
        }
        RawArg::Int(v) => {
            let _ = write!(out, "{v}");
        }
        // `{:?}` keeps the decimal point so the literal stays floating point
        RawArg::FP(v) => {
            let _ = write!(out, "{v:?}");
        }
        RawArg::Bool(v) => out.push_str(if v { "true" } else { "false" }),
    }
}

fn write_quoted(text: &str, out: &mut String) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
}

// ── Tests ─────────────────────────────────────────────────────────────────────
