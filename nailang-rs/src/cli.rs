//! Command-line argument parsing.
//!
//! Usage:
//!   nailang [-D<name>=<value>]... [-f[<file>]] [-o<out>] [-v] <source>
//!
//! A `<source>` of `-` reads the program from stdin.

use std::path::PathBuf;

use crate::config::Defines;

pub const USAGE: &str = "Usage: nailang [-D<name>=<value>]... [-f[<file>]] [-o<out>] [-v] <source>";

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CliArgs {
    /// `-D<name>=<value>` definitions, in command-line order.
    pub defines: Vec<String>,
    pub config: ConfigFile,
    /// Write here instead of stdout (`-o<out>`).
    pub output: Option<PathBuf>,
    /// Debug-level logging unless `RUST_LOG` says otherwise (`-v`).
    pub verbose: bool,
    pub source: PathBuf,
}

/// Where preset defines come from.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// The per-user defines file, when it exists.
    #[default]
    Search,
    /// `-f` alone: no defines file.
    Skip,
    /// `-f<file>`.
    Explicit(PathBuf),
}

impl ConfigFile {
    /// The defines file to load, if any.
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            ConfigFile::Search => Defines::default_path().filter(|p| p.exists()),
            ConfigFile::Skip => None,
            ConfigFile::Explicit(p) => Some(p.clone()),
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings, program name excluded.
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'v' => args.verbose = true,
                'D' => {
                    let def = operand(argv, &mut i, &chars, &mut j, "a name=value argument")?;
                    if !def.contains('=') {
                        return Err(format!("-D expects name=value, got '{def}'"));
                    }
                    args.defines.push(def);
                }
                'o' => args.output = Some(PathBuf::from(operand(argv, &mut i, &chars, &mut j, "an output file")?)),
                'f' => {
                    if j + 1 < chars.len() {
                        args.config = ConfigFile::Explicit(chars[j + 1..].iter().collect::<String>().into());
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') && i + 2 < argv.len() {
                        // `-f <file> <source>`; a lone trailing word is the source.
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }
                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    match positional.len() {
        0 => return Err("missing source file".to_owned()),
        1 => args.source = PathBuf::from(positional.remove(0)),
        n => return Err(format!("too many arguments ({n})")),
    }
    Ok(args)
}

/// The rest of the current argument after flag `chars[*j]`, or the next
/// argument.
fn operand(argv: &[String], i: &mut usize, chars: &[char], j: &mut usize, what: &str) -> Result<String, String> {
    let flag = chars[*j];
    if *j + 1 < chars.len() {
        let s: String = chars[*j + 1..].iter().collect();
        *j = chars.len();
        Ok(s)
    } else if *i + 1 < argv.len() {
        *i += 1;
        Ok(argv[*i].clone())
    } else {
        Err(format!("-{flag} requires {what}"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
