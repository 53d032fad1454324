//! The xcomp host: turns `#xcomp.*` raw blocks into kernel source.
//!
//! Rendering happens in two phases.  While the program executes,
//! [`XcompHost`] records every `xcomp.Global`, `xcomp.Struct`,
//! `xcomp.Kernel` and `xcomp.Template` raw block that survives its metas.
//! [`XcompHost::generate`] then renders the recorded blocks in order,
//! running the replace passes each block asked for, and prepends the
//! patched blocks added along the way.
//!
//! Script functions: `$xcomp.Log(level, fmt, args...)`,
//! `$xcomp.GetVecTypeName(name)`, `$xcomp.AddPatch(id, content, deps...)`.
//! Replace functions: `$$!xcomp.GetVecTypeName(name)`,
//! `$$!xcomp.CodeBlock(template, args...)`.

use std::borrow::Cow;
use std::fmt::Write;

use tracing::{debug, error, info, trace, warn};

use crate::nailang::ast::{Ast, BlockItem, FuncCall, RawArg, RawBlock};
use crate::nailang::builtins::format_args_list;
use crate::nailang::error::{ExceptionTarget, NailangError, RuntimeError};
use crate::nailang::exec::{MetaResult, NailangRuntime, RuntimeHost};
use crate::nailang::name::QualifiedName;
use crate::nailang::replace::{ReplaceEngine, ReplaceHandler};
use crate::nailang::serialize::stringify;
use crate::nailang::value::Arg;

use super::output::{Artifact, GeneratedProgram};
use super::patch::PatchSet;
use super::vectype::vec_type_name;

/// Deepest allowed `$$!xcomp.CodeBlock` nesting.
const MAX_TEMPLATE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Global,
    Struct,
    Kernel,
    Template,
}

impl BlockKind {
    pub fn from_type(ty: &str) -> Option<Self> {
        match ty {
            "xcomp.Global" => Some(BlockKind::Global),
            "xcomp.Struct" => Some(BlockKind::Struct),
            "xcomp.Kernel" => Some(BlockKind::Kernel),
            "xcomp.Template" => Some(BlockKind::Template),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Global => "Global",
            BlockKind::Struct => "Struct",
            BlockKind::Kernel => "Kernel",
            BlockKind::Template => "Template",
        }
    }
}

/// A recorded raw block, detached from the program that declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBlock {
    pub kind: BlockKind,
    pub name: String,
    pub source: String,
    /// Rendered condition comments for its `@If` / `@Skip` metas.
    pub conditions: String,
    pub replace_var: bool,
    pub replace_func: bool,
    /// `(variable, expression)` pairs from `@xcomp.PreAssign`, in source form.
    pub pre_assign: Vec<(String, String)>,
    /// Variables a template binds from `$$!xcomp.CodeBlock` arguments.
    pub template_args: Vec<String>,
}

fn render_conditions(ast: &Ast, metas: &[FuncCall]) -> String {
    let mut out = String::new();
    for meta in metas {
        let prefix = match ast.name(meta.name).as_str() {
            "If" => "If ",
            "Skip" => "Skip if ",
            _ => continue,
        };
        if let [cond] = ast.exprs(meta.args) {
            let _ = write!(out, "    /* {prefix:7} :  {} */\r\n", stringify(ast, *cond));
        }
    }
    out
}

fn var_arg(ast: &Ast, meta: &str, idx: usize, arg: RawArg) -> Result<String, RuntimeError> {
    match arg {
        RawArg::Var(id) => Ok(ast.name(id).var_source()),
        other => Err(RuntimeError::new(format!("{meta}'s arg[{idx}] is [{}]. not [Var]", other.type_name()))),
    }
}

impl OutputBlock {
    fn collect(ast: &Ast, kind: BlockKind, block: &RawBlock, metas: &[FuncCall]) -> Result<Self, RuntimeError> {
        let mut out = OutputBlock {
            kind,
            name: ast.text(block.name).to_owned(),
            source: ast.text(block.source).to_owned(),
            conditions: render_conditions(ast, metas),
            replace_var: false,
            replace_func: false,
            pre_assign: Vec::new(),
            template_args: Vec::new(),
        };
        for meta in metas {
            let name = ast.name(meta.name).as_str();
            let args = ast.exprs(meta.args);
            match name {
                "xcomp.ReplaceVariable" => out.replace_var = true,
                "xcomp.ReplaceFunction" => out.replace_func = true,
                "xcomp.Replace" => {
                    out.replace_var = true;
                    out.replace_func = true;
                }
                "xcomp.PreAssign" => {
                    if args.len() != 2 {
                        return Err(RuntimeError::new(format!("[{name}] expects 2 args, got {}", args.len())));
                    }
                    let var = var_arg(ast, "PreAssign", 0, args[0])?;
                    out.pre_assign.push((var, stringify(ast, args[1])));
                }
                "xcomp.TemplateArgs" if kind == BlockKind::Template => {
                    for (i, arg) in args.iter().enumerate() {
                        let var = var_arg(ast, "TemplateArgs", i, *arg)?;
                        // bound in the template's own scope
                        let bare = var.trim_start_matches(['`', ':']);
                        out.template_args.push(format!(":{bare}"));
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

// ── Script functions ──────────────────────────────────────────────────────────

/// State reachable from `$xcomp.*` functions.
#[derive(Debug, Default)]
pub struct XcompFunctions {
    pub patches: PatchSet,
}

fn str_arg<'a>(func: &str, args: &'a [Arg], idx: usize) -> Result<Cow<'a, str>, RuntimeError> {
    args.get(idx)
        .and_then(Arg::get_str)
        .ok_or_else(|| RuntimeError::new(format!("Arg[{idx}] of [{func}] should be a string")))
}

fn min_args(func: &str, args: &[Arg], min: usize) -> Result<(), RuntimeError> {
    if args.len() < min {
        return Err(RuntimeError::new(format!("[{func}] expects at least {min} args, got {}", args.len())));
    }
    Ok(())
}

const LOG_LEVELS: [&str; 6] = ["error", "success", "warning", "info", "verbose", "debug"];

/// Forward a script log line to tracing.
fn script_log(level: &str, msg: &str) {
    match level {
        "error" => error!(target: "xcomp", "{msg}"),
        "success" | "info" => info!(target: "xcomp", "{msg}"),
        "warning" => warn!(target: "xcomp", "{msg}"),
        "verbose" => debug!(target: "xcomp", "{msg}"),
        _ => trace!(target: "xcomp", "{msg}"),
    }
}

impl RuntimeHost for XcompFunctions {
    fn call_func(
        &mut self,
        _rt: &mut NailangRuntime,
        name: &QualifiedName,
        args: &[Arg],
    ) -> Result<Option<Arg>, RuntimeError> {
        if name.part_count() != 2 || name.part(0) != Some("xcomp") {
            return Ok(None);
        }
        let func = name.as_str();
        Ok(Some(match name.part(1).unwrap_or_default() {
            "Log" => {
                min_args(func, args, 2)?;
                let level = str_arg(func, args, 0)?;
                if !LOG_LEVELS.contains(&level.as_ref()) {
                    return Err(RuntimeError::new("Arg[0] of [Log] should be LogLevel"));
                }
                let fmt = str_arg(func, args, 1)?;
                match format_args_list(&fmt, &args[2..]) {
                    Ok(msg) => script_log(&level, &msg),
                    Err(e) => error!("Error when formatting inner log: {e}"),
                }
                Arg::Empty
            }
            "GetVecTypeName" => {
                min_args(func, args, 1)?;
                let vname = str_arg(func, args, 0)?;
                Arg::from(vec_type_name(&vname).map_err(|e| RuntimeError::new(e.to_string()))?)
            }
            "AddPatch" => {
                min_args(func, args, 2)?;
                let id = str_arg(func, args, 0)?;
                let content = str_arg(func, args, 1)?;
                let deps = (2..args.len()).map(|i| str_arg(func, args, i)).collect::<Result<Vec<_>, _>>()?;
                let deps: Vec<&str> = deps.iter().map(|d| d.as_ref()).collect();
                let added = self
                    .patches
                    .add(&id, content.into_owned(), &deps)
                    .map_err(|e| RuntimeError::new(e.to_string()))?;
                Arg::Bool(added)
            }
            _ => return Ok(None),
        }))
    }
}

// ── Host ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct XcompHost {
    engine: ReplaceEngine,
    blocks: Vec<OutputBlock>,
    templates: Vec<OutputBlock>,
    pub funcs: XcompFunctions,
}

impl XcompHost {
    pub fn new(engine: ReplaceEngine) -> Self {
        XcompHost { engine, blocks: Vec::new(), templates: Vec::new(), funcs: XcompFunctions::default() }
    }

    /// Recorded output blocks, in program order.
    pub fn blocks(&self) -> &[OutputBlock] {
        &self.blocks
    }

    pub fn templates(&self) -> &[OutputBlock] {
        &self.templates
    }

    /// Render the recorded blocks.  Runs in `rt`'s current scope, so
    /// variables set by the program are visible.
    #[tracing::instrument(level = "debug", skip_all, fields(blocks = self.blocks.len()))]
    pub fn generate(&mut self, rt: &mut NailangRuntime) -> Result<GeneratedProgram, RuntimeError> {
        let mut output = String::new();
        let mut artifacts = Vec::new();
        let mut renderer = Renderer {
            rt,
            funcs: &mut self.funcs,
            engine: &self.engine,
            templates: &self.templates,
            depth: 0,
        };
        for block in &self.blocks {
            let _ = write!(output, "\r\n/* From {} Block [{}] */\r\n", block.kind.name(), block.name);
            let start = output.len();
            renderer
                .output_block(block, &mut output)
                .map_err(|e| e.or_target(|| ExceptionTarget::RawBlock(block.name.clone())))?;
            if block.kind == BlockKind::Kernel {
                artifacts.push(Artifact { name: block.name.clone(), content: output[start..].to_owned() });
            }
        }

        let mut source = String::new();
        self.funcs.patches.write(&mut source).map_err(|e| RuntimeError::new(e.to_string()))?;
        source.push_str(&output);
        debug!(patches = self.funcs.patches.len(), artifacts = artifacts.len(), "generated");
        Ok(GeneratedProgram { source, artifacts })
    }
}

const XCOMP_METAS: [&str; 5] = [
    "xcomp.Replace",
    "xcomp.ReplaceVariable",
    "xcomp.ReplaceFunction",
    "xcomp.PreAssign",
    "xcomp.TemplateArgs",
];

impl RuntimeHost for XcompHost {
    fn call_func(
        &mut self,
        rt: &mut NailangRuntime,
        name: &QualifiedName,
        args: &[Arg],
    ) -> Result<Option<Arg>, RuntimeError> {
        self.funcs.call_func(rt, name, args)
    }

    fn handle_meta(
        &mut self,
        rt: &mut NailangRuntime,
        meta: &FuncCall,
        _item: &BlockItem,
        _post: bool,
    ) -> Result<MetaResult, RuntimeError> {
        let known = XCOMP_METAS.contains(&rt.ast().name(meta.name).as_str());
        Ok(if known { MetaResult::Next } else { MetaResult::Unhandled })
    }

    fn on_raw_block(&mut self, rt: &mut NailangRuntime, block: &RawBlock, metas: &[FuncCall]) -> Result<(), RuntimeError> {
        let ast = rt.ast().clone();
        let ty = ast.text(block.ty);
        let Some(kind) = BlockKind::from_type(ty) else {
            debug!(ty, name = ast.text(block.name), "ignoring raw block");
            return Ok(());
        };
        let out = OutputBlock::collect(&ast, kind, block, metas)?;
        trace!(kind = kind.name(), name = %out.name, "recorded block");
        if kind == BlockKind::Template {
            self.templates.push(out);
        } else {
            self.blocks.push(out);
        }
        Ok(())
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

struct Renderer<'a> {
    rt: &'a mut NailangRuntime,
    funcs: &'a mut XcompFunctions,
    engine: &'a ReplaceEngine,
    templates: &'a [OutputBlock],
    depth: usize,
}

impl Renderer<'_> {
    fn output_block(&mut self, block: &OutputBlock, out: &mut String) -> Result<(), RuntimeError> {
        if block.kind != BlockKind::Struct {
            return self.direct_output(block, out);
        }
        let _ = write!(out, "typedef struct {}\r\n{{\r\n", block.name);
        self.direct_output(block, out)?;
        let _ = write!(out, "\r\n}} {};\r\n", block.name);
        Ok(())
    }

    /// Conditions, pre-assignments, then the replaced body.
    fn direct_output(&mut self, block: &OutputBlock, out: &mut String) -> Result<(), RuntimeError> {
        out.push_str(&block.conditions);
        for (var, expr) in &block.pre_assign {
            let value = self.evaluate(expr)?;
            self.rt.set_var(var, value)?;
        }
        let engine = self.engine;
        let text = engine.process(&block.source, self, block.replace_var, block.replace_func)?;
        out.push_str(&text);
        Ok(())
    }

    fn evaluate(&mut self, expr: &str) -> Result<Arg, RuntimeError> {
        let stmt: Cow<'_, str> = if expr.ends_with(';') { expr.into() } else { format!("{expr};").into() };
        self.rt.evaluate_raw_statement(self.funcs, &stmt).map_err(|e| match e {
            NailangError::Runtime(e) => e,
            NailangError::Parse(e) => RuntimeError::new(e.to_string()),
        })
    }

    fn code_block(&mut self, func: &str, args: &[&str], out: &mut String) -> Result<(), RuntimeError> {
        let Some(name) = args.first() else {
            return Err(RuntimeError::new(format!("replace-func [{func}] requires at least 1 args, got 0")));
        };
        let templates = self.templates;
        let template = templates
            .iter()
            .find(|t| t.name == *name)
            .ok_or_else(|| RuntimeError::new(format!("template block [{name}] not found")))?;
        let needed = template.template_args.len() + 1;
        if args.len() < needed {
            return Err(RuntimeError::new(format!(
                "replace-func [{func}] requires at least {needed} args, got {}",
                args.len()
            )));
        }
        if self.depth >= MAX_TEMPLATE_DEPTH {
            return Err(RuntimeError::new(format!("template block [{name}] nested too deeply")));
        }
        let _ = write!(out, "// template block [{name}]\r\n");
        let (funcs, engine, depth) = (&mut *self.funcs, self.engine, self.depth + 1);
        self.rt.with_child_scope(&format!("template {name}"), |rt| {
            for (var, value) in template.template_args.iter().zip(&args[1..]) {
                rt.set_var(var, Arg::from(*value))?;
            }
            Renderer { rt, funcs, engine, templates, depth }.direct_output(template, out)
        })
    }
}

impl ReplaceHandler for Renderer<'_> {
    fn on_variable(&mut self, output: &mut String, var: &str) -> Result<(), RuntimeError> {
        if var.is_empty() {
            return Err(RuntimeError::new("replace-variable does not accept empty"));
        }
        let vec_name = |name: &str| vec_type_name(name).map_err(|e| RuntimeError::new(format!("{e} when replace-variable")));
        if let Some(vtype) = var.strip_prefix('@') {
            output.push_str(&vec_name(vtype)?);
            return Ok(());
        }
        let (name, to_vec) = match var.strip_prefix('#') {
            Some(name) => (name, true),
            None => (var, false),
        };
        let value = self
            .rt
            .get_var(name)
            .ok_or_else(|| RuntimeError::new(format!("Arg [{name}] not found when replace-variable")))?;
        if to_vec {
            let vtype = value
                .get_str()
                .ok_or_else(|| RuntimeError::new(format!("Arg [{name}] is not a vetype string when replace-variable")))?;
            output.push_str(&vec_name(&vtype)?);
        } else {
            output.push_str(&value.to_string());
        }
        Ok(())
    }

    fn on_function(&mut self, output: &mut String, func: &str, args: &[&str]) -> Result<(), RuntimeError> {
        match func.strip_prefix("xcomp.") {
            Some("GetVecTypeName") => {
                let [vtype] = args else {
                    return Err(RuntimeError::new(format!(
                        "replace-func [{func}] requires exactly 1 args, got {}",
                        args.len()
                    )));
                };
                output.push_str(&vec_type_name(vtype).map_err(|e| RuntimeError::new(e.to_string()))?);
                Ok(())
            }
            Some("CodeBlock") => self.code_block(func, args, output),
            _ => Err(RuntimeError::new(format!(
                "replace-func [{func}] with [{}]args error: unknown replace function",
                args.len()
            ))),
        }
    }

    fn on_opt_block(&mut self, output: &mut String, cond: &str, content: &str) -> Result<(), RuntimeError> {
        if cond.is_empty() {
            return Err(RuntimeError::new("Empty condition occurred when replace-opt-block"));
        }
        let value = self.evaluate(cond)?;
        if value.is_empty() {
            return Err(RuntimeError::new("No value returned as condition when replace-opt-block"));
        }
        match value.get_bool() {
            Some(true) => output.push_str(content),
            Some(false) => {}
            None => return Err(RuntimeError::new("Evaluated condition is not boolable when replace-opt-block")),
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::nailang::parser::parse_program;

    fn run(src: &str) -> Result<(GeneratedProgram, XcompHost), RuntimeError> {
        let program = parse_program(src, "test.xcomp").unwrap();
        let mut rt = NailangRuntime::default();
        let mut host = XcompHost::default();
        rt.execute_program(&mut host, &program)?;
        let out = host.generate(&mut rt)?;
        Ok((out, host))
    }

    #[test]
    fn global_block_with_conditions() {
        let src = "#Block.Main(\"m\"){ on = true; }\n\
                   @If(on)\n\
                   #xcomp.Global(\"g\"){\n\
                   int x;\n\
                   }\n\
                   @If(!on)\n\
                   #xcomp.Global(\"h\"){\n\
                   never\n\
                   }\n";
        let (out, host) = run(src).unwrap();
        assert_eq!(host.blocks().len(), 1);
        assert_eq!(out.source, "\r\n/* From Global Block [g] */\r\n    /* If      :  on */\r\nint x;");
        assert!(out.artifacts.is_empty());
    }

    #[test]
    fn replace_variables_and_functions() {
        let src = "#Block.Main(\"m\"){ n = 4; t = \"f32\"; debug = false; }\n\
                   @xcomp.Replace()\n\
                   @xcomp.PreAssign(w, n * 2)\n\
                   #xcomp.Kernel(\"k\"){\n\
                   $$!{@f32v4} a; $$!{#t} b; $$!xcomp.GetVecTypeName(u8v2) c; w=$$!{ w };\n\
                   $$@ debug { printf(); }@$$$$@ !debug { /* quiet */ }@$$\n\
                   }\n";
        let (out, _) = run(src).unwrap();
        let body = "float4 a; float b; uchar2 c; w=8;\n /* quiet */ ";
        assert_eq!(out.artifact("k"), Some(body));
        assert!(out.source.ends_with(body));
        assert!(out.source.starts_with("\r\n/* From Kernel Block [k] */\r\n"));
    }

    #[test]
    fn struct_blocks_are_wrapped() {
        let src = "#xcomp.Struct(\"Pair\"){\n\
                   int a; int b;\n\
                   }\n";
        let (out, _) = run(src).unwrap();
        assert_eq!(
            out.source,
            "\r\n/* From Struct Block [Pair] */\r\ntypedef struct Pair\r\n{\r\nint a; int b;\r\n} Pair;\r\n"
        );
    }

    #[test]
    fn code_block_expands_templates() {
        let src = "@xcomp.TemplateArgs(ty, op)\n\
                   @xcomp.ReplaceVariable()\n\
                   #xcomp.Template(\"bin\"){\n\
                   $$!{ty} apply($$!{ty} a, $$!{ty} b) { return a $$!{op} b; }\n\
                   }\n\
                   @xcomp.Replace()\n\
                   #xcomp.Global(\"g\"){\n\
                   $$!xcomp.CodeBlock(bin, int, +)\n\
                   }\n";
        let (out, host) = run(src).unwrap();
        assert_eq!(host.templates().len(), 1);
        assert_eq!(host.templates()[0].template_args, [":ty", ":op"]);
        assert!(out
            .source
            .contains("// template block [bin]\r\nint apply(int a, int b) { return a + b; }"),
            "{}", out.source);
    }

    #[test]
    fn patches_come_first() {
        let src = "#Block.Main(\"m\"){\n\
                   $xcomp.AddPatch(\"b\", \"int b();\", \"a\");\n\
                   added = $xcomp.AddPatch(\"a\", \"int a();\");\n\
                   again = $xcomp.AddPatch(\"a\", \"ignored\");\n\
                   $xcomp.Log(\"info\", \"added {} {}\", added, again);\n\
                   }\n\
                   #xcomp.Global(\"g\"){\n\
                   body\n\
                   }\n";
        let (out, _) = run(src).unwrap();
        assert_eq!(
            out.source,
            "/* Patched Block [a] */\r\nint a();\r\n\r\n\
             /* Patched Block [b] */\r\nint b();\r\n\r\n\
             \r\n/* From Global Block [g] */\r\nbody"
        );
    }

    #[test]
    fn render_errors() {
        let missing = "@xcomp.ReplaceVariable()\n#xcomp.Global(\"g\"){\n$$!{nope}\n}\n";
        let err = run(missing).unwrap_err();
        assert_eq!(err.message, "Arg [nope] not found when replace-variable");
        assert_eq!(err.target, ExceptionTarget::RawBlock("g".into()));

        let unknown = "@xcomp.ReplaceFunction()\n#xcomp.Global(\"g\"){\n$$!Foo(1)\n}\n";
        assert!(run(unknown).unwrap_err().message.contains("unknown replace function"));

        let bad_cond = "@xcomp.Replace()\n#xcomp.Global(\"g\"){\n$$@ nope { x }@$$\n}\n";
        assert!(run(bad_cond).is_err());

        let bad_level = "#Block.Main(\"m\"){ $xcomp.Log(\"loud\", \"x\"); }\n";
        assert_eq!(run(bad_level).unwrap_err().message, "Arg[0] of [Log] should be LogLevel");

        let bad_pre = "@xcomp.PreAssign(1, 2)\n#xcomp.Global(\"g\"){\nx\n}\n";
        assert_eq!(run(bad_pre).unwrap_err().message, "PreAssign's arg[0] is [uint]. not [Var]");
    }
}
