//! Whole-program runs through the public API: parse, execute, render.

use nailang::config::{Defines, EngineConfig};
use nailang::nailang::ast::{BlockItem, FuncCall};
use nailang::nailang::{parse_program, Arg, MetaResult, NailangRuntime, QualifiedName, RuntimeError, RuntimeHost};
use nailang::xcomp;
use pretty_assertions::assert_eq;

fn run(src: &str, host: &mut dyn RuntimeHost) -> NailangRuntime {
    let program = parse_program(src, "scenario.nl").unwrap();
    let mut rt = NailangRuntime::default();
    rt.execute_program(host, &program).unwrap();
    rt
}

#[test]
fn assigned_values_reach_replaced_text() {
    let src = "#Block.Main(\"m\"){\n\
               x = 1;\n\
               y = x + 2;\n\
               }\n\
               @xcomp.ReplaceVariable()\n\
               #xcomp.Global(\"g\"){\n\
               int a = $$!{x}; int b = $$!{y};\n\
               }\n";
    let out = xcomp::render(src, "a.xcomp", &EngineConfig::default(), &Defines::new()).unwrap();
    assert_eq!(out.source, "\r\n/* From Global Block [g] */\r\nint a = 1; int b = 3;");
}

#[test]
fn break_unwinds_to_the_nearest_loop() {
    let src = "#Block.Main(\"m\"){\n\
               i = 0;\n\
               inner = 0;\n\
               after = 0;\n\
               @While(i < 10)\n\
               #Block.Body(\"body\"){\n\
                   i += 1;\n\
                   #Block.Outer(\"o\"){\n\
                       #Block.Inner(\"in\"){\n\
                           @If(i == 3)\n\
                           $Break();\n\
                           inner += 1;\n\
                       }\n\
                       after += 1;\n\
                   }\n\
               }\n\
               done = i;\n\
               }\n";
    let rt = run(src, &mut nailang::nailang::NoHost);
    assert_eq!(rt.get_var("i"), Some(Arg::Uint(3)));
    assert_eq!(rt.get_var("inner"), Some(Arg::Uint(2)));
    assert_eq!(rt.get_var("after"), Some(Arg::Uint(2)));
    assert_eq!(rt.get_var("done"), Some(Arg::Uint(3)));
    assert!(rt.frames().is_empty());
}

/// Skips every statement annotated with `@Gate()` and records calls to
/// `$Record(n)`.
#[derive(Default)]
struct GateHost {
    gated: usize,
    records: Vec<u64>,
}

impl RuntimeHost for GateHost {
    fn call_func(
        &mut self,
        _rt: &mut NailangRuntime,
        name: &QualifiedName,
        args: &[Arg],
    ) -> Result<Option<Arg>, RuntimeError> {
        if name.as_str() != "Record" {
            return Ok(None);
        }
        let n = args.first().and_then(Arg::get_uint).ok_or_else(|| RuntimeError::host("Record needs a uint"))?;
        self.records.push(n);
        Ok(Some(Arg::Empty))
    }

    fn handle_meta(
        &mut self,
        rt: &mut NailangRuntime,
        meta: &FuncCall,
        _item: &BlockItem,
        _post: bool,
    ) -> Result<MetaResult, RuntimeError> {
        if rt.ast().name(meta.name).as_str() != "Gate" {
            return Ok(MetaResult::Unhandled);
        }
        self.gated += 1;
        Ok(MetaResult::Skip)
    }
}

#[test]
fn skipped_statements_have_no_effect() {
    let src = "#Block.Main(\"m\"){\n\
               $Record(1);\n\
               @Gate()\n\
               $Record(2);\n\
               @Gate()\n\
               hidden = 1;\n\
               @Gate()\n\
               #Block.Nested(\"n\"){ nested = 1; }\n\
               seen = 1;\n\
               $Record(3);\n\
               }\n";
    let mut host = GateHost::default();
    let rt = run(src, &mut host);
    assert_eq!(host.gated, 3);
    assert_eq!(host.records, [1, 3]);
    assert_eq!(rt.get_var("hidden"), None);
    assert_eq!(rt.get_var("nested"), None);
    assert_eq!(rt.get_var("seen"), Some(Arg::Uint(1)));
}

#[test]
fn nil_assign_creates_once() {
    let src = "#Block.Main(\"m\"){\n\
               fresh ?= \"first\";\n\
               fresh ?= \"second\";\n\
               kept = 1;\n\
               kept ?= 2;\n\
               }\n";
    let rt = run(src, &mut nailang::nailang::NoHost);
    assert_eq!(rt.get_var("fresh"), Some(Arg::from("first")));
    assert_eq!(rt.get_var("kept"), Some(Arg::Uint(1)));
}

#[test]
fn defines_preset_root_variables() {
    let src = "@xcomp.Replace()\n\
               @xcomp.PreAssign(lanes, width * 2)\n\
               #xcomp.Kernel(\"scale\"){\n\
               $$!xcomp.GetVecTypeName(f32v4) r = v * $$!{factor}; // $$!{lanes}\n\
               }\n";
    let mut defines = Defines::new();
    defines.define("width=4").unwrap();
    defines.define("factor=1.5").unwrap();
    let out = xcomp::render(src, "k.xcomp", &EngineConfig::default(), &defines).unwrap();
    assert_eq!(out.artifact("scale"), Some("float4 r = v * 1.5; // 8"));
}

#[test]
fn runtime_errors_name_the_block() {
    let src = "@xcomp.ReplaceVariable()\n\
               #xcomp.Global(\"g\"){\n\
               $$!{nope}\n\
               }\n";
    let err = xcomp::render(src, "e.xcomp", &EngineConfig::default(), &Defines::new()).unwrap_err();
    let nailang::nailang::NailangError::Runtime(err) = err else { panic!("{err:?}") };
    assert!(err.report().contains("[g]"), "{}", err.report());
}
