//! Kernel template host built on the Nailang engine.
//!
//! ```rust
//! use nailang::config::{Defines, EngineConfig};
//! use nailang::xcomp;
//!
//! let src = "@xcomp.ReplaceVariable()\n#xcomp.Kernel(\"k\"){\n$$!{@f32v4} v = $$!{scale};\n}\n";
//! let mut defines = Defines::new();
//! defines.define("scale=2").unwrap();
//! let out = xcomp::render(src, "demo.xcomp", &EngineConfig::default(), &defines).unwrap();
//! assert_eq!(out.artifact("k"), Some("float4 v = 2;"));
//! ```

pub mod output;
pub mod patch;
pub mod runtime;
pub mod vectype;

pub use output::{Artifact, GeneratedProgram};
pub use patch::{PatchError, PatchSet};
pub use runtime::{BlockKind, OutputBlock, XcompHost};
pub use vectype::{vec_type_name, VecType};

use crate::config::{Defines, EngineConfig};
use crate::nailang::ast::Ast;
use crate::nailang::error::{NailangError, RuntimeError};
use crate::nailang::exec::{NailangRuntime, RuntimeOptions};
use crate::nailang::parser::parse_program_with;
use crate::nailang::replace::ReplaceEngine;
use crate::nailang::value::Arg;

/// Parse `src`, run it with `defines` preset as root variables, and render
/// the recorded blocks.
#[tracing::instrument(level = "debug", skip(src, config, defines), fields(len = src.len()))]
pub fn render(src: &str, file: &str, config: &EngineConfig, defines: &Defines) -> Result<GeneratedProgram, NailangError> {
    config.validate().map_err(|e| RuntimeError::new(e.to_string()))?;
    let program = parse_program_with(src, file, Ast::with_trunk_size(config.trunk_size))?;
    let mut rt = NailangRuntime::new(RuntimeOptions {
        root_context: config.root_context,
        child_context: config.child_context,
    });
    for (name, value) in defines.iter() {
        rt.set_var(name, Arg::from(value))?;
    }
    let mut host = XcompHost::new(ReplaceEngine::new(config.markers.clone()));
    rt.execute_program(&mut host, &program)?;
    let out = host.generate(&mut rt)?;
    tracing::info!(bytes = out.source.len(), kernels = out.artifacts.len(), "rendered {file}");
    Ok(out)
}
