//! The Nailang language engine.
//!
//! Source text flows through [`token`] and [`parser`] into an arena-backed
//! [`ast::Ast`], and [`exec::NailangRuntime`] executes it against a
//! [`exec::RuntimeHost`].
//!
//! ```rust
//! use nailang::nailang::{parse_statements, NailangRuntime, NoHost};
//!
//! let program = parse_statements("x = 6; y = x * 7;", "demo").unwrap();
//! let mut rt = NailangRuntime::default();
//! rt.execute_program(&mut NoHost, &program).unwrap();
//! assert_eq!(rt.get_var("y").and_then(|v| v.get_uint()), Some(42));
//! ```

pub mod arena;
pub mod ast;
pub mod builtins;
pub mod context;
pub mod custom;
pub mod error;
pub mod exec;
pub mod frame;
pub mod name;
pub mod parser;
pub mod replace;
pub mod serialize;
pub mod token;
pub mod value;

pub use ast::{Ast, Program};
pub use custom::{CustomHandler, CustomVar};
pub use error::{ExceptionTarget, NailangError, ParseError, RuntimeError};
pub use exec::{MetaResult, NailangRuntime, NoHost, RuntimeHost, RuntimeOptions};
pub use name::QualifiedName;
pub use parser::{parse_program, parse_statements};
pub use value::Arg;
