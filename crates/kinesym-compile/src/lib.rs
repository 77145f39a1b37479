//! `kinesym-compile` – compiled, persisted expression evaluators.
//!
//! Expression graphs are built once at setup and evaluated every control
//! cycle.  This crate turns a finished graph into a [`CompiledFunction`]
//! whose input, work and output buffers are allocated once; invoking it only
//! overwrites inputs and re-runs a flat register tape.
//!
//! # Modules
//!
//! - [`parameter`] – [`Parameter`][parameter::Parameter]: named scalar or
//!   matrix inputs and their flattened, row-major layout.
//! - [`lower`] – [`GraphDescription`][lower::GraphDescription]: the graph as
//!   a topologically ordered instruction list, plus its content hash
//!   [`CacheKey`][lower::CacheKey].
//! - [`tape`] – [`Tape`][tape::Tape]: the register machine produced by
//!   common-subexpression elimination, constant folding and register reuse.
//! - [`function`] – [`CompiledFunction`][function::CompiledFunction]: tape
//!   plus bound buffers.
//! - [`persist`] – JSON artifacts on disk; unreadable artifacts are deleted
//!   and reported as a miss.
//! - [`cache`] – [`FunctionCache`][cache::FunctionCache]: content-addressed
//!   artifact directory.
//! - [`execute`] – one-shot [`compile_and_execute`][execute::compile_and_execute].
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use kinesym_compile::{CompiledFunction, Parameter};
//!
//! let a = Parameter::scalar("a");
//! let b = Parameter::scalar("b");
//! let sum = a.expression().elementwise_add(&b.expression()).unwrap();
//!
//! let mut f = CompiledFunction::compile(&sum, &[a, b]).unwrap();
//! let out = f.call(&HashMap::from([("a", &[2.0][..]), ("b", &[3.0][..])])).unwrap();
//! assert_eq!(out, &[5.0]);
//! ```

pub mod cache;
pub mod execute;
pub mod function;
pub mod lower;
pub mod parameter;
pub mod persist;
pub mod tape;

pub use cache::FunctionCache;
pub use execute::{Argument, Output, compile_and_execute};
pub use function::CompiledFunction;
pub use lower::{CacheKey, GraphDescription};
pub use parameter::Parameter;

use kinesym_expr::ExprError;
use thiserror::Error;

/// Errors raised while compiling, persisting or invoking a function.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("symbol '{0}' is not covered by any declared parameter")]
    UnknownSymbol(String),

    #[error("input name '{0}' is declared more than once")]
    DuplicateParameter(String),

    #[error("missing argument '{0}'")]
    MissingArgument(String),

    #[error("argument '{name}' has {actual} values, expected {expected}")]
    ArgumentShape {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid compiled artifact: {0}")]
    InvalidArtifact(String),
}
