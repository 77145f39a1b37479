//! `kinesym-runtime` – process glue around the kinesym core.
//!
//! # Modules
//!
//! - [`telemetry`] – `tracing` subscriber set-up with optional OTLP export.
//! - [`config`] – [`Config`][config::Config]: TOML settings for the cache
//!   directory, collision list size and root frames.
//! - [`cycle`] – [`CycleEvaluator`][cycle::CycleEvaluator]: feeds each
//!   cycle's joint state and collision lists into a compiled function.

pub mod config;
pub mod cycle;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use cycle::CycleEvaluator;

use kinesym_collision::CollisionError;
use kinesym_compile::CompileError;
use kinesym_expr::ExprError;
use thiserror::Error;

/// Errors raised by the per-cycle glue.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("collision error: {0}")]
    Collision(#[from] CollisionError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("collision lists hold {actual} entries, the evaluator expects {expected}")]
    CapacityMismatch { expected: usize, actual: usize },
}
