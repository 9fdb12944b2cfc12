pub mod errors;
pub mod config;
pub mod context;
pub mod ast;
pub mod engine;
pub mod functions;  // plugin model
pub mod navigation;
pub mod operators;
pub mod interpreter;
pub mod compiler;
pub mod startup;
mod parser;
mod expression;
mod comparison;

use serde_json::Value;

pub use compiler::{
    Bailout, ClosureBackend, CompilationBackend, CompilationState, CompileRequest,
    CompiledEvaluator, PromoterStats,
};
pub use config::{
    default_compiler_mode, resolve_compiler_mode, CompilationContext, CompilerMode,
    EnvPropertySource, MapPropertySource, ParserConfig, PropertySource,
};
pub use context::EvaluationContext;
pub use engine::{Expression, ExpressionParser};
pub use errors::{ErrorKind, EvalError, Location, Result};
pub use functions::{Function, Registry};
pub use startup::{ApplicationStartup, NoopStartup, RecordingStartup, StartupStep};

/// Convenience: parse and interpret once with the default configuration.
pub fn eval(expr: &str) -> Result<Value> {
    eval_with(expr, Value::Null)
}

/// Convenience: parse and interpret once against `root`.
pub fn eval_with(expr: &str, root: Value) -> Result<Value> {
    ExpressionParser::default().parse(expr)?.value_of(root)
}
