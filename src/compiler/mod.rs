//! Compiled fast path: the backend seam, the evaluator it produces, and the
//! promoter that decides when an expression runs compiled.

pub mod closure;
pub mod promoter;

pub use closure::ClosureBackend;
pub use promoter::{CompilationState, Promoter, PromoterStats};

use crate::ast::Node;
use crate::config::CompilationContext;
use crate::context::EvaluationContext;
use crate::errors::{EvalError, Result};
use crate::functions::Registry;
use crate::navigation::GrowthPolicy;
use serde_json::Value;

/// Why a compiled evaluator stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum Bailout {
    /// A runtime shape differs from the compiled assumption; the caller
    /// demotes and re-runs the interpreter.
    ShapeMismatch,
    /// A genuine evaluation failure, reported as is.
    Error(EvalError),
}

impl From<EvalError> for Bailout {
    fn from(e: EvalError) -> Self {
        Bailout::Error(e)
    }
}

pub type CompiledFn =
    Box<dyn Fn(&mut EvaluationContext) -> std::result::Result<Value, Bailout> + Send + Sync>;

pub struct CompiledEvaluator {
    run: CompiledFn,
    context_label: Option<String>,
    guards: usize,
}

impl std::fmt::Debug for CompiledEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledEvaluator")
            .field("context_label", &self.context_label)
            .field("guards", &self.guards)
            .finish_non_exhaustive()
    }
}

impl CompiledEvaluator {
    pub fn new(run: CompiledFn, context: Option<&CompilationContext>, guards: usize) -> Self {
        Self {
            run,
            context_label: context.map(|c| c.label().to_string()),
            guards,
        }
    }

    pub fn run(&self, ctx: &mut EvaluationContext) -> std::result::Result<Value, Bailout> {
        (self.run)(ctx)
    }

    /// Label of the compilation context this evaluator was built under.
    pub fn context_label(&self) -> Option<&str> {
        self.context_label.as_deref()
    }

    /// Number of shape checks baked into the evaluator.
    pub fn guard_count(&self) -> usize {
        self.guards
    }
}

/// Everything a backend sees: the tree with its recorded exit descriptors,
/// the functions it may bind, the growth policy and the isolation handle.
pub struct CompileRequest<'a> {
    pub root: &'a Node,
    pub registry: &'a Registry,
    pub policy: GrowthPolicy,
    pub context: Option<&'a CompilationContext>,
}

pub trait CompilationBackend: Send + Sync {
    /// Failures should be [`EvalError::Compilation`]; anything else is
    /// wrapped into one by the caller.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledEvaluator>;
}
