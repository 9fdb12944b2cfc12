//! Public entry points: [`ExpressionParser`] turns text into an
//! [`Expression`], and the expression picks between the interpreter and a
//! compiled evaluator according to its configuration.

use crate::ast::{ExitDescriptor, Node};
use crate::compiler::{
    Bailout, ClosureBackend, CompilationBackend, CompilationState, CompileRequest,
    CompiledEvaluator, Promoter, PromoterStats,
};
use crate::config::{CompilerMode, ParserConfig};
use crate::context::EvaluationContext;
use crate::errors::{EvalError, Result};
use crate::expression::parse_expr;
use crate::functions::Registry;
use crate::interpreter::Interpreter;
use crate::navigation::GrowthPolicy;
use crate::startup::{ApplicationStartup, NoopStartup};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Parses expression text under one shared configuration.
#[derive(Clone)]
pub struct ExpressionParser {
    config: Arc<ParserConfig>,
    registry: Registry,
    backend: Arc<dyn CompilationBackend>,
    startup: Arc<dyn ApplicationStartup>,
}

impl Default for ExpressionParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl std::fmt::Debug for ExpressionParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionParser")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ExpressionParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Registry::with_builtins(),
            backend: Arc::new(ClosureBackend),
            startup: Arc::new(NoopStartup),
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn CompilationBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_startup(mut self, startup: Arc<dyn ApplicationStartup>) -> Self {
        self.startup = startup;
        self
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn parse(&self, text: &str) -> Result<Expression> {
        let mut step = self.startup.start("expression.parse");
        step.tag_with("length", &|| text.chars().count().to_string());
        let parsed = parse_expr(text, &self.config);
        step.end();
        let root = parsed?;
        trace!(expression = text, mode = %self.config.compiler_mode(), "parsed expression");

        Ok(Expression {
            text: text.to_string(),
            root,
            promoter: Promoter::new(self.config.promotion_threshold()),
            config: Arc::clone(&self.config),
            registry: self.registry.clone(),
            backend: Arc::clone(&self.backend),
            startup: Arc::clone(&self.startup),
        })
    }
}

/// A parsed, reusable expression. Evaluations may run concurrently from
/// several threads, each with its own [`EvaluationContext`].
pub struct Expression {
    text: String,
    root: Node,
    promoter: Promoter,
    config: Arc<ParserConfig>,
    registry: Registry,
    backend: Arc<dyn CompilationBackend>,
    startup: Arc<dyn ApplicationStartup>,
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression")
            .field("text", &self.text)
            .field("promoter", &self.promoter)
            .finish_non_exhaustive()
    }
}

impl Expression {
    pub fn expression_string(&self) -> &str {
        &self.text
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn state(&self) -> CompilationState {
        self.promoter.state()
    }

    pub fn stats(&self) -> PromoterStats {
        self.promoter.stats()
    }

    /// Descriptors recorded by the most recent interpreted run, in preorder.
    pub fn exit_descriptors(&self) -> Vec<Option<ExitDescriptor>> {
        self.root.exit_descriptors()
    }

    /// Evaluate against a root value, discarding any growth it causes.
    pub fn value_of(&self, root: Value) -> Result<Value> {
        self.get_value(&mut EvaluationContext::new(root))
    }

    /// Evaluate against `ctx`, writing any auto-grown values into it.
    /// Runtime errors carry the failing node's offset and this expression's
    /// text.
    ///
    /// Under IMMEDIATE the evaluator is built before any interpreted run, so
    /// it has no recorded shapes and carries no guards. It is rebuilt on the
    /// next evaluation after a backend-reported shape mismatch, from the
    /// shapes the fallback interpreted run recorded, or after
    /// [`revert_to_interpreted`](Self::revert_to_interpreted).
    pub fn get_value(&self, ctx: &mut EvaluationContext) -> Result<Value> {
        self.dispatch(ctx).map_err(|e| e.in_expression(&self.text))
    }

    fn dispatch(&self, ctx: &mut EvaluationContext) -> Result<Value> {
        if let Some(evaluator) = self.promoter.evaluator() {
            return self.run_compiled(&evaluator, ctx);
        }
        match self.config.compiler_mode() {
            CompilerMode::Off => self.interpret(ctx),
            CompilerMode::Immediate => {
                let evaluator = self.compile_required()?;
                self.run_compiled(&evaluator, ctx)
            }
            CompilerMode::Mixed => {
                let value = self.interpret(ctx)?;
                if self.promoter.observe(self.root.shape_fingerprint()) && self.promoter.try_begin()
                {
                    match self.build() {
                        Ok(evaluator) => {
                            debug!(
                                expression = %self.text,
                                guards = evaluator.guard_count(),
                                "promoted to compiled evaluator"
                            );
                            self.promoter.install(Arc::new(evaluator));
                        }
                        Err(e) => {
                            self.promoter.fail();
                            debug!(expression = %self.text, error = %e, "compilation failed, staying interpreted");
                        }
                    }
                }
                Ok(value)
            }
        }
    }

    /// Compile now from whatever shapes have been recorded so far. Returns
    /// whether this compilation succeeded; on failure an evaluator installed
    /// earlier stays in use.
    pub fn compile(&self) -> bool {
        match self.build() {
            Ok(evaluator) => {
                self.promoter.install(Arc::new(evaluator));
                true
            }
            Err(e) => {
                self.promoter.fail();
                debug!(expression = %self.text, error = %e, "explicit compilation failed");
                false
            }
        }
    }

    /// Drop the compiled evaluator, if any. Under MIXED the expression
    /// starts profiling again.
    pub fn revert_to_interpreted(&self) {
        self.promoter.revert();
    }

    fn policy(&self) -> GrowthPolicy {
        GrowthPolicy::from(self.config.as_ref())
    }

    fn interpret(&self, ctx: &mut EvaluationContext) -> Result<Value> {
        self.promoter.record_interpreted_run();
        let result = Interpreter::new(&self.registry, self.policy()).evaluate(&self.root, ctx);
        if result.is_err() {
            self.promoter.reset_streak();
        }
        result
    }

    fn build(&self) -> Result<CompiledEvaluator> {
        let mut step = self.startup.start("expression.compile");
        step.tag_with("mode", &|| self.config.compiler_mode().to_string());
        let result = self.backend.compile(&CompileRequest {
            root: &self.root,
            registry: &self.registry,
            policy: self.policy(),
            context: self.config.compilation_context(),
        });
        step.tag("outcome", if result.is_ok() { "compiled" } else { "failed" });
        step.end();
        result.map_err(|e| match e {
            EvalError::Compilation(_) => e,
            other => EvalError::Compilation(other.to_string()),
        })
    }

    fn compile_required(&self) -> Result<Arc<CompiledEvaluator>> {
        match self.build() {
            Ok(evaluator) => {
                let evaluator = Arc::new(evaluator);
                self.promoter.install(Arc::clone(&evaluator));
                Ok(evaluator)
            }
            Err(e) => {
                self.promoter.fail();
                Err(e)
            }
        }
    }

    fn run_compiled(
        &self,
        evaluator: &Arc<CompiledEvaluator>,
        ctx: &mut EvaluationContext,
    ) -> Result<Value> {
        match evaluator.run(ctx) {
            Ok(value) => {
                self.promoter.record_compiled_run();
                Ok(value)
            }
            Err(Bailout::Error(e)) => {
                self.promoter.record_compiled_run();
                Err(e)
            }
            Err(Bailout::ShapeMismatch) => {
                if self.promoter.demote(evaluator) {
                    debug!(expression = %self.text, "shape changed, demoted to interpreter");
                }
                self.interpret(ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::startup::RecordingStartup;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mixed(threshold: u32) -> ExpressionParser {
        let cfg = ParserConfig::with_compiler(Some(CompilerMode::Mixed), None)
            .unwrap()
            .with_promotion_threshold(threshold);
        ExpressionParser::new(cfg)
    }

    #[test]
    fn off_mode_never_compiles() {
        let expr = ExpressionParser::default().parse("1 + 1").unwrap();
        for _ in 0..5 {
            assert_eq!(expr.value_of(json!(null)).unwrap(), json!(2));
        }
        assert_eq!(expr.state(), CompilationState::Uncompiled);
        assert_eq!(expr.stats().interpreted_runs, 5);
    }

    #[test]
    fn mixed_promotes_after_a_stable_streak() {
        let expr = mixed(3).parse("price * qty").unwrap();
        let root = json!({"price": 4, "qty": 3});
        for _ in 0..3 {
            assert_eq!(expr.value_of(root.clone()).unwrap(), json!(12));
        }
        assert_eq!(expr.state(), CompilationState::Compiled);
        assert_eq!(expr.value_of(root).unwrap(), json!(12));

        let stats = expr.stats();
        assert_eq!((stats.interpreted_runs, stats.compiled_runs, stats.promotions), (3, 1, 1));
    }

    #[test]
    fn shape_drift_demotes_and_reinterprets() {
        let expr = mixed(1).parse("price * qty").unwrap();
        expr.value_of(json!({"price": 4, "qty": 3})).unwrap();
        assert_eq!(expr.state(), CompilationState::Compiled);

        assert_eq!(expr.value_of(json!({"price": 0.5, "qty": 3})).unwrap(), json!(1.5));
        assert_eq!(expr.stats().demotions, 1);
        assert_eq!(expr.state(), CompilationState::Uncompiled);

        // The next interpreted run profiles the new shapes and promotes again.
        assert_eq!(expr.value_of(json!({"price": 0.5, "qty": 4})).unwrap(), json!(2.0));
        assert_eq!(expr.state(), CompilationState::Compiled);
        assert_eq!(expr.stats().promotions, 2);
    }

    #[test]
    fn compiled_errors_match_interpreted_errors() {
        let expr = mixed(1).parse("items[i]").unwrap();
        expr.value_of(json!({"items": [1, 2], "i": 0})).unwrap();
        assert_eq!(expr.state(), CompilationState::Compiled);
        let err = expr.value_of(json!({"items": [1, 2], "i": 9})).unwrap_err();
        assert_eq!(err, EvalError::IndexOutOfBounds { index: 9, size: 2 });
    }

    #[test]
    fn explicit_compile_and_revert() {
        let expr = ExpressionParser::default().parse("'a' + 'b'").unwrap();
        assert!(expr.compile());
        assert_eq!(expr.value_of(json!(null)).unwrap(), json!("ab"));
        assert_eq!(expr.stats().compiled_runs, 1);
        expr.revert_to_interpreted();
        assert_eq!(expr.state(), CompilationState::Uncompiled);
        assert_eq!(expr.value_of(json!(null)).unwrap(), json!("ab"));
        assert_eq!(expr.stats().interpreted_runs, 1);
    }

    #[test]
    fn explicit_compile_reports_unknown_functions() {
        let expr = ExpressionParser::default().parse("nope(1)").unwrap();
        assert!(!expr.compile());
        assert_eq!(expr.stats().compilation_failures, 1);
        assert_eq!(expr.value_of(json!(null)).unwrap_err().kind(), ErrorKind::Evaluation);
    }

    #[test]
    fn startup_steps_are_reported() {
        let rec = RecordingStartup::new();
        let parser = ExpressionParser::new(
            ParserConfig::with_compiler(Some(CompilerMode::Immediate), None).unwrap(),
        )
        .with_startup(Arc::new(rec.clone()));
        let expr = parser.parse("1 + 2").unwrap();
        assert_eq!(expr.value_of(json!(null)).unwrap(), json!(3));

        assert_eq!(rec.step_names(), vec!["expression.parse", "expression.compile"]);
        let steps = rec.steps();
        assert_eq!(steps[0].tags, vec![("length".to_string(), "5".to_string())]);
        assert!(steps[1]
            .tags
            .contains(&("outcome".to_string(), "compiled".to_string())));
    }

    #[test]
    fn expression_keeps_its_text() {
        let expr = ExpressionParser::default().parse("  #root ").unwrap();
        assert_eq!(expr.expression_string(), "  #root ");
        assert_eq!(expr.value_of(json!([1])).unwrap(), json!([1]));
    }
}
