//! Parser configuration and the process-wide default compiler mode.

use crate::errors::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Property key consulted for the process-wide default compiler mode.
pub const COMPILER_MODE_PROPERTY: &str = "expression.compiler.mode";

pub const DEFAULT_MAX_EXPRESSION_LENGTH: i64 = 10_000;
pub const DEFAULT_MAX_AUTO_GROW_SIZE: usize = i32::MAX as usize;
pub const DEFAULT_PROMOTION_THRESHOLD: u32 = 100;

/// When an expression runs through the interpreter and when through a
/// compiled evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerMode {
    /// Always interpret.
    Off,
    /// Compile before the first evaluation; a compilation failure is an
    /// evaluation failure.
    Immediate,
    /// Interpret until the node shapes settle, then compile. Falls back to
    /// the interpreter whenever the shapes drift.
    Mixed,
}

impl FromStr for CompilerMode {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(CompilerMode::Off),
            "IMMEDIATE" => Ok(CompilerMode::Immediate),
            "MIXED" => Ok(CompilerMode::Mixed),
            _ => Err(EvalError::InvalidConfiguration(format!(
                "unknown compiler mode '{s}', expected one of OFF, IMMEDIATE, MIXED"
            ))),
        }
    }
}

impl fmt::Display for CompilerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompilerMode::Off => "OFF",
            CompilerMode::Immediate => "IMMEDIATE",
            CompilerMode::Mixed => "MIXED",
        };
        f.write_str(name)
    }
}

/// String-keyed configuration lookup.
pub trait PropertySource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads properties from the environment: `expression.compiler.mode`
/// becomes `EXPRESSION_COMPILER_MODE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvPropertySource;

impl PropertySource for EnvPropertySource {
    fn get(&self, key: &str) -> Option<String> {
        let var = key.replace(['.', '-'], "_").to_ascii_uppercase();
        std::env::var(var).ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapPropertySource {
    inner: HashMap<String, String>,
}

impl MapPropertySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.insert(key.into(), value.into());
        self
    }
}

impl PropertySource for MapPropertySource {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }
}

/// Resolve the default compiler mode from `source`. Absence means OFF.
pub fn resolve_compiler_mode(source: &dyn PropertySource) -> Result<CompilerMode> {
    match source.get(COMPILER_MODE_PROPERTY) {
        Some(raw) => raw.parse(),
        None => Ok(CompilerMode::Off),
    }
}

static PROCESS_DEFAULT_MODE: OnceLock<Result<CompilerMode>> = OnceLock::new();

/// Process-wide default compiler mode, read from the environment on first
/// access and fixed afterwards. An unrecognized value keeps failing.
pub fn default_compiler_mode() -> Result<CompilerMode> {
    PROCESS_DEFAULT_MODE
        .get_or_init(|| resolve_compiler_mode(&EnvPropertySource))
        .clone()
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque isolation handle handed to the compilation backend. Evaluators
/// compiled under one context are tagged with it.
#[derive(Debug, Clone)]
pub struct CompilationContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    id: u64,
    label: String,
}

impl CompilationContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

/// Immutable settings shared by every expression parsed with them.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    compiler_mode: CompilerMode,
    compilation_context: Option<CompilationContext>,
    auto_grow_null_references: bool,
    auto_grow_collections: bool,
    max_auto_grow_size: usize,
    max_expression_length: i64,
    promotion_threshold: u32,
}

/// Plain defaults with the mode fixed to OFF. Use [`ParserConfig::new`] to
/// honour the process-wide default mode instead.
impl Default for ParserConfig {
    fn default() -> Self {
        Self::full(
            CompilerMode::Off,
            None,
            false,
            false,
            DEFAULT_MAX_AUTO_GROW_SIZE,
            DEFAULT_MAX_EXPRESSION_LENGTH,
        )
    }
}

impl ParserConfig {
    /// Default settings, with the mode taken from the process-wide default.
    pub fn new() -> Result<Self> {
        Self::with_settings(None, None, false, false, DEFAULT_MAX_AUTO_GROW_SIZE)
    }

    pub fn with_compiler(
        mode: Option<CompilerMode>,
        context: Option<CompilationContext>,
    ) -> Result<Self> {
        Self::with_settings(mode, context, false, false, DEFAULT_MAX_AUTO_GROW_SIZE)
    }

    /// Growth settings only; the compiler mode stays OFF.
    pub fn with_auto_grow(auto_grow_null_references: bool, auto_grow_collections: bool) -> Self {
        Self::with_auto_grow_limit(
            auto_grow_null_references,
            auto_grow_collections,
            DEFAULT_MAX_AUTO_GROW_SIZE,
        )
    }

    pub fn with_auto_grow_limit(
        auto_grow_null_references: bool,
        auto_grow_collections: bool,
        max_auto_grow_size: usize,
    ) -> Self {
        Self {
            auto_grow_null_references,
            auto_grow_collections,
            max_auto_grow_size,
            ..Self::default()
        }
    }

    /// `None` for the mode means the process-wide default.
    pub fn with_settings(
        mode: Option<CompilerMode>,
        context: Option<CompilationContext>,
        auto_grow_null_references: bool,
        auto_grow_collections: bool,
        max_auto_grow_size: usize,
    ) -> Result<Self> {
        let mode = match mode {
            Some(mode) => mode,
            None => default_compiler_mode()?,
        };
        Ok(Self::full(
            mode,
            context,
            auto_grow_null_references,
            auto_grow_collections,
            max_auto_grow_size,
            DEFAULT_MAX_EXPRESSION_LENGTH,
        ))
    }

    /// Every setting spelled out. `max_expression_length` is taken as given;
    /// the parser rejects non-positive values.
    pub fn full(
        compiler_mode: CompilerMode,
        compilation_context: Option<CompilationContext>,
        auto_grow_null_references: bool,
        auto_grow_collections: bool,
        max_auto_grow_size: usize,
        max_expression_length: i64,
    ) -> Self {
        Self {
            compiler_mode,
            compilation_context,
            auto_grow_null_references,
            auto_grow_collections,
            max_auto_grow_size,
            max_expression_length,
            promotion_threshold: DEFAULT_PROMOTION_THRESHOLD,
        }
    }

    /// Number of consecutive shape-stable interpreted runs before a MIXED
    /// expression is compiled. Zero is treated as one.
    pub fn with_promotion_threshold(mut self, threshold: u32) -> Self {
        self.promotion_threshold = threshold.max(1);
        self
    }

    pub fn compiler_mode(&self) -> CompilerMode {
        self.compiler_mode
    }

    pub fn compilation_context(&self) -> Option<&CompilationContext> {
        self.compilation_context.as_ref()
    }

    pub fn auto_grow_null_references(&self) -> bool {
        self.auto_grow_null_references
    }

    pub fn auto_grow_collections(&self) -> bool {
        self.auto_grow_collections
    }

    pub fn max_auto_grow_size(&self) -> usize {
        self.max_auto_grow_size
    }

    pub fn max_expression_length(&self) -> i64 {
        self.max_expression_length
    }

    pub fn promotion_threshold(&self) -> u32 {
        self.promotion_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_settings() {
        let cfg = ParserConfig::default();
        assert_eq!(cfg.compiler_mode(), CompilerMode::Off);
        assert!(cfg.compilation_context().is_none());
        assert!(!cfg.auto_grow_null_references());
        assert!(!cfg.auto_grow_collections());
        assert_eq!(cfg.max_auto_grow_size(), DEFAULT_MAX_AUTO_GROW_SIZE);
        assert_eq!(cfg.max_expression_length(), 10_000);
        assert_eq!(cfg.promotion_threshold(), 100);
    }

    #[test]
    fn mode_names_are_case_insensitive() {
        assert_eq!("mixed".parse::<CompilerMode>().unwrap(), CompilerMode::Mixed);
        assert_eq!("Immediate".parse::<CompilerMode>().unwrap(), CompilerMode::Immediate);
        assert_eq!(" OFF ".parse::<CompilerMode>().unwrap(), CompilerMode::Off);
    }

    #[test]
    fn resolve_from_property_source() {
        let empty = MapPropertySource::new();
        assert_eq!(resolve_compiler_mode(&empty).unwrap(), CompilerMode::Off);

        let mixed = MapPropertySource::new().with(COMPILER_MODE_PROPERTY, "mixed");
        assert_eq!(resolve_compiler_mode(&mixed).unwrap(), CompilerMode::Mixed);

        let bogus = MapPropertySource::new().with(COMPILER_MODE_PROPERTY, "sometimes");
        let err = resolve_compiler_mode(&bogus).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn non_positive_length_is_stored_as_given() {
        let cfg = ParserConfig::full(CompilerMode::Off, None, false, false, 3, -1);
        assert_eq!(cfg.max_expression_length(), -1);
        assert_eq!(cfg.max_auto_grow_size(), 3);
    }

    #[test]
    fn explicit_mode_skips_process_default() {
        let ctx = CompilationContext::new("plugins");
        let cfg = ParserConfig::with_compiler(Some(CompilerMode::Immediate), Some(ctx.clone())).unwrap();
        assert_eq!(cfg.compiler_mode(), CompilerMode::Immediate);
        assert_eq!(cfg.compilation_context().map(|c| c.id()), Some(ctx.id()));
    }

    #[test]
    fn threshold_is_at_least_one() {
        let cfg = ParserConfig::default().with_promotion_threshold(0);
        assert_eq!(cfg.promotion_threshold(), 1);
    }
}
