use std::fmt;
use thiserror::Error;

/// Where in the expression text a runtime failure happened. `position` is
/// the byte offset of the failing node, as in [`EvalError::Parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub position: usize,
    pub expression: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " at position {} in '{}'", self.position, self.expression)
    }
}

fn located(location: &Option<Location>) -> String {
    location.as_ref().map(Location::to_string).unwrap_or_default()
}

/// Every failure the engine reports to a caller of `parse` or `get_value`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Rejected by the length guard before any tokenizing happened.
    #[error("expression is {length} characters long, the configured maximum is {limit}")]
    ExpressionTooLong { length: usize, limit: i64 },

    #[error("parse error at position {position} in '{expression}': {message}")]
    Parse {
        message: String,
        position: usize,
        expression: String,
    },

    /// A null intermediate value was met and the configuration forbids growing it.
    #[error("cannot read property '{property}'{}: {message}", located(.location))]
    PropertyAccess {
        property: String,
        message: String,
        location: Option<Location>,
    },

    #[error("index {index} out of bounds for collection of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("cannot grow collection to index {index}, the auto-grow limit is {limit}")]
    GrowthLimitExceeded { index: i64, limit: usize },

    #[error("compilation failed: {0}")]
    Compilation(String),

    #[error("evaluation error{}: {message}", located(.location))]
    Evaluation {
        message: String,
        location: Option<Location>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Fieldless mirror of [`EvalError`], for comparing failures by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ExpressionTooLong,
    Parse,
    PropertyAccess,
    IndexOutOfBounds,
    GrowthLimitExceeded,
    Compilation,
    Evaluation,
    InvalidConfiguration,
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::ExpressionTooLong { .. } => ErrorKind::ExpressionTooLong,
            EvalError::Parse { .. } => ErrorKind::Parse,
            EvalError::PropertyAccess { .. } => ErrorKind::PropertyAccess,
            EvalError::IndexOutOfBounds { .. } => ErrorKind::IndexOutOfBounds,
            EvalError::GrowthLimitExceeded { .. } => ErrorKind::GrowthLimitExceeded,
            EvalError::Compilation(_) => ErrorKind::Compilation,
            EvalError::Evaluation { .. } => ErrorKind::Evaluation,
            EvalError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            EvalError::PropertyAccess { location, .. } | EvalError::Evaluation { location, .. } => {
                location.as_ref()
            }
            _ => None,
        }
    }

    pub(crate) fn eval(msg: impl Into<String>) -> Self {
        EvalError::Evaluation {
            message: msg.into(),
            location: None,
        }
    }

    /// Attach the failing node's offset. The innermost node wins, so an
    /// error that already has a location is returned unchanged.
    pub(crate) fn at(mut self, position: usize) -> Self {
        if let EvalError::PropertyAccess { location, .. } | EvalError::Evaluation { location, .. } =
            &mut self
        {
            if location.is_none() {
                *location = Some(Location {
                    position,
                    expression: String::new(),
                });
            }
        }
        self
    }

    /// Fill in the expression text once the error leaves the evaluator.
    pub(crate) fn in_expression(mut self, text: &str) -> Self {
        if let EvalError::PropertyAccess {
            location: Some(loc),
            ..
        }
        | EvalError::Evaluation {
            location: Some(loc),
            ..
        } = &mut self
        {
            if loc.expression.is_empty() {
                loc.expression = text.to_string();
            }
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
