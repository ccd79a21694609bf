//! Compiled expression contract.
//!
//! Expression-language parsing lives outside this crate; the table only
//! consumes the compiled form. A compiler takes expression source and a
//! schema and produces a deterministic predicate over record views plus
//! a projection of column ordinals whose numeric values feed the
//! filter's aggregates.

use crate::schema::{Record, Schema};
use thiserror::Error;

/// Errors surfaced by an expression compiler.
#[derive(Debug, Error)]
pub enum ExprError {
    /// The source text could not be parsed.
    #[error("parse error in {expression:?}: {message}")]
    Parse {
        /// The offending expression source, verbatim.
        expression: String,
        /// Compiler-specific detail.
        message: String,
    },

    /// The expression type-checks against no column of the schema.
    #[error("type mismatch in {expression:?}: {message}")]
    TypeMismatch {
        /// The offending expression source, verbatim.
        expression: String,
        /// Compiler-specific detail.
        message: String,
    },

    /// The expression references a field the schema does not declare.
    #[error("unknown field {field:?}")]
    UnknownField {
        /// The unresolved field name, verbatim.
        field: String,
    },
}

/// A compiled predicate over a record view.
///
/// Implementations must be deterministic over the record contents and
/// safe to evaluate from any number of appender threads concurrently.
pub trait CompiledFilter: Send + Sync {
    /// Evaluates the predicate against a decoded record.
    fn matches(&self, record: &Record<'_>) -> bool;

    /// Column ordinals whose numeric values feed the filter's window
    /// aggregates. The first projected ordinal is the aggregate input;
    /// an empty projection aggregates counts only.
    fn projection(&self) -> &[usize];
}

/// Compiles expression source against a schema.
pub trait ExpressionCompiler: Send + Sync {
    /// Compiles `expression`, resolving field names against `schema`.
    fn compile(
        &self,
        expression: &str,
        schema: &Schema,
    ) -> std::result::Result<Box<dyn CompiledFilter>, ExprError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_carry_source_text() {
        let err = ExprError::Parse {
            expression: "val >".to_string(),
            message: "missing operand".to_string(),
        };
        assert!(err.to_string().contains("val >"));

        let err = ExprError::UnknownField {
            field: "MISSING".to_string(),
        };
        assert!(err.to_string().contains("MISSING"));
    }
}
