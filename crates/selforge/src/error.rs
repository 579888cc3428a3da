//! Error types for the compile pipeline.
//!
//! Structural errors come from the decoder, semantic errors from the
//! analyzer. Both are fatal. Conflicts are advisory and never surface here.

use thiserror::Error;

/// Formats an optional line number as ` (line N)`.
fn at_line(line: &Option<usize>) -> String {
    line.map(|l| format!(" (line {l})")).unwrap_or_default()
}

/// Structural problems with a raw row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A row has no tag.
    #[error("empty rule row{}", at_line(.line))]
    EmptyRow { line: Option<usize> },

    /// A row's tag is not one of `p`, `p2`, `g`.
    #[error("unknown row tag '{tag}'{}", at_line(.line))]
    UnknownTag { tag: String, line: Option<usize> },

    /// A row has the wrong number of fields for its tag.
    #[error("'{tag}' row expects {expected} fields, found {found}{}", at_line(.line))]
    FieldCount {
        tag: String,
        expected: String,
        found: usize,
        line: Option<usize>,
    },

    /// A transition row whose action is not the `transition` literal.
    #[error("invalid transition row: {reason}{}", at_line(.line))]
    InvalidTransition { reason: String, line: Option<usize> },
}

/// Semantic problems with the model or a decoded rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("model section '{section}' is empty")]
    MissingSection { section: &'static str },

    #[error("model section '{section}' has no '{key}' entry")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    #[error("model expression '{section}.{key}' is empty")]
    EmptyExpression {
        section: &'static str,
        key: &'static str,
    },

    #[error("rule [{rule}]: field '{field}' is empty")]
    EmptyField { rule: String, field: &'static str },

    #[error("rule [{rule}]: invalid effect '{effect}', expected 'allow' or 'deny'")]
    InvalidEffect { rule: String, effect: String },

    #[error("rule [{rule}]: invalid object '{object}': {reason}")]
    InvalidObject {
        rule: String,
        object: String,
        reason: String,
    },
}

/// Generation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    /// No decoded input was supplied.
    #[error("no decoded rules supplied to the generator")]
    MissingInput,

    #[error("action override '{action}': {reason}")]
    InvalidOverride {
        action: String,
        reason: &'static str,
    },
}

/// Any error that aborts a compile invocation.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("generation failed: {0}")]
    Generate(#[from] GenerateError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for compile operations.
pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_line_context() {
        let err = DecodeError::FieldCount {
            tag: "p".to_string(),
            expected: "4, 5 or 6".to_string(),
            found: 2,
            line: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "'p' row expects 4, 5 or 6 fields, found 2 (line 7)"
        );

        let err = DecodeError::UnknownTag {
            tag: "x".to_string(),
            line: None,
        };
        assert_eq!(err.to_string(), "unknown row tag 'x'");
    }

    #[test]
    fn compile_error_wraps_stage_errors() {
        let err: CompileError = AnalysisError::MissingSection {
            section: "request_definition",
        }
        .into();
        assert!(err.to_string().starts_with("analysis failed"));
    }
}
