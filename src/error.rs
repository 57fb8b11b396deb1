//! Error types for shader compilation and program linking.
//!
//! User-visible failures never escape a compile or link call as `Err`; the
//! facade formats them into the owning object's info log and flips the
//! status flag. The `Err` channel exists so the pipeline stages compose
//! with `?` internally.

use crate::glsl::ast::Span;
use thiserror::Error;

/// A failure while compiling a single shader.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// Syntactically invalid source, raised by the lexer or parser.
    #[error("{message} {span}")]
    Parse { message: String, span: Span },

    /// A semantic rule violation, raised by the type checker.
    #[error("{message} {span}")]
    Type { message: String, span: Span },

    /// A construct the backend refuses to lower. Deliberate limits surface
    /// here so the compiler fails cleanly instead of emitting wrong code.
    #[error("{message} {span}")]
    Unsupported { message: String, span: Span },

    /// A self-check violation inside the compiler. This is a bug, not a
    /// user error; callers abort with the diagnostic.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::Parse {
            message: message.into(),
            span,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::Type {
            message: message.into(),
            span,
        }
    }

    pub fn unsupported(message: impl Into<String>, span: Span) -> Self {
        Self::Unsupported {
            message: message.into(),
            span,
        }
    }

    /// True for self-check violations that must abort rather than reach
    /// the info log.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Render the error as one info-log line (`ERROR:` prefix, position
    /// suffix). Tests rely on this shape staying stable.
    pub fn info_log_line(&self) -> String {
        format!("ERROR: {self}")
    }
}

/// A failure while linking a vertex/fragment pair into a program.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// An attached shader is missing or failed to compile.
    #[error("{0}")]
    InvalidInput(String),

    /// Two distinct attributes claim the same explicit location.
    #[error("Attributes '{first}' and '{second}' are both bound to location {location}")]
    AttributeCollision {
        first: String,
        second: String,
        location: u32,
    },

    /// A fragment input varying has no matching vertex output, or the
    /// match disagrees on type or interpolation.
    #[error("{0}")]
    VaryingMismatch(String),

    /// The same uniform name is declared with different types across the
    /// two stages.
    #[error("{0}")]
    UniformMismatch(String),

    /// A resource table overflowed its region (too many attributes,
    /// varyings, or uniform slots).
    #[error("{0}")]
    ResourceLimit(String),

    /// Re-emission against the resolved location maps refused a construct.
    #[error("{0}")]
    Emit(String),
}

impl LinkError {
    /// Render the error as one info-log line.
    pub fn info_log_line(&self) -> String {
        format!("ERROR: {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_log_line_has_prefix_and_position() {
        let err = CompileError::parse("unexpected token ';'", Span::new(3, 14));
        let line = err.info_log_line();
        assert!(line.starts_with("ERROR: "));
        assert!(line.ends_with("3:14"));
    }

    #[test]
    fn attribute_collision_mentions_binding() {
        let err = LinkError::AttributeCollision {
            first: "a".to_string(),
            second: "b".to_string(),
            location: 0,
        };
        assert!(err.info_log_line().contains("bound to location 0"));
    }
}
