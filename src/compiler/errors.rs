//! Static error types for the compiler pipeline.
//!
//! Syntax errors and type errors are disjoint: a syntax error comes out of
//! the lexer or parser before any checking runs, a type error comes out of
//! unification, overload resolution, or structural checks. Run-time traps
//! live in the interpreter (`crate::interp::TrapError`) and are never
//! produced here.

use std::fmt;

use crate::compiler::lexer::Span;
use crate::compiler::types::Type;

/// A malformed token stream or grammar violation. No recovery is attempted;
/// the first syntax error aborts the pipeline.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "syntax error: {} (at {}:{})",
            self.message, self.span.line, self.span.column
        )
    }
}

/// A type error with location information.
#[derive(Debug, Clone)]
pub struct TypeError {
    pub message: String,
    pub span: Span,
    pub expected: Option<Type>,
    pub found: Option<Type>,
}

impl TypeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: None,
            found: None,
        }
    }

    pub fn mismatch(expected: Type, found: Type, span: Span) -> Self {
        Self {
            message: format!("expected `{}`, found `{}`", expected, found),
            span,
            expected: Some(expected),
            found: Some(found),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type error: {} (at {}:{})",
            self.message, self.span.line, self.span.column
        )
    }
}

/// Any static failure: either stage aborts the pipeline with the first
/// error it finds.
#[derive(Debug, Clone)]
pub enum CompileError {
    Syntax(SyntaxError),
    Type(TypeError),
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::Syntax(e) => e.span,
            CompileError::Type(e) => e.span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Syntax(e) => &e.message,
            CompileError::Type(e) => &e.message,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Syntax(_) => "syntax",
            CompileError::Type(_) => "type",
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Syntax(e) => e.fmt(f),
            CompileError::Type(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<SyntaxError> for CompileError {
    fn from(e: SyntaxError) -> Self {
        CompileError::Syntax(e)
    }
}

impl From<TypeError> for CompileError {
    fn from(e: TypeError) -> Self {
        CompileError::Type(e)
    }
}
