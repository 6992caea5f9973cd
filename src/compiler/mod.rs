//! The static half of the pipeline: lexing, parsing, type checking, and
//! monomorphisation. `check` runs everything up to and including the type
//! checker; monomorphisation happens lazily per entry point when the
//! interpreter is invoked.

pub mod ast;
pub mod errors;
pub mod lexer;
pub mod monomorphise;
pub mod parser;
pub mod resolver;
pub mod typechecker;
pub mod typed_ast;
pub mod types;
pub mod unify;

pub use errors::{CompileError, SyntaxError, TypeError};
pub use typed_ast::Program;

/// Lex, parse, and type check a source file. The first error aborts; there
/// is no recovery.
pub fn check(source: &str) -> Result<Program, CompileError> {
    let tokens = lexer::Lexer::new(source).scan_tokens()?;
    let ast = parser::Parser::new(tokens).parse()?;
    let program = typechecker::check_program(&ast)?;
    Ok(program)
}

/// Human-readable diagnostic with the file name spliced in.
pub fn format_error(filename: &str, err: &CompileError) -> String {
    let span = err.span();
    format!(
        "error: {}\n  --> {}:{}:{}",
        err.message(),
        filename,
        span.line,
        span.column
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_pipeline() {
        assert!(check("int32 foo(int32 x) { return x + 1; }").is_ok());
    }

    #[test]
    fn test_syntax_error_kind() {
        let err = check("int32 foo( { }").unwrap_err();
        assert_eq!(err.kind(), "syntax");
    }

    #[test]
    fn test_type_error_kind() {
        let err = check("int32 foo() { }").unwrap_err();
        assert_eq!(err.kind(), "type");
    }

    #[test]
    fn test_format_error() {
        let err = check("int32 foo() { return true; }").unwrap_err();
        let msg = format_error("demo.shale", &err);
        assert!(msg.contains("demo.shale:1:"), "{}", msg);
    }
}
