//! `keikaku` library crate.
//!
//! High-level layout:
//! - frontend: `lexer` + `parser` produce the shared AST (`parser::ast`)
//! - `interpreter`: environment chain, value model, evaluator and the
//!   generator/suspension engine
//! - `builtins`: the native callables seeded into the root scope
//! - `voice`: the side channel for the language's commentary

use thiserror::Error;

pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod voice;

pub use interpreter::value::Value;
pub use interpreter::Interpreter;
pub use parser::ast;

/// Any failure of the source → tokens → tree → value pipeline.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Syntax(#[from] parser::SyntaxError),
    #[error(transparent)]
    Runtime(#[from] interpreter::error::RuntimeError),
}

impl ScriptError {
    pub fn line(&self) -> usize {
        match self {
            Self::Lex(e) => e.line(),
            Self::Syntax(e) => e.line,
            Self::Runtime(e) => e.line(),
        }
    }
}

/// Run a source chunk through the full pipeline on an existing interpreter.
pub fn run_source(interp: &mut Interpreter, source: &str) -> Result<Value, ScriptError> {
    let tokens = lexer::tokenize(source)?;
    let program = parser::parse_tokens(tokens, source)?;
    Ok(interp.execute(&program)?)
}
