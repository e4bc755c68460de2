//! Error kinds raised while parsing or evaluating an [`super::term::LCTerm`]
//! program.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DslError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}
