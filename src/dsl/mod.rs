//! The lisp adapter's term language: S-expression syntax, the `LCTerm`
//! AST it lowers to, and the tree-walking evaluator that runs it
//! against a session's line store, handle registry, and bindings.

pub mod error;
pub mod eval;
pub mod parser;
pub mod term;

pub use error::DslError;
pub use eval::{eval, EvalCtx};
pub use parser::parse;
pub use term::{ConstraintOp, Env, Hit, LCTerm, Value};
