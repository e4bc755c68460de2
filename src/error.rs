use thiserror::Error;

/// Crate-wide error taxonomy. Variants name *kinds*, matching the
/// vocabulary the orchestrator and adapters use when turning a failure
/// into feedback text, not a one-to-one mirror of every component's
/// internal error type.
#[derive(Error, Debug)]
pub enum RlmError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("unsafe expression: {0}")]
    UnsafeExpression(String),

    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    #[error("memory limit exceeded ({0} MiB)")]
    MemoryExceeded(u64),

    #[error("sub-call limit exceeded ({0})")]
    SubCallLimit(u32),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("no progress: repeated code fragment {0} times")]
    NoProgress(u32),
}

impl RlmError {
    /// The exit code this error should produce when it escapes to the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            RlmError::BadInput(_) => 1,
            _ => 2,
        }
    }
}

impl From<crate::sandbox::SandboxError> for RlmError {
    fn from(e: crate::sandbox::SandboxError) -> Self {
        match e {
            crate::sandbox::SandboxError::Timeout(ms) => RlmError::Timeout(ms),
            crate::sandbox::SandboxError::MemoryExceeded(mb) => RlmError::MemoryExceeded(mb),
            crate::sandbox::SandboxError::SubCallLimit(n) => RlmError::SubCallLimit(n),
            crate::sandbox::SandboxError::Runtime(msg) => RlmError::RuntimeError(msg),
        }
    }
}

impl From<crate::validator::ValidatorError> for RlmError {
    fn from(e: crate::validator::ValidatorError) -> Self {
        RlmError::UnsafeExpression(e.0)
    }
}

impl From<crate::predicate::PredicateError> for RlmError {
    fn from(e: crate::predicate::PredicateError) -> Self {
        match e {
            crate::predicate::PredicateError::Unsafe(msg) => RlmError::UnsafeExpression(msg),
            crate::predicate::PredicateError::Syntax(msg) => RlmError::SyntaxError(msg),
        }
    }
}

impl From<crate::dsl::DslError> for RlmError {
    fn from(e: crate::dsl::DslError) -> Self {
        match e {
            crate::dsl::DslError::Syntax(msg) => RlmError::SyntaxError(msg),
            crate::dsl::DslError::UnboundVariable(msg) => RlmError::UnboundVariable(msg),
            crate::dsl::DslError::Runtime(msg) => RlmError::RuntimeError(msg),
        }
    }
}

impl From<crate::llm_client::LlmError> for RlmError {
    fn from(e: crate::llm_client::LlmError) -> Self {
        RlmError::TransportError(e.to_string())
    }
}
