use thiserror::Error;

/// Errors from the execution harness and container runtime.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("runner protocol violation: {0}")]
    Protocol(String),
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(e: bollard::errors::Error) -> Self {
        SandboxError::Runtime(e.to_string())
    }
}
