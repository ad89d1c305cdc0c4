//! Runtime error types.

/// Errors that can occur while configuring a runtime or running scripts.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Malformed runtime configuration
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Invalid option value
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Compilation, loading or execution error from the VM bridge
    #[error("{0}")]
    Luau(#[from] lunaria::Error),
}

impl RuntimeError {
    /// Whether the error came out of a running script rather than the host.
    pub fn is_script_error(&self) -> bool {
        matches!(self, RuntimeError::Luau(err) if err.is_script_error())
    }
}
