//! Error types for the script runtime.
//!
//! Unit- and hook-level errors are collected as diagnostics or recorded in
//! dispatch results; they never cross the dispatcher boundary as `Err`.
//! Only [`ScriptError::Engine`] marks an internal invariant violation and
//! aborts the operation that detected it.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for runtime operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors that can occur in the script runtime.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A script file could not be read. Skips that unit only.
    #[error("Script source unavailable: {path}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A script unit failed to compile. The previous compiled module, if
    /// any, stays active.
    #[error("Failed to compile script '{unit}': {message}")]
    Compile { unit: String, message: String },

    /// A hook invocation exceeded its wall-clock budget.
    #[error("Hook '{hook}' in '{unit}' timed out after {timeout_ms}ms")]
    Timeout {
        unit: String,
        hook: String,
        timeout_ms: u64,
    },

    /// A hook invocation touched a capability outside the allow-list.
    #[error("Hook '{hook}' in '{unit}' violated the sandbox: {message}")]
    SandboxViolation {
        unit: String,
        hook: String,
        message: String,
    },

    /// An uncaught failure inside a hook body.
    #[error("Hook '{hook}' in '{unit}' failed: {message}")]
    Invocation {
        unit: String,
        hook: String,
        message: String,
    },

    /// Invalid host configuration.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation in the loader or hook table. Fatal to
    /// the operation that detected it.
    #[error("Internal runtime invariant violated: {message}")]
    Engine { message: String },
}

impl ScriptError {
    /// Whether this error is the fatal programming-error class.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Engine { .. })
    }
}
