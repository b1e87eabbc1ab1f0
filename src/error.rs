//! Typed errors for the analysis components.
//!
//! Plumbing code uses `anyhow`; these enums cover the failures that callers
//! record or branch on instead of propagating.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// A syntax shape the extractor has no rule for. Recorded per file and
/// accumulated into the run; never aborts analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind} not supported at {file}:{line}:{column}")]
pub struct NodeTypeNotSupportedError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub kind: String,
    pub text: String,
}

/// Module resolution failures. `NotFound` is the normal miss; callers log it
/// and continue.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot resolve '{specifier}' from {}", from.display())]
    NotFound { specifier: String, from: PathBuf },

    #[error("invalid tsconfig {}: {message}", path.display())]
    InvalidConfig { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for language server operations
pub type LspResult<T> = std::result::Result<T, LspError>;

/// Errors raised by the language server bridge. Every variant is treated as
/// "no additional information" by the expander.
#[derive(Debug, Error)]
pub enum LspError {
    /// Server process could not be spawned or did not finish the handshake
    #[error("Failed to start language server: {0}")]
    ServerStartFailed(String),

    /// Session was disposed or its process exited
    #[error("Language server not available: {0}")]
    ServerNotAvailable(String),

    /// Reader side of the connection closed before a reply arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request did not complete in time
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Malformed frame or message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error object returned by the server
    #[error("LSP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Hard failures of `setup_monitoring` and the watcher.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("project root does not exist: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("project root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to start file watcher: {0}")]
    Watch(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
