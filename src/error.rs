//! The `LsmcpError` taxonomy (`spec.md` §7), one variant per error kind.
//!
//! No stack traces cross the boundary to MCP tools: `LsmcpError` derives a
//! serializable `{kind, message}` record via `ErrorRecord`/`IntoErrorRecord`
//! below, independent of the `Display` text used for logging.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LsmcpError {
    #[error("not a git repository")]
    NotARepository,

    #[error("no previous git hash found")]
    NoPreviousHash,

    #[error("invalid commit hash `{hash}`: {reason}")]
    InvalidHash { hash: String, reason: &'static str },

    #[error("command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("symbol provider failed for {uri}: {message}")]
    ProviderFailure { uri: Url, message: String },

    #[error("persistent cache I/O error: {0}")]
    CacheIo(#[from] rusqlite::Error),

    #[error("persistent cache schema was updated; reindexing is required")]
    SchemaUpdated,

    #[error("LSP client is not ready (state: {state})")]
    NotReady { state: &'static str },

    #[error("invalid symbol kind `{given}`; valid spellings: {valid}")]
    InvalidSymbolKind { given: String, valid: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl LsmcpError {
    pub fn kind(&self) -> &'static str {
        match self {
            LsmcpError::NotARepository => "NotARepository",
            LsmcpError::NoPreviousHash => "NoPreviousHash",
            LsmcpError::InvalidHash { .. } => "InvalidHash",
            LsmcpError::CommandFailed { .. } => "CommandFailed",
            LsmcpError::Timeout { .. } => "Timeout",
            LsmcpError::ProviderFailure { .. } => "ProviderFailure",
            LsmcpError::CacheIo(_) => "CacheIO",
            LsmcpError::SchemaUpdated => "SchemaUpdated",
            LsmcpError::NotReady { .. } => "NotReady",
            LsmcpError::InvalidSymbolKind { .. } => "InvalidSymbolKind",
            LsmcpError::Io(_) => "Io",
            LsmcpError::Other(_) => "Other",
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord { kind: self.kind(), message: self.to_string() }
    }
}

/// A serializable, stack-trace-free shape for surfacing an `LsmcpError`
/// across the eventual MCP boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: &'static str,
    pub message: String,
}

impl Serialize for LsmcpError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_record().serialize(serializer)
    }
}

pub type LsmcpResult<T> = Result<T, LsmcpError>;
