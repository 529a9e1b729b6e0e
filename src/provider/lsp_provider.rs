//! [`SymbolProvider`] backed by a live [`LspClient`] (`spec.md` §4.2).
//!
//! Drives the document lifecycle around a single `documentSymbol`
//! request: opens the document if it isn't already open, issues the
//! request, and leaves the document open (closing it on every request
//! would thrash `didOpen`/`didClose` for files the index revisits
//! across `index_files` batches; callers that want to bound open
//! document count should close explicitly via [`LspSymbolProvider::close`]).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use crate::error::LsmcpError;
use crate::fs::FileSystem;
use crate::lsp::client::LspClient;
use crate::provider::{RawSymbolDescriptor, SymbolProvider};

/// Maps a file extension to an LSP `languageId`, per the identifiers
/// the spec's doc-comment correction table and most language servers
/// already expect (`microsoft/language-server-protocol` §3.17.2 lists
/// these as the canonical spellings).
pub fn language_id_for_extension(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "go" => "go",
        _ => "plaintext",
    }
}

pub struct LspSymbolProvider {
    client: Arc<LspClient>,
    fs: Arc<dyn FileSystem>,
    request_timeout: Duration,
}

impl LspSymbolProvider {
    pub fn new(client: Arc<LspClient>, fs: Arc<dyn FileSystem>) -> Self {
        Self { client, fs, request_timeout: Duration::from_secs(30) }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn path_for(&self, uri: &Url) -> Result<std::path::PathBuf, LsmcpError> {
        uri.to_file_path()
            .map_err(|_| LsmcpError::ProviderFailure { uri: uri.clone(), message: "not a file:// URI".to_string() })
    }

    /// Sends `didClose` for `uri`, e.g. once the index is done with a
    /// file in a long-lived process.
    pub fn close(&self, uri: &Url) -> Result<(), LsmcpError> {
        self.client.close(uri)
    }
}

#[async_trait]
impl SymbolProvider for LspSymbolProvider {
    async fn get_document_symbols(&self, uri: &Url) -> Result<Vec<RawSymbolDescriptor>, LsmcpError> {
        let path = self.path_for(uri)?;

        if !self.client.is_open(uri) {
            let text = self.fs.read_file(&path).await.map_err(|e| LsmcpError::ProviderFailure {
                uri: uri.clone(),
                message: format!("failed to read file content: {e}"),
            })?;
            let language_id = language_id_for_extension(&path);
            self.client.open(uri.clone(), text, language_id)?;
        }

        let params: Value = json!({ "textDocument": { "uri": uri.as_str() } });
        let result = tokio::time::timeout(self.request_timeout, self.client.request("textDocument/documentSymbol", params))
            .await
            .map_err(|_| LsmcpError::Timeout { after: self.request_timeout })??;

        parse_document_symbol_result(uri, result)
    }
}

fn parse_document_symbol_result(uri: &Url, result: Value) -> Result<Vec<RawSymbolDescriptor>, LsmcpError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<RawSymbolDescriptor>(item).map_err(|e| LsmcpError::ProviderFailure {
                    uri: uri.clone(),
                    message: format!("malformed documentSymbol response: {e}"),
                })
            })
            .collect(),
        other => Err(LsmcpError::ProviderFailure {
            uri: uri.clone(),
            message: format!("unexpected documentSymbol response shape: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn detects_language_id_from_extension() {
        assert_eq!(language_id_for_extension(&PathBuf::from("a.rs")), "rust");
        assert_eq!(language_id_for_extension(&PathBuf::from("a.tsx")), "typescriptreact");
        assert_eq!(language_id_for_extension(&PathBuf::from("a.unknown")), "plaintext");
    }

    #[test]
    fn parses_empty_document_symbol_result() {
        let uri = Url::parse("file:///a.rs").unwrap();
        let parsed = parse_document_symbol_result(&uri, Value::Null).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn rejects_non_array_non_null_result() {
        let uri = Url::parse("file:///a.rs").unwrap();
        let result = parse_document_symbol_result(&uri, json!({ "not": "an array" }));
        assert!(result.is_err());
    }
}
