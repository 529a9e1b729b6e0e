//! A deterministic [`SymbolProvider`] test double returning canned
//! descriptors without spawning a child process.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::error::LsmcpError;
use crate::provider::{RawSymbolDescriptor, SymbolProvider};

#[derive(Default)]
pub struct StaticSymbolProvider {
    responses: Mutex<HashMap<Url, Result<Vec<RawSymbolDescriptor>, String>>>,
    pub call_count: Mutex<HashMap<Url, usize>>,
}

impl StaticSymbolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, uri: Url, descriptors: Vec<RawSymbolDescriptor>) {
        self.responses.lock().insert(uri, Ok(descriptors));
    }

    pub fn set_error(&self, uri: Url, message: impl Into<String>) {
        self.responses.lock().insert(uri, Err(message.into()));
    }

    pub fn calls_for(&self, uri: &Url) -> usize {
        self.call_count.lock().get(uri).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SymbolProvider for StaticSymbolProvider {
    async fn get_document_symbols(&self, uri: &Url) -> Result<Vec<RawSymbolDescriptor>, LsmcpError> {
        *self.call_count.lock().entry(uri.clone()).or_insert(0) += 1;
        match self.responses.lock().get(uri) {
            Some(Ok(descriptors)) => Ok(descriptors.clone()),
            Some(Err(message)) => {
                Err(LsmcpError::ProviderFailure { uri: uri.clone(), message: message.clone() })
            }
            None => Ok(Vec::new()),
        }
    }
}
