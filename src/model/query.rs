//! The multi-predicate query accepted by `SymbolIndex::query_symbols`.

use crate::model::symbol::SymbolKind;

/// All fields are optional; an absent field imposes no constraint.
#[derive(Debug, Clone, Default)]
pub struct SymbolQuery {
    /// Case-sensitive substring match against a symbol's name.
    pub name: Option<String>,
    /// Membership test against a symbol's kind.
    pub kind: Option<Vec<SymbolKind>>,
    /// Restrict the search to a single file (repository-relative or absolute path).
    pub file: Option<String>,
    /// Exact match against a symbol's `container_name`.
    pub container_name: Option<String>,
    /// Whether to descend into matched subtrees and non-matching subtrees alike.
    /// Defaults to `true`.
    pub include_children: bool,
}

impl SymbolQuery {
    pub fn new() -> Self {
        Self { include_children: true, ..Default::default() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: Vec<SymbolKind>) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_container_name(mut self, container_name: impl Into<String>) -> Self {
        self.container_name = Some(container_name.into());
        self
    }

    pub fn with_include_children(mut self, include_children: bool) -> Self {
        self.include_children = include_children;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none() && self.file.is_none() && self.container_name.is_none()
    }

    pub(crate) fn matches(&self, symbol: &crate::model::symbol::IndexedSymbol) -> bool {
        if let Some(name) = &self.name {
            if !symbol.name.contains(name.as_str()) {
                return false;
            }
        }
        if let Some(kinds) = &self.kind {
            if !kinds.contains(&symbol.kind) {
                return false;
            }
        }
        if let Some(container) = &self.container_name {
            if symbol.container_name.as_deref() != Some(container.as_str()) {
                return false;
            }
        }
        true
    }
}
