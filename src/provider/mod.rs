//! The symbol-provider contract (`spec.md` §4.2, §6): an abstraction
//! returning hierarchical symbols for a document URI. The concrete
//! implementation ([`lsp_provider::LspSymbolProvider`]) drives the LSP
//! client; [`static_provider::StaticSymbolProvider`] is a deterministic
//! test double.

pub mod doc_comment;
pub mod lsp_provider;
pub mod static_provider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::LsmcpError;
use crate::model::position::{Location, Range};
use crate::model::symbol::{IndexedSymbol, SymbolKind};

/// A raw hierarchical symbol descriptor as returned by an LSP
/// `textDocument/documentSymbol` response, before normalization.
///
/// Two historical shapes are accepted: the tree shape (`DocumentSymbol`,
/// with `selection_range` and optional `children`) and the flat shape
/// (`SymbolInformation`, with `location` and `container_name`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSymbolDescriptor {
    Tree(RawTreeSymbol),
    Flat(RawFlatSymbol),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTreeSymbol {
    pub name: String,
    pub kind: u8,
    pub range: Range,
    pub selection_range: Range,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub children: Vec<RawTreeSymbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFlatSymbol {
    pub name: String,
    pub kind: u8,
    pub location: Location,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
}

#[async_trait]
pub trait SymbolProvider: Send + Sync {
    async fn get_document_symbols(&self, uri: &Url) -> Result<Vec<RawSymbolDescriptor>, LsmcpError>;
}

/// Normalizes a raw descriptor tree into the index's `IndexedSymbol`
/// shape, applying doc-comment position correction (`spec.md` §4.2) and
/// propagating a `container_name` down from flat-shape ancestors.
pub fn normalize(
    uri: &Url,
    descriptors: Vec<RawSymbolDescriptor>,
    language_id: &str,
    source_text: Option<&str>,
) -> Vec<IndexedSymbol> {
    descriptors
        .into_iter()
        .map(|d| normalize_one(uri, d, None, language_id, source_text))
        .collect()
}

fn normalize_one(
    uri: &Url,
    descriptor: RawSymbolDescriptor,
    container_name: Option<String>,
    language_id: &str,
    source_text: Option<&str>,
) -> IndexedSymbol {
    match descriptor {
        RawSymbolDescriptor::Tree(tree) => {
            let kind = SymbolKind::try_from(tree.kind).unwrap_or(SymbolKind::Variable);
            let corrected_range = doc_comment::advance_past_doc_comments(
                tree.selection_range,
                language_id,
                source_text,
            );
            let children = tree
                .children
                .into_iter()
                .map(|c| {
                    normalize_one(
                        uri,
                        RawSymbolDescriptor::Tree(c),
                        Some(tree.name.clone()),
                        language_id,
                        source_text,
                    )
                })
                .collect();
            IndexedSymbol {
                name: tree.name,
                kind,
                location: Location::new(uri.clone(), corrected_range),
                container_name,
                deprecated: tree.deprecated,
                detail: tree.detail,
                children,
            }
        }
        RawSymbolDescriptor::Flat(flat) => {
            let kind = SymbolKind::try_from(flat.kind).unwrap_or(SymbolKind::Variable);
            let corrected_range =
                doc_comment::advance_past_doc_comments(flat.location.range, language_id, source_text);
            IndexedSymbol {
                name: flat.name,
                kind,
                location: Location::new(uri.clone(), corrected_range),
                container_name: flat.container_name.or(container_name),
                deprecated: flat.deprecated,
                detail: None,
                children: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::position::Position;

    fn uri() -> Url {
        Url::parse("file:///c.ts").unwrap()
    }

    #[test]
    fn normalizes_tree_shape_and_propagates_container_name() {
        let tree = RawTreeSymbol {
            name: "Calc".to_string(),
            kind: SymbolKind::Class as u8,
            range: Range::new(Position::new(0, 0), Position::new(10, 0)),
            selection_range: Range::new(Position::new(0, 6), Position::new(0, 10)),
            detail: None,
            deprecated: false,
            children: vec![RawTreeSymbol {
                name: "add".to_string(),
                kind: SymbolKind::Method as u8,
                range: Range::new(Position::new(1, 0), Position::new(2, 0)),
                selection_range: Range::new(Position::new(1, 4), Position::new(1, 7)),
                detail: None,
                deprecated: false,
                children: vec![],
            }],
        };

        let symbols = normalize(&uri(), vec![RawSymbolDescriptor::Tree(tree)], "typescript", None);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "Calc");
        assert_eq!(symbols[0].children[0].name, "add");
        assert_eq!(symbols[0].children[0].container_name.as_deref(), Some("Calc"));
    }

    #[test]
    fn normalizes_flat_shape() {
        let flat = RawFlatSymbol {
            name: "X".to_string(),
            kind: SymbolKind::Variable as u8,
            location: Location::new(uri(), Range::new(Position::new(0, 0), Position::new(0, 1))),
            container_name: Some("Y".to_string()),
            deprecated: false,
        };
        let symbols = normalize(&uri(), vec![RawSymbolDescriptor::Flat(flat)], "typescript", None);
        assert_eq!(symbols[0].container_name.as_deref(), Some("Y"));
        assert!(symbols[0].children.is_empty());
    }
}
