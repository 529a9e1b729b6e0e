//! `IndexedSymbol`, `SymbolKind` and the per-file symbol record.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::LsmcpError;
use crate::model::position::Location;

/// The 26 LSP `SymbolKind` values. Discriminants are fixed by the LSP
/// specification and MUST be preserved bit-exactly for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SymbolKind {
    File = 1,
    Module = 2,
    Namespace = 3,
    Package = 4,
    Class = 5,
    Method = 6,
    Property = 7,
    Field = 8,
    Constructor = 9,
    Enum = 10,
    Interface = 11,
    Function = 12,
    Variable = 13,
    Constant = 14,
    String = 15,
    Number = 16,
    Boolean = 17,
    Array = 18,
    Object = 19,
    Key = 20,
    Null = 21,
    EnumMember = 22,
    Struct = 23,
    Event = 24,
    Operator = 25,
    TypeParameter = 26,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 26] = [
        SymbolKind::File,
        SymbolKind::Module,
        SymbolKind::Namespace,
        SymbolKind::Package,
        SymbolKind::Class,
        SymbolKind::Method,
        SymbolKind::Property,
        SymbolKind::Field,
        SymbolKind::Constructor,
        SymbolKind::Enum,
        SymbolKind::Interface,
        SymbolKind::Function,
        SymbolKind::Variable,
        SymbolKind::Constant,
        SymbolKind::String,
        SymbolKind::Number,
        SymbolKind::Boolean,
        SymbolKind::Array,
        SymbolKind::Object,
        SymbolKind::Key,
        SymbolKind::Null,
        SymbolKind::EnumMember,
        SymbolKind::Struct,
        SymbolKind::Event,
        SymbolKind::Operator,
        SymbolKind::TypeParameter,
    ];

    /// Case-insensitive parse used by `query_symbols`'s `kind` predicate.
    ///
    /// Rejects unknown spellings with an error naming valid options, per
    /// the spec's `parse_symbol_kind` scenario.
    pub fn parse_many(names: &[String]) -> Result<Vec<SymbolKind>, LsmcpError> {
        names.iter().map(|n| n.parse()).collect()
    }

    fn valid_spellings() -> String {
        Self::ALL.iter().map(|k| format!("{:?}", k)).collect::<Vec<_>>().join(", ")
    }
}

impl FromStr for SymbolKind {
    type Err = LsmcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| format!("{:?}", k).to_ascii_lowercase() == lower)
            .ok_or_else(|| LsmcpError::InvalidSymbolKind {
                given: s.to_string(),
                valid: Self::valid_spellings(),
            })
    }
}

impl TryFrom<u8> for SymbolKind {
    type Error = LsmcpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|k| *k as u8 == value)
            .ok_or_else(|| LsmcpError::InvalidSymbolKind {
                given: value.to_string(),
                valid: Self::valid_spellings(),
            })
    }
}

impl From<lsp_types::SymbolKind> for SymbolKind {
    fn from(k: lsp_types::SymbolKind) -> Self {
        match k {
            lsp_types::SymbolKind::FILE => SymbolKind::File,
            lsp_types::SymbolKind::MODULE => SymbolKind::Module,
            lsp_types::SymbolKind::NAMESPACE => SymbolKind::Namespace,
            lsp_types::SymbolKind::PACKAGE => SymbolKind::Package,
            lsp_types::SymbolKind::CLASS => SymbolKind::Class,
            lsp_types::SymbolKind::METHOD => SymbolKind::Method,
            lsp_types::SymbolKind::PROPERTY => SymbolKind::Property,
            lsp_types::SymbolKind::FIELD => SymbolKind::Field,
            lsp_types::SymbolKind::CONSTRUCTOR => SymbolKind::Constructor,
            lsp_types::SymbolKind::ENUM => SymbolKind::Enum,
            lsp_types::SymbolKind::INTERFACE => SymbolKind::Interface,
            lsp_types::SymbolKind::FUNCTION => SymbolKind::Function,
            lsp_types::SymbolKind::VARIABLE => SymbolKind::Variable,
            lsp_types::SymbolKind::CONSTANT => SymbolKind::Constant,
            lsp_types::SymbolKind::STRING => SymbolKind::String,
            lsp_types::SymbolKind::NUMBER => SymbolKind::Number,
            lsp_types::SymbolKind::BOOLEAN => SymbolKind::Boolean,
            lsp_types::SymbolKind::ARRAY => SymbolKind::Array,
            lsp_types::SymbolKind::OBJECT => SymbolKind::Object,
            lsp_types::SymbolKind::KEY => SymbolKind::Key,
            lsp_types::SymbolKind::NULL => SymbolKind::Null,
            lsp_types::SymbolKind::ENUM_MEMBER => SymbolKind::EnumMember,
            lsp_types::SymbolKind::STRUCT => SymbolKind::Struct,
            lsp_types::SymbolKind::EVENT => SymbolKind::Event,
            lsp_types::SymbolKind::OPERATOR => SymbolKind::Operator,
            lsp_types::SymbolKind::TYPE_PARAMETER => SymbolKind::TypeParameter,
            _ => SymbolKind::Variable,
        }
    }
}

impl From<SymbolKind> for lsp_types::SymbolKind {
    fn from(k: SymbolKind) -> Self {
        match k {
            SymbolKind::File => lsp_types::SymbolKind::FILE,
            SymbolKind::Module => lsp_types::SymbolKind::MODULE,
            SymbolKind::Namespace => lsp_types::SymbolKind::NAMESPACE,
            SymbolKind::Package => lsp_types::SymbolKind::PACKAGE,
            SymbolKind::Class => lsp_types::SymbolKind::CLASS,
            SymbolKind::Method => lsp_types::SymbolKind::METHOD,
            SymbolKind::Property => lsp_types::SymbolKind::PROPERTY,
            SymbolKind::Field => lsp_types::SymbolKind::FIELD,
            SymbolKind::Constructor => lsp_types::SymbolKind::CONSTRUCTOR,
            SymbolKind::Enum => lsp_types::SymbolKind::ENUM,
            SymbolKind::Interface => lsp_types::SymbolKind::INTERFACE,
            SymbolKind::Function => lsp_types::SymbolKind::FUNCTION,
            SymbolKind::Variable => lsp_types::SymbolKind::VARIABLE,
            SymbolKind::Constant => lsp_types::SymbolKind::CONSTANT,
            SymbolKind::String => lsp_types::SymbolKind::STRING,
            SymbolKind::Number => lsp_types::SymbolKind::NUMBER,
            SymbolKind::Boolean => lsp_types::SymbolKind::BOOLEAN,
            SymbolKind::Array => lsp_types::SymbolKind::ARRAY,
            SymbolKind::Object => lsp_types::SymbolKind::OBJECT,
            SymbolKind::Key => lsp_types::SymbolKind::KEY,
            SymbolKind::Null => lsp_types::SymbolKind::NULL,
            SymbolKind::EnumMember => lsp_types::SymbolKind::ENUM_MEMBER,
            SymbolKind::Struct => lsp_types::SymbolKind::STRUCT,
            SymbolKind::Event => lsp_types::SymbolKind::EVENT,
            SymbolKind::Operator => lsp_types::SymbolKind::OPERATOR,
            SymbolKind::TypeParameter => lsp_types::SymbolKind::TYPE_PARAMETER,
        }
    }
}

/// A named program entity at a specific source location, with an
/// unbounded tree of children it exclusively owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub location: Location,
    pub container_name: Option<String>,
    pub deprecated: bool,
    pub detail: Option<String>,
    pub children: Vec<IndexedSymbol>,
}

impl IndexedSymbol {
    /// Number of symbols in this subtree, including `self`.
    pub fn count_including_descendants(&self) -> usize {
        1 + self.children.iter().map(Self::count_including_descendants).sum::<usize>()
    }

    /// Depth-first iterator over `self` and all descendants.
    pub fn iter_preorder(&self) -> impl Iterator<Item = &IndexedSymbol> {
        PreorderIter { stack: vec![self] }
    }
}

struct PreorderIter<'a> {
    stack: Vec<&'a IndexedSymbol>,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = &'a IndexedSymbol;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push in reverse so children are visited in original order.
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// One record per indexed file URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSymbols {
    pub uri: Url,
    pub last_indexed_ms: i64,
    pub blob_hash: Option<String>,
    pub symbols: Vec<IndexedSymbol>,
}

impl FileSymbols {
    pub fn total_symbol_count(&self) -> usize {
        self.symbols.iter().map(IndexedSymbol::count_including_descendants).sum()
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &IndexedSymbol> {
        self.symbols.iter().flat_map(|s| s.iter_preorder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario 5: case-insensitive kind parsing.
    #[test]
    fn parse_many_is_case_insensitive() {
        let parsed = SymbolKind::parse_many(&[
            "class".to_string(),
            "INTERFACE".to_string(),
            "Function".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed, vec![SymbolKind::Class, SymbolKind::Interface, SymbolKind::Function]);
    }

    #[test]
    fn parse_many_accepts_every_casing_of_the_same_kind() {
        for spelling in ["Class", "class", "CLASS", "ClAsS"] {
            assert_eq!(spelling.parse::<SymbolKind>().unwrap(), SymbolKind::Class);
        }
    }

    #[test]
    fn unknown_spelling_names_valid_options() {
        let err = "InvalidKind".parse::<SymbolKind>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("InvalidKind"));
        assert!(message.contains("Class"));
    }

    /// Kind discriminants are fixed by the LSP standard and must be
    /// preserved bit-exactly for wire compatibility (`spec.md` §3).
    #[test]
    fn discriminants_match_the_lsp_standard() {
        assert_eq!(SymbolKind::File as u8, 1);
        assert_eq!(SymbolKind::Class as u8, 5);
        assert_eq!(SymbolKind::Function as u8, 12);
        assert_eq!(SymbolKind::TypeParameter as u8, 26);
    }

    #[test]
    fn try_from_rejects_out_of_range_values() {
        assert!(SymbolKind::try_from(0u8).is_err());
        assert!(SymbolKind::try_from(27u8).is_err());
        assert_eq!(SymbolKind::try_from(5u8).unwrap(), SymbolKind::Class);
    }
}
