//! Wire-compatible data model: positions, ranges, locations, symbols.

pub mod position;
pub mod query;
pub mod symbol;

pub use position::{Location, Position, Range};
pub use query::SymbolQuery;
pub use symbol::{FileSymbols, IndexedSymbol, SymbolKind};
