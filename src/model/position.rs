//! Zero-based positions, ranges and file locations.

use serde::{Deserialize, Serialize};
use url::Url;

/// A zero-based `(line, character)` pair, UTF-16 code units per the LSP convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl From<lsp_types::Position> for Position {
    fn from(p: lsp_types::Position) -> Self {
        Self { line: p.line, character: p.character }
    }
}

impl From<Position> for lsp_types::Position {
    fn from(p: Position) -> Self {
        lsp_types::Position { line: p.line, character: p.character }
    }
}

/// Inclusive-start, exclusive-end span of positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Advance `start` to `new_start`, keeping `end` fixed.
    ///
    /// Used by the doc-comment position correction in the symbol provider.
    pub fn with_start(mut self, new_start: Position) -> Self {
        self.start = new_start;
        self
    }
}

impl From<lsp_types::Range> for Range {
    fn from(r: lsp_types::Range) -> Self {
        Self { start: r.start.into(), end: r.end.into() }
    }
}

impl From<Range> for lsp_types::Range {
    fn from(r: Range) -> Self {
        lsp_types::Range { start: r.start.into(), end: r.end.into() }
    }
}

/// A file URI paired with a range within that file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    #[serde(with = "url_serde")]
    pub uri: Url,
    pub range: Range,
}

impl Location {
    pub fn new(uri: Url, range: Range) -> Self {
        Self { uri, range }
    }
}

/// `url::Url` already implements Serialize/Deserialize via the `serde` feature;
/// this module exists only so the field attribute above reads self-documenting.
mod url_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use url::Url;

    pub fn serialize<S: Serializer>(url: &Url, s: S) -> Result<S::Ok, S::Error> {
        Serialize::serialize(url.as_str(), s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Url, D::Error> {
        let s = String::deserialize(d)?;
        Url::parse(&s).map_err(serde::de::Error::custom)
    }

    use serde::Serialize;
}
