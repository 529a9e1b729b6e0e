//! Per-language doc-comment position correction (`spec.md` §4.2).
//!
//! Some LSP servers report a symbol's range (and selection range)
//! starting at a preceding documentation comment line rather than the
//! executable declaration. This module advances the start position past
//! contiguous comment lines, driven by a small per-`language_id` table
//! of line predicates rather than a single hardcoded rule, so additional
//! languages register a predicate without touching the walk itself.

use crate::model::position::{Position, Range};

type CommentLinePredicate = fn(&str) -> bool;

fn predicate_for(language_id: &str) -> Option<CommentLinePredicate> {
    match language_id {
        "rust" => Some(|line: &str| {
            let trimmed = line.trim_start();
            trimmed.starts_with("///") || trimmed.starts_with("//!")
        }),
        "typescript" | "javascript" | "typescriptreact" | "javascriptreact" | "java" | "c" | "cpp" => {
            Some(|line: &str| {
                let trimmed = line.trim_start();
                trimmed.starts_with("///") || trimmed.starts_with("/**") || trimmed.starts_with('*')
            })
        }
        "python" => Some(|line: &str| {
            let trimmed = line.trim();
            trimmed.starts_with("\"\"\"") || trimmed.starts_with("'''") || trimmed.starts_with('#')
        }),
        _ => None,
    }
}

/// Advances `range.start` past any contiguous comment lines in
/// `source_text` that immediately precede it, leaving `range.end`
/// untouched. A no-op when the language has no registered predicate or
/// `source_text` is unavailable (e.g. the cache path, which never has
/// source text at hand).
pub fn advance_past_doc_comments(range: Range, language_id: &str, source_text: Option<&str>) -> Range {
    let (Some(predicate), Some(text)) = (predicate_for(language_id), source_text) else {
        return range;
    };

    let lines: Vec<&str> = text.lines().collect();
    let mut line_idx = range.start.line as usize;

    while line_idx < lines.len() && predicate(lines[line_idx]) {
        line_idx += 1;
    }

    if line_idx == range.start.line as usize || line_idx >= lines.len() {
        return range;
    }

    range.with_start(Position::new(line_idx as u32, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn advances_past_rust_doc_comments() {
        let source = indoc! {"
            /// Adds two numbers.
            /// Returns their sum.
            fn add(a: i32, b: i32) -> i32 {
        "};
        let range = Range::new(Position::new(0, 0), Position::new(2, 1));
        let corrected = advance_past_doc_comments(range, "rust", Some(source));
        assert_eq!(corrected.start, Position::new(2, 0));
        assert_eq!(corrected.end, range.end);
    }

    #[test]
    fn unknown_language_is_a_no_op() {
        let source = indoc! {"
            # comment
            fn add() {}
        "};
        let range = Range::new(Position::new(0, 0), Position::new(1, 1));
        let corrected = advance_past_doc_comments(range, "rholang", Some(source));
        assert_eq!(corrected, range);
    }

    #[test]
    fn no_source_text_is_a_no_op() {
        let range = Range::new(Position::new(0, 0), Position::new(1, 1));
        let corrected = advance_past_doc_comments(range, "rust", None);
        assert_eq!(corrected, range);
    }
}
