//! Flat character offset ⇄ (line, column) conversion.
//!
//! Offsets and columns count `char`s (Unicode scalar values), never bytes,
//! so a position can never land inside a multi-byte code point.
//! Lines are 1-based, columns are 0-based.

use serde::{Deserialize, Serialize};

/// A caret location in line/column coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const START: Position = Position { line: 1, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::START
    }
}

/// Number of chars in `content`.
#[inline]
pub fn char_len(content: &str) -> usize {
    content.chars().count()
}

/// Convert a char offset into a line/column position.
///
/// `index` is clamped to `[0, char_len(content)]`, so this never fails.
pub fn index_to_position(content: &str, index: usize) -> Position {
    let mut line = 1u32;
    let mut column = 0u32;

    for ch in content.chars().take(index) {
        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }
    }

    Position { line, column }
}

/// Convert a line/column position back into a char offset.
///
/// Inverse of [`index_to_position`] for every position it can produce.
/// Lines before the first clamp to line 1, lines past the last clamp to the
/// end of the document, and columns past the end of a line clamp to that
/// line's end.
pub fn position_to_index(content: &str, position: Position) -> usize {
    let target_line = position.line.max(1);
    let mut index = 0usize;
    let mut line = 1u32;

    let mut chars = content.chars().peekable();
    while line < target_line {
        match chars.next() {
            Some('\n') => {
                line += 1;
                index += 1;
            }
            Some(_) => index += 1,
            None => return index,
        }
    }

    let mut column = 0u32;
    while column < position.column {
        match chars.peek() {
            Some('\n') | None => break,
            Some(_) => {
                chars.next();
                column += 1;
                index += 1;
            }
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_len(content: &str, line: u32) -> u32 {
        content
            .split('\n')
            .nth((line - 1) as usize)
            .map(|l| l.chars().count() as u32)
            .unwrap_or(0)
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(index_to_position("", 0), Position::new(1, 0));
        assert_eq!(index_to_position("", 10), Position::new(1, 0));
    }

    #[test]
    fn test_single_line() {
        let text = "hello";
        assert_eq!(index_to_position(text, 0), Position::new(1, 0));
        assert_eq!(index_to_position(text, 3), Position::new(1, 3));
        assert_eq!(index_to_position(text, 5), Position::new(1, 5));
    }

    #[test]
    fn test_multi_line() {
        let text = "ab\ncde\n\nf";
        assert_eq!(index_to_position(text, 2), Position::new(1, 2));
        // Right after the newline
        assert_eq!(index_to_position(text, 3), Position::new(2, 0));
        assert_eq!(index_to_position(text, 6), Position::new(2, 3));
        assert_eq!(index_to_position(text, 7), Position::new(3, 0));
        assert_eq!(index_to_position(text, 8), Position::new(4, 0));
        assert_eq!(index_to_position(text, 9), Position::new(4, 1));
    }

    #[test]
    fn test_out_of_range_clamps_to_end() {
        let text = "ab\ncd";
        assert_eq!(index_to_position(text, 999), index_to_position(text, 5));
        assert_eq!(index_to_position(text, 999), Position::new(2, 2));
    }

    #[test]
    fn test_multibyte_counts_chars() {
        let text = "héllo\n日本語";
        assert_eq!(index_to_position(text, 2), Position::new(1, 2));
        assert_eq!(index_to_position(text, 8), Position::new(2, 2));
        assert_eq!(position_to_index(text, Position::new(2, 2)), 8);
    }

    #[test]
    fn test_line_and_column_bounds_hold_for_every_index() {
        let text = "first\n\nthird line\nx\n";
        let len = char_len(text);
        for index in 0..=len + 3 {
            let pos = index_to_position(text, index);
            assert!(pos.line >= 1);
            assert!(pos.column <= line_len(text, pos.line), "index {index} gave {pos:?}");
        }
    }

    #[test]
    fn test_inverse_round_trips() {
        let text = "alpha\nbeta\n\ngamma δ";
        for index in 0..=char_len(text) {
            let pos = index_to_position(text, index);
            assert_eq!(position_to_index(text, pos), index);
            assert_eq!(index_to_position(text, position_to_index(text, pos)), pos);
        }
    }

    #[test]
    fn test_position_to_index_clamps() {
        let text = "ab\ncd";
        assert_eq!(position_to_index(text, Position::new(1, 50)), 2);
        assert_eq!(position_to_index(text, Position::new(9, 0)), 5);
        assert_eq!(position_to_index(text, Position::new(0, 1)), 1);
    }
}
