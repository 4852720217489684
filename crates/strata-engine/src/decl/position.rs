//! Source positions carried by declaration nodes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location of a declaration in its source document
///
/// `start`/`end` are byte offsets; both zero means the offsets are unknown and
/// only the line/column pair should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePosition {
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset past the last character
    pub end: usize,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl SourcePosition {
    /// Position with byte offsets and a line/column pair
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Position with only a line and column
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            start: 0,
            end: 0,
            line,
            column,
        }
    }

    /// Whether byte offsets are available for labelling
    pub fn has_span(&self) -> bool {
        self.end > self.start
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the span covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_detection() {
        assert!(!SourcePosition::at(3, 4).has_span());
        assert!(SourcePosition::new(10, 15, 1, 10).has_span());
        assert_eq!(SourcePosition::new(10, 15, 1, 10).len(), 5);
    }

    #[test]
    fn test_deserialize_partial() {
        let pos: SourcePosition = serde_json::from_str(r#"{"line": 7}"#).unwrap();
        assert_eq!(pos.line, 7);
        assert_eq!(pos.column, 0);
        assert_eq!(pos.to_string(), "7:0");
    }
}
