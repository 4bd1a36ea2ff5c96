//! Source locations attached to every AST node and error.

use std::fmt;
use std::sync::Arc;

/// A span of source text: file plus 1-based start/end line and column.
///
/// A default-constructed location (all zeroes) is invalid and stands for
/// "no location", e.g. on synthesized nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Option<Arc<str>>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceLocation {
    /// Creates a single-position location.
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            file: None,
            start_line: line,
            start_column: column,
            end_line: line,
            end_column: column,
        }
    }

    /// Creates a location spanning from `(start_line, start_column)` to
    /// `(end_line, end_column)` inclusive.
    pub fn span(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            file: None,
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Returns `true` unless this is the "no location" placeholder.
    pub fn is_valid(&self) -> bool {
        self.start_line != 0
    }

    /// Returns the smallest location covering both `self` and `other`.
    ///
    /// An invalid side is ignored so that synthesized sub-expressions do not
    /// poison the span of their parent.
    pub fn extended_to(&self, other: &SourceLocation) -> SourceLocation {
        if !self.is_valid() {
            return other.clone();
        }
        if !other.is_valid() {
            return self.clone();
        }

        let mut merged = self.clone();
        if (other.start_line, other.start_column) < (merged.start_line, merged.start_column) {
            merged.start_line = other.start_line;
            merged.start_column = other.start_column;
        }
        if (other.end_line, other.end_column) > (merged.end_line, merged.end_column) {
            merged.end_line = other.end_line;
            merged.end_column = other.end_column;
        }
        merged
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line != self.end_line {
            write!(
                f,
                "({} -> {},{} -> {})",
                self.start_line, self.end_line, self.start_column, self.end_column
            )
        } else if self.start_column != self.end_column {
            write!(
                f,
                "({},{} -> {})",
                self.start_line, self.start_column, self.end_column
            )
        } else {
            write!(f, "({}, {})", self.start_line, self.start_column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_single_position() {
        assert_eq!(SourceLocation::at(1, 1).to_string(), "(1, 1)");
        assert_eq!(SourceLocation::at(7, 0).to_string(), "(7, 0)");
    }

    #[test]
    fn display_column_span() {
        assert_eq!(SourceLocation::span(1, 1, 1, 4).to_string(), "(1,1 -> 4)");
    }

    #[test]
    fn display_line_span() {
        assert_eq!(
            SourceLocation::span(5, 1, 9, 1).to_string(),
            "(5 -> 9,1 -> 1)"
        );
    }

    #[test]
    fn extend_merges_spans() {
        let a = SourceLocation::span(2, 5, 2, 9);
        let b = SourceLocation::span(2, 1, 3, 4);
        let merged = a.extended_to(&b);
        assert_eq!(merged, SourceLocation::span(2, 1, 3, 4));
    }

    #[test]
    fn extend_ignores_invalid() {
        let a = SourceLocation::span(2, 5, 2, 9);
        assert_eq!(a.extended_to(&SourceLocation::default()), a);
        assert_eq!(SourceLocation::default().extended_to(&a), a);
    }
}
