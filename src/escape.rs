//! Type-safe SQL escaping.
//!
//! Wrapper types that guarantee a value was escaped at construction time,
//! for the few places where SQL has to be assembled from strings (dynamic
//! database names, schema names in catalog queries). Everything else goes
//! through bound parameters.

use postgres_protocol::escape::{escape_identifier, escape_literal};
use std::fmt;

/// An identifier (database, schema, table name) escaped with
/// `quote_ident` rules: double-quoted, embedded quotes doubled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EscapedIdentifier(String);

impl EscapedIdentifier {
    pub fn new(raw: &str) -> Self {
        Self(escape_identifier(raw))
    }

    /// Safe to interpolate directly into SQL.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EscapedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A string literal escaped with `quote_literal` rules: single-quoted,
/// embedded quotes doubled, `E''` form when backslashes are present.
pub fn literal(raw: &str) -> String {
    escape_literal(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_quoted() {
        assert_eq!(EscapedIdentifier::new("shadow_db").as_str(), "\"shadow_db\"");
        assert_eq!(EscapedIdentifier::new("odd\"name").as_str(), "\"odd\"\"name\"");
    }

    #[test]
    fn literal_is_quoted() {
        assert_eq!(literal("plain"), "'plain'");
        assert_eq!(literal("it's"), "'it''s'");
    }
}
