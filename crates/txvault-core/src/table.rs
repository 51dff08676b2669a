//! Validated SQL identifiers.
//!
//! Tenant table names come from tracking settings and end up spliced into DDL
//! and DML. [`TableName`] can only be built through [`TableName::parse`], so any
//! statement builder taking one never sees an unchecked name.

use std::fmt;

/// A table name matching `^[A-Za-z_][A-Za-z0-9_]*$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Maximum identifier length accepted by PostgreSQL.
    pub const MAX_LEN: usize = 63;

    /// Validate a table name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] if the name is empty, too long, starts with a
    /// digit, or contains anything but ASCII letters, digits and underscores.
    pub fn parse(name: &str) -> Result<Self, IdentifierError> {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(IdentifierError::new(name));
        };

        let valid = (first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && name.len() <= Self::MAX_LEN;

        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(IdentifierError::new(name))
        }
    }

    /// The raw name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a double-quoted SQL identifier.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned for names that are not plain SQL identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid table name: {name:?}")]
pub struct IdentifierError {
    /// The rejected input.
    pub name: String,
}

impl IdentifierError {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}
