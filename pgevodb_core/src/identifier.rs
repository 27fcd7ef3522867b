use std::fmt::Display;

use serde::Deserialize;
use thiserror::Error;


#[derive(Error, Debug)]
pub enum InvalidMigrationIdError {
    #[error("migration id must not be empty")]
    Empty,

    #[error(
        "migration id \"{}\" contains a path separator",
        .id
    )]
    ContainsPathSeparator { id: String },
}


/// Identifies a single migration bundle.
///
/// The id is the name of the bundle's directory on disk; lexicographic
/// ordering of ids defines the order in which migrations apply
/// (the `YYYY-MM-DDTHH-MM-SS__slug` convention sorts chronologically).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct MigrationId(String);

impl MigrationId {
    pub fn parse_from_str(id: &str) -> Result<Self, InvalidMigrationIdError> {
        if id.is_empty() {
            return Err(InvalidMigrationIdError::Empty);
        }

        if id.contains('/') || id.contains('\\') {
            return Err(InvalidMigrationIdError::ContainsPathSeparator { id: id.to_string() });
        }

        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MigrationId {
    type Error = InvalidMigrationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_from_str(&value)
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for MigrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}



#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_order_lexicographically() {
        let earlier = MigrationId::parse_from_str("2025-01-01T10-00-00__create_products").unwrap();
        let later = MigrationId::parse_from_str("2025-02-11T08-30-00__add_orders").unwrap();

        assert!(earlier < later);
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(matches!(
            MigrationId::parse_from_str(""),
            Err(InvalidMigrationIdError::Empty)
        ));
    }

    #[test]
    fn id_with_path_separator_is_rejected() {
        assert!(matches!(
            MigrationId::parse_from_str("2025-01-01T10-00-00__a/b"),
            Err(InvalidMigrationIdError::ContainsPathSeparator { .. })
        ));
    }
}
