use std::fmt::Display;

use sha2::{Digest, Sha256};
use thiserror::Error;


#[derive(Error, Debug)]
#[error("failed to parse fingerprint from string: expected 64 lowercase hex characters")]
pub struct InvalidFingerprintError;


/// SHA-256 fingerprint of a migration bundle.
///
/// The digest input is the fully include-expanded `up.sql` contents,
/// a single `0x1F` separator byte, and the `down.sql` contents, in that
/// order. Whitespace and comments are part of the input; scripts are
/// never normalised before hashing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    data: [u8; 32],
}

/// Separator between the up and down script bytes in the digest input.
const SCRIPT_SEPARATOR: u8 = 0x1F;

impl Fingerprint {
    /// Calculate the fingerprint of a bundle's scripts.
    pub fn calculate(expanded_up_script: &str, down_script: &str) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(expanded_up_script.as_bytes());
        hasher.update([SCRIPT_SEPARATOR]);
        hasher.update(down_script.as_bytes());

        Self {
            data: hasher.finalize().into(),
        }
    }

    /// Parse a fingerprint from its lowercase hex encoding
    /// (the format stored in the `checksum` column).
    pub fn parse_from_hex(hex_string: &str) -> Result<Self, InvalidFingerprintError> {
        if hex_string.len() != 64 || !hex_string.is_ascii() {
            return Err(InvalidFingerprintError);
        }

        let mut data = [0u8; 32];

        for (index, byte) in data.iter_mut().enumerate() {
            let pair = &hex_string[index * 2..index * 2 + 2];

            if pair.chars().any(|character| character.is_ascii_uppercase()) {
                return Err(InvalidFingerprintError);
            }

            *byte = u8::from_str_radix(pair, 16).map_err(|_| InvalidFingerprintError)?;
        }

        Ok(Self { data })
    }

    /// Hex-encode the fingerprint (lowercase), as stored in `schema_migrations.checksum`.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.data {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}



#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let first = Fingerprint::calculate("CREATE TABLE products (id bigint);", "DROP TABLE products;");
        let second = Fingerprint::calculate("CREATE TABLE products (id bigint);", "DROP TABLE products;");

        assert_eq!(first, second);
    }

    #[test]
    fn fingerprint_depends_on_both_scripts() {
        let base = Fingerprint::calculate("SELECT 1;", "SELECT 2;");

        assert_ne!(base, Fingerprint::calculate("SELECT 1;", "SELECT 3;"));
        assert_ne!(base, Fingerprint::calculate("SELECT 0;", "SELECT 2;"));
    }

    #[test]
    fn separator_distinguishes_script_boundaries() {
        // Moving bytes across the up/down boundary must change the digest.
        let first = Fingerprint::calculate("ab", "c");
        let second = Fingerprint::calculate("a", "bc");

        assert_ne!(first, second);
    }

    #[test]
    fn hex_encoding_is_lowercase_and_round_trips() {
        let fingerprint = Fingerprint::calculate("SELECT 1;", "");
        let hex = fingerprint.to_hex();

        assert_eq!(hex.len(), 64);
        assert!(hex
            .chars()
            .all(|character| character.is_ascii_digit() || character.is_ascii_lowercase()));

        assert_eq!(
            Fingerprint::parse_from_hex(&hex).unwrap(),
            fingerprint
        );
    }

    #[test]
    fn uppercase_and_malformed_hex_are_rejected() {
        let hex = Fingerprint::calculate("SELECT 1;", "").to_hex();

        assert!(Fingerprint::parse_from_hex(&hex.to_ascii_uppercase()).is_err());
        assert!(Fingerprint::parse_from_hex("abc123").is_err());
        assert!(Fingerprint::parse_from_hex(&"zz".repeat(32)).is_err());
    }
}
