//! Human-presentable confirmation codes.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Alphabet without visually ambiguous characters (0/O, 1/I/L).
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of a generated code.
const CODE_LEN: usize = 6;

/// Code a buyer presents at pickup to prove ownership of a reservation.
///
/// Codes are short, uppercase, and drawn from an alphabet without
/// look-alike characters so they survive being read over a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationCode(String);

impl ConfirmationCode {
    /// Generates a new random code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Wraps an existing code, normalizing case.
    pub fn from_string(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case- and whitespace-insensitive comparison against user input.
    pub fn matches(&self, presented: &str) -> bool {
        self.0 == presented.trim().to_uppercase()
    }
}

impl std::fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ConfirmationCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_the_safe_alphabet() {
        let code = ConfirmationCode::generate();
        assert_eq!(code.as_str().len(), CODE_LEN);
        assert!(
            code.as_str()
                .bytes()
                .all(|b| ALPHABET.contains(&b))
        );
    }

    #[test]
    fn matches_is_case_and_whitespace_insensitive() {
        let code = ConfirmationCode::from_string("ABC234");
        assert!(code.matches("abc234"));
        assert!(code.matches("  ABC234 "));
        assert!(!code.matches("ABC235"));
    }

    #[test]
    fn from_string_normalizes() {
        let code = ConfirmationCode::from_string(" xyz789 ");
        assert_eq!(code.as_str(), "XYZ789");
    }

    #[test]
    fn serialization_roundtrip() {
        let code = ConfirmationCode::generate();
        let json = serde_json::to_string(&code).unwrap();
        let back: ConfirmationCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, back);
    }
}
