//! Human-typed session join codes.
//!
//! Six characters from an alphabet without the glyphs people confuse when
//! reading a code off another screen (no 0/O, no 1/I).

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const JOIN_CODE_LEN: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinCodeError {
    #[error("Join code must be 6 characters, got {0}")]
    WrongLength(usize),

    #[error("Join code contains invalid character {0:?}")]
    InvalidCharacter(char),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JoinCode(String);

impl JoinCode {
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        let code = (0..JOIN_CODE_LEN)
            .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Accepts what a person typed: surrounding whitespace is trimmed and
    /// lowercase letters are uppercased before validation.
    pub fn parse(input: &str) -> Result<Self, JoinCodeError> {
        let normalized = input.trim().to_ascii_uppercase();
        let len = normalized.chars().count();
        if len != JOIN_CODE_LEN {
            return Err(JoinCodeError::WrongLength(len));
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !c.is_ascii() || !JOIN_CODE_ALPHABET.contains(&(*c as u8)))
        {
            return Err(JoinCodeError::InvalidCharacter(bad));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JoinCode {
    type Err = JoinCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JoinCode {
    type Error = JoinCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JoinCode> for String {
    fn from(code: JoinCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_avoid_ambiguous_glyphs() {
        for _ in 0..10_000 {
            let code = JoinCode::generate();
            assert_eq!(code.as_str().len(), JOIN_CODE_LEN);
            assert!(
                !code.as_str().contains(['0', 'O', '1', 'I']),
                "ambiguous code {}",
                code
            );
            assert_eq!(JoinCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn test_parse_normalizes_typed_input() {
        assert_eq!(JoinCode::parse("  abc234 ").unwrap().as_str(), "ABC234");
    }

    #[test]
    fn test_parse_rejects_bad_codes() {
        assert_eq!(JoinCode::parse("ABC23"), Err(JoinCodeError::WrongLength(5)));
        assert_eq!(JoinCode::parse("ABC2345"), Err(JoinCodeError::WrongLength(7)));
        assert_eq!(JoinCode::parse("ABCD0E"), Err(JoinCodeError::InvalidCharacter('0')));
        assert_eq!(JoinCode::parse("ABCDIE"), Err(JoinCodeError::InvalidCharacter('I')));
        assert_eq!(JoinCode::parse("ABCDÉE"), Err(JoinCodeError::InvalidCharacter('É')));
    }

    #[test]
    fn test_serde_validates() {
        let json = serde_json::to_string(&JoinCode::parse("HJK789").unwrap()).unwrap();
        assert_eq!(json, "\"HJK789\"");
        assert!(serde_json::from_str::<JoinCode>("\"HJK780\"").is_err());
    }
}
