use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::limits::{CODE_ALPHABET, CODE_LEN};

/// Passenger-facing reservation code: 8 characters from {A–Z, 0–9}, drawn
/// from the OS CSPRNG so codes are not guessable or enumerable. Generated
/// server-side only, never client-supplied. Once a code is claimed it stays
/// claimed forever, cancelled reservations included.
///
/// Uniqueness is not this type's job: `generate` produces a candidate, and
/// the engine claims it against the global code index before committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationCode([u8; CODE_LEN]);

impl ReservationCode {
    /// Draw a fresh candidate code.
    pub fn generate() -> Self {
        let mut buf = [0u8; CODE_LEN];
        for b in &mut buf {
            *b = CODE_ALPHABET[OsRng.gen_range(0..CODE_ALPHABET.len())];
        }
        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        // The alphabet is pure ASCII.
        std::str::from_utf8(&self.0).expect("code bytes are ASCII")
    }
}

impl fmt::Display for ReservationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string that is not 8 chars of A–Z/0–9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidCode;

impl fmt::Display for InvalidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reservation codes are {CODE_LEN} chars of A-Z and 0-9")
    }
}

impl std::error::Error for InvalidCode {}

impl FromStr for ReservationCode {
    type Err = InvalidCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != CODE_LEN {
            return Err(InvalidCode);
        }
        let mut buf = [0u8; CODE_LEN];
        for (i, &b) in bytes.iter().enumerate() {
            if !CODE_ALPHABET.contains(&b) {
                return Err(InvalidCode);
            }
            buf[i] = b;
        }
        Ok(Self(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_codes_match_alphabet() {
        for _ in 0..50 {
            let code = ReservationCode::generate();
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(
                code.as_str()
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
            );
        }
    }

    #[test]
    fn generated_codes_vary() {
        // 36^8 code space — 100 draws colliding would mean a broken RNG.
        let codes: HashSet<ReservationCode> =
            (0..100).map(|_| ReservationCode::generate()).collect();
        assert_eq!(codes.len(), 100);
    }

    #[test]
    fn parse_roundtrip() {
        let code = ReservationCode::generate();
        let parsed: ReservationCode = code.as_str().parse().unwrap();
        assert_eq!(parsed, code);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("ABC".parse::<ReservationCode>().is_err()); // too short
        assert!("ABCDEFGHI".parse::<ReservationCode>().is_err()); // too long
        assert!("abcd1234".parse::<ReservationCode>().is_err()); // lowercase
        assert!("ABCD-234".parse::<ReservationCode>().is_err()); // punctuation
        assert!("ABCD1234".parse::<ReservationCode>().is_ok());
    }

    #[test]
    fn serde_roundtrip() {
        let code = ReservationCode::generate();
        let bytes = bincode::serialize(&code).unwrap();
        let decoded: ReservationCode = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, code);
    }
}
