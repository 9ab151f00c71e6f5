//! Checksum: CRC-32 fingerprint of a summary's text.
//!
//! The server stores the same CRC-32 (IEEE polynomial) next to the summary,
//! so the value must match bit-for-bit. It travels as a JSON number and is
//! displayed as a decimal string, the form the web UI compares.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChecksumParseError {
    #[error("Invalid checksum: {0}")]
    InvalidDecimal(#[from] std::num::ParseIntError),
}

/// CRC-32 of a document's UTF-8 bytes.
///
/// # Examples
/// ```
/// use summary_core::Checksum;
///
/// assert_eq!(Checksum::of(""), Checksum::from(0));
/// assert_eq!(Checksum::of("a").as_u32(), 0xE8B7BE43);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(u32);

impl Checksum {
    /// Compute the checksum of a text.
    pub fn of(text: &str) -> Self {
        Self(crc32fast::hash(text.as_bytes()))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether `text` hashes to this checksum.
    pub fn matches(&self, text: &str) -> bool {
        Self::of(text) == *self
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse::<u32>()?))
    }
}

impl From<u32> for Checksum {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Checksum> for u32 {
    fn from(checksum: Checksum) -> u32 {
        checksum.0
    }
}

impl serde::Serialize for Checksum {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(self.0)
    }
}

// Older servers send the checksum as a decimal string, newer ones as a number.
impl<'de> serde::Deserialize<'de> for Checksum {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(Checksum::of("").as_u32(), 0);
        assert_eq!(Checksum::of("a").as_u32(), 0xE8B7BE43);
        assert_eq!(Checksum::of("123456789").as_u32(), 0xCBF43926);
        assert_eq!(
            Checksum::of("The quick brown fox jumps over the lazy dog").as_u32(),
            0x414FA339
        );
    }

    #[test]
    fn test_repeatable() {
        let text = "## Summary\n\nInitial triage of host WS-042.";
        assert_eq!(Checksum::of(text), Checksum::of(text));
    }

    #[test]
    fn test_single_char_difference() {
        assert_ne!(Checksum::of("case summary"), Checksum::of("case summarz"));
        assert_ne!(Checksum::of("abc"), Checksum::of("abc "));
    }

    #[test]
    fn test_hashes_utf8_bytes() {
        // "é" is two bytes in UTF-8
        assert_eq!(Checksum::of("é"), Checksum::from(crc32fast::hash(&[0xC3, 0xA9])));
    }

    #[test]
    fn test_matches() {
        let checksum = Checksum::of("hello");
        assert!(checksum.matches("hello"));
        assert!(!checksum.matches("hello!"));
    }

    #[test]
    fn test_display_decimal() {
        assert_eq!(Checksum::from(0xE8B7BE43).to_string(), "3904355907");
    }

    #[test]
    fn test_parse_decimal() {
        let parsed: Checksum = "3904355907".parse().unwrap();
        assert_eq!(parsed, Checksum::of("a"));
        assert!("not-a-number".parse::<Checksum>().is_err());
        assert!("4294967296".parse::<Checksum>().is_err()); // u32::MAX + 1
    }

    #[test]
    fn test_serde_number_and_string() {
        let json = serde_json::to_string(&Checksum::of("a")).unwrap();
        assert_eq!(json, "3904355907");

        let from_number: Checksum = serde_json::from_str("3904355907").unwrap();
        let from_string: Checksum = serde_json::from_str("\"3904355907\"").unwrap();
        assert_eq!(from_number, from_string);
    }
}
