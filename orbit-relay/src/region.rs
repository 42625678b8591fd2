//! Coarse, privacy-preserving identity for a connection.
//!
//! The edge layer in front of the relay attaches a two-letter country hint
//! to the upgrade request. The hint is untrusted: anything that is not
//! exactly two ASCII uppercase letters degrades to [`RegionTag::Unknown`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel rendered for connections without a usable hint.
pub const UNKNOWN_REGION: &str = "UNKNOWN";

/// A validated region code or the `UNKNOWN` sentinel.
///
/// Serialized as a plain JSON string (`"DE"`, `"UNKNOWN"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RegionTag {
    Code([u8; 2]),
    #[default]
    Unknown,
}

impl RegionTag {
    pub fn as_str(&self) -> &str {
        match self {
            // Both bytes are ASCII uppercase, checked on construction.
            RegionTag::Code(bytes) => std::str::from_utf8(bytes).unwrap_or(UNKNOWN_REGION),
            RegionTag::Unknown => UNKNOWN_REGION,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, RegionTag::Code(_))
    }

    fn parse_code(raw: &str) -> Option<Self> {
        match raw.as_bytes() {
            [a, b] if a.is_ascii_uppercase() && b.is_ascii_uppercase() => {
                Some(RegionTag::Code([*a, *b]))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RegionTag> for String {
    fn from(tag: RegionTag) -> Self {
        tag.as_str().to_string()
    }
}

/// Error for a stored tag that is neither a code nor the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid region tag: {0:?}")]
pub struct InvalidRegionTag(pub String);

impl TryFrom<String> for RegionTag {
    type Error = InvalidRegionTag;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw == UNKNOWN_REGION {
            return Ok(RegionTag::Unknown);
        }
        RegionTag::parse_code(&raw).ok_or(InvalidRegionTag(raw))
    }
}

/// Resolve the raw country hint of an incoming request.
///
/// Pure and infallible: absent, empty, wrong-length, lowercase or
/// non-alphabetic hints all become [`RegionTag::Unknown`].
pub fn resolve_region(hint: Option<&str>) -> RegionTag {
    hint.and_then(RegionTag::parse_code)
        .unwrap_or(RegionTag::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_codes_pass_through() {
        for code in ["US", "DE", "JP", "ZZ", "AQ"] {
            let tag = resolve_region(Some(code));
            assert!(tag.is_known());
            assert_eq!(tag.as_str(), code);
        }
    }

    #[test]
    fn test_absent_hint_is_unknown() {
        assert_eq!(resolve_region(None), RegionTag::Unknown);
        assert_eq!(resolve_region(Some("")), RegionTag::Unknown);
    }

    #[test]
    fn test_malformed_hints_are_unknown() {
        for raw in ["us", "Us", "uS", "U", "USA", "U1", "12", " US", "US ", "T1", "ÄB", "XX\n"] {
            assert_eq!(resolve_region(Some(raw)), RegionTag::Unknown, "hint {raw:?}");
        }
    }

    #[test]
    fn test_sentinel_is_not_a_code() {
        // "UNKNOWN" itself as a hint is seven letters long
        assert_eq!(resolve_region(Some(UNKNOWN_REGION)), RegionTag::Unknown);
        assert!(!RegionTag::Unknown.is_known());
    }

    #[test]
    fn test_serializes_as_string() {
        assert_eq!(serde_json::to_string(&RegionTag::Code(*b"FR")).unwrap(), "\"FR\"");
        assert_eq!(serde_json::to_string(&RegionTag::Unknown).unwrap(), "\"UNKNOWN\"");
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let tag: RegionTag = serde_json::from_str("\"NL\"").unwrap();
        assert_eq!(tag, RegionTag::Code(*b"NL"));
        let tag: RegionTag = serde_json::from_str("\"UNKNOWN\"").unwrap();
        assert_eq!(tag, RegionTag::Unknown);
        assert!(serde_json::from_str::<RegionTag>("\"nl\"").is_err());
        assert!(serde_json::from_str::<RegionTag>("42").is_err());
    }
}
