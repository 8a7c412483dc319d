//! Validated identifiers and page index types.
//!
//! Gate, OCR and merge work in 0-based [`PageIdx`]; the rasterizer and the
//! block ledger use 1-based [`PageNo`]. The two never convert implicitly.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::is_sha256_hex;

static RUN_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$").expect("static regex")
});

static DOC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^doc-[a-f0-9]{24}$").expect("static regex"));

/// Length of the raw-hash prefix embedded in a doc id.
pub const DOC_ID_HASH_LEN: usize = 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid run id: {0:?}")]
    InvalidRunId(String),
    #[error("invalid doc id: {0:?}")]
    InvalidDocId(String),
    #[error("invalid sha256 digest: {0:?}")]
    InvalidSha256(String),
}

/// Identity of one logical ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        let trimmed = value.trim();
        if trimmed == "." || trimmed == ".." || !RUN_ID_RE.is_match(trimmed) {
            return Err(IdError::InvalidRunId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Content-derived document identity: `doc-` plus the first 24 hex of the raw sha.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocId(String);

impl DocId {
    pub fn from_raw_sha(raw_sha: &Sha256Hex) -> Self {
        Self(format!("doc-{}", &raw_sha.as_str()[..DOC_ID_HASH_LEN]))
    }

    pub fn parse(value: &str) -> Result<Self, IdError> {
        if !DOC_ID_RE.is_match(value) {
            return Err(IdError::InvalidDocId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A lowercase 64-character hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hex(String);

impl Sha256Hex {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        if !is_sha256_hex(value) {
            return Err(IdError::InvalidSha256(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Hash bytes and wrap the digest.
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        Self(crate::hashing::sha256_hex(data))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_newtype_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype_impls!(RunId);
string_newtype_impls!(DocId);
string_newtype_impls!(Sha256Hex);

/// 0-based page index used by the gate, OCR and merge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PageIdx(u32);

/// 1-based page number used by the rasterizer and the block ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageNo(u32);

impl PageIdx {
    pub const fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn to_page_no(self) -> PageNo {
        PageNo(self.0 + 1)
    }
}

impl PageNo {
    /// Returns `None` for 0, which is not a valid page number.
    pub const fn new(number: u32) -> Option<Self> {
        if number == 0 {
            None
        } else {
            Some(Self(number))
        }
    }

    /// Clamp an arbitrary integer to a valid page number (minimum 1).
    pub fn clamped(number: i64) -> Self {
        Self(number.clamp(1, i64::from(u32::MAX)) as u32)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn to_page_idx(self) -> PageIdx {
        PageIdx(self.0.saturating_sub(1))
    }
}

impl fmt::Display for PageIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_validation() {
        assert!(RunId::parse("run-1").is_ok());
        assert!(RunId::parse("wf:2024.01_a").is_ok());
        assert!(RunId::parse(".").is_err());
        assert!(RunId::parse("..").is_err());
        assert!(RunId::parse("a/b").is_err());
        assert!(RunId::parse("-leading").is_err());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse(&"a".repeat(129)).is_err());
        assert!(RunId::parse(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_doc_id_from_sha() {
        let sha = Sha256Hex::digest(b"hello");
        let doc = DocId::from_raw_sha(&sha);
        assert_eq!(doc.as_str().len(), 4 + DOC_ID_HASH_LEN);
        assert!(doc.as_str().starts_with("doc-"));
        assert_eq!(DocId::parse(doc.as_str()).unwrap(), doc);
        assert!(DocId::parse("doc-XYZ").is_err());
    }

    #[test]
    fn test_sha_rejects_uppercase() {
        let upper = Sha256Hex::digest(b"x").as_str().to_uppercase();
        assert!(Sha256Hex::parse(&upper).is_err());
    }

    #[test]
    fn test_page_conversions() {
        assert_eq!(PageIdx::new(0).to_page_no().get(), 1);
        assert_eq!(PageIdx::new(4).to_page_no().to_page_idx(), PageIdx::new(4));
        assert!(PageNo::new(0).is_none());
        assert_eq!(PageNo::clamped(-3).get(), 1);
        assert_eq!(PageNo::clamped(7).to_page_idx().get(), 6);
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let bad: Result<RunId, _> = serde_json::from_str("\"..\"");
        assert!(bad.is_err());
        let good: RunId = serde_json::from_str("\"r1\"").unwrap();
        assert_eq!(good.as_str(), "r1");
    }
}
