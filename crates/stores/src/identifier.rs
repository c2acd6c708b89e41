//! Identifiers shared by the two stores.
//!
//! A `ContentIdentifier` is whatever the content store hands back for a blob.
//! We never compute one ourselves; caller-supplied strings must be a CID in
//! its exact encoding before they are sent anywhere. Because a CID's length is
//! fixed by its own header, no valid identifier is a strict prefix of another,
//! which is what makes prefix listing by identifier exact.
//!
//! An `ObjectKey` is the identifier with the caller's media-type hint glued on
//! the end. It is never stored on its own, only re-derived.

use cid::multibase::{self, Base};
use cid::{Cid, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque content identifier (CID) produced by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentIdentifier(String);

/// Errors from parsing caller-supplied identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("content identifier is empty")]
    Empty,

    #[error("content identifier contains invalid character {0:?}")]
    InvalidChar(char),

    #[error("not a content identifier: {0}")]
    Malformed(String),
}

impl ContentIdentifier {
    /// Validate a string as an identifier.
    ///
    /// Accepts a CIDv0 (`Qm...`) or a multibase CIDv1, and only in the exact
    /// encoding the CID re-encodes to: truncated input and trailing
    /// characters are both rejected.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let Some(first) = s.chars().next() else {
            return Err(IdentifierError::Empty);
        };
        if let Some(c) = s.chars().find(|c| c.is_whitespace() || *c == '/' || c.is_control()) {
            return Err(IdentifierError::InvalidChar(c));
        }

        let malformed = |e: &dyn fmt::Display| IdentifierError::Malformed(format!("{s:?}: {e}"));
        let cid = s.parse::<Cid>().map_err(|e| malformed(&e))?;
        let canonical = match cid.version() {
            Version::V0 => cid.to_string(),
            Version::V1 => {
                let base = Base::from_code(first).map_err(|e| malformed(&e))?;
                cid.to_string_of_base(base).map_err(|e| malformed(&e))?
            }
        };
        if canonical != s {
            return Err(malformed(&"trailing or non-canonical characters"));
        }

        Ok(Self(s.to_string()))
    }

    /// CIDv1 (raw codec, base32) over a BLAKE3 digest.
    pub(crate) fn raw_blake3(digest: &[u8; 32]) -> Self {
        const CID_V1: u8 = 0x01;
        const RAW: u8 = 0x55;
        const BLAKE3: u8 = 0x1e;

        let mut bytes = Vec::with_capacity(4 + digest.len());
        bytes.extend_from_slice(&[CID_V1, RAW, BLAKE3, digest.len() as u8]);
        bytes.extend_from_slice(digest);
        Self(multibase::encode(Base::Base32Lower, bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ContentIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What the content store knows about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub identifier: ContentIdentifier,

    /// Logical name, as echoed back by `add`. Lookups by identifier don't
    /// carry one.
    pub name: Option<String>,

    /// Size in bytes as reported by the content store.
    pub size: u64,
}

impl ContentRecord {
    pub fn new(identifier: ContentIdentifier, size: u64) -> Self {
        Self {
            identifier,
            name: None,
            size,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Key of an object in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Wrap a key read back from the object store.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Object-store key for a blob: identifier followed directly by the media-type
/// hint. No separator and no collision handling, so two uploads of the same
/// bytes with the same hint share a key.
pub fn derive_key(id: &ContentIdentifier, mime_hint: &str) -> ObjectKey {
    ObjectKey(format!("{}{}", id.as_str(), mime_hint))
}
