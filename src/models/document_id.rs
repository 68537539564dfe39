//! Normalized 128-bit document identifiers.
//!
//! The remote workspace hands out identifiers in two textual shapes: the
//! compact 32 hex character form and the `8-4-4-4-12` hyphenated form, in
//! any letter case. Both normalize to the same [`DocumentId`].
//!
//! # Examples
//!
//! ```
//! use blockcache::DocumentId;
//!
//! let a = DocumentId::parse("0123456789ABCDEF0123456789ABCDEF")?;
//! let b = DocumentId::parse("01234567-89ab-cdef-0123-456789abcdef")?;
//! assert_eq!(a, b);
//! assert_eq!(a.to_hyphenated(), "01234567-89ab-cdef-0123-456789abcdef");
//! # Ok::<(), blockcache::Error>(())
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the compact identifier form.
pub const COMPACT_LEN: usize = 32;

/// A normalized document identifier.
///
/// Stored as 128 bits, so two identifiers built from differently formatted
/// strings compare and hash equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Parses an identifier, ignoring `-` separators and letter case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] unless the input normalizes to
    /// exactly 32 hex characters.
    pub fn parse(raw: &str) -> Result<Self> {
        normalize(raw)
            .and_then(|compact| Uuid::try_parse(&compact).ok())
            .map(Self)
            .ok_or_else(|| Error::InvalidIdentifier {
                raw: raw.to_string(),
            })
    }

    /// Returns `true` if `raw` would parse as an identifier.
    #[must_use]
    pub fn is_valid(raw: &str) -> bool {
        normalize(raw).is_some()
    }

    /// Returns the 32 character lowercase form without separators.
    #[must_use]
    pub fn to_compact(&self) -> String {
        self.0.simple().to_string()
    }

    /// Returns the `8-4-4-4-12` grouped form.
    #[must_use]
    pub fn to_hyphenated(&self) -> String {
        let compact = self.to_compact();
        format!(
            "{}-{}-{}-{}-{}",
            &compact[0..8],
            &compact[8..12],
            &compact[12..16],
            &compact[16..20],
            &compact[20..32]
        )
    }

    /// Generates a random identifier.
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Strips separators, lowercases and checks for exactly 32 hex characters.
fn normalize(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    (compact.len() == COMPACT_LEN && compact.bytes().all(|b| b.is_ascii_hexdigit()))
        .then_some(compact)
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for DocumentId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.to_compact()
    }
}

impl PartialEq<str> for DocumentId {
    fn eq(&self, other: &str) -> bool {
        Self::parse(other).is_ok_and(|parsed| parsed == *self)
    }
}

impl PartialEq<&str> for DocumentId {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<String> for DocumentId {
    fn eq(&self, other: &String) -> bool {
        self == other.as_str()
    }
}
