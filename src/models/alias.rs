//! Integer aliases and mixed identifier inputs.

use super::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Small integer standing in for a [`DocumentId`] in agent-facing text.
///
/// Assigned once per identifier and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alias(u32);

impl Alias {
    /// Wraps a raw alias number.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw alias number.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Parses an alias from its decimal form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<u32>().ok().map(Self)
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Alias {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Alias> for u32 {
    fn from(alias: Alias) -> Self {
        alias.0
    }
}

impl From<Alias> for i64 {
    fn from(alias: Alias) -> Self {
        Self::from(alias.0)
    }
}

/// Anything an agent may hand us to name a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierInput {
    /// An already parsed identifier.
    Id(DocumentId),
    /// An alias number.
    Alias(Alias),
    /// Raw text: a URL, a compact or hyphenated identifier, or an alias.
    Text(String),
}

impl fmt::Display for IdentifierInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Alias(alias) => write!(f, "{alias}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<DocumentId> for IdentifierInput {
    fn from(id: DocumentId) -> Self {
        Self::Id(id)
    }
}

impl From<Alias> for IdentifierInput {
    fn from(alias: Alias) -> Self {
        Self::Alias(alias)
    }
}

impl From<u32> for IdentifierInput {
    fn from(value: u32) -> Self {
        Self::Alias(Alias(value))
    }
}

impl From<&str> for IdentifierInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for IdentifierInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// One row of the alias index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// The alias.
    pub alias: Alias,
    /// The identifier it stands for.
    pub id: DocumentId,
    /// Display name, empty until a caption is known.
    pub name: String,
    /// Number of recorded visits.
    pub visit_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_parse() {
        assert_eq!(Alias::parse("7"), Some(Alias::new(7)));
        assert_eq!(Alias::parse(" 12 "), Some(Alias::new(12)));
        assert_eq!(Alias::parse("-1"), None);
        assert_eq!(Alias::parse("seven"), None);
    }

    #[test]
    fn test_alias_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Alias::new(3)).unwrap(), "3");
    }

    #[test]
    fn test_input_conversions() {
        assert_eq!(IdentifierInput::from(4u32), IdentifierInput::Alias(Alias::new(4)));
        assert_eq!(
            IdentifierInput::from("abc"),
            IdentifierInput::Text("abc".to_string())
        );
    }
}
