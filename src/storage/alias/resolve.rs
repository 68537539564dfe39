//! Identifier extraction from workspace URLs.

use crate::models::DocumentId;
use regex::Regex;
use std::sync::LazyLock;

/// Links into the hosted workspace, including published `notion.site` pages.
static WORKSPACE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:[a-z0-9-]+\.)*notion\.(?:so|site)/").unwrap_or_else(|_| unreachable!())
});

/// Maximal runs of hex digits; only runs of exactly 32 are identifiers.
static HEX_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[0-9a-f]+").unwrap_or_else(|_| unreachable!()));

/// The hyphenated `8-4-4-4-12` form.
static HYPHENATED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .unwrap_or_else(|_| unreachable!())
});

/// Returns `true` if `text` looks like a workspace URL.
#[must_use]
pub fn is_workspace_url(text: &str) -> bool {
    WORKSPACE_URL.is_match(text.trim())
}

/// Extracts the document identifier embedded in a workspace URL.
///
/// The identifier is the last run of exactly 32 hex digits in the path
/// (titles are slugged in front of it), else the last hyphenated one. Query and fragment are only consulted when the path holds
/// none.
#[must_use]
pub fn extract_id_from_url(text: &str) -> Option<DocumentId> {
    let text = text.trim();
    if !is_workspace_url(text) {
        return None;
    }

    let path_end = text.find(['?', '#']).unwrap_or(text.len());
    last_embedded_id(&text[..path_end]).or_else(|| last_embedded_id(&text[path_end..]))
}

fn last_embedded_id(text: &str) -> Option<DocumentId> {
    let compact = HEX_RUN
        .find_iter(text)
        .filter(|m| m.len() == 32)
        .filter_map(|m| DocumentId::parse(m.as_str()).ok())
        .last();
    compact.or_else(|| {
        HYPHENATED_ID
            .find_iter(text)
            .filter_map(|m| DocumentId::parse(m.as_str()).ok())
            .last()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const COMPACT: &str = "0123456789abcdef0123456789abcdef";

    #[test_case("https://www.notion.so/Roadmap-0123456789abcdef0123456789abcdef" ; "slugged title")]
    #[test_case("https://www.notion.so/acme/0123456789abcdef0123456789abcdef?pvs=4" ; "workspace with query")]
    #[test_case("https://notion.so/01234567-89ab-cdef-0123-456789abcdef" ; "hyphenated")]
    #[test_case("https://acme.notion.site/Public-Page-0123456789ABCDEF0123456789ABCDEF" ; "published site")]
    #[test_case("  https://www.notion.so/acme?p=0123456789abcdef0123456789abcdef  " ; "peek parameter")]
    #[test_case("https://www.notion.so/Meeting-Notes-20240115-0123456789abcdef0123456789abcdef" ; "date in title")]
    #[test_case("https://www.notion.so/Deadbeef-Cafe-Plan-0123456789abcdef0123456789abcdef" ; "hex words in title")]
    #[test_case("https://www.notion.so/Q3-Plan-Cafebabe-01234567-89ab-cdef-0123-456789abcdef" ; "hex word before hyphenated")]
    #[test_case("https://www.notion.so/Build-abc123def4567-0123456789abcdef0123456789abcdef/" ; "trailing slash")]
    fn test_extracts(url: &str) {
        let id = extract_id_from_url(url).unwrap();
        assert_eq!(id.to_compact(), COMPACT);
    }

    #[test]
    fn test_prefers_path_over_fragment() {
        let url = "https://www.notion.so/Page-0123456789abcdef0123456789abcdef#fedcba9876543210fedcba9876543210";
        assert_eq!(extract_id_from_url(url).unwrap().to_compact(), COMPACT);
    }

    #[test_case("https://example.com/0123456789abcdef0123456789abcdef" ; "foreign host")]
    #[test_case("0123456789abcdef0123456789abcdef" ; "bare id")]
    #[test_case("https://www.notion.so/just-a-title" ; "no id")]
    fn test_rejects(text: &str) {
        assert!(extract_id_from_url(text).is_none());
    }
}
