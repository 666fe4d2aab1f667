//! Work Item Identifiers
//!
//! Three formats are recognized:
//! - date-based: `DDMMYY-NNN` (creation day + per-day sequence)
//! - work-package: `WP-{CODE}-NNN` for top-level items, `{parentId}-TNN` for
//!   subordinate tasks
//! - legacy: any other short, whitespace-free token (recognized, never issued)

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest accepted legacy id
pub const MAX_LEGACY_ID_LEN: usize = 64;

/// The id a caller asks the allocator for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdKind {
    DateBased,
    WorkPackage,
    Task,
}

/// Classification of an existing id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedId {
    DateBased { date: NaiveDate, seq: u32 },
    WorkPackage { code: String, seq: u32 },
    Task { parent: String, seq: u32 },
    Legacy,
    Invalid,
}

impl ParsedId {
    pub fn parse(id: &str) -> Self {
        if let Some(parsed) = parse_structured(id) {
            return parsed;
        }
        if is_legacy_token(id) {
            return ParsedId::Legacy;
        }
        ParsedId::Invalid
    }

    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            ParsedId::DateBased { .. } | ParsedId::WorkPackage { .. } | ParsedId::Task { .. }
        )
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, ParsedId::Legacy)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ParsedId::Invalid)
    }
}

fn date_based_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2})(\d{2})(\d{2})-(\d{3})$").expect("valid regex"))
}

fn work_package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^WP-([A-Z]{3})-(\d{3})$").expect("valid regex"))
}

fn task_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)-T(\d{2})$").expect("valid regex"))
}

fn parse_structured(id: &str) -> Option<ParsedId> {
    if let Some(caps) = date_based_re().captures(id) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        let seq: u32 = caps[4].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(2000 + year, month, day)?;
        return (seq > 0).then_some(ParsedId::DateBased { date, seq });
    }

    if let Some(caps) = work_package_re().captures(id) {
        let seq: u32 = caps[2].parse().ok()?;
        return (seq > 0).then(|| ParsedId::WorkPackage {
            code: caps[1].to_string(),
            seq,
        });
    }

    if let Some(caps) = task_re().captures(id) {
        let parent = caps[1].to_string();
        let seq: u32 = caps[2].parse().ok()?;
        if seq == 0 || parse_structured(&parent).is_none() {
            return None;
        }
        return Some(ParsedId::Task { parent, seq });
    }

    None
}

fn is_legacy_token(id: &str) -> bool {
    !id.is_empty()
        && id.chars().count() <= MAX_LEGACY_ID_LEN
        && !id.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Sibling numbering rule for one allocation scope: every id in the scope is
/// `prefix` followed by exactly `width` digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSpec {
    pub prefix: String,
    pub width: usize,
    pub max: u32,
}

impl SequenceSpec {
    /// `DDMMYY-` scope for one creation day
    pub fn date_based(date: NaiveDate) -> Self {
        Self {
            prefix: format!(
                "{:02}{:02}{:02}-",
                date.day(),
                date.month(),
                date.year().rem_euclid(100)
            ),
            width: 3,
            max: 999,
        }
    }

    /// `WP-{CODE}-` scope for top-level items
    pub fn work_package(code: &str) -> Self {
        Self {
            prefix: format!("WP-{}-", code),
            width: 3,
            max: 999,
        }
    }

    /// `{parentId}-T` scope for subordinate tasks
    pub fn task(parent_id: &str) -> Self {
        Self {
            prefix: format!("{}-T", parent_id),
            width: 2,
            max: 99,
        }
    }

    pub fn format(&self, seq: u32) -> String {
        format!("{}{:0width$}", self.prefix, seq, width = self.width)
    }

    /// Sequence number of `id` if it belongs to this scope
    pub fn parse_suffix(&self, id: &str) -> Option<u32> {
        let rest = id.strip_prefix(self.prefix.as_str())?;
        if rest.len() != self.width || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok().filter(|seq| *seq > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_based() {
        let parsed = ParsedId::parse("121025-007");
        assert_eq!(
            parsed,
            ParsedId::DateBased {
                date: NaiveDate::from_ymd_opt(2025, 10, 12).unwrap(),
                seq: 7
            }
        );
        // 31 February is not a day
        assert_eq!(ParsedId::parse("310225-001"), ParsedId::Legacy);
    }

    #[test]
    fn test_parse_work_package_and_tasks() {
        assert_eq!(
            ParsedId::parse("WP-NOR-012"),
            ParsedId::WorkPackage { code: "NOR".into(), seq: 12 }
        );
        assert_eq!(
            ParsedId::parse("WP-NOR-012-T03"),
            ParsedId::Task { parent: "WP-NOR-012".into(), seq: 3 }
        );
        assert_eq!(
            ParsedId::parse("WP-NOR-012-T03-T01"),
            ParsedId::Task { parent: "WP-NOR-012-T03".into(), seq: 1 }
        );
        // parent part must itself be structured
        assert_eq!(ParsedId::parse("hull-T01"), ParsedId::Legacy);
    }

    #[test]
    fn test_zero_sequence_is_not_structured() {
        assert!(!ParsedId::parse("WP-NOR-000").is_structured());
    }

    #[test]
    fn test_legacy_and_invalid() {
        assert!(ParsedId::parse("task_42").is_legacy());
        assert!(ParsedId::parse("").is_invalid());
        assert!(ParsedId::parse("two words").is_invalid());
        assert!(ParsedId::parse(&"x".repeat(65)).is_invalid());
    }

    #[test]
    fn test_sequence_spec_format_and_parse() {
        let spec = SequenceSpec::work_package("NOR");
        assert_eq!(spec.format(2), "WP-NOR-002");
        assert_eq!(spec.parse_suffix("WP-NOR-002"), Some(2));
        assert_eq!(spec.parse_suffix("WP-NOR-002-T01"), None);
        assert_eq!(spec.parse_suffix("WP-ABC-002"), None);

        let tasks = SequenceSpec::task("WP-NOR-002");
        assert_eq!(tasks.format(5), "WP-NOR-002-T05");
        assert_eq!(tasks.parse_suffix("WP-NOR-002-T05"), Some(5));
        assert_eq!(tasks.parse_suffix("WP-NOR-002-T05-T01"), None);

        let daily = SequenceSpec::date_based(NaiveDate::from_ymd_opt(2025, 10, 12).unwrap());
        assert_eq!(daily.format(1), "121025-001");
    }
}
