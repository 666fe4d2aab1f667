//! Work Item Entity
//!
//! A node in the project work breakdown tree (package → item → sub-item →
//! realization). Nodes link upward through `parent_id` only; children are
//! found by lookup, never embedded.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::entity::Entity;

/// Placeholder strings that mean "no date"
pub const DEFAULT_UNSET_SENTINELS: [&str; 3] = ["0000-00-00", "1900-01-01", "-"];

/// Textual date formats accepted on input, tried in order
pub const ACCEPTED_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Upper bound for `completion`
pub const MAX_COMPLETION: u8 = 100;

/// Turns date text into a date, mapping placeholders to `None`.
/// Shared by JSON input, stored rows and field edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateNormalizer {
    sentinels: Vec<String>,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_UNSET_SENTINELS.iter().map(|s| s.to_string()).collect())
    }
}

impl DateNormalizer {
    pub fn new(sentinels: Vec<String>) -> Self {
        Self { sentinels }
    }

    pub fn is_placeholder(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty() || self.sentinels.iter().any(|s| s.eq_ignore_ascii_case(trimmed))
    }

    /// Placeholder → `None`; anything else must parse
    pub fn parse(&self, raw: &str) -> Result<Option<NaiveDate>, String> {
        if self.is_placeholder(raw) {
            return Ok(None);
        }
        let trimmed = raw.trim();
        ACCEPTED_DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
            .map(Some)
            .ok_or_else(|| format!("'{}' is not a valid date", trimmed))
    }
}

/// A work item in the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Legacy free-form or structured id
    pub id: String,
    pub title: String,
    /// 0..=100. Authoritative on leaves, derived on parents.
    #[serde(default)]
    pub completion: u8,
    /// Parent item (None = top level of the project)
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub finish_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub is_milestone: bool,
    /// Work package grouping tag
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl WorkItem {
    /// Create a new top-level item
    pub fn new(id: impl Into<String>, title: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            completion: 0,
            parent_id: None,
            start_date: None,
            finish_date: None,
            duration_days: None,
            is_milestone: false,
            package: None,
            category: None,
            project_id: project_id.into(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Create a child under `parent`, inheriting its project and package
    pub fn new_child(id: impl Into<String>, title: impl Into<String>, parent: &WorkItem) -> Self {
        let mut item = Self::new(id, title, parent.project_id.clone());
        item.parent_id = Some(parent.id.clone());
        item.package = parent.package.clone();
        item
    }

    pub fn with_completion(mut self, completion: u8) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Check if this is a top-level item (no parent)
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

impl Entity for WorkItem {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One of the three members of the date triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateField {
    StartDate,
    FinishDate,
    DurationDays,
}

impl DateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateField::StartDate => "startDate",
            DateField::FinishDate => "finishDate",
            DateField::DurationDays => "durationDays",
        }
    }
}

/// Partial update. `None` leaves a field untouched; for nullable fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemPatch {
    pub title: Option<String>,
    pub completion: Option<u8>,
    pub parent_id: Option<Option<String>>,
    pub start_date: Option<Option<NaiveDate>>,
    pub finish_date: Option<Option<NaiveDate>>,
    pub duration_days: Option<Option<u32>>,
    pub is_milestone: Option<bool>,
    pub package: Option<Option<String>>,
    pub category: Option<Option<String>>,
}

impl WorkItemPatch {
    pub fn completion(value: u8) -> Self {
        Self {
            completion: Some(value),
            ..Self::default()
        }
    }

    pub fn parent(parent_id: Option<String>) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch in place
    pub fn apply(&self, item: &mut WorkItem) {
        if let Some(title) = &self.title {
            item.title = title.clone();
        }
        if let Some(completion) = self.completion {
            item.completion = completion;
        }
        if let Some(parent_id) = &self.parent_id {
            item.parent_id = parent_id.clone();
        }
        if let Some(start) = self.start_date {
            item.start_date = start;
        }
        if let Some(finish) = self.finish_date {
            item.finish_date = finish;
        }
        if let Some(duration) = self.duration_days {
            item.duration_days = duration;
        }
        if let Some(milestone) = self.is_milestone {
            item.is_milestone = milestone;
        }
        if let Some(package) = &self.package {
            item.package = package.clone();
        }
        if let Some(category) = &self.category {
            item.category = category.clone();
        }
    }
}

/// Which parent an item must have to match a filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentFilter {
    #[default]
    Any,
    /// Top-level items only
    Root,
    Of(String),
}

/// Store query filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkItemFilter {
    pub project_id: Option<String>,
    pub package: Option<String>,
    pub parent: ParentFilter,
    pub id_prefix: Option<String>,
}

impl WorkItemFilter {
    pub fn id_prefix(prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn children_of(parent_id: impl Into<String>) -> Self {
        Self {
            parent: ParentFilter::Of(parent_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        if let Some(project_id) = &self.project_id {
            if &item.project_id != project_id {
                return false;
            }
        }
        if let Some(package) = &self.package {
            if item.package.as_ref() != Some(package) {
                return false;
            }
        }
        match &self.parent {
            ParentFilter::Any => {}
            ParentFilter::Root => {
                if item.parent_id.is_some() {
                    return false;
                }
            }
            ParentFilter::Of(pid) => {
                if item.parent_id.as_ref() != Some(pid) {
                    return false;
                }
            }
        }
        if let Some(prefix) = &self.id_prefix {
            if !item.id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Accepts ISO dates, `null`, empty strings and the unset sentinels.
mod lenient_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};

    use super::DateNormalizer;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(raw) => DateNormalizer::default()
                .parse(&raw)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
