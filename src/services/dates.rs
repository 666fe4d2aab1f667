//! Date Inference
//!
//! Keeps `{start, finish, duration}` consistent with
//! `finish - start + 1 == duration` (inclusive day counting). The field the
//! user just edited decides which member gets recomputed.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::domain::{DateField, DateNormalizer, FieldError};

/// Concrete values of the triple; `None` is unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateTriple {
    pub start: Option<NaiveDate>,
    pub finish: Option<NaiveDate>,
    pub duration: Option<i64>,
}

impl DateTriple {
    pub fn known_count(&self) -> usize {
        self.start.is_some() as usize + self.finish.is_some() as usize + self.duration.is_some() as usize
    }
}

/// Raw edit as it arrives from a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateEditRequest {
    pub changed: Option<DateField>,
    pub start_date: Option<String>,
    pub finish_date: Option<String>,
    pub duration_days: Option<i64>,
}

/// Resolved triple plus what was derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateCalculation {
    pub start_date: Option<NaiveDate>,
    pub finish_date: Option<NaiveDate>,
    pub duration_days: Option<u32>,
    /// Member computed from the other two, if any
    pub derived: Option<DateField>,
    /// Start was filled with the edit date
    pub start_defaulted: bool,
    pub description: String,
}

pub struct DateInferenceEngine {
    normalizer: DateNormalizer,
}

impl DateInferenceEngine {
    pub fn new(sentinels: Vec<String>) -> Self {
        Self {
            normalizer: DateNormalizer::new(sentinels),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.unset_date_sentinels.clone())
    }

    pub fn normalizer(&self) -> &DateNormalizer {
        &self.normalizer
    }

    pub fn is_placeholder(&self, raw: &str) -> bool {
        self.normalizer.is_placeholder(raw)
    }

    /// Placeholder → `None`; anything else must parse
    pub fn normalize(&self, field: DateField, raw: &str) -> Result<Option<NaiveDate>, FieldError> {
        self.normalizer
            .parse(raw)
            .map_err(|message| FieldError::new(field.as_str(), message))
    }

    /// Normalize a raw request and resolve it
    pub fn resolve_raw(
        &self,
        request: &DateEditRequest,
        today: NaiveDate,
    ) -> Result<DateCalculation, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut parse = |field: DateField, raw: &Option<String>| match raw {
            None => None,
            Some(raw) => match self.normalize(field, raw) {
                Ok(date) => date,
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
        };
        let start = parse(DateField::StartDate, &request.start_date);
        let finish = parse(DateField::FinishDate, &request.finish_date);
        if !errors.is_empty() {
            return Err(errors);
        }

        let triple = DateTriple {
            start,
            finish,
            duration: request.duration_days,
        };
        self.resolve(triple, request.changed, today)
    }

    /// Derive the missing member and validate the result
    pub fn resolve(
        &self,
        mut triple: DateTriple,
        changed: Option<DateField>,
        today: NaiveDate,
    ) -> Result<DateCalculation, Vec<FieldError>> {
        let relationship_checked =
            triple.known_count() >= 2 || changed == Some(DateField::DurationDays);
        if let Some(d) = triple.duration {
            if d <= 0 && !relationship_checked {
                // A lone non-positive duration carries no information
                triple.duration = None;
            } else if d <= 0 {
                return Err(vec![FieldError::new(
                    DateField::DurationDays.as_str(),
                    format!("duration must be at least 1 day, got {}", d),
                )]);
            }
            if d > u32::MAX as i64 {
                return Err(vec![FieldError::new(
                    DateField::DurationDays.as_str(),
                    "duration is too large",
                )]);
            }
        }

        let DateTriple { start, finish, duration } = triple;
        let mut out = DateCalculation {
            start_date: start,
            finish_date: finish,
            duration_days: duration.map(|d| d as u32),
            derived: None,
            start_defaulted: false,
            description: String::new(),
        };

        match (changed, start, finish, duration) {
            // The edited member was cleared and stays unset
            (Some(DateField::StartDate), None, _, _)
            | (Some(DateField::FinishDate), _, None, _)
            | (Some(DateField::DurationDays), _, _, None) => {}
            (Some(DateField::StartDate), Some(s), _, Some(d)) => {
                out.finish_date = Some(finish_from(s, d)?);
                out.derived = Some(DateField::FinishDate);
            }
            (Some(DateField::FinishDate), _, Some(f), Some(d)) => {
                out.start_date = Some(start_from(f, d)?);
                out.derived = Some(DateField::StartDate);
            }
            (Some(DateField::DurationDays), Some(s), _, Some(d)) => {
                out.finish_date = Some(finish_from(s, d)?);
                out.derived = Some(DateField::FinishDate);
            }
            (Some(DateField::DurationDays), None, Some(f), Some(d)) => {
                out.start_date = Some(start_from(f, d)?);
                out.derived = Some(DateField::StartDate);
            }
            (Some(DateField::DurationDays), None, None, Some(d)) => {
                out.start_date = Some(today);
                out.finish_date = Some(finish_from(today, d)?);
                out.derived = Some(DateField::FinishDate);
                out.start_defaulted = true;
            }
            (_, Some(s), Some(f), _) => {
                let days = f.signed_duration_since(s).num_days() + 1;
                out.duration_days = Some(days.max(1) as u32);
                out.derived = Some(DateField::DurationDays);
            }
            (_, Some(s), None, Some(d)) => {
                out.finish_date = Some(finish_from(s, d)?);
                out.derived = Some(DateField::FinishDate);
            }
            (_, None, Some(f), Some(d)) => {
                out.start_date = Some(start_from(f, d)?);
                out.derived = Some(DateField::StartDate);
            }
            _ => {}
        }

        if let (Some(s), Some(f)) = (out.start_date, out.finish_date) {
            if f < s {
                return Err(vec![FieldError::new(
                    DateField::FinishDate.as_str(),
                    format!("finish date {} precedes start date {}", f, s),
                )]);
            }
        }

        out.description = describe(&out);
        Ok(out)
    }
}

fn finish_from(start: NaiveDate, duration: i64) -> Result<NaiveDate, Vec<FieldError>> {
    start
        .checked_add_days(Days::new((duration - 1) as u64))
        .ok_or_else(|| vec![FieldError::new(DateField::FinishDate.as_str(), "finish date out of range")])
}

fn start_from(finish: NaiveDate, duration: i64) -> Result<NaiveDate, Vec<FieldError>> {
    finish
        .checked_sub_days(Days::new((duration - 1) as u64))
        .ok_or_else(|| vec![FieldError::new(DateField::StartDate.as_str(), "start date out of range")])
}

fn describe(calc: &DateCalculation) -> String {
    let (Some(s), Some(f), Some(d)) = (calc.start_date, calc.finish_date, calc.duration_days) else {
        let unset: Vec<&str> = [
            (calc.start_date.is_none(), "start date"),
            (calc.finish_date.is_none(), "finish date"),
            (calc.duration_days.is_none(), "duration"),
        ]
        .into_iter()
        .filter_map(|(missing, name)| missing.then_some(name))
        .collect();
        return format!("no date calculated: {} unset", unset.join(", "));
    };
    let core = match calc.derived {
        Some(DateField::FinishDate) => {
            format!("finish date calculated: start + duration = finish ({} + {}d = {})", s, d, f)
        }
        Some(DateField::StartDate) => {
            format!("start date calculated: finish - duration = start ({} - {}d = {})", f, d, s)
        }
        Some(DateField::DurationDays) => {
            format!("duration calculated: finish - start + 1 = duration ({} - {} + 1 = {}d)", f, s, d)
        }
        None => "dates unchanged".to_string(),
    };
    if calc.start_defaulted {
        format!("start date defaulted to {}; {}", s, core)
    } else {
        core
    }
}
