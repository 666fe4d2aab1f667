//! Legacy Id Migration
//!
//! Three phases over one snapshot of the store:
//! 1. plan: walk every tree from its top-level item and give each legacy id
//!    a structured one (`WP-{CODE}-NNN` at the top, `{parent}-TNN` below)
//! 2. validate: no target collides, no record is left pointing at a parent
//!    that will not exist
//! 3. commit: one `replace_batch`; skipped on dry runs

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ids::{next_sequence, ProjectCodeDeriver};
use crate::domain::{DomainError, DomainResult, ParsedId, SequenceSpec, WorkItem};
use crate::repository::{Replacement, Repository, WorkItemStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOptions {
    #[serde(default)]
    pub dry_run: bool,
    /// projectId → project name, for deriving project codes
    #[serde(default)]
    pub project_names: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapping {
    pub old_id: String,
    pub new_id: String,
}

/// An item the migration had to leave alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationError {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub dry_run: bool,
    /// Records renamed by the commit (0 on a dry run)
    pub migrated_count: usize,
    pub errors: Vec<MigrationError>,
    pub mapping: Vec<IdMapping>,
    /// Items that kept their id but now point at a renamed parent
    pub relinked_children: Vec<String>,
    /// Store content before the commit, for `restore_snapshot`
    pub snapshot: Vec<WorkItem>,
}

/// Health check over stored ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdValidationReport {
    pub invalid_ids: Vec<String>,
    pub duplicate_ids: Vec<String>,
    pub orphaned_children: Vec<String>,
    /// Recognized but not yet migrated
    pub legacy_ids: Vec<String>,
}

impl IdValidationReport {
    pub fn from_items(items: &[WorkItem]) -> Self {
        let mut report = Self::default();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut duplicates: BTreeSet<&str> = BTreeSet::new();
        for item in items {
            if !seen.insert(item.id.as_str()) {
                duplicates.insert(item.id.as_str());
            }
        }

        let mut reported: HashSet<&str> = HashSet::new();
        for item in items {
            if !reported.insert(item.id.as_str()) {
                continue;
            }
            match ParsedId::parse(&item.id) {
                ParsedId::Invalid => report.invalid_ids.push(item.id.clone()),
                ParsedId::Legacy => report.legacy_ids.push(item.id.clone()),
                _ => {}
            }
            if let Some(pid) = &item.parent_id {
                if !seen.contains(pid.as_str()) {
                    report.orphaned_children.push(item.id.clone());
                }
            }
        }

        report.duplicate_ids = duplicates.into_iter().map(str::to_string).collect();
        report.invalid_ids.sort();
        report.legacy_ids.sort();
        report.orphaned_children.sort();
        report
    }

    /// No problems; legacy ids alone are not a problem
    pub fn is_clean(&self) -> bool {
        self.invalid_ids.is_empty() && self.duplicate_ids.is_empty() && self.orphaned_children.is_empty()
    }
}

#[derive(Debug, Default)]
struct MigrationPlan {
    replacements: Vec<Replacement>,
    mapping: Vec<IdMapping>,
    relinked_children: Vec<String>,
    errors: Vec<MigrationError>,
}

/// Per-prefix sequence numbers already in use, filled lazily from the snapshot
struct SequenceBook<'a> {
    all_ids: &'a [WorkItem],
    taken: HashMap<String, BTreeSet<u32>>,
}

impl<'a> SequenceBook<'a> {
    fn new(all_ids: &'a [WorkItem]) -> Self {
        Self {
            all_ids,
            taken: HashMap::new(),
        }
    }

    fn next_id(&mut self, spec: &SequenceSpec) -> Option<String> {
        let all_ids = self.all_ids;
        let taken = self.taken.entry(spec.prefix.clone()).or_insert_with(|| {
            all_ids
                .iter()
                .filter_map(|item| spec.parse_suffix(&item.id))
                .collect()
        });
        let seq = next_sequence(taken, spec.max)?;
        taken.insert(seq);
        Some(spec.format(seq))
    }
}

pub struct IdMigrator {
    store: Arc<dyn WorkItemStore>,
    codes: ProjectCodeDeriver,
}

impl IdMigrator {
    pub fn new(store: Arc<dyn WorkItemStore>, codes: ProjectCodeDeriver) -> Self {
        Self { store, codes }
    }

    pub async fn migrate(&self, options: &MigrationOptions) -> DomainResult<MigrationReport> {
        let snapshot = self.store.list().await?;
        let plan = self.plan(&snapshot, &options.project_names);
        validate_plan(&snapshot, &plan)?;

        for error in &plan.errors {
            log::warn!("Migration skipped {}: {}", error.id, error.message);
        }

        let migrated_count = if options.dry_run {
            log::info!(
                "Migration dry run: {} id(s) would change, {} child link(s) would be rewritten",
                plan.mapping.len(),
                plan.relinked_children.len()
            );
            0
        } else if plan.replacements.is_empty() {
            0
        } else {
            self.store.replace_batch(&plan.replacements).await?;
            log::info!(
                "Migration committed: {} id(s) changed, {} child link(s) rewritten",
                plan.mapping.len(),
                plan.relinked_children.len()
            );
            plan.mapping.len()
        };

        Ok(MigrationReport {
            dry_run: options.dry_run,
            migrated_count,
            errors: plan.errors,
            mapping: plan.mapping,
            relinked_children: plan.relinked_children,
            snapshot,
        })
    }

    pub async fn validate_ids(&self) -> DomainResult<IdValidationReport> {
        let items = self.store.list().await?;
        Ok(IdValidationReport::from_items(&items))
    }

    /// Put a pre-migration snapshot back
    pub async fn restore_snapshot(&self, snapshot: &[WorkItem]) -> DomainResult<()> {
        self.store.restore(snapshot).await?;
        log::info!("Restored snapshot of {} work item(s)", snapshot.len());
        Ok(())
    }

    fn plan(&self, snapshot: &[WorkItem], project_names: &HashMap<String, String>) -> MigrationPlan {
        let by_id: HashMap<&str, &WorkItem> =
            snapshot.iter().map(|item| (item.id.as_str(), item)).collect();
        let mut children: HashMap<&str, Vec<&WorkItem>> = HashMap::new();
        for item in snapshot {
            if let Some(pid) = &item.parent_id {
                children.entry(pid.as_str()).or_default().push(item);
            }
        }
        for list in children.values_mut() {
            list.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let mut roots: Vec<&WorkItem> = snapshot.iter().filter(|item| item.is_root()).collect();
        roots.sort_by(|a, b| a.id.cmp(&b.id));

        let mut plan = MigrationPlan::default();
        let mut book = SequenceBook::new(snapshot);
        let mut renamed: HashMap<String, String> = HashMap::new();
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&WorkItem> = roots.into_iter().collect();

        while let Some(item) = queue.pop_front() {
            if !reached.insert(item.id.as_str()) {
                continue;
            }

            let new_parent = item
                .parent_id
                .as_ref()
                .map(|pid| renamed.get(pid).cloned().unwrap_or_else(|| pid.clone()));

            let mut new_id = item.id.clone();
            if !ParsedId::parse(&item.id).is_structured() {
                match self.target_id(item, new_parent.as_deref(), project_names, &mut book) {
                    Ok(id) => new_id = id,
                    Err(message) => plan.errors.push(MigrationError {
                        id: item.id.clone(),
                        message,
                    }),
                }
            }

            let relinked = new_parent != item.parent_id;
            if new_id != item.id || relinked {
                let mut record = item.clone();
                record.id = new_id.clone();
                record.parent_id = new_parent;
                plan.replacements.push(Replacement {
                    old_id: item.id.clone(),
                    record,
                });
            }
            if new_id != item.id {
                renamed.insert(item.id.clone(), new_id.clone());
                plan.mapping.push(IdMapping {
                    old_id: item.id.clone(),
                    new_id,
                });
            } else if relinked {
                plan.relinked_children.push(item.id.clone());
            }

            if let Some(kids) = children.get(item.id.as_str()) {
                queue.extend(kids.iter().copied());
            }
        }

        for item in snapshot {
            if reached.contains(item.id.as_str()) || ParsedId::parse(&item.id).is_structured() {
                continue;
            }
            let message = match &item.parent_id {
                Some(pid) if !by_id.contains_key(pid.as_str()) => {
                    format!("parent {} does not exist", pid)
                }
                _ => "not reachable from any top-level item (parent cycle)".to_string(),
            };
            plan.errors.push(MigrationError {
                id: item.id.clone(),
                message,
            });
        }

        plan
    }

    fn target_id(
        &self,
        item: &WorkItem,
        new_parent: Option<&str>,
        project_names: &HashMap<String, String>,
        book: &mut SequenceBook<'_>,
    ) -> Result<String, String> {
        let spec = match new_parent {
            None => {
                let name = project_names
                    .get(&item.project_id)
                    .map(String::as_str)
                    .unwrap_or(&item.project_id);
                SequenceSpec::work_package(&self.codes.derive(name))
            }
            Some(parent) if ParsedId::parse(parent).is_structured() => SequenceSpec::task(parent),
            Some(parent) => return Err(format!("parent {} has no structured id", parent)),
        };
        book.next_id(&spec)
            .ok_or_else(|| format!("no free sequence number under {}", spec.prefix))
    }
}

/// Reject the plan if applying it would collide ids or strand a record
fn validate_plan(snapshot: &[WorkItem], plan: &MigrationPlan) -> DomainResult<()> {
    let replaced: HashSet<&str> = plan.replacements.iter().map(|r| r.old_id.as_str()).collect();
    let mut final_ids: HashSet<&str> = snapshot
        .iter()
        .map(|item| item.id.as_str())
        .filter(|id| !replaced.contains(id))
        .collect();

    let mut problems = Vec::new();
    for r in &plan.replacements {
        if !final_ids.insert(r.record.id.as_str()) {
            problems.push(format!("{} -> {} collides with an existing id", r.old_id, r.record.id));
        }
    }
    for m in &plan.mapping {
        if !ParsedId::parse(&m.new_id).is_structured() {
            problems.push(format!("{} -> {} is not a structured id", m.old_id, m.new_id));
        }
    }
    for r in &plan.replacements {
        if let Some(pid) = &r.record.parent_id {
            if !final_ids.contains(pid.as_str()) {
                problems.push(format!("{} would point at missing parent {}", r.record.id, pid));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(DomainError::ConstraintViolation(format!(
            "Migration aborted: {}",
            problems.join("; ")
        )))
    }
}
