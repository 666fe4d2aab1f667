//! Update Orchestrator
//!
//! Entry point for every mutation. Order per request:
//! date inference → persist → completion propagation. Creation allocates the
//! id first. Failing validation returns the errors and writes nothing.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::completion::{CompletionAggregator, RecalculationSummary};
use super::dates::{DateCalculation, DateInferenceEngine, DateTriple};
use super::ids::{IdAllocator, IdScope, ProjectCodeDeriver};
use super::migration::{IdMigrator, IdValidationReport, MigrationOptions, MigrationReport};
use crate::config::EngineConfig;
use crate::domain::{
    DateField, DomainError, DomainResult, FieldError, IdKind, WorkItem, WorkItemFilter,
    WorkItemPatch, WorkTree, MAX_COMPLETION,
};
use crate::repository::{HierarchyRepository, Repository, WorkItemStore};

/// Edits to one item. Date strings may be placeholders; an empty
/// `package`/`category` clears the tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChanges {
    pub title: Option<String>,
    pub completion: Option<i64>,
    pub start_date: Option<String>,
    pub finish_date: Option<String>,
    pub duration_days: Option<i64>,
    pub is_milestone: Option<bool>,
    pub package: Option<String>,
    pub category: Option<String>,
    /// Date member the user edited; inferred when only one is present
    pub changed: Option<DateField>,
}

impl FieldChanges {
    fn touches_dates(&self) -> bool {
        self.start_date.is_some()
            || self.finish_date.is_some()
            || self.duration_days.is_some()
            || self.is_milestone == Some(true)
    }

    fn changed_field(&self) -> Option<DateField> {
        if self.is_milestone == Some(true) {
            return Some(DateField::DurationDays);
        }
        if self.changed.is_some() {
            return self.changed;
        }
        match (
            self.start_date.is_some(),
            self.finish_date.is_some(),
            self.duration_days.is_some(),
        ) {
            (true, false, false) => Some(DateField::StartDate),
            (false, true, false) => Some(DateField::FinishDate),
            (false, false, true) => Some(DateField::DurationDays),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChangeOutcome {
    /// Stored record after the edit (unchanged when validation failed)
    pub record: WorkItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_calculation: Option<DateCalculation>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub validation_errors: Vec<FieldError>,
}

/// Request to add an item or a child
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkItem {
    pub title: String,
    /// Required for top-level items; children inherit the parent's
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub parent_id: Option<String>,
    /// Top-level id scheme, work-package by default. Children always get tasks.
    pub kind: Option<IdKind>,
    pub package: Option<String>,
    pub category: Option<String>,
    pub completion: Option<u8>,
    pub start_date: Option<String>,
    pub finish_date: Option<String>,
    pub duration_days: Option<i64>,
    #[serde(default)]
    pub is_milestone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub removed_count: usize,
    pub parent_id: Option<String>,
    pub ancestors_updated: usize,
}

pub struct UpdateOrchestrator {
    store: Arc<dyn WorkItemStore>,
    config: EngineConfig,
    completion: CompletionAggregator,
    dates: DateInferenceEngine,
    ids: IdAllocator,
    migrator: IdMigrator,
}

impl UpdateOrchestrator {
    pub fn new(store: Arc<dyn WorkItemStore>, config: EngineConfig) -> Result<Self, String> {
        config.validate()?;
        let codes = ProjectCodeDeriver::from_config(&config)?;
        Ok(Self {
            completion: CompletionAggregator::new(store.clone(), config.max_tree_depth),
            dates: DateInferenceEngine::from_config(&config),
            ids: IdAllocator::new(store.clone(), codes.clone()),
            migrator: IdMigrator::new(store.clone(), codes),
            store,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dates(&self) -> &DateInferenceEngine {
        &self.dates
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_item(&self, id: &str) -> DomainResult<WorkItem> {
        self.store.get(id).await
    }

    pub async fn list_items(&self, filter: &WorkItemFilter) -> DomainResult<Vec<WorkItem>> {
        self.store.list_by(filter).await
    }

    /// Display order with depth, from `root` or from every top-level item
    pub async fn tree(&self, root: Option<&str>) -> DomainResult<Vec<(WorkItem, usize)>> {
        let items = match root {
            Some(id) => {
                let mut items = self.store.get_descendants(&id.to_string()).await?;
                items.push(self.store.get(id).await?);
                items
            }
            None => self.store.list().await?,
        };
        Ok(WorkTree::from_items(items).flatten(root))
    }

    // ========================================================================
    // Edits
    // ========================================================================

    pub async fn on_field_changed(
        &self,
        id: &str,
        changes: &FieldChanges,
    ) -> DomainResult<FieldChangeOutcome> {
        self.on_field_changed_at(id, changes, chrono::Local::now().date_naive())
            .await
    }

    /// `on_field_changed` with an explicit edit date
    pub async fn on_field_changed_at(
        &self,
        id: &str,
        changes: &FieldChanges,
        today: NaiveDate,
    ) -> DomainResult<FieldChangeOutcome> {
        let item = self.store.get(id).await?;
        let mut errors = Vec::new();
        let mut patch = WorkItemPatch::default();

        if let Some(title) = &changes.title {
            if title.trim().is_empty() {
                errors.push(FieldError::new("title", "title must not be empty"));
            } else {
                patch.title = Some(title.clone());
            }
        }

        if let Some(value) = changes.completion {
            match self.check_completion(&item, value).await? {
                Ok(v) => patch.completion = Some(v),
                Err(e) => errors.push(e),
            }
        }

        let mut date_calculation = None;
        if changes.touches_dates() {
            match self.resolve_dates(&item, changes, today) {
                Ok(calc) => {
                    log::info!("Dates of {}: {}", id, calc.description);
                    patch.start_date = Some(calc.start_date);
                    patch.finish_date = Some(calc.finish_date);
                    patch.duration_days = Some(calc.duration_days);
                    date_calculation = Some(calc);
                }
                Err(mut e) => errors.append(&mut e),
            }
        }

        if !errors.is_empty() {
            log::warn!("Rejected edit of {}: {}", id, DomainError::Validation(errors.clone()));
            return Ok(FieldChangeOutcome {
                record: item,
                date_calculation: None,
                validation_errors: errors,
            });
        }

        if let Some(milestone) = changes.is_milestone {
            patch.is_milestone = Some(milestone);
        }
        if let Some(package) = &changes.package {
            patch.package = Some(non_empty(package));
        }
        if let Some(category) = &changes.category {
            patch.category = Some(non_empty(category));
        }

        if patch.is_empty() {
            return Ok(FieldChangeOutcome {
                record: item,
                date_calculation,
                validation_errors: Vec::new(),
            });
        }

        let record = self.store.patch(id, &patch).await?;
        log::info!("Updated work item {}", id);

        if patch.completion.is_some_and(|c| c != item.completion) {
            self.completion.recalculate_ancestors(id).await?;
        }

        Ok(FieldChangeOutcome {
            record,
            date_calculation,
            validation_errors: Vec::new(),
        })
    }

    async fn check_completion(
        &self,
        item: &WorkItem,
        value: i64,
    ) -> DomainResult<Result<u8, FieldError>> {
        if !(0..=MAX_COMPLETION as i64).contains(&value) {
            return Ok(Err(FieldError::new(
                "completion",
                format!("completion must be between 0 and {}, got {}", MAX_COMPLETION, value),
            )));
        }
        if !self.store.get_children(&item.id).await?.is_empty() {
            return Ok(Err(FieldError::new(
                "completion",
                "completion of an item with children is derived from them",
            )));
        }
        Ok(Ok(value as u8))
    }

    fn resolve_dates(
        &self,
        item: &WorkItem,
        changes: &FieldChanges,
        today: NaiveDate,
    ) -> Result<DateCalculation, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut triple = DateTriple {
            start: item.start_date,
            finish: item.finish_date,
            duration: item.duration_days.map(i64::from),
        };

        if let Some(raw) = &changes.start_date {
            match self.dates.normalize(DateField::StartDate, raw) {
                Ok(date) => triple.start = date,
                Err(e) => errors.push(e),
            }
        }
        if let Some(raw) = &changes.finish_date {
            match self.dates.normalize(DateField::FinishDate, raw) {
                Ok(date) => triple.finish = date,
                Err(e) => errors.push(e),
            }
        }
        if let Some(duration) = changes.duration_days {
            triple.duration = Some(duration);
        }
        if changes.is_milestone == Some(true) {
            triple.duration = Some(1);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        self.dates.resolve(triple, changes.changed_field(), today)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn create_item(&self, request: &NewWorkItem) -> DomainResult<WorkItem> {
        self.create_item_at(request, chrono::Local::now().date_naive())
            .await
    }

    pub async fn create_item_at(&self, request: &NewWorkItem, today: NaiveDate) -> DomainResult<WorkItem> {
        if request.title.trim().is_empty() {
            return Err(DomainError::validation("title", "title must not be empty"));
        }
        if request.completion.is_some_and(|c| c > MAX_COMPLETION) {
            return Err(DomainError::validation(
                "completion",
                format!("completion must be between 0 and {}", MAX_COMPLETION),
            ));
        }

        let parent = match &request.parent_id {
            Some(pid) => Some(self.store.get(pid).await?),
            None => None,
        };
        let (project_id, package) = match &parent {
            Some(p) => (
                p.project_id.clone(),
                request.package.clone().or_else(|| p.package.clone()),
            ),
            None => {
                let project_id = request
                    .project_id
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| DomainError::validation("projectId", "top-level items need a project"))?;
                (project_id, request.package.clone())
            }
        };

        let (scope, kind) = match &parent {
            Some(p) => (IdScope::Subordinate { parent_id: p.id.clone() }, IdKind::Task),
            None => match request.kind.unwrap_or(IdKind::WorkPackage) {
                IdKind::DateBased => (IdScope::Daily { date: today }, IdKind::DateBased),
                IdKind::WorkPackage => (
                    IdScope::WorkPackage {
                        project_id: project_id.clone(),
                        project_name: request.project_name.clone(),
                        package: package.clone(),
                    },
                    IdKind::WorkPackage,
                ),
                IdKind::Task => {
                    return Err(DomainError::validation("kind", "task ids need a parent"));
                }
            },
        };

        let changes = FieldChanges {
            start_date: request.start_date.clone(),
            finish_date: request.finish_date.clone(),
            duration_days: request.duration_days,
            is_milestone: Some(request.is_milestone),
            ..FieldChanges::default()
        };
        let blank = WorkItem::new("", request.title.clone(), project_id.clone());
        let calc = if changes.touches_dates() {
            Some(self.resolve_dates(&blank, &changes, today).map_err(DomainError::Validation)?)
        } else {
            None
        };

        let mut attempt = 0;
        let created = loop {
            attempt += 1;
            let id = self.ids.allocate_id(&scope, kind).await?;

            let mut record = WorkItem::new(id.clone(), request.title.clone(), project_id.clone());
            record.parent_id = parent.as_ref().map(|p| p.id.clone());
            record.package = package.clone();
            record.category = request.category.clone();
            record.completion = request.completion.unwrap_or(0);
            record.is_milestone = request.is_milestone;
            if let Some(calc) = &calc {
                record.start_date = calc.start_date;
                record.finish_date = calc.finish_date;
                record.duration_days = calc.duration_days;
            }

            match self.store.create(&record).await {
                Ok(created) => {
                    self.ids.confirm(&id).await;
                    break created;
                }
                Err(e) if e.is_conflict() && attempt <= self.config.max_allocation_retries => {
                    log::warn!("Id {} taken by a concurrent writer, retrying ({})", id, attempt);
                    self.ids.release(&[id]).await;
                }
                Err(e) => {
                    self.ids.release(&[id]).await;
                    return Err(e);
                }
            }
        };
        log::info!("Created work item {} ({})", created.id, created.title);

        if parent.is_some() {
            self.completion.recalculate_ancestors(&created.id).await?;
        }
        Ok(created)
    }

    /// Remove `id` and its subtree, then fix the detached parent's chain
    pub async fn delete_item(&self, id: &str) -> DomainResult<DeleteOutcome> {
        let item = self.store.get(id).await?;
        let descendants = self.store.get_descendants(&item.id).await?;
        self.store.delete(&item.id).await?;
        log::info!("Deleted work item {} and {} descendant(s)", id, descendants.len());

        let ancestors_updated = match &item.parent_id {
            Some(pid) => self.completion.propagate_from(pid).await?,
            None => 0,
        };
        Ok(DeleteOutcome {
            removed_count: descendants.len() + 1,
            parent_id: item.parent_id,
            ancestors_updated,
        })
    }

    /// Re-parent `id`. Ids stay as they are.
    pub async fn move_item(&self, id: &str, new_parent: Option<&str>) -> DomainResult<WorkItem> {
        let item = self.store.get(id).await?;
        if let Some(target) = new_parent {
            if target == id {
                return Err(DomainError::ConstraintViolation(format!(
                    "Cannot move {} under itself",
                    id
                )));
            }
            self.store.get(target).await?;
            let below: HashSet<String> = self
                .store
                .get_descendants(&item.id)
                .await?
                .into_iter()
                .map(|d| d.id)
                .collect();
            if below.contains(target) {
                return Err(DomainError::ConstraintViolation(format!(
                    "Cannot move {} under its own descendant {}",
                    id, target
                )));
            }
        }
        if item.parent_id.as_deref() == new_parent {
            return Ok(item);
        }

        let moved = self
            .store
            .patch(id, &WorkItemPatch::parent(new_parent.map(str::to_string)))
            .await?;
        log::info!(
            "Moved work item {} from {:?} to {:?}",
            id,
            item.parent_id,
            new_parent
        );

        if let Some(old_parent) = &item.parent_id {
            self.completion.propagate_from(old_parent).await?;
        }
        self.completion.recalculate_ancestors(id).await?;
        Ok(moved)
    }

    /// Store records as given, ids untouched. The whole batch is rejected
    /// when any record breaks the data-model rules.
    pub async fn import_items(&self, items: &[WorkItem]) -> DomainResult<usize> {
        let report = IdValidationReport::from_items(items);
        let mut errors: Vec<FieldError> = report
            .duplicate_ids
            .iter()
            .map(|id| FieldError::new("id", format!("{} appears more than once", id)))
            .collect();
        errors.extend(
            report
                .invalid_ids
                .iter()
                .map(|id| FieldError::new("id", format!("{:?} is not a usable id", id))),
        );
        let today = chrono::Local::now().date_naive();
        for item in items {
            errors.extend(self.check_imported(item, today));
        }
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }

        for item in items {
            self.store.create(item).await?;
            self.ids.confirm(&item.id).await;
        }
        log::info!("Imported {} work item(s)", items.len());
        Ok(items.len())
    }

    /// `import_items` over a JSON array. Date strings go through the
    /// configured placeholder rules and accepted formats.
    pub async fn import_json(&self, raw: &str) -> DomainResult<usize> {
        let values: Vec<serde_json::Value> = serde_json::from_str(raw)
            .map_err(|e| DomainError::validation("items", format!("invalid JSON: {}", e)))?;

        let mut errors = Vec::new();
        let mut items = Vec::with_capacity(values.len());
        for (idx, mut value) in values.into_iter().enumerate() {
            for field in [DateField::StartDate, DateField::FinishDate] {
                let Some(slot) = value.get_mut(field.as_str()) else {
                    continue;
                };
                let Some(text) = slot.as_str() else {
                    continue;
                };
                match self.dates.normalize(field, text) {
                    Ok(Some(date)) => *slot = serde_json::Value::String(date.format("%Y-%m-%d").to_string()),
                    Ok(None) => *slot = serde_json::Value::Null,
                    Err(e) => errors.push(FieldError::new(e.field, format!("item {}: {}", idx, e.message))),
                }
            }
            match serde_json::from_value::<WorkItem>(value) {
                Ok(item) => items.push(item),
                Err(e) => errors.push(FieldError::new("items", format!("item {}: {}", idx, e))),
            }
        }
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }
        self.import_items(&items).await
    }

    fn check_imported(&self, item: &WorkItem, today: NaiveDate) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if item.completion > MAX_COMPLETION {
            errors.push(FieldError::new(
                "completion",
                format!("{}: completion {} exceeds {}", item.id, item.completion, MAX_COMPLETION),
            ));
        }

        let triple = DateTriple {
            start: item.start_date,
            finish: item.finish_date,
            duration: item.duration_days.map(i64::from),
        };
        match self.dates.resolve(triple, None, today) {
            Ok(calc) => {
                if triple.known_count() == 3 && calc.duration_days != item.duration_days {
                    errors.push(FieldError::new(
                        DateField::DurationDays.as_str(),
                        format!(
                            "{}: duration {:?} does not match {:?}..{:?}",
                            item.id, item.duration_days, item.start_date, item.finish_date
                        ),
                    ));
                }
            }
            Err(date_errors) => errors.extend(
                date_errors
                    .into_iter()
                    .map(|e| FieldError::new(e.field, format!("{}: {}", item.id, e.message))),
            ),
        }
        errors
    }

    // ========================================================================
    // Aggregation, ids, migration
    // ========================================================================

    pub async fn recalculate_ancestors(&self, id: &str) -> DomainResult<usize> {
        self.completion.recalculate_ancestors(id).await
    }

    pub async fn recalculate_subtree(&self, root_id: &str) -> DomainResult<RecalculationSummary> {
        self.completion.recalculate_subtree(root_id).await
    }

    pub async fn allocate_id(&self, scope: &IdScope, kind: IdKind) -> DomainResult<String> {
        self.ids.allocate_id(scope, kind).await
    }

    pub async fn allocate_ids(
        &self,
        scope: &IdScope,
        kind: IdKind,
        count: usize,
    ) -> DomainResult<Vec<String>> {
        self.ids.allocate_ids(scope, kind, count).await
    }

    pub async fn release_ids(&self, ids: &[String]) {
        self.ids.release(ids).await
    }

    pub async fn migrate(&self, options: &MigrationOptions) -> DomainResult<MigrationReport> {
        self.migrator.migrate(options).await
    }

    pub async fn validate_ids(&self) -> DomainResult<IdValidationReport> {
        self.migrator.validate_ids().await
    }

    pub async fn restore_snapshot(&self, snapshot: &[WorkItem]) -> DomainResult<()> {
        self.migrator.restore_snapshot(snapshot).await
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryWorkItemRepository, Replacement};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> Vec<WorkItem> {
        let root = WorkItem::new("WP-NOR-001", "Hull", "p1");
        let a = WorkItem::new_child("WP-NOR-001-T01", "Plates", &root);
        let b = WorkItem::new_child("WP-NOR-001-T02", "Welds", &root).with_completion(50);
        let a1 = WorkItem::new_child("WP-NOR-001-T01-T01", "Cut", &a).with_completion(0);
        let a2 = WorkItem::new_child("WP-NOR-001-T01-T02", "Grind", &a).with_completion(0);
        let mut root = root;
        root.completion = 25;
        vec![root, a, b, a1, a2]
    }

    fn setup(items: Vec<WorkItem>) -> (Arc<InMemoryWorkItemRepository>, UpdateOrchestrator) {
        let store = Arc::new(InMemoryWorkItemRepository::with_items(items));
        let orchestrator = UpdateOrchestrator::new(store.clone(), EngineConfig::default()).unwrap();
        (store, orchestrator)
    }

    #[tokio::test]
    async fn test_leaf_completion_propagates() {
        let (store, orch) = setup(sample());
        let changes = FieldChanges {
            completion: Some(100),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001-T01-T01", &changes).await.unwrap();
        assert!(outcome.validation_errors.is_empty());
        assert_eq!(outcome.record.completion, 100);

        assert_eq!(store.get("WP-NOR-001-T01").await.unwrap().completion, 50);
        assert_eq!(store.get("WP-NOR-001").await.unwrap().completion, 50);
    }

    #[tokio::test]
    async fn test_completion_rejections_write_nothing() {
        let (store, orch) = setup(sample());
        let on_parent = FieldChanges {
            completion: Some(80),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001-T01", &on_parent).await.unwrap();
        assert_eq!(outcome.validation_errors[0].field, "completion");

        let too_high = FieldChanges {
            completion: Some(150),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001-T02", &too_high).await.unwrap();
        assert_eq!(outcome.validation_errors.len(), 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_date_edit_derives_and_persists() {
        let (store, orch) = setup(sample());
        let set_duration = FieldChanges {
            duration_days: Some(5),
            start_date: Some("2025-10-12".into()),
            changed: Some(DateField::StartDate),
            ..FieldChanges::default()
        };
        let outcome = orch
            .on_field_changed_at("WP-NOR-001-T02", &set_duration, date(2026, 10, 19))
            .await
            .unwrap();
        let calc = outcome.date_calculation.unwrap();
        assert_eq!(calc.finish_date, Some(date(2025, 10, 16)));
        assert_eq!(calc.derived, Some(DateField::FinishDate));

        let stored = store.get("WP-NOR-001-T02").await.unwrap();
        assert_eq!(stored.finish_date, Some(date(2025, 10, 16)));
        assert_eq!(stored.duration_days, Some(5));

        // finish edit alone is inferred as the changed field
        let move_finish = FieldChanges {
            finish_date: Some("2025-10-20".into()),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001-T02", &move_finish).await.unwrap();
        assert_eq!(outcome.record.start_date, Some(date(2025, 10, 16)));
    }

    #[tokio::test]
    async fn test_bad_dates_rejected() {
        let (store, orch) = setup(sample());
        let unparseable = FieldChanges {
            start_date: Some("next week".into()),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001-T02", &unparseable).await.unwrap();
        assert_eq!(outcome.validation_errors[0].field, "startDate");

        let reversed = FieldChanges {
            start_date: Some("2025-10-16".into()),
            finish_date: Some("2025-10-12".into()),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001-T02", &reversed).await.unwrap();
        assert_eq!(outcome.validation_errors[0].field, "finishDate");
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_milestone_forces_single_day() {
        let mut items = sample();
        items[2].start_date = Some(date(2025, 10, 12));
        items[2].duration_days = Some(4);
        let (_store, orch) = setup(items);

        let changes = FieldChanges {
            is_milestone: Some(true),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001-T02", &changes).await.unwrap();
        assert!(outcome.record.is_milestone);
        assert_eq!(outcome.record.duration_days, Some(1));
        assert_eq!(outcome.record.finish_date, Some(date(2025, 10, 12)));
    }

    #[tokio::test]
    async fn test_create_child_allocates_and_recomputes() {
        let (store, orch) = setup(sample());
        let request = NewWorkItem {
            title: "Paint".into(),
            parent_id: Some("WP-NOR-001".into()),
            ..NewWorkItem::default()
        };
        let created = orch.create_item(&request).await.unwrap();
        assert_eq!(created.id, "WP-NOR-001-T03");
        assert_eq!(created.project_id, "p1");
        // mean(0, 50, 0)
        assert_eq!(store.get("WP-NOR-001").await.unwrap().completion, 17);
    }

    #[tokio::test]
    async fn test_create_top_level_variants() {
        let (_store, orch) = setup(sample());
        let wp = orch
            .create_item(&NewWorkItem {
                title: "Engine".into(),
                project_id: Some("p1".into()),
                project_name: Some("MV Nordic Star".into()),
                start_date: Some("2025-10-30".into()),
                duration_days: Some(3),
                ..NewWorkItem::default()
            })
            .await
            .unwrap();
        assert_eq!(wp.id, "WP-NOR-002");
        assert_eq!(wp.finish_date, Some(date(2025, 11, 1)));

        let daily = orch
            .create_item_at(
                &NewWorkItem {
                    title: "Inspection".into(),
                    project_id: Some("p1".into()),
                    kind: Some(IdKind::DateBased),
                    ..NewWorkItem::default()
                },
                date(2025, 10, 12),
            )
            .await
            .unwrap();
        assert_eq!(daily.id, "121025-001");

        let missing_project = orch
            .create_item(&NewWorkItem {
                title: "Loose".into(),
                ..NewWorkItem::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(missing_project, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_recomputes_detached_parent() {
        let (store, orch) = setup(sample());
        let outcome = orch.delete_item("WP-NOR-001-T01").await.unwrap();
        assert_eq!(outcome.removed_count, 3);
        assert_eq!(store.get("WP-NOR-001").await.unwrap().completion, 50);

        orch.delete_item("WP-NOR-001-T02").await.unwrap();
        assert_eq!(store.get("WP-NOR-001").await.unwrap().completion, 0);
    }

    #[tokio::test]
    async fn test_move_rejects_cycles_and_recomputes() {
        let (store, orch) = setup(sample());
        let err = orch
            .move_item("WP-NOR-001", Some("WP-NOR-001-T01-T01"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ConstraintViolation(_)));

        let mut extra = WorkItem::new("WP-NOR-002", "Deck", "p1");
        extra.completion = 0;
        store.create(&extra).await.unwrap();

        orch.move_item("WP-NOR-001-T02", Some("WP-NOR-002")).await.unwrap();
        assert_eq!(store.get("WP-NOR-002").await.unwrap().completion, 50);
        assert_eq!(store.get("WP-NOR-001").await.unwrap().completion, 0);
    }

    #[tokio::test]
    async fn test_batches_never_collide() {
        let (_store, orch) = setup(vec![]);
        let scope = IdScope::WorkPackage {
            project_id: "p9".into(),
            project_name: Some("Aurora".into()),
            package: None,
        };
        let mut ids = orch.allocate_ids(&scope, IdKind::WorkPackage, 5).await.unwrap();
        ids.extend(orch.allocate_ids(&scope, IdKind::WorkPackage, 5).await.unwrap());
        let distinct: HashSet<&String> = ids.iter().collect();
        assert_eq!(distinct.len(), 10);
    }

    /// Lets another writer take the requested id right before the first create
    struct RacingStore {
        inner: InMemoryWorkItemRepository,
        raced: Mutex<bool>,
    }

    #[async_trait]
    impl Repository<WorkItem> for RacingStore {
        async fn create(&self, entity: &WorkItem) -> DomainResult<WorkItem> {
            let mut raced = self.raced.lock().await;
            if !*raced {
                *raced = true;
                let rival = WorkItem::new(entity.id.clone(), "rival", entity.project_id.clone());
                self.inner.create(&rival).await?;
            }
            self.inner.create(entity).await
        }
        async fn find_by_id(&self, id: &String) -> DomainResult<Option<WorkItem>> {
            self.inner.find_by_id(id).await
        }
        async fn list(&self) -> DomainResult<Vec<WorkItem>> {
            self.inner.list().await
        }
        async fn update(&self, entity: &WorkItem) -> DomainResult<WorkItem> {
            self.inner.update(entity).await
        }
        async fn delete(&self, id: &String) -> DomainResult<()> {
            self.inner.delete(id).await
        }
    }

    #[async_trait]
    impl HierarchyRepository<WorkItem> for RacingStore {
        async fn get_children(&self, parent_id: &String) -> DomainResult<Vec<WorkItem>> {
            self.inner.get_children(parent_id).await
        }
        async fn get_descendants(&self, id: &String) -> DomainResult<Vec<WorkItem>> {
            self.inner.get_descendants(id).await
        }
    }

    #[async_trait]
    impl WorkItemStore for RacingStore {
        async fn list_by(&self, filter: &WorkItemFilter) -> DomainResult<Vec<WorkItem>> {
            self.inner.list_by(filter).await
        }
        async fn patch(&self, id: &str, patch: &WorkItemPatch) -> DomainResult<WorkItem> {
            self.inner.patch(id, patch).await
        }
        async fn replace_batch(&self, replacements: &[Replacement]) -> DomainResult<usize> {
            self.inner.replace_batch(replacements).await
        }
        async fn restore(&self, snapshot: &[WorkItem]) -> DomainResult<()> {
            self.inner.restore(snapshot).await
        }
    }

    #[tokio::test]
    async fn test_create_retries_on_conflict() {
        let store = Arc::new(RacingStore {
            inner: InMemoryWorkItemRepository::new(),
            raced: Mutex::new(false),
        });
        let orch = UpdateOrchestrator::new(store.clone(), EngineConfig::default()).unwrap();
        let created = orch
            .create_item(&NewWorkItem {
                title: "Hull".into(),
                project_id: Some("p1".into()),
                project_name: Some("Nordic".into()),
                ..NewWorkItem::default()
            })
            .await
            .unwrap();
        assert_eq!(created.id, "WP-NOR-002");
        assert_eq!(store.inner.get("WP-NOR-001").await.unwrap().title, "rival");
    }

    #[tokio::test]
    async fn test_import_rejects_duplicates() {
        let (_store, orch) = setup(vec![]);
        let items = vec![WorkItem::new("a", "a", "p1"), WorkItem::new("a", "again", "p1")];
        assert!(matches!(
            orch.import_items(&items).await.unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_import_rejects_broken_records() {
        let (store, orch) = setup(vec![]);

        let overfull = WorkItem::new("WP-NOR-001", "Hull", "p1").with_completion(250);
        let err = orch.import_items(&[overfull]).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref e) if e[0].field == "completion"));

        let mut backwards = WorkItem::new("WP-NOR-002", "Deck", "p1");
        backwards.start_date = Some(date(2025, 10, 16));
        backwards.finish_date = Some(date(2025, 10, 12));
        backwards.duration_days = Some(40);
        let err = orch.import_items(&[backwards]).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref e) if e[0].field == "finishDate"));

        let mut mismatched = WorkItem::new("WP-NOR-003", "Mast", "p1");
        mismatched.start_date = Some(date(2025, 10, 12));
        mismatched.finish_date = Some(date(2025, 10, 16));
        mismatched.duration_days = Some(40);
        let fine = WorkItem::new("WP-NOR-004", "Keel", "p1");
        let err = orch.import_items(&[fine, mismatched]).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref e) if e[0].field == "durationDays"));

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_imported_id_is_reused_after_delete() {
        let (_store, orch) = setup(vec![]);
        let scope = IdScope::WorkPackage {
            project_id: "p1".into(),
            project_name: Some("MV Nordic Star".into()),
            package: None,
        };
        let id = orch.allocate_id(&scope, IdKind::WorkPackage).await.unwrap();
        assert_eq!(id, "WP-NOR-001");

        orch.import_items(&[WorkItem::new(id.clone(), "Hull", "p1")]).await.unwrap();
        orch.delete_item(&id).await.unwrap();

        assert_eq!(orch.allocate_id(&scope, IdKind::WorkPackage).await.unwrap(), "WP-NOR-001");
    }

    #[tokio::test]
    async fn test_clearing_a_date_keeps_it_unset() {
        let mut item = WorkItem::new("WP-NOR-001", "Hull", "p1");
        item.start_date = Some(date(2025, 10, 12));
        item.finish_date = Some(date(2025, 10, 16));
        item.duration_days = Some(5);
        let (store, orch) = setup(vec![item]);

        let clear_start = FieldChanges {
            start_date: Some(String::new()),
            ..FieldChanges::default()
        };
        let outcome = orch.on_field_changed("WP-NOR-001", &clear_start).await.unwrap();
        assert!(outcome.validation_errors.is_empty());
        assert_eq!(outcome.date_calculation.unwrap().derived, None);

        let stored = store.get("WP-NOR-001").await.unwrap();
        assert_eq!(stored.start_date, None);
        assert_eq!(stored.finish_date, Some(date(2025, 10, 16)));
        assert_eq!(stored.duration_days, Some(5));
    }

    #[tokio::test]
    async fn test_import_json_uses_configured_placeholders() {
        let store = Arc::new(InMemoryWorkItemRepository::new());
        let config = EngineConfig {
            unset_date_sentinels: vec!["TBD".to_string()],
            ..EngineConfig::default()
        };
        let orch = UpdateOrchestrator::new(store.clone(), config).unwrap();

        let raw = r#"[{"id":"WP-NOR-001","title":"Hull","projectId":"p1","startDate":"12.10.2025","finishDate":"tbd"}]"#;
        assert_eq!(orch.import_json(raw).await.unwrap(), 1);
        let stored = store.get("WP-NOR-001").await.unwrap();
        assert_eq!(stored.start_date, Some(date(2025, 10, 12)));
        assert_eq!(stored.finish_date, None);

        let bad = r#"[{"id":"WP-NOR-002","title":"Deck","projectId":"p1","startDate":"someday"}]"#;
        let err = orch.import_json(bad).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref e) if e[0].field == "startDate"));
    }

    #[tokio::test]
    async fn test_tree_order() {
        let (_store, orch) = setup(sample());
        let rows = orch.tree(Some("WP-NOR-001-T01")).await.unwrap();
        let ids: Vec<(&str, usize)> = rows.iter().map(|(i, d)| (i.id.as_str(), *d)).collect();
        assert_eq!(
            ids,
            vec![
                ("WP-NOR-001-T01", 0),
                ("WP-NOR-001-T01-T01", 1),
                ("WP-NOR-001-T01-T02", 1)
            ]
        );
    }
}
