//! Id Allocation
//!
//! Issues structured ids with gap-filling sequencing. Each batch is computed
//! from one store read plus the ids this process has handed out but not yet
//! seen persisted.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::project_code::ProjectCodeDeriver;
use super::sequence::fill_sequences;
use crate::domain::{DomainError, DomainResult, IdKind, SequenceSpec, WorkItemFilter};
use crate::repository::WorkItemStore;

/// Where a new id will live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IdScope {
    /// Date-based ids issued on one day
    Daily { date: NaiveDate },
    /// Top-level items of a project
    WorkPackage {
        #[serde(rename = "projectId")]
        project_id: String,
        /// Name the project code is derived from; defaults to the id
        #[serde(rename = "projectName", default)]
        project_name: Option<String>,
        #[serde(default)]
        package: Option<String>,
    },
    /// Tasks directly under one parent
    Subordinate {
        #[serde(rename = "parentId")]
        parent_id: String,
    },
}

pub struct IdAllocator {
    store: Arc<dyn WorkItemStore>,
    codes: ProjectCodeDeriver,
    reserved: Mutex<HashSet<String>>,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn WorkItemStore>, codes: ProjectCodeDeriver) -> Self {
        Self {
            store,
            codes,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn project_codes(&self) -> &ProjectCodeDeriver {
        &self.codes
    }

    pub async fn allocate_id(&self, scope: &IdScope, kind: IdKind) -> DomainResult<String> {
        let mut ids = self.allocate_ids(scope, kind, 1).await?;
        ids.pop()
            .ok_or_else(|| DomainError::Internal("Allocator returned no id".to_string()))
    }

    /// `count` distinct ids, gaps first. Reserved until `confirm`/`release`
    /// or until a later batch finds them in the store.
    pub async fn allocate_ids(
        &self,
        scope: &IdScope,
        kind: IdKind,
        count: usize,
    ) -> DomainResult<Vec<String>> {
        if count == 0 {
            return Err(DomainError::validation("count", "must be at least 1"));
        }
        let spec = self.sequence_spec(scope, kind).await?;

        let mut reserved = self.reserved.lock().await;
        let existing = self
            .store
            .list_by(&WorkItemFilter::id_prefix(spec.prefix.clone()))
            .await?;
        // Persisted ids are guarded by the store from here on
        let stored: HashSet<&str> = existing.iter().map(|item| item.id.as_str()).collect();
        reserved.retain(|id| !stored.contains(id.as_str()));

        let taken: BTreeSet<u32> = existing
            .iter()
            .map(|item| item.id.as_str())
            .chain(reserved.iter().map(String::as_str))
            .filter_map(|id| spec.parse_suffix(id))
            .collect();

        let seqs = fill_sequences(&taken, count, spec.max).ok_or_else(|| {
            DomainError::ConstraintViolation(format!(
                "No room for {} more ids under {} (limit {})",
                count, spec.prefix, spec.max
            ))
        })?;

        let ids: Vec<String> = seqs.into_iter().map(|seq| spec.format(seq)).collect();
        reserved.extend(ids.iter().cloned());
        log::info!("Allocated {} id(s) under {}: {:?}", ids.len(), spec.prefix, ids);
        Ok(ids)
    }

    /// The id is now persisted; the store itself guards it from here on
    pub async fn confirm(&self, id: &str) {
        self.reserved.lock().await.remove(id);
    }

    /// Give unused ids back to their scope
    pub async fn release(&self, ids: &[String]) {
        let mut reserved = self.reserved.lock().await;
        for id in ids {
            reserved.remove(id);
        }
    }

    pub async fn reserved_count(&self) -> usize {
        self.reserved.lock().await.len()
    }

    async fn sequence_spec(&self, scope: &IdScope, kind: IdKind) -> DomainResult<SequenceSpec> {
        match (scope, kind) {
            (IdScope::Daily { date }, IdKind::DateBased) => Ok(SequenceSpec::date_based(*date)),
            (
                IdScope::WorkPackage {
                    project_id,
                    project_name,
                    ..
                },
                IdKind::WorkPackage,
            ) => {
                let name = project_name.as_deref().unwrap_or(project_id);
                Ok(SequenceSpec::work_package(&self.codes.derive(name)))
            }
            (IdScope::Subordinate { parent_id }, IdKind::Task) => {
                self.store.get(parent_id).await?;
                Ok(SequenceSpec::task(parent_id))
            }
            (scope, kind) => Err(DomainError::validation(
                "kind",
                format!("{:?} ids cannot be issued in scope {:?}", kind, scope),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::WorkItem;
    use crate::repository::{InMemoryWorkItemRepository, Repository};

    fn allocator(items: Vec<WorkItem>) -> (Arc<InMemoryWorkItemRepository>, IdAllocator) {
        let store = Arc::new(InMemoryWorkItemRepository::with_items(items));
        let codes = ProjectCodeDeriver::from_config(&EngineConfig::default()).unwrap();
        (store.clone(), IdAllocator::new(store, codes))
    }

    fn nordic() -> IdScope {
        IdScope::WorkPackage {
            project_id: "p1".into(),
            project_name: Some("MV Nordic Star".into()),
            package: None,
        }
    }

    #[tokio::test]
    async fn test_fills_gap_in_scope() {
        let (_store, alloc) = allocator(vec![
            WorkItem::new("WP-NOR-001", "a", "p1"),
            WorkItem::new("WP-NOR-003", "b", "p1"),
            WorkItem::new("WP-NOR-004", "c", "p1"),
            WorkItem::new("WP-ABC-002", "other project", "p2"),
        ]);
        assert_eq!(alloc.allocate_id(&nordic(), IdKind::WorkPackage).await.unwrap(), "WP-NOR-002");
        assert_eq!(alloc.allocate_id(&nordic(), IdKind::WorkPackage).await.unwrap(), "WP-NOR-005");
    }

    #[tokio::test]
    async fn test_back_to_back_batches_are_distinct() {
        let (_store, alloc) = allocator(vec![]);
        let mut all = alloc.allocate_ids(&nordic(), IdKind::WorkPackage, 5).await.unwrap();
        all.extend(alloc.allocate_ids(&nordic(), IdKind::WorkPackage, 5).await.unwrap());

        let distinct: HashSet<&String> = all.iter().collect();
        assert_eq!(distinct.len(), 10);
        assert_eq!(all[9], "WP-NOR-010");
    }

    #[tokio::test]
    async fn test_confirm_and_release() {
        let (store, alloc) = allocator(vec![]);
        let scope = IdScope::Daily {
            date: NaiveDate::from_ymd_opt(2025, 10, 12).unwrap(),
        };
        let ids = alloc.allocate_ids(&scope, IdKind::DateBased, 2).await.unwrap();
        assert_eq!(ids, vec!["121025-001", "121025-002"]);

        store.create(&WorkItem::new(ids[0].clone(), "a", "p1")).await.unwrap();
        alloc.confirm(&ids[0]).await;
        alloc.release(&ids[1..]).await;
        assert_eq!(alloc.reserved_count().await, 0);

        assert_eq!(alloc.allocate_id(&scope, IdKind::DateBased).await.unwrap(), "121025-002");
    }

    #[tokio::test]
    async fn test_persisted_reservation_is_dropped() {
        let (store, alloc) = allocator(vec![]);
        let first = alloc.allocate_id(&nordic(), IdKind::WorkPackage).await.unwrap();
        assert_eq!(first, "WP-NOR-001");

        // Stored without going through confirm
        store.create(&WorkItem::new(first.clone(), "a", "p1")).await.unwrap();
        let second = alloc.allocate_id(&nordic(), IdKind::WorkPackage).await.unwrap();
        assert_eq!(second, "WP-NOR-002");
        assert_eq!(alloc.reserved_count().await, 1);
        alloc.release(&[second]).await;

        store.delete(&first).await.unwrap();
        assert_eq!(alloc.allocate_id(&nordic(), IdKind::WorkPackage).await.unwrap(), "WP-NOR-001");
    }

    #[tokio::test]
    async fn test_deleted_number_reused_before_extending() {
        let (store, alloc) = allocator(vec![
            WorkItem::new("WP-NOR-001", "a", "p1"),
            WorkItem::new("WP-NOR-002", "b", "p1"),
            WorkItem::new("WP-NOR-003", "c", "p1"),
        ]);
        assert_eq!(alloc.allocate_id(&nordic(), IdKind::WorkPackage).await.unwrap(), "WP-NOR-004");

        store.delete(&"WP-NOR-002".to_string()).await.unwrap();
        let ids = alloc.allocate_ids(&nordic(), IdKind::WorkPackage, 2).await.unwrap();
        assert_eq!(ids, vec!["WP-NOR-002", "WP-NOR-005"]);
    }

    #[tokio::test]
    async fn test_task_ids_need_existing_parent() {
        let parent = WorkItem::new("WP-NOR-001", "Hull", "p1");
        let child = WorkItem::new_child("WP-NOR-001-T01", "Plates", &parent);
        let grandchild = WorkItem::new_child("WP-NOR-001-T01-T01", "Cut", &child);
        let (_store, alloc) = allocator(vec![parent, child, grandchild]);

        let scope = IdScope::Subordinate { parent_id: "WP-NOR-001".into() };
        assert_eq!(alloc.allocate_id(&scope, IdKind::Task).await.unwrap(), "WP-NOR-001-T02");

        let missing = IdScope::Subordinate { parent_id: "WP-XXX-001".into() };
        assert!(matches!(
            alloc.allocate_id(&missing, IdKind::Task).await.unwrap_err(),
            DomainError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_kind_must_match_scope() {
        let (_store, alloc) = allocator(vec![]);
        let err = alloc.allocate_id(&nordic(), IdKind::Task).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_exhausted_task_scope() {
        let parent = WorkItem::new("WP-NOR-001", "Hull", "p1");
        let mut items = vec![parent.clone()];
        for seq in 1..=99 {
            items.push(WorkItem::new_child(format!("WP-NOR-001-T{:02}", seq), "t", &parent));
        }
        let (_store, alloc) = allocator(items);
        let scope = IdScope::Subordinate { parent_id: "WP-NOR-001".into() };
        assert!(matches!(
            alloc.allocate_id(&scope, IdKind::Task).await.unwrap_err(),
            DomainError::ConstraintViolation(_)
        ));
    }

    #[test]
    fn test_scope_json_shape() {
        let scope: IdScope = serde_json::from_str(
            r#"{"type":"workPackage","projectId":"p1","projectName":"MV Nordic"}"#,
        )
        .unwrap();
        assert_eq!(
            scope,
            IdScope::WorkPackage {
                project_id: "p1".into(),
                project_name: Some("MV Nordic".into()),
                package: None
            }
        );
    }
}
