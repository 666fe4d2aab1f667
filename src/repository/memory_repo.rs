//! In-Memory Work Item Repository
//!
//! Arena of id → item behind a `tokio::sync::RwLock`. Used for tests, dry
//! runs and whenever no database path is configured. Counts every write so
//! callers can assert that an operation was a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{HierarchyRepository, Replacement, Repository, WorkItemStore};
use crate::domain::{DomainError, DomainResult, WorkItem, WorkItemFilter, WorkItemPatch};

#[derive(Default)]
pub struct InMemoryWorkItemRepository {
    items: RwLock<HashMap<String, WorkItem>>,
    writes: AtomicUsize,
}

impl InMemoryWorkItemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store without counting writes
    pub fn with_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let map = items.into_iter().map(|item| (item.id.clone(), item)).collect();
        Self {
            items: RwLock::new(map),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of records written since construction
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_writes(&self, n: usize) {
        self.writes.fetch_add(n, Ordering::SeqCst);
    }
}

fn sorted(mut items: Vec<WorkItem>) -> Vec<WorkItem> {
    items.sort_by(|a, b| a.id.cmp(&b.id));
    items
}

fn descendant_ids(items: &HashMap<String, WorkItem>, id: &str) -> Vec<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for item in items.values() {
        if let Some(pid) = &item.parent_id {
            children.entry(pid.as_str()).or_default().push(item.id.as_str());
        }
    }

    let mut result = Vec::new();
    let mut seen: HashSet<&str> = HashSet::from([id]);
    let mut to_visit = vec![id];
    while let Some(current) = to_visit.pop() {
        for &child in children.get(current).into_iter().flatten() {
            if seen.insert(child) {
                result.push(child.to_string());
                to_visit.push(child);
            }
        }
    }
    result
}

#[async_trait]
impl Repository<WorkItem> for InMemoryWorkItemRepository {
    async fn create(&self, entity: &WorkItem) -> DomainResult<WorkItem> {
        let mut items = self.items.write().await;
        if items.contains_key(&entity.id) {
            return Err(DomainError::ConcurrencyConflict(format!(
                "Work item {} already exists",
                entity.id
            )));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut item = entity.clone();
        item.created_at = item.created_at.or(Some(now));
        item.updated_at = Some(now);
        items.insert(item.id.clone(), item.clone());
        self.record_writes(1);
        Ok(item)
    }

    async fn find_by_id(&self, id: &String) -> DomainResult<Option<WorkItem>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn list(&self) -> DomainResult<Vec<WorkItem>> {
        Ok(sorted(self.items.read().await.values().cloned().collect()))
    }

    async fn update(&self, entity: &WorkItem) -> DomainResult<WorkItem> {
        let mut items = self.items.write().await;
        let slot = items
            .get_mut(&entity.id)
            .ok_or_else(|| DomainError::NotFound(format!("Work item {} not found", entity.id)))?;

        let mut item = entity.clone();
        item.updated_at = Some(chrono::Utc::now().timestamp_millis());
        *slot = item.clone();
        self.record_writes(1);
        Ok(item)
    }

    async fn delete(&self, id: &String) -> DomainResult<()> {
        let mut items = self.items.write().await;
        if !items.contains_key(id) {
            return Err(DomainError::NotFound(format!("Work item {} not found", id)));
        }

        let doomed = descendant_ids(&items, id);
        for child in &doomed {
            items.remove(child);
        }
        items.remove(id);
        self.record_writes(doomed.len() + 1);
        Ok(())
    }
}

#[async_trait]
impl HierarchyRepository<WorkItem> for InMemoryWorkItemRepository {
    async fn get_children(&self, parent_id: &String) -> DomainResult<Vec<WorkItem>> {
        let items = self.items.read().await;
        Ok(sorted(
            items
                .values()
                .filter(|item| item.parent_id.as_ref() == Some(parent_id))
                .cloned()
                .collect(),
        ))
    }

    async fn get_descendants(&self, id: &String) -> DomainResult<Vec<WorkItem>> {
        let items = self.items.read().await;
        let found = descendant_ids(&items, id)
            .into_iter()
            .filter_map(|child| items.get(&child).cloned())
            .collect();
        Ok(sorted(found))
    }
}

#[async_trait]
impl WorkItemStore for InMemoryWorkItemRepository {
    async fn list_by(&self, filter: &WorkItemFilter) -> DomainResult<Vec<WorkItem>> {
        let items = self.items.read().await;
        Ok(sorted(
            items.values().filter(|item| filter.matches(item)).cloned().collect(),
        ))
    }

    async fn patch(&self, id: &str, patch: &WorkItemPatch) -> DomainResult<WorkItem> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("Work item {} not found", id)))?;

        patch.apply(item);
        item.updated_at = Some(chrono::Utc::now().timestamp_millis());
        self.record_writes(1);
        Ok(item.clone())
    }

    async fn replace_batch(&self, replacements: &[Replacement]) -> DomainResult<usize> {
        let mut items = self.items.write().await;

        // Validate against the post-batch state before touching anything
        let mut removed: HashSet<&str> = HashSet::new();
        for r in replacements {
            if !items.contains_key(&r.old_id) {
                return Err(DomainError::NotFound(format!("Work item {} not found", r.old_id)));
            }
            removed.insert(r.old_id.as_str());
        }
        let mut inserted: HashSet<&str> = HashSet::new();
        for r in replacements {
            let id = r.record.id.as_str();
            let clashes_with_kept = items.contains_key(id) && !removed.contains(id);
            if clashes_with_kept || !inserted.insert(id) {
                return Err(DomainError::ConstraintViolation(format!(
                    "Id {} is already taken",
                    id
                )));
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        for r in replacements {
            items.remove(&r.old_id);
        }
        for r in replacements {
            let mut record = r.record.clone();
            record.updated_at = Some(now);
            items.insert(record.id.clone(), record);
        }
        self.record_writes(replacements.len());
        Ok(replacements.len())
    }

    async fn restore(&self, snapshot: &[WorkItem]) -> DomainResult<()> {
        let mut map = HashMap::with_capacity(snapshot.len());
        for item in snapshot {
            if map.insert(item.id.clone(), item.clone()).is_some() {
                return Err(DomainError::ConstraintViolation(format!(
                    "Snapshot repeats id {}",
                    item.id
                )));
            }
        }
        *self.items.write().await = map;
        self.record_writes(snapshot.len());
        Ok(())
    }
}
