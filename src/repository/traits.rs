//! Repository Layer - Core Traits
//!
//! Defines the abstract interfaces for data access.
//! Implementations can use SQLite, in-memory, etc.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, DomainResult, Entity, WorkItem, WorkItemFilter, WorkItemPatch};

/// Core repository trait for CRUD operations
///
/// Generic over any Entity type.
/// All operations are async to support various backends.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Create a new entity. An existing id is a `ConcurrencyConflict`.
    async fn create(&self, entity: &T) -> DomainResult<T>;

    /// Find entity by ID
    async fn find_by_id(&self, id: &T::Id) -> DomainResult<Option<T>>;

    /// List all entities
    async fn list(&self) -> DomainResult<Vec<T>>;

    /// Replace an existing entity
    async fn update(&self, entity: &T) -> DomainResult<T>;

    /// Delete entity by ID together with everything below it
    async fn delete(&self, id: &T::Id) -> DomainResult<()>;
}

/// Parent/child lookups
#[async_trait]
pub trait HierarchyRepository<T: Entity>: Repository<T> {
    /// Direct children, ordered by id
    async fn get_children(&self, parent_id: &T::Id) -> DomainResult<Vec<T>>;

    /// All descendants (not including `id` itself). Terminates on cyclic data.
    async fn get_descendants(&self, id: &T::Id) -> DomainResult<Vec<T>>;
}

/// Rewrite of one stored record, possibly under a new id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replacement {
    pub old_id: String,
    pub record: WorkItem,
}

/// The record-store contract the engine consumes
#[async_trait]
pub trait WorkItemStore: HierarchyRepository<WorkItem> {
    /// Items matching `filter`, ordered by id
    async fn list_by(&self, filter: &WorkItemFilter) -> DomainResult<Vec<WorkItem>>;

    /// Atomic read-modify-write of a single record
    async fn patch(&self, id: &str, patch: &WorkItemPatch) -> DomainResult<WorkItem>;

    /// Apply every replacement or none. Returns the number of records written.
    async fn replace_batch(&self, replacements: &[Replacement]) -> DomainResult<usize>;

    /// Replace the whole store content with `snapshot`
    async fn restore(&self, snapshot: &[WorkItem]) -> DomainResult<()>;

    /// `find_by_id` that treats absence as an error
    async fn get(&self, id: &str) -> DomainResult<WorkItem> {
        self.find_by_id(&id.to_string())
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Work item {} not found", id)))
    }
}
