//! Completion Aggregation
//!
//! A parent's completion is the rounded mean of its direct children,
//! resolved recursively from fresh store reads. Leaves are authoritative.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{mean_rounded, DomainError, DomainResult, WorkItem, WorkItemPatch, WorkTree};
use crate::repository::{HierarchyRepository, WorkItemStore};

/// Result of a subtree recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationSummary {
    pub updated_count: usize,
}

pub struct CompletionAggregator {
    store: Arc<dyn WorkItemStore>,
    max_depth: usize,
}

impl CompletionAggregator {
    pub fn new(store: Arc<dyn WorkItemStore>, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Recompute the ancestors of `id`, bottom-up, stopping at the first
    /// level whose stored value is already right. Returns the number of writes.
    pub async fn recalculate_ancestors(&self, id: &str) -> DomainResult<usize> {
        let item = self.store.get(id).await?;
        match item.parent_id {
            Some(parent_id) => self.propagate_from(&parent_id).await,
            None => Ok(0),
        }
    }

    /// Recompute `id` itself as a parent, then keep walking up.
    /// A node left without children drops to 0.
    pub async fn propagate_from(&self, id: &str) -> DomainResult<usize> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = Some(id.to_string());
        let mut written = 0;

        while let Some(node_id) = current {
            if !visited.insert(node_id.clone()) {
                return Err(DomainError::ConstraintViolation(format!(
                    "Parent cycle detected at work item {}",
                    node_id
                )));
            }
            if visited.len() > self.max_depth {
                return Err(DomainError::ConstraintViolation(format!(
                    "Ancestor chain of {} is longer than {} levels",
                    id, self.max_depth
                )));
            }

            let node = self.store.get(&node_id).await?;
            let computed = self.compute_from_children(&node).await?;
            if computed == node.completion {
                log::debug!("Completion of {} unchanged at {}", node_id, computed);
                break;
            }

            self.store
                .patch(&node_id, &WorkItemPatch::completion(computed))
                .await?;
            log::info!(
                "Completion of {} updated {} -> {}",
                node_id,
                node.completion,
                computed
            );
            written += 1;
            current = node.parent_id;
        }

        Ok(written)
    }

    /// Resolve every node under `root_id` and write the parents whose stored
    /// value differs. A consistent subtree costs zero writes.
    pub async fn recalculate_subtree(&self, root_id: &str) -> DomainResult<RecalculationSummary> {
        let root = self.store.get(root_id).await?;
        let mut items = self.store.get_descendants(&root_id.to_string()).await?;
        items.push(root);

        let tree = WorkTree::from_items(items);
        let resolved = tree.resolve_all(root_id, self.max_depth)?;

        let mut stale: Vec<(&String, u8)> = resolved
            .iter()
            .filter(|(id, value)| {
                tree.has_children(id)
                    && tree.get(id).map(|item| item.completion) != Some(**value)
            })
            .map(|(id, value)| (id, *value))
            .collect();
        stale.sort();

        for (id, value) in &stale {
            self.store.patch(id, &WorkItemPatch::completion(*value)).await?;
            log::info!("Completion of {} recalculated to {}", id, value);
        }

        log::info!(
            "Subtree {} recalculated: {} of {} nodes updated",
            root_id,
            stale.len(),
            tree.len()
        );
        Ok(RecalculationSummary {
            updated_count: stale.len(),
        })
    }

    async fn compute_from_children(&self, node: &WorkItem) -> DomainResult<u8> {
        let parent_id = node.id.as_str();
        let descendants = self.store.get_descendants(&node.id).await?;
        if let Some(own_parent) = &node.parent_id {
            if descendants.iter().any(|item| &item.id == own_parent) {
                return Err(DomainError::ConstraintViolation(format!(
                    "Parent cycle detected at work item {}",
                    parent_id
                )));
            }
        }
        let direct: Vec<String> = descendants
            .iter()
            .filter(|item| item.parent_id.as_deref() == Some(parent_id))
            .map(|item| item.id.clone())
            .collect();
        if direct.is_empty() {
            return Ok(0);
        }

        let tree = WorkTree::from_items(descendants);
        let mut values = Vec::with_capacity(direct.len());
        for child_id in &direct {
            values.push(tree.resolve_completion(child_id, self.max_depth)?);
        }
        Ok(mean_rounded(&values))
    }
}
